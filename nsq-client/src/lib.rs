// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Client for the NSQ TCP protocol (V2).
//!
//! Provides a synchronous-per-message [`Producer`] and a channel
//! [`Consumer`] on top of a single nsqd connection each.
//!
//! # Example
//!
//! ```ignore
//! use nsq_client::{Config, Producer};
//!
//! let mut producer = Producer::connect("127.0.0.1:4150", Config::default()).await?;
//! producer.publish("hello", "hello => 1").await?;
//! producer.stop().await?;
//! ```

pub mod config;
mod conn;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod protocol;

#[cfg(test)]
mod test_support;

pub use config::{Config, ConfigBuilder, DEFAULT_NSQD_ADDRESS};
pub use consumer::{Consumer, Event, Subscription};
pub use error::{BrokerError, NsqError, Result, WireError};
pub use producer::{Producer, ProducerState, Publish};
pub use protocol::{Message, MessageId};
