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

//! Topic routing for NSQ consumers.
//!
//! Routes are drawn once, grouped by `(topic, channel)`, and each group is
//! served by its own listener task that hands every message to the group's
//! handlers.
//!
//! # Example
//!
//! ```ignore
//! use nsq_client::Config;
//! use nsq_router::Router;
//!
//! let mut router = Router::new("127.0.0.1:4150", Config::default());
//! router.draw(|routes| {
//!     routes.topic("hello", |topic| {
//!         topic.consumer(HelloWorld);
//!     })?;
//!     Ok(())
//! })?;
//! router.start().await?;
//! ```

pub mod error;
pub mod router;
pub mod routes;

pub use error::RouterError;
pub use router::Router;
pub use routes::{Handler, Route, RouteKey, RouteSet, TopicRoute, DEFAULT_CHANNEL};
