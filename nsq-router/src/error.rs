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

use nsq_client::NsqError;
use thiserror::Error;

/// Errors raised while drawing routes or starting a [`Router`](crate::Router).
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("topic '{0}' has no consumer")]
    MissingHandler(String),

    #[error("no routes drawn")]
    NoRoutes,

    #[error("router already started")]
    AlreadyStarted,

    #[error(transparent)]
    Client(#[from] NsqError),
}
