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

//! Error types for the NSQ client.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for NSQ client operations.
pub type Result<T> = std::result::Result<T, NsqError>;

/// Errors surfaced by [`Producer`](crate::Producer) and
/// [`Consumer`](crate::Consumer) operations.
#[derive(Error, Debug)]
pub enum NsqError {
    /// nsqd was unreachable or rejected the handshake.
    #[error("failed to connect to nsqd at {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: WireError,
    },

    /// nsqd rejected a message, or the connection failed while publishing.
    #[error("failed to publish to topic '{topic}': {source}")]
    Publish {
        topic: String,
        #[source]
        source: WireError,
    },

    /// nsqd rejected a subscription.
    #[error("failed to subscribe to '{topic}/{channel}': {source}")]
    Subscribe {
        topic: String,
        channel: String,
        #[source]
        source: WireError,
    },

    #[error("invalid topic name: {0:?}")]
    InvalidTopic(String),

    #[error("invalid channel name: {0:?}")]
    InvalidChannel(String),

    #[error("multi-publish requires at least one message")]
    EmptyBatch,

    /// The producer has already been stopped.
    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl NsqError {
    /// The broker error carried by this error, if nsqd answered with an
    /// `E_*` frame.
    pub fn broker_error(&self) -> Option<&BrokerError> {
        let source = match self {
            Self::Connection { source, .. }
            | Self::Publish { source, .. }
            | Self::Subscribe { source, .. }
            | Self::Wire(source) => source,
            _ => return None,
        };
        match source {
            WireError::Broker(e) => Some(e),
            _ => None,
        }
    }
}

/// Transport and framing errors on a single nsqd connection.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("peer connection closed")]
    PeerClosed,

    #[error("frame too large: {size} bytes (max: {max_size})")]
    TooLarge { size: usize, max_size: usize },

    #[error("invalid frame length: {length}")]
    InvalidLength { length: u32 },

    #[error("unknown frame type: {0}")]
    UnknownFrameType(i32),

    #[error("malformed message frame: {0} bytes")]
    MalformedMessage(usize),

    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("authentication required but no auth secret configured")]
    AuthRequired,

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// An `E_*` error frame sent by nsqd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerError {
    /// Error code, e.g. `E_BAD_TOPIC`.
    pub code: String,
    pub description: String,
}

impl BrokerError {
    /// Parse the body of an error frame (`E_CODE description`).
    pub fn parse(data: &[u8]) -> Self {
        let text = String::from_utf8_lossy(data);
        let text = text.trim();
        match text.split_once(' ') {
            Some((code, description)) => Self {
                code: code.to_string(),
                description: description.trim().to_string(),
            },
            None => Self {
                code: text.to_string(),
                description: String::new(),
            },
        }
    }

    /// nsqd closes the connection after these errors.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.code.as_str(),
            "E_FIN_FAILED" | "E_REQ_FAILED" | "E_TOUCH_FAILED"
        )
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.description)
        }
    }
}

impl std::error::Error for BrokerError {}
