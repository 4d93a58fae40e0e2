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

//! Connection configuration shared by producers and consumers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default nsqd TCP address.
pub const DEFAULT_NSQD_ADDRESS: &str = "127.0.0.1:4150";

/// Options sent to nsqd during `IDENTIFY` and used to drive a connection.
///
/// `Config::default()` is what a bare producer needs; every field can be
/// overridden through [`Config::builder`] or deserialized from a config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier reported to nsqd. Defaults to `"nsq-client-{uuid}"`.
    pub client_id: String,
    /// Hostname reported to nsqd. Defaults to the system hostname.
    pub hostname: String,
    /// User agent reported to nsqd.
    pub user_agent: String,
    /// Heartbeat interval requested from nsqd, in milliseconds (default: 30000).
    pub heartbeat_interval_ms: u64,
    /// Per-connection message timeout override, in milliseconds.
    pub msg_timeout_ms: Option<u64>,
    /// Number of messages a consumer allows in flight (default: 1).
    pub max_in_flight: u32,
    /// Attempts after which a failing message is given up on (default: 5).
    pub max_attempts: u16,
    /// Delay passed with `REQ` when a handler fails, in milliseconds (default: 90000).
    pub requeue_delay_ms: u64,
    /// Largest frame accepted from nsqd, in bytes (default: 4 MiB).
    pub max_frame_size: usize,
    /// Secret sent with `AUTH` when nsqd requires authentication.
    pub auth_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: format!("nsq-client-{}", uuid::Uuid::new_v4()),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string()),
            user_agent: concat!("nsq-client/", env!("CARGO_PKG_VERSION")).to_string(),
            heartbeat_interval_ms: 30_000,
            msg_timeout_ms: None,
            max_in_flight: 1,
            max_attempts: 5,
            requeue_delay_ms: 90_000,
            max_frame_size: 4 * 1024 * 1024,
            auth_secret: None,
        }
    }
}

impl Config {
    /// Start building a config from the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }

    /// Body of the `IDENTIFY` command.
    pub(crate) fn identify_body(&self) -> IdentifyBody<'_> {
        IdentifyBody {
            client_id: &self.client_id,
            hostname: &self.hostname,
            user_agent: &self.user_agent,
            feature_negotiation: true,
            heartbeat_interval: i64::try_from(self.heartbeat_interval_ms).unwrap_or(i64::MAX),
            msg_timeout: self.msg_timeout_ms,
            tls_v1: false,
            snappy: false,
            deflate: false,
        }
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = hostname.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval_ms = millis(interval);
        self
    }

    pub fn msg_timeout(mut self, timeout: Duration) -> Self {
        self.config.msg_timeout_ms = Some(millis(timeout));
        self
    }

    pub fn max_in_flight(mut self, max_in_flight: u32) -> Self {
        self.config.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u16) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn requeue_delay(mut self, delay: Duration) -> Self {
        self.config.requeue_delay_ms = millis(delay);
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn auth_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.auth_secret = Some(secret.into());
        self
    }

    /// Build the config.
    pub fn build(self) -> Config {
        self.config
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Serialize)]
pub(crate) struct IdentifyBody<'a> {
    client_id: &'a str,
    hostname: &'a str,
    user_agent: &'a str,
    feature_negotiation: bool,
    heartbeat_interval: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    msg_timeout: Option<u64>,
    tls_v1: bool,
    snappy: bool,
    deflate: bool,
}

/// Features negotiated by nsqd in reply to `IDENTIFY`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentifyResponse {
    pub max_rdy_count: i64,
    pub version: String,
    pub max_msg_timeout: i64,
    pub msg_timeout: i64,
    pub tls_v1: bool,
    pub deflate: bool,
    pub snappy: bool,
    pub auth_required: bool,
}

/// Reply to a successful `AUTH`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthResponse {
    pub identity: String,
    pub identity_url: String,
    pub permission_count: i64,
}
