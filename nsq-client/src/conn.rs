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

//! A single framed connection to nsqd.

use bytes::{Bytes, BytesMut};
use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{AuthResponse, Config, IdentifyResponse};
use crate::error::{BrokerError, WireError};
use crate::protocol::{self, Command, Frame, MAGIC_V2, OK};

/// Framed, handshaken connection over any byte stream.
pub(crate) struct Connection<S> {
    stream: S,
    read_buf: BytesMut,
    write_buf: BytesMut,
    max_frame_size: usize,
    identify: IdentifyResponse,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Send the protocol magic and `IDENTIFY`, then `AUTH` if nsqd asks for it.
    pub(crate) async fn handshake(stream: S, config: &Config) -> Result<Self, WireError> {
        let mut conn = Self {
            stream,
            read_buf: BytesMut::with_capacity(8192),
            write_buf: BytesMut::with_capacity(1024),
            max_frame_size: config.max_frame_size,
            identify: IdentifyResponse::default(),
        };

        conn.write_buf.extend_from_slice(MAGIC_V2);
        let body = serde_json::to_vec(&config.identify_body())?;
        let data = conn.request(&Command::Identify(Bytes::from(body))).await?;

        // nsqd answers a plain OK when feature negotiation is unsupported.
        if &data[..] != OK {
            conn.identify = serde_json::from_slice(&data)?;
        }
        debug!(
            "IDENTIFY negotiated (version={}, max_rdy_count={}, auth_required={})",
            conn.identify.version, conn.identify.max_rdy_count, conn.identify.auth_required
        );

        if conn.identify.auth_required {
            let secret = config.auth_secret.as_deref().ok_or(WireError::AuthRequired)?;
            let data = conn
                .request(&Command::Auth(Bytes::copy_from_slice(secret.as_bytes())))
                .await?;
            let auth: AuthResponse = serde_json::from_slice(&data)?;
            info!(
                "Authenticated as '{}' ({} permissions)",
                auth.identity, auth.permission_count
            );
        }

        Ok(conn)
    }

    pub(crate) fn identify(&self) -> &IdentifyResponse {
        &self.identify
    }

    /// Write a command and flush it.
    pub(crate) async fn send(&mut self, command: &Command) -> Result<(), WireError> {
        command.encode(&mut self.write_buf);
        let result = self.stream.write_all(&self.write_buf).await;
        self.write_buf.clear();
        result?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next frame.
    ///
    /// Cancel-safe: partially received frames stay buffered for the next call.
    pub(crate) async fn read_frame(&mut self) -> Result<Frame, WireError> {
        loop {
            if let Some(frame) = protocol::parse_frame(&mut self.read_buf, self.max_frame_size)? {
                return Ok(frame);
            }
            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                return Err(WireError::PeerClosed);
            }
        }
    }

    /// Send a command and wait for its response, answering heartbeats on the way.
    pub(crate) async fn request(&mut self, command: &Command) -> Result<Bytes, WireError> {
        self.send(command).await?;
        loop {
            match self.read_frame().await? {
                frame if frame.is_heartbeat() => {
                    debug!("Heartbeat received while awaiting {} response", command.name());
                    self.send(&Command::Nop).await?;
                }
                Frame::Response(data) => return Ok(data),
                Frame::Error(data) => return Err(WireError::Broker(BrokerError::parse(&data))),
                other => return Err(WireError::UnexpectedFrame(other.describe())),
            }
        }
    }

    /// Send a command that nsqd acknowledges with `OK`.
    pub(crate) async fn request_ok(&mut self, command: &Command) -> Result<(), WireError> {
        let data = self.request(command).await?;
        protocol::expect_ok(Frame::Response(data))
    }

    pub(crate) async fn shutdown(&mut self) -> Result<(), WireError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
