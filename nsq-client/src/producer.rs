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

//! Producer connection publishing messages to a single nsqd.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::conn::Connection;
use crate::error::{NsqError, Result, WireError};
use crate::protocol::{validate_topic_name, Command};

/// Anything messages can be published through.
///
/// Implemented by [`Producer`]; callers that drive a publish loop take this
/// trait so the transport can be replaced.
#[async_trait]
pub trait Publish: Send {
    /// Publish one message and wait for nsqd to accept it.
    async fn publish(&mut self, topic: &str, body: Bytes) -> Result<()>;

    /// Release the connection. Further publishes fail.
    async fn stop(&mut self) -> Result<()>;
}

/// Lifecycle of a [`Producer`].
///
/// A producer only exists once connected, so the initial disconnected state
/// is the absence of a `Producer` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Connected,
    Finished,
}

/// A connection to one nsqd that publishes messages synchronously: every
/// publish waits for the broker's `OK` before returning.
pub struct Producer<S = TcpStream> {
    addr: String,
    conn: Option<Connection<S>>,
}

impl Producer<TcpStream> {
    /// Connect to nsqd at `addr` and perform the protocol handshake.
    pub async fn connect(addr: &str, config: Config) -> Result<Self> {
        info!("Connecting producer to nsqd at {addr}");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NsqError::Connection {
                addr: addr.to_string(),
                source: WireError::Io(e),
            })?;
        stream.set_nodelay(true).map_err(|e| NsqError::Connection {
            addr: addr.to_string(),
            source: WireError::Io(e),
        })?;
        Self::with_stream(addr, stream, config).await
    }
}

impl<S> Producer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Perform the handshake over an already established stream.
    pub async fn with_stream(addr: &str, stream: S, config: Config) -> Result<Self> {
        let conn = Connection::handshake(stream, &config)
            .await
            .map_err(|source| NsqError::Connection {
                addr: addr.to_string(),
                source,
            })?;
        info!(
            "Producer connected to nsqd at {addr} (version={})",
            conn.identify().version
        );

        Ok(Self {
            addr: addr.to_string(),
            conn: Some(conn),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn state(&self) -> ProducerState {
        if self.conn.is_some() {
            ProducerState::Connected
        } else {
            ProducerState::Finished
        }
    }

    /// Publish one message to `topic`.
    pub async fn publish(&mut self, topic: &str, body: impl Into<Bytes>) -> Result<()> {
        let command = Command::Publish {
            topic: topic.to_string(),
            body: body.into(),
        };
        self.send_publish(topic, command).await
    }

    /// Publish a batch of messages to `topic` atomically.
    pub async fn multi_publish(&mut self, topic: &str, bodies: Vec<Bytes>) -> Result<()> {
        if bodies.is_empty() {
            return Err(NsqError::EmptyBatch);
        }
        let command = Command::MultiPublish {
            topic: topic.to_string(),
            bodies,
        };
        self.send_publish(topic, command).await
    }

    /// Publish one message that nsqd holds back for `delay` before delivery.
    pub async fn deferred_publish(
        &mut self,
        topic: &str,
        delay: Duration,
        body: impl Into<Bytes>,
    ) -> Result<()> {
        let command = Command::DeferredPublish {
            topic: topic.to_string(),
            delay,
            body: body.into(),
        };
        self.send_publish(topic, command).await
    }

    async fn send_publish(&mut self, topic: &str, command: Command) -> Result<()> {
        validate_topic_name(topic)?;
        let conn = self.conn.as_mut().ok_or(NsqError::NotConnected)?;

        debug!("Sending {} to topic '{topic}'", command.name());
        conn.request_ok(&command)
            .await
            .map_err(|source| NsqError::Publish {
                topic: topic.to_string(),
                source,
            })
    }

    /// Close the connection. Calling `stop` twice is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            info!("Stopping producer for nsqd at {}", self.addr);
            conn.shutdown().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S> Publish for Producer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn publish(&mut self, topic: &str, body: Bytes) -> Result<()> {
        Producer::publish(self, topic, body).await
    }

    async fn stop(&mut self) -> Result<()> {
        Producer::stop(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeNsqd;
    use tokio::io::{duplex, DuplexStream};
    use tokio::net::TcpListener;

    async fn connected(client: DuplexStream) -> Producer<DuplexStream> {
        Producer::with_stream("127.0.0.1:4150", client, Config::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_in_order() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            nsqd.handshake().await;
            let mut received = Vec::new();
            for _ in 0..3 {
                let (line, body) = nsqd.read_command_with_body().await;
                assert_eq!(line, "PUB hello");
                received.push(String::from_utf8(body).unwrap());
                nsqd.respond(b"OK").await;
            }
            received
        });

        let mut producer = connected(client).await;
        assert_eq!(producer.state(), ProducerState::Connected);
        for n in 1..=3 {
            producer.publish("hello", format!("hello => {n}")).await.unwrap();
        }

        assert_eq!(
            nsqd.await.unwrap(),
            vec!["hello => 1", "hello => 2", "hello => 3"]
        );
    }

    #[tokio::test]
    async fn test_publish_rejected_by_broker() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            nsqd.handshake().await;
            nsqd.read_command_with_body().await;
            nsqd.error(b"E_PUB_FAILED PUB failed exiting").await;
        });

        let mut producer = connected(client).await;
        let err = producer.publish("hello", "hello => 1").await.unwrap_err();
        match &err {
            NsqError::Publish { topic, .. } => assert_eq!(topic, "hello"),
            other => panic!("Expected publish error, got {other:?}"),
        }
        assert_eq!(err.broker_error().unwrap().code, "E_PUB_FAILED");
        nsqd.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_connection_dropped() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            nsqd.handshake().await;
        });

        let mut producer = connected(client).await;
        nsqd.await.unwrap();
        let err = producer.publish("hello", "hello => 1").await.unwrap_err();
        assert!(matches!(err, NsqError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_invalid_topic_rejected_locally() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            nsqd.handshake().await;
            nsqd.at_eof().await
        });

        let mut producer = connected(client).await;
        let err = producer.publish("not a topic", "x").await.unwrap_err();
        assert!(matches!(err, NsqError::InvalidTopic(_)));

        producer.stop().await.unwrap();
        // Nothing but the handshake reached nsqd.
        assert!(nsqd.await.unwrap());
    }

    #[tokio::test]
    async fn test_multi_and_deferred_publish() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            nsqd.handshake().await;

            let (line, body) = nsqd.read_command_with_body().await;
            assert_eq!(line, "MPUB hello");
            assert_eq!(&body[..4], &2u32.to_be_bytes());
            nsqd.respond(b"OK").await;

            let (line, body) = nsqd.read_command_with_body().await;
            assert_eq!(line, "DPUB hello 1500");
            assert_eq!(body, b"later");
            nsqd.respond(b"OK").await;
        });

        let mut producer = connected(client).await;
        producer
            .multi_publish(
                "hello",
                vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")],
            )
            .await
            .unwrap();
        producer
            .deferred_publish("hello", Duration::from_millis(1500), "later")
            .await
            .unwrap();
        assert!(matches!(
            producer.multi_publish("hello", Vec::new()).await,
            Err(NsqError::EmptyBatch)
        ));
        nsqd.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_finishes_producer() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            nsqd.handshake().await;
            nsqd.at_eof().await
        });

        let mut producer = connected(client).await;
        producer.stop().await.unwrap();
        assert_eq!(producer.state(), ProducerState::Finished);
        assert!(nsqd.await.unwrap());

        producer.stop().await.unwrap();
        assert!(matches!(
            producer.publish("hello", "late").await,
            Err(NsqError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        match Producer::connect(&addr, Config::default()).await {
            Err(NsqError::Connection { addr: failed, .. }) => assert_eq!(failed, addr),
            Err(other) => panic!("Expected connection error, got {other:?}"),
            Ok(_) => panic!("Expected connect to fail"),
        }
    }

    #[tokio::test]
    async fn test_connect_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let nsqd = tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut magic = [0u8; 4];
            socket.read_exact(&mut magic).await.unwrap();
            let mut line = Vec::new();
            socket.read_until(b'\n', &mut line).await.unwrap();
            assert_eq!(line, b"IDENTIFY\n");
            let len = socket.read_u32().await.unwrap();
            let mut body = vec![0u8; len as usize];
            socket.read_exact(&mut body).await.unwrap();

            let socket = socket.get_mut();
            socket.write_u32(6).await.unwrap();
            socket.write_i32(0).await.unwrap();
            socket.write_all(b"OK").await.unwrap();
        });

        let producer = Producer::connect(&addr, Config::default()).await.unwrap();
        assert_eq!(producer.addr(), addr);
        assert_eq!(producer.state(), ProducerState::Connected);
        nsqd.await.unwrap();
    }
}
