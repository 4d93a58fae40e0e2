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

//! Consumer side: subscribing a channel and acknowledging messages.

use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::conn::Connection;
use crate::error::{BrokerError, NsqError, Result, WireError};
use crate::protocol::{
    validate_channel_name, validate_topic_name, Command, Frame, Message, MessageId, CLOSE_WAIT,
};

/// Subscription settings for one `(topic, channel)` pair.
#[derive(Debug, Clone)]
pub struct Consumer {
    topic: String,
    channel: String,
    config: Config,
}

impl Consumer {
    /// Validates both names; nothing is sent until [`Consumer::subscribe`].
    pub fn new(topic: impl Into<String>, channel: impl Into<String>, config: Config) -> Result<Self> {
        let topic = topic.into();
        let channel = channel.into();
        validate_topic_name(&topic)?;
        validate_channel_name(&channel)?;
        Ok(Self {
            topic,
            channel,
            config,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connect to nsqd at `addr`, subscribe and grant `max_in_flight` credit.
    pub async fn subscribe(&self, addr: &str) -> Result<Subscription<TcpStream>> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NsqError::Connection {
                addr: addr.to_string(),
                source: WireError::Io(e),
            })?;
        self.subscribe_with_stream(addr, stream).await
    }

    /// Subscribe over an already established stream.
    pub async fn subscribe_with_stream<S>(&self, addr: &str, stream: S) -> Result<Subscription<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut conn = Connection::handshake(stream, &self.config)
            .await
            .map_err(|source| NsqError::Connection {
                addr: addr.to_string(),
                source,
            })?;

        let subscribe = Command::Subscribe {
            topic: self.topic.clone(),
            channel: self.channel.clone(),
        };
        conn.request_ok(&subscribe)
            .await
            .map_err(|source| NsqError::Subscribe {
                topic: self.topic.clone(),
                channel: self.channel.clone(),
                source,
            })?;

        let mut ready = self.config.max_in_flight;
        let max_rdy = conn.identify().max_rdy_count;
        if max_rdy > 0 && i64::from(ready) > max_rdy {
            warn!(
                "[{}/{}] max_in_flight {ready} exceeds nsqd max_rdy_count {max_rdy}, clamping",
                self.topic, self.channel
            );
            ready = max_rdy as u32;
        }
        conn.send(&Command::Ready(ready))
            .await
            .map_err(|source| NsqError::Subscribe {
                topic: self.topic.clone(),
                channel: self.channel.clone(),
                source,
            })?;

        info!(
            "[{}/{}] Subscribed on nsqd at {addr} (RDY {ready})",
            self.topic, self.channel
        );
        Ok(Subscription {
            topic: self.topic.clone(),
            channel: self.channel.clone(),
            conn,
            closing: false,
        })
    }
}

/// What a frame read from a subscription amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Message(Message),
    /// A heartbeat, already answered with `NOP`.
    Heartbeat,
    Response(Bytes),
    /// nsqd reported an error; fatal ones are followed by nsqd closing the
    /// connection.
    BrokerError(BrokerError),
    /// nsqd acknowledged `CLS`; no more messages will arrive.
    Closed,
}

/// A live subscription on one nsqd connection.
pub struct Subscription<S = TcpStream> {
    topic: String,
    channel: String,
    conn: Connection<S>,
    closing: bool,
}

impl<S> Subscription<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Read the next frame without acting on it.
    ///
    /// Cancel-safe, so it can be raced against a shutdown signal in
    /// `tokio::select!`; pass the frame to [`Subscription::process`] afterwards.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        match self.conn.read_frame().await {
            Err(WireError::PeerClosed) if self.closing => {
                Ok(Frame::Response(Bytes::from_static(CLOSE_WAIT)))
            }
            other => Ok(other?),
        }
    }

    /// Act on a frame: heartbeats are answered, everything else is classified.
    pub async fn process(&mut self, frame: Frame) -> Result<Event> {
        match frame {
            frame if frame.is_heartbeat() => {
                debug!("[{}/{}] Heartbeat", self.topic, self.channel);
                self.conn.send(&Command::Nop).await?;
                Ok(Event::Heartbeat)
            }
            Frame::Response(data) if &data[..] == CLOSE_WAIT => Ok(Event::Closed),
            Frame::Response(data) => Ok(Event::Response(data)),
            Frame::Error(data) => Ok(Event::BrokerError(BrokerError::parse(&data))),
            Frame::Message(message) => Ok(Event::Message(message)),
        }
    }

    /// Wait for the next message, answering heartbeats.
    ///
    /// Returns `Ok(None)` once the subscription is closed. Fatal broker errors
    /// are returned as errors. Not cancel-safe; use
    /// [`Subscription::read_frame`] with `select!`.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            let frame = self.read_frame().await?;
            match self.process(frame).await? {
                Event::Message(message) => return Ok(Some(message)),
                Event::Closed => return Ok(None),
                Event::BrokerError(e) if e.is_fatal() => {
                    return Err(NsqError::Wire(WireError::Broker(e)));
                }
                Event::BrokerError(e) => {
                    warn!("[{}/{}] nsqd reported: {e}", self.topic, self.channel);
                }
                Event::Heartbeat | Event::Response(_) => {}
            }
        }
    }

    /// Acknowledge a message as processed.
    pub async fn finish(&mut self, id: &MessageId) -> Result<()> {
        self.conn.send(&Command::Finish(*id)).await?;
        Ok(())
    }

    /// Hand a message back to nsqd for redelivery after `delay`.
    pub async fn requeue(&mut self, id: &MessageId, delay: Duration) -> Result<()> {
        self.conn
            .send(&Command::Requeue { id: *id, delay })
            .await?;
        Ok(())
    }

    /// Reset the server-side timeout of an in-flight message.
    pub async fn touch(&mut self, id: &MessageId) -> Result<()> {
        self.conn.send(&Command::Touch(*id)).await?;
        Ok(())
    }

    /// Ask nsqd to stop delivering. Keep reading until [`Event::Closed`].
    pub async fn close(&mut self) -> Result<()> {
        if !self.closing {
            info!("[{}/{}] Closing subscription", self.topic, self.channel);
            self.closing = true;
            self.conn.send(&Command::Close).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeNsqd;
    use tokio::io::{duplex, DuplexStream};

    const ID_1: &[u8; 16] = b"0000000000000001";
    const ID_2: &[u8; 16] = b"0000000000000002";

    fn consumer(config: Config) -> Consumer {
        Consumer::new("hello", "default", config).unwrap()
    }

    async fn subscribe_handshake(nsqd: &mut FakeNsqd, identify: &[u8]) -> String {
        nsqd.expect_identify().await;
        nsqd.respond(identify).await;
        assert_eq!(nsqd.read_line().await, "SUB hello default");
        nsqd.respond(b"OK").await;
        nsqd.read_line().await
    }

    async fn subscribed(client: DuplexStream, config: Config) -> Subscription<DuplexStream> {
        consumer(config)
            .subscribe_with_stream("127.0.0.1:4150", client)
            .await
            .unwrap()
    }

    #[test]
    fn test_new_validates_names() {
        assert!(matches!(
            Consumer::new("bad topic", "c", Config::default()),
            Err(NsqError::InvalidTopic(_))
        ));
        assert!(matches!(
            Consumer::new("hello", "", Config::default()),
            Err(NsqError::InvalidChannel(_))
        ));
        let consumer = Consumer::new("hello", "archive#ephemeral", Config::default()).unwrap();
        assert_eq!(consumer.channel(), "archive#ephemeral");
    }

    #[tokio::test]
    async fn test_subscribe_and_finish() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            assert_eq!(subscribe_handshake(&mut nsqd, b"OK").await, "RDY 1");
            nsqd.deliver(ID_1, 1, b"hello => 1").await;
            assert_eq!(nsqd.read_line().await, "FIN 0000000000000001");
            nsqd.deliver(ID_2, 2, b"hello => 2").await;
            assert_eq!(nsqd.read_line().await, "REQ 0000000000000002 5000");
            assert_eq!(nsqd.read_line().await, "TOUCH 0000000000000002");
        });

        let mut sub = subscribed(client, Config::default()).await;
        let first = sub.next_message().await.unwrap().unwrap();
        assert_eq!(first.body_lossy(), "hello => 1");
        sub.finish(&first.id).await.unwrap();

        let second = sub.next_message().await.unwrap().unwrap();
        assert_eq!(second.attempts, 2);
        sub.requeue(&second.id, Duration::from_secs(5)).await.unwrap();
        sub.touch(&second.id).await.unwrap();
        nsqd.await.unwrap();
    }

    #[tokio::test]
    async fn test_ready_clamped_to_max_rdy_count() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            subscribe_handshake(&mut nsqd, br#"{"max_rdy_count": 10}"#).await
        });

        let config = Config::builder().max_in_flight(500).build();
        let _sub = subscribed(client, config).await;
        assert_eq!(nsqd.await.unwrap(), "RDY 10");
    }

    #[tokio::test]
    async fn test_subscribe_rejected() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            nsqd.handshake().await;
            nsqd.read_line().await;
            nsqd.error(b"E_BAD_CHANNEL SUB channel name is not valid").await;
        });

        let result = consumer(Config::default())
            .subscribe_with_stream("127.0.0.1:4150", client)
            .await;
        match result {
            Err(err @ NsqError::Subscribe { .. }) => {
                assert_eq!(err.broker_error().unwrap().code, "E_BAD_CHANNEL")
            }
            Err(other) => panic!("Expected subscribe error, got {other:?}"),
            Ok(_) => panic!("Expected subscribe to fail"),
        }
        nsqd.await.unwrap();
    }

    #[tokio::test]
    async fn test_ready_failure_is_a_subscribe_error() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            nsqd.handshake().await;
            assert_eq!(nsqd.read_line().await, "SUB hello default");
            nsqd.respond(b"OK").await;
            // Dropped here, before RDY can be written.
        });

        let result = consumer(Config::default())
            .subscribe_with_stream("127.0.0.1:4150", client)
            .await;
        match result {
            Err(NsqError::Subscribe { topic, channel, .. }) => {
                assert_eq!(topic, "hello");
                assert_eq!(channel, "default");
            }
            Err(other) => panic!("Expected subscribe error, got {other:?}"),
            Ok(_) => panic!("Expected subscribe to fail"),
        }
        nsqd.await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_and_non_fatal_error_are_skipped() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            subscribe_handshake(&mut nsqd, b"OK").await;
            nsqd.heartbeat().await;
            assert_eq!(nsqd.read_line().await, "NOP");
            nsqd.error(b"E_FIN_FAILED FIN 1 failed").await;
            nsqd.deliver(ID_1, 1, b"after").await;
        });

        let mut sub = subscribed(client, Config::default()).await;
        let message = sub.next_message().await.unwrap().unwrap();
        assert_eq!(message.body_lossy(), "after");
        nsqd.await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_error_ends_next_message() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            subscribe_handshake(&mut nsqd, b"OK").await;
            nsqd.error(b"E_INVALID cannot RDY in current state").await;
        });

        let mut sub = subscribed(client, Config::default()).await;
        let err = sub.next_message().await.unwrap_err();
        assert_eq!(err.broker_error().unwrap().code, "E_INVALID");
        nsqd.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_waits_for_close_wait() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            subscribe_handshake(&mut nsqd, b"OK").await;
            assert_eq!(nsqd.read_line().await, "CLS");
            nsqd.deliver(ID_1, 1, b"in flight").await;
            nsqd.respond(b"CLOSE_WAIT").await;
        });

        let mut sub = subscribed(client, Config::default()).await;
        sub.close().await.unwrap();
        assert!(sub.is_closing());
        // Messages already in flight are still delivered before CLOSE_WAIT.
        let message = sub.next_message().await.unwrap().unwrap();
        assert_eq!(message.body_lossy(), "in flight");
        assert!(sub.next_message().await.unwrap().is_none());
        nsqd.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_after_close_counts_as_closed() {
        let (client, server) = duplex(4096);
        let nsqd = tokio::spawn(async move {
            let mut nsqd = FakeNsqd::accept(server).await;
            subscribe_handshake(&mut nsqd, b"OK").await;
            assert_eq!(nsqd.read_line().await, "CLS");
        });

        let mut sub = subscribed(client, Config::default()).await;
        sub.close().await.unwrap();
        nsqd.await.unwrap();
        assert!(sub.next_message().await.unwrap().is_none());
    }
}
