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

//! NSQ TCP protocol V2 framing.
//!
//! Commands are a newline-terminated header, optionally followed by a body:
//! - u32 length (N) of the body (big-endian)
//! - N bytes of body
//!
//! Frames sent by nsqd have the following layout:
//! - u32 size (big-endian), covering the frame type and the data
//! - i32 frame type: 0 response, 1 error, 2 message
//! - size - 4 bytes of data

use std::fmt;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{BrokerError, NsqError, WireError};

/// Sent by the client immediately after the TCP connection is established.
pub const MAGIC_V2: &[u8; 4] = b"  V2";

pub const HEARTBEAT: &[u8] = b"_heartbeat_";
pub const OK: &[u8] = b"OK";
pub const CLOSE_WAIT: &[u8] = b"CLOSE_WAIT";

const FRAME_TYPE_RESPONSE: i32 = 0;
const FRAME_TYPE_ERROR: i32 = 1;
const FRAME_TYPE_MESSAGE: i32 = 2;

const MAX_NAME_LEN: usize = 64;
const EPHEMERAL_SUFFIX: &str = "#ephemeral";

/// Length of the fixed message header: timestamp, attempts and id.
const MESSAGE_HEADER_LEN: usize = 8 + 2 + MESSAGE_ID_LEN;
pub const MESSAGE_ID_LEN: usize = 16;

/// Commands understood by nsqd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Identify(Bytes),
    Auth(Bytes),
    Publish { topic: String, body: Bytes },
    MultiPublish { topic: String, bodies: Vec<Bytes> },
    DeferredPublish { topic: String, delay: Duration, body: Bytes },
    Subscribe { topic: String, channel: String },
    Ready(u32),
    Finish(MessageId),
    Requeue { id: MessageId, delay: Duration },
    Touch(MessageId),
    Nop,
    Close,
}

impl Command {
    /// Append the wire representation of this command to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Command::Identify(body) => {
                buf.put_slice(b"IDENTIFY\n");
                put_body(buf, body);
            }
            Command::Auth(secret) => {
                buf.put_slice(b"AUTH\n");
                put_body(buf, secret);
            }
            Command::Publish { topic, body } => {
                put_header(buf, &["PUB", topic]);
                put_body(buf, body);
            }
            Command::MultiPublish { topic, bodies } => {
                put_header(buf, &["MPUB", topic]);
                let total: usize = 4 + bodies.iter().map(|b| 4 + b.len()).sum::<usize>();
                buf.reserve(4 + total);
                buf.put_u32(total as u32);
                buf.put_u32(bodies.len() as u32);
                for body in bodies {
                    put_body(buf, body);
                }
            }
            Command::DeferredPublish { topic, delay, body } => {
                let delay = delay.as_millis().to_string();
                put_header(buf, &["DPUB", topic, &delay]);
                put_body(buf, body);
            }
            Command::Subscribe { topic, channel } => put_header(buf, &["SUB", topic, channel]),
            Command::Ready(count) => put_header(buf, &["RDY", &count.to_string()]),
            Command::Finish(id) => put_header(buf, &["FIN", id.as_str()]),
            Command::Requeue { id, delay } => {
                put_header(buf, &["REQ", id.as_str(), &delay.as_millis().to_string()])
            }
            Command::Touch(id) => put_header(buf, &["TOUCH", id.as_str()]),
            Command::Nop => buf.put_slice(b"NOP\n"),
            Command::Close => buf.put_slice(b"CLS\n"),
        }
    }

    /// Command name, as used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Identify(_) => "IDENTIFY",
            Command::Auth(_) => "AUTH",
            Command::Publish { .. } => "PUB",
            Command::MultiPublish { .. } => "MPUB",
            Command::DeferredPublish { .. } => "DPUB",
            Command::Subscribe { .. } => "SUB",
            Command::Ready(_) => "RDY",
            Command::Finish(_) => "FIN",
            Command::Requeue { .. } => "REQ",
            Command::Touch(_) => "TOUCH",
            Command::Nop => "NOP",
            Command::Close => "CLS",
        }
    }
}

fn put_header(buf: &mut BytesMut, parts: &[&str]) {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b' ');
        }
        buf.put_slice(part.as_bytes());
    }
    buf.put_u8(b'\n');
}

fn put_body(buf: &mut BytesMut, body: &[u8]) {
    buf.reserve(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
}

/// A frame received from nsqd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Response(Bytes),
    Error(Bytes),
    Message(Message),
}

impl Frame {
    fn from_parts(frame_type: i32, data: Bytes) -> Result<Self, WireError> {
        match frame_type {
            FRAME_TYPE_RESPONSE => Ok(Frame::Response(data)),
            FRAME_TYPE_ERROR => Ok(Frame::Error(data)),
            FRAME_TYPE_MESSAGE => Message::decode(data).map(Frame::Message),
            other => Err(WireError::UnknownFrameType(other)),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response(data) if &data[..] == HEARTBEAT)
    }

    /// Short description for logs and unexpected-frame errors.
    pub fn describe(&self) -> String {
        match self {
            Frame::Response(data) => format!("response {:?}", String::from_utf8_lossy(data)),
            Frame::Error(data) => format!("error {:?}", String::from_utf8_lossy(data)),
            Frame::Message(message) => format!("message {}", message.id),
        }
    }
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame; nothing is
/// consumed in that case, so callers can keep appending socket reads.
pub fn parse_frame(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Frame>, WireError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if size < 4 {
        return Err(WireError::InvalidLength { length: size });
    }
    let size = size as usize;
    if size > max_frame_size {
        return Err(WireError::TooLarge {
            size,
            max_size: max_frame_size,
        });
    }

    if buf.len() < 4 + size {
        buf.reserve(4 + size - buf.len());
        return Ok(None);
    }

    buf.advance(4);
    let frame_type = buf.get_i32();
    let data = buf.split_to(size - 4).freeze();
    Frame::from_parts(frame_type, data).map(Some)
}

/// Identifier nsqd assigns to every message: 16 ASCII hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; MESSAGE_ID_LEN]);

impl MessageId {
    pub fn new(bytes: [u8; MESSAGE_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_LEN] {
        &self.0
    }

    /// Ids that are not valid UTF-8 render as an empty string; nsqd only
    /// generates hex ids.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({self})")
    }
}

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Nanoseconds since the Unix epoch at which nsqd accepted the message.
    pub timestamp: i64,
    /// Delivery attempts so far, including this one.
    pub attempts: u16,
    pub body: Bytes,
}

impl Message {
    fn decode(mut data: Bytes) -> Result<Self, WireError> {
        if data.len() < MESSAGE_HEADER_LEN {
            return Err(WireError::MalformedMessage(data.len()));
        }
        let timestamp = data.get_i64();
        let attempts = data.get_u16();
        let mut id = [0u8; MESSAGE_ID_LEN];
        data.copy_to_slice(&mut id);

        Ok(Self {
            id: MessageId(id),
            timestamp,
            attempts,
            body: data,
        })
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn body_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Check a topic name against nsqd's naming rules.
pub fn validate_topic_name(name: &str) -> Result<(), NsqError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(NsqError::InvalidTopic(name.to_string()))
    }
}

/// Check a channel name against nsqd's naming rules.
pub fn validate_channel_name(name: &str) -> Result<(), NsqError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(NsqError::InvalidChannel(name.to_string()))
    }
}

fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    let stem = name.strip_suffix(EPHEMERAL_SUFFIX).unwrap_or(name);
    !stem.is_empty()
        && stem
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Classify a response to a command that expects `OK`.
pub(crate) fn expect_ok(frame: Frame) -> Result<(), WireError> {
    match frame {
        Frame::Response(data) if &data[..] == OK => Ok(()),
        Frame::Error(data) => Err(WireError::Broker(BrokerError::parse(&data))),
        other => Err(WireError::UnexpectedFrame(other.describe())),
    }
}
