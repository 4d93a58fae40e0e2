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

//! Scripted nsqd peer for connection tests.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};

use crate::protocol::MAGIC_V2;

pub(crate) struct FakeNsqd {
    stream: BufReader<DuplexStream>,
}

impl FakeNsqd {
    /// Wrap the server half and consume the protocol magic.
    pub(crate) async fn accept(stream: DuplexStream) -> Self {
        let mut stream = BufReader::new(stream);
        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic).await.unwrap();
        assert_eq!(&magic, MAGIC_V2);
        Self { stream }
    }

    /// Read one command line, without the trailing newline.
    pub(crate) async fn read_line(&mut self) -> String {
        let mut line = Vec::new();
        self.stream.read_until(b'\n', &mut line).await.unwrap();
        assert_eq!(line.pop(), Some(b'\n'), "command line not terminated");
        String::from_utf8(line).unwrap()
    }

    pub(crate) async fn read_body(&mut self) -> Vec<u8> {
        let len = self.stream.read_u32().await.unwrap();
        let mut body = vec![0u8; len as usize];
        self.stream.read_exact(&mut body).await.unwrap();
        body
    }

    pub(crate) async fn read_command_with_body(&mut self) -> (String, Vec<u8>) {
        let line = self.read_line().await;
        let body = self.read_body().await;
        (line, body)
    }

    /// Read `IDENTIFY` and return its JSON body.
    pub(crate) async fn expect_identify(&mut self) -> Value {
        let (line, body) = self.read_command_with_body().await;
        assert_eq!(line, "IDENTIFY");
        serde_json::from_slice(&body).unwrap()
    }

    /// Complete a handshake with a plain `OK`.
    pub(crate) async fn handshake(&mut self) {
        self.expect_identify().await;
        self.respond(b"OK").await;
    }

    pub(crate) async fn write_frame(&mut self, frame_type: i32, data: &[u8]) {
        let stream = self.stream.get_mut();
        stream.write_u32(4 + data.len() as u32).await.unwrap();
        stream.write_i32(frame_type).await.unwrap();
        stream.write_all(data).await.unwrap();
        stream.flush().await.unwrap();
    }

    pub(crate) async fn respond(&mut self, data: &[u8]) {
        self.write_frame(0, data).await;
    }

    pub(crate) async fn error(&mut self, data: &[u8]) {
        self.write_frame(1, data).await;
    }

    pub(crate) async fn heartbeat(&mut self) {
        self.respond(b"_heartbeat_").await;
    }

    pub(crate) async fn deliver(&mut self, id: &[u8; 16], attempts: u16, body: &[u8]) {
        let mut data = Vec::with_capacity(26 + body.len());
        data.extend_from_slice(&0i64.to_be_bytes());
        data.extend_from_slice(&attempts.to_be_bytes());
        data.extend_from_slice(id);
        data.extend_from_slice(body);
        self.write_frame(2, &data).await;
    }

    /// True once the client has closed its write half.
    pub(crate) async fn at_eof(&mut self) -> bool {
        let mut byte = [0u8; 1];
        self.stream.read(&mut byte).await.unwrap() == 0
    }
}
