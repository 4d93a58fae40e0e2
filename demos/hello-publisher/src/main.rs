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

use std::process::ExitCode;

use anyhow::Result;
use bytes::Bytes;
use log::{error, info};
use nsq_client::{Config, NsqError, Producer, Publish, DEFAULT_NSQD_ADDRESS};

const TOPIC: &str = "hello";
const MESSAGE_COUNT: u32 = 10;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    ExitCode::from(exit_status(run(DEFAULT_NSQD_ADDRESS).await))
}

async fn run(addr: &str) -> Result<()> {
    let mut producer = Producer::connect(addr, Config::default()).await?;
    publish_then_stop(&mut producer, TOPIC, MESSAGE_COUNT).await?;
    Ok(())
}

/// Process exit status for the outcome of [`run`].
///
/// Any error ends the run; the connection is not stopped in that case.
fn exit_status(result: Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{e:#}");
            1
        }
    }
}

fn message_payload(n: u32) -> String {
    format!("hello => {n}")
}

/// Publish messages 1..=count in order, then stop the producer.
///
/// Returns at the first failed publish without stopping.
async fn publish_then_stop<P>(producer: &mut P, topic: &str, count: u32) -> Result<(), NsqError>
where
    P: Publish + ?Sized,
{
    for n in 1..=count {
        let payload = message_payload(n);
        info!("sending message {n} ...");
        producer.publish(topic, Bytes::from(payload)).await?;
        info!("done message {n}");
    }
    producer.stop().await
}
