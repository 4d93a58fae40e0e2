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

use anyhow::Result;
use async_trait::async_trait;
use log::info;
use nsq_client::{Config, Message, DEFAULT_NSQD_ADDRESS};
use nsq_router::{Handler, Router};

/// Prints every message it receives.
struct HelloWorld;

#[async_trait]
impl Handler for HelloWorld {
    async fn respond(&self, message: &Message) -> Result<()> {
        println!("{}", message.body_lossy());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let mut router = Router::new(DEFAULT_NSQD_ADDRESS, Config::default());
    router.draw(|routes| {
        routes.topic("hello", |topic| {
            topic.consumer(HelloWorld);
        })?;
        Ok(())
    })?;

    router.start().await?;

    // Keep running until signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    router.shutdown().await;
    Ok(())
}
