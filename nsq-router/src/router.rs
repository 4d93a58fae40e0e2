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

//! [`Router`]: one listener task per route group, dispatching to handlers.

use std::time::Duration;

use log::{error, info, warn};
use nsq_client::{
    Config, Consumer, Event, Message, NsqError, Subscription, WireError,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::RouterError;
use crate::routes::{Route, RouteKey, RouteSet};

/// Runs the handlers of a [`RouteSet`] against one nsqd.
pub struct Router {
    addr: String,
    config: Config,
    routes: RouteSet,
    shutdown_tx: Option<watch::Sender<bool>>,
    listeners: Vec<JoinHandle<()>>,
}

impl Router {
    pub fn new(addr: impl Into<String>, config: Config) -> Self {
        Self {
            addr: addr.into(),
            config,
            routes: RouteSet::new(),
            shutdown_tx: None,
            listeners: Vec::new(),
        }
    }

    /// Replace the route set with the routes registered by `block`.
    pub fn draw<F>(&mut self, block: F) -> Result<(), RouterError>
    where
        F: FnOnce(&mut RouteSet) -> Result<(), RouterError>,
    {
        let mut routes = RouteSet::new();
        block(&mut routes)?;
        self.routes = routes;
        Ok(())
    }

    pub fn routes(&self) -> &RouteSet {
        &self.routes
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Subscribe every route group and spawn its listener.
    ///
    /// If any subscription fails, the listeners already started are shut
    /// down and the error is returned.
    pub async fn start(&mut self) -> Result<(), RouterError> {
        if self.is_running() {
            return Err(RouterError::AlreadyStarted);
        }
        if self.routes.is_empty() {
            return Err(RouterError::NoRoutes);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let groups: Vec<(RouteKey, Vec<Route>)> = self
            .routes
            .groups()
            .map(|(key, routes)| (key.clone(), routes.to_vec()))
            .collect();

        for (key, routes) in groups {
            let mut config = self.config.clone();
            if let Some(max) = routes.iter().filter_map(|r| r.max_in_flight).max() {
                config.max_in_flight = max;
            }

            let subscribed = match Consumer::new(&key.topic, &key.channel, config.clone()) {
                Ok(consumer) => consumer.subscribe(&self.addr).await,
                Err(e) => Err(e),
            };
            let sub = match subscribed {
                Ok(sub) => sub,
                Err(e) => {
                    error!("[{key}] Failed to start listener: {e}");
                    self.shutdown().await;
                    return Err(e.into());
                }
            };

            let listener = Listener::new(sub, routes, &config, shutdown_rx.clone());
            self.listeners.push(tokio::spawn(async move {
                if let Err(e) = listener.run().await {
                    error!("[{key}] Listener stopped: {e}");
                }
            }));
        }

        info!(
            "Router started with {} listener(s) on nsqd at {}",
            self.listeners.len(),
            self.addr
        );
        Ok(())
    }

    /// Signal every listener to close its subscription and wait for them.
    pub async fn shutdown(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };
        // Listeners that already stopped have dropped their receivers.
        let _ = shutdown_tx.send(true);

        for handle in self.listeners.drain(..) {
            if let Err(e) = handle.await {
                error!("Listener task failed: {e}");
            }
        }
        info!("Router shut down");
    }
}

/// Receives messages from one subscription and hands them to its routes.
pub(crate) struct Listener<S> {
    sub: Subscription<S>,
    routes: Vec<Route>,
    requeue_delay: Duration,
    max_attempts: u16,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S> Listener<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(
        sub: Subscription<S>,
        routes: Vec<Route>,
        config: &Config,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sub,
            routes,
            requeue_delay: config.requeue_delay(),
            max_attempts: config.max_attempts,
            shutdown_rx,
        }
    }

    /// Run until nsqd confirms the close requested on shutdown, or the
    /// connection fails.
    pub(crate) async fn run(mut self) -> Result<(), NsqError> {
        let label = format!("{}/{}", self.sub.topic(), self.sub.channel());
        info!("[{label}] Listener started");

        loop {
            let closing = self.sub.is_closing();
            let frame = tokio::select! {
                changed = self.shutdown_rx.changed(), if !closing => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("[{label}] Shutdown signal received");
                        self.sub.close().await?;
                    }
                    continue;
                }
                frame = self.sub.read_frame() => frame?,
            };

            match self.sub.process(frame).await? {
                Event::Message(message) => self.dispatch(message).await?,
                Event::Closed => break,
                Event::BrokerError(e) if e.is_fatal() => {
                    return Err(NsqError::Wire(WireError::Broker(e)));
                }
                Event::BrokerError(e) => warn!("[{label}] nsqd reported: {e}"),
                Event::Heartbeat | Event::Response(_) => {}
            }
        }

        info!("[{label}] Listener stopped");
        Ok(())
    }

    /// Hand `message` to every route; `FIN` if all succeed, else `REQ`.
    async fn dispatch(&mut self, message: Message) -> Result<(), NsqError> {
        let mut failed = false;
        for route in &self.routes {
            if let Err(e) = route.handler.respond(&message).await {
                error!(
                    "[{}] Handler failed for message {}: {e:#}",
                    route.key, message.id
                );
                failed = true;
            }
        }

        if !failed {
            return self.sub.finish(&message.id).await;
        }
        if self.max_attempts > 0 && message.attempts >= self.max_attempts {
            warn!(
                "[{}/{}] Giving up on message {} after {} attempts",
                self.sub.topic(),
                self.sub.channel(),
                message.id,
                message.attempts
            );
            return self.sub.finish(&message.id).await;
        }
        self.sub.requeue(&message.id, self.requeue_delay).await
    }
}
