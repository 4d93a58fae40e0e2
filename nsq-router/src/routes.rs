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

//! Route definitions: which handlers receive which topic.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use nsq_client::protocol::{validate_channel_name, validate_topic_name};
use nsq_client::Message;

use crate::error::RouterError;

/// Channel used when a route does not name one.
pub const DEFAULT_CHANNEL: &str = "default";

/// Receives every message delivered on the topics it is routed to.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one message. An error requeues the message.
    async fn respond(&self, message: &Message) -> anyhow::Result<()>;
}

/// A `(topic, channel)` pair; one listener runs per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteKey {
    pub topic: String,
    pub channel: String,
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.channel)
    }
}

/// One handler bound to a topic.
#[derive(Clone)]
pub struct Route {
    pub key: RouteKey,
    pub max_in_flight: Option<u32>,
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("key", &self.key)
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}

/// Settings collected inside a [`RouteSet::topic`] block.
pub struct TopicRoute {
    name: String,
    channel: String,
    max_in_flight: Option<u32>,
    handler: Option<Arc<dyn Handler>>,
}

impl TopicRoute {
    fn new(name: String) -> Self {
        Self {
            name,
            channel: DEFAULT_CHANNEL.to_string(),
            max_in_flight: None,
            handler: None,
        }
    }

    pub fn channel(&mut self, channel: impl Into<String>) -> &mut Self {
        self.channel = channel.into();
        self
    }

    /// Override [`Config::max_in_flight`](nsq_client::Config) for this route's listener.
    pub fn max_in_flight(&mut self, max_in_flight: u32) -> &mut Self {
        self.max_in_flight = Some(max_in_flight.max(1));
        self
    }

    /// Handler receiving this topic's messages.
    pub fn consumer<H: Handler + 'static>(&mut self, handler: H) -> &mut Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Like [`TopicRoute::consumer`], for a handler shared between routes.
    pub fn shared_consumer(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        self.handler = Some(handler);
        self
    }

    fn build(self) -> Result<Route, RouterError> {
        validate_topic_name(&self.name)?;
        validate_channel_name(&self.channel)?;
        let handler = self
            .handler
            .ok_or_else(|| RouterError::MissingHandler(self.name.clone()))?;

        Ok(Route {
            key: RouteKey {
                topic: self.name,
                channel: self.channel,
            },
            max_in_flight: self.max_in_flight,
            handler,
        })
    }
}

/// All drawn routes, grouped by [`RouteKey`] in registration order.
#[derive(Debug, Default, Clone)]
pub struct RouteSet {
    routes: BTreeMap<RouteKey, Vec<Route>>,
}

impl RouteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route for `name`, configured by `block`.
    pub fn topic<F>(&mut self, name: impl Into<String>, block: F) -> Result<&mut Self, RouterError>
    where
        F: FnOnce(&mut TopicRoute),
    {
        let mut topic = TopicRoute::new(name.into());
        block(&mut topic);
        self.add(topic.build()?);
        Ok(self)
    }

    /// Register `handler` for `name` on the default channel.
    pub fn topic_to<H: Handler + 'static>(
        &mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Result<&mut Self, RouterError> {
        self.topic(name, |topic| {
            topic.consumer(handler);
        })
    }

    fn add(&mut self, route: Route) {
        self.routes.entry(route.key.clone()).or_default().push(route);
    }

    pub fn get(&self, key: &RouteKey) -> Option<&[Route]> {
        self.routes.get(key).map(Vec::as_slice)
    }

    /// Routes registered for `topic`, across all channels.
    pub fn for_topic<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a Route> + 'a {
        self.routes
            .iter()
            .filter(move |(key, _)| key.topic == topic)
            .flat_map(|(_, routes)| routes.iter())
    }

    pub fn groups(&self) -> impl Iterator<Item = (&RouteKey, &[Route])> {
        self.routes.iter().map(|(key, routes)| (key, routes.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }
}
