//! In-memory channel, timer and feed source for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::channel::{Channel, SendError, Timer};
use crate::protocol::AppMessage;
use crate::source::{FetchError, Query, Source};

#[derive(Default)]
struct ChannelLog {
    /// true = fail that attempt; empty script means success.
    script: VecDeque<bool>,
    tried: Vec<AppMessage>,
    delivered: Vec<AppMessage>,
}

/// Channel that records every attempt and fails according to a script.
#[derive(Default)]
pub struct FakeChannel {
    log: Mutex<ChannelLog>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: impl IntoIterator<Item = bool>) -> Self {
        let channel = Self::new();
        channel.log.lock().unwrap().script = script.into_iter().collect();
        channel
    }

    pub fn failing_first(k: usize) -> Self {
        Self::scripted(std::iter::repeat(true).take(k))
    }

    pub fn tried(&self) -> Vec<AppMessage> {
        self.log.lock().unwrap().tried.clone()
    }

    pub fn delivered(&self) -> Vec<AppMessage> {
        self.log.lock().unwrap().delivered.clone()
    }

    pub fn attempts(&self) -> usize {
        self.log.lock().unwrap().tried.len()
    }
}

#[async_trait]
impl Channel for FakeChannel {
    async fn send(&self, msg: &AppMessage) -> Result<(), SendError> {
        let mut log = self.log.lock().unwrap();
        log.tried.push(msg.clone());
        if log.script.pop_front().unwrap_or(false) {
            return Err(SendError::Rejected);
        }
        log.delivered.push(msg.clone());
        Ok(())
    }
}

/// Timer that returns at once and remembers what it was asked to wait.
#[derive(Default)]
pub struct FakeTimer {
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Timer for FakeTimer {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Feed source answering from canned JSON keyed by query path.
#[derive(Default)]
pub struct FakeSource {
    responses: HashMap<String, Json>,
    queries: Mutex<Vec<Query>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, path: &str, body: Json) -> Self {
        self.responses.insert(path.to_string(), body);
        self
    }

    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Source for FakeSource {
    async fn fetch(&self, query: &Query) -> Result<Json, FetchError> {
        self.queries.lock().unwrap().push(query.clone());
        self.responses
            .get(&query.path())
            .cloned()
            .ok_or_else(|| FetchError::Status(404))
    }
}
