//! Scripted sources, handlers and senders shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use subguard::dispatch::{DispatchRequest, MessageSender, SendError};
use subguard::metrics::MetricsCollector;
use subguard::monitor::{
    DecisionHandler, HandlerContext, Item, ItemSource, SourceError, SourceFactory,
};
use subguard::seen::SeenStoreConfig;
use subguard::services::SupervisorConfig;

/// Replays a fixed script, then waits forever like a quiet stream.
pub struct ScriptedSource {
    script: VecDeque<Result<Item, SourceError>>,
}

#[async_trait]
impl ItemSource for ScriptedSource {
    async fn next_item(&mut self) -> Result<Item, SourceError> {
        match self.script.pop_front() {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }
}

/// Hands out one scripted source per stream name.
#[derive(Default)]
pub struct ScriptedFactory {
    scripts: Mutex<HashMap<String, Vec<Result<Item, SourceError>>>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `stream` to yield items with `ids`, in order.
    pub fn items(self, stream: &str, ids: &[&str]) -> Self {
        let script = ids
            .iter()
            .map(|id| Ok(Item::new(*id, stream).with_author(format!("author_{id}"))))
            .collect();
        self.script(stream, script)
    }

    pub fn script(self, stream: &str, script: Vec<Result<Item, SourceError>>) -> Self {
        self.scripts.lock().insert(stream.to_string(), script);
        self
    }
}

#[async_trait]
impl SourceFactory for ScriptedFactory {
    async fn open(&self, stream: &str) -> Result<Box<dyn ItemSource>, SourceError> {
        let script = self.scripts.lock().remove(stream).unwrap_or_default();
        Ok(Box::new(ScriptedSource {
            script: script.into(),
        }))
    }
}

/// Records every invocation; optionally messages each author.
#[derive(Default)]
pub struct RecordingHandler {
    pub calls: Mutex<Vec<(String, String)>>,
    send_messages: bool,
    /// Item id whose handling signals `entered`.
    watch: Option<String>,
    /// Block on the watched item until `release` is notified.
    hold: bool,
    pub entered: Notify,
    pub release: Notify,
}

impl RecordingHandler {
    pub fn observing() -> Self {
        Self::default()
    }

    pub fn messaging() -> Self {
        Self {
            send_messages: true,
            ..Default::default()
        }
    }

    pub fn watching(mut self, item_id: &str) -> Self {
        self.watch = Some(item_id.to_string());
        self
    }

    /// Like [`watching`](Self::watching), and the handler then blocks on that
    /// item until `release` is notified.
    pub fn holding(mut self, item_id: &str) -> Self {
        self.watch = Some(item_id.to_string());
        self.hold = true;
        self
    }

    pub fn ids_for(&self, stream: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(s, _)| s == stream)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl DecisionHandler for RecordingHandler {
    async fn handle(&self, item: &Item, ctx: &HandlerContext) -> anyhow::Result<()> {
        self.calls
            .lock()
            .push((ctx.stream_name.clone(), item.id.clone()));
        if self.watch.as_deref() == Some(item.id.as_str()) {
            self.entered.notify_one();
            if self.hold {
                self.release.notified().await;
            }
        }
        if self.send_messages {
            let author = item.author.clone().unwrap_or_default();
            ctx.send(DispatchRequest::new(author, "hello", item.id.clone()))
                .await?;
        }
        Ok(())
    }
}

/// Records delivery times; fails transiently `fail_first` times.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(Instant, DispatchRequest)>>,
    pub attempts: Mutex<u32>,
    fail_first: u32,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(fail_first: u32) -> Self {
        Self {
            fail_first,
            ..Default::default()
        }
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, r)| r.body.clone()).collect()
    }

    pub fn times(&self) -> Vec<Instant> {
        self.sent.lock().iter().map(|(t, _)| *t).collect()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_message(&self, request: &DispatchRequest) -> Result<(), SendError> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            *attempts += 1;
            *attempts
        };
        if attempt <= self.fail_first {
            return Err(SendError::Transient(format!("attempt {attempt} failed")));
        }
        self.sent.lock().push((Instant::now(), request.clone()));
        Ok(())
    }
}

/// Supervisor config with fast timings and the status endpoint disabled.
pub fn fast_config(dir: &tempfile::TempDir, streams: &[&str]) -> SupervisorConfig {
    let mut config = SupervisorConfig::new(
        streams.iter().map(|s| s.to_string()).collect(),
        SeenStoreConfig {
            path: dir.path().join("seen.json"),
            autosave_every: 50,
            flush_interval: Duration::from_secs(60),
        },
    );
    config.dispatcher.min_interval = Duration::ZERO;
    config.dispatcher.backoff.base = Duration::from_millis(10);
    config.dispatcher.backoff.cap = Duration::from_millis(50);
    config.worker.reconnect_backoff.base = Duration::from_millis(10);
    config.worker.reconnect_backoff.cap = Duration::from_millis(50);
    config
}

/// Poll until `stream` has processed `count` items.
pub async fn wait_for_processed(metrics: &MetricsCollector, stream: &str, count: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let reached = metrics
                .snapshot()
                .subreddits
                .get(stream)
                .is_some_and(|s| s.processed_count >= count);
            if reached {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{stream} did not reach {count} processed items"));
}
