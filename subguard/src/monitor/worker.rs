use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{DecisionHandler, HandlerContext, Item, ItemSource, SourceError, SourceFactory};
use crate::dispatch::{BackoffPolicy, Dispatcher, JitterSource, RandomJitter};
use crate::metrics::{MetricsCollector, WorkerState};
use crate::panic_hook::payload_message;
use crate::seen::SeenStore;

/// Stream worker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Consecutive transient source errors tolerated before the stream fails.
    pub max_consecutive_failures: u32,
    pub reconnect_backoff: BackoffPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            reconnect_backoff: BackoffPolicy {
                base: std::time::Duration::from_secs(1),
                cap: std::time::Duration::from_secs(30),
                jitter_ratio: 0.3,
            },
        }
    }
}

/// Shared services every worker uses.
#[derive(Debug, Clone)]
pub struct WorkerDeps {
    pub seen: Arc<SeenStore>,
    pub metrics: Arc<MetricsCollector>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Monitors a single stream until cancelled or its source gives out.
pub struct StreamWorker {
    stream: String,
    factory: Arc<dyn SourceFactory>,
    handler: Arc<dyn DecisionHandler>,
    deps: WorkerDeps,
    config: WorkerConfig,
    jitter: Arc<dyn JitterSource>,
    token: CancellationToken,
}

impl StreamWorker {
    pub fn new(
        stream: impl Into<String>,
        factory: Arc<dyn SourceFactory>,
        handler: Arc<dyn DecisionHandler>,
        deps: WorkerDeps,
        config: WorkerConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            stream: stream.into(),
            factory,
            handler,
            deps,
            config,
            jitter: Arc::new(RandomJitter),
            token,
        }
    }

    /// Replace the reconnect jitter source.
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Run until shutdown (`Ok`) or until the source fails for good (`Err`).
    pub async fn run(self) -> Result<(), SourceError> {
        let metrics = self.deps.metrics.clone();
        info!(stream = %self.stream, "Stream worker starting");
        metrics.set_stream_state(&self.stream, WorkerState::Starting);

        match self.poll_loop().await {
            Ok(()) => {
                metrics.set_stream_state(&self.stream, WorkerState::Stopped);
                info!(stream = %self.stream, "Stream worker stopped");
                Ok(())
            }
            Err(e) => {
                metrics.record_error(format!("stream {}: {}", self.stream, e), Utc::now());
                metrics.set_stream_state(&self.stream, WorkerState::Failed);
                error!(stream = %self.stream, error = %e, "Stream worker failed");
                Err(e)
            }
        }
    }

    async fn poll_loop(&self) -> Result<(), SourceError> {
        let metrics = &self.deps.metrics;
        let mut source: Option<Box<dyn ItemSource>> = None;
        let mut consecutive_failures: u32 = 0;

        loop {
            metrics.set_stream_state(&self.stream, WorkerState::Polling);

            let pulled = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                pulled = self.pull(&mut source) => pulled,
            };

            match pulled {
                Ok(item) => {
                    consecutive_failures = 0;
                    if self.token.is_cancelled() {
                        debug!(stream = %self.stream, item_id = %item.id, "Shutdown requested, leaving pulled item unprocessed");
                        break;
                    }
                    self.process(item).await;
                }
                Err(SourceError::Transient(reason)) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        return Err(SourceError::Transient(format!(
                            "giving up after {} consecutive failures: {}",
                            consecutive_failures, reason
                        )));
                    }

                    let delay = self
                        .config
                        .reconnect_backoff
                        .delay(consecutive_failures, self.jitter.as_ref());
                    warn!(
                        stream = %self.stream,
                        attempt = consecutive_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Source error, backing off"
                    );
                    metrics.record_error(format!("stream {}: {}", self.stream, reason), Utc::now());

                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(permanent) => return Err(permanent),
            }
        }

        metrics.set_stream_state(&self.stream, WorkerState::Stopping);
        Ok(())
    }

    async fn pull(&self, source: &mut Option<Box<dyn ItemSource>>) -> Result<Item, SourceError> {
        let source = match source {
            Some(source) => source,
            None => source.insert(self.factory.open(&self.stream).await?),
        };
        source.next_item().await
    }

    /// Handle one item end-to-end. Never fails; problems are recorded.
    async fn process(&self, item: Item) {
        let WorkerDeps {
            seen,
            metrics,
            dispatcher,
        } = &self.deps;

        if !seen.claim(&item.id) {
            trace!(stream = %self.stream, item_id = %item.id, "Skipping item already seen or in progress");
            return;
        }

        metrics.set_stream_state(&self.stream, WorkerState::Dispatching);
        let ctx = HandlerContext {
            stream_name: self.stream.clone(),
            dispatcher: dispatcher.clone(),
            metrics: metrics.clone(),
        };
        let outcome = AssertUnwindSafe(self.handler.handle(&item, &ctx))
            .catch_unwind()
            .await;

        seen.add(&item.id);
        metrics.record_processed(&self.stream, &item.id, Utc::now());

        match outcome {
            Ok(Ok(())) => {
                debug!(stream = %self.stream, item_id = %item.id, "Item processed");
            }
            Ok(Err(e)) => {
                metrics.report_error(format!(
                    "handler failed for {} in {}: {:#}",
                    item.id, self.stream, e
                ));
            }
            Err(panic) => {
                metrics.report_error(format!(
                    "handler panicked for {} in {}: {}",
                    item.id,
                    self.stream,
                    payload_message(panic.as_ref())
                ));
            }
        }

        if seen.needs_autosave() {
            let _ = seen.flush_reporting(metrics).await;
        }
    }
}
