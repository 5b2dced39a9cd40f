//! Lifecycle coordination.
//!
//! Startup order: load the seen set, register streams, spawn one worker per
//! stream, bind the status endpoint (best effort), start the periodic flusher.
//!
//! Shutdown order: cancel the workers, wait up to the grace period, stop the
//! flusher, flush the seen set once, stop the status endpoint.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::api::{StatusServer, StatusServerConfig};
use crate::config::{AppConfig, DEFAULT_SHUTDOWN_GRACE, dedup_stream_names};
use crate::dispatch::{Dispatcher, DispatcherConfig, JitterSource, MessageSender, RandomJitter};
use crate::metrics::MetricsCollector;
use crate::monitor::{
    DecisionHandler, SourceError, SourceFactory, StreamWorker, WorkerConfig, WorkerDeps,
};
use crate::seen::{LoadOutcome, SeenStore, SeenStoreConfig, run_periodic_flush};

/// Everything the supervisor needs to know up front.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub streams: Vec<String>,
    pub seen: SeenStoreConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    /// `None` disables the status endpoint.
    pub status: Option<StatusServerConfig>,
    pub shutdown_grace: Duration,
}

impl From<&AppConfig> for SupervisorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            streams: config.streams.clone(),
            seen: config.seen.clone(),
            dispatcher: config.dispatcher.clone(),
            worker: config.worker.clone(),
            status: Some(config.status.clone()),
            shutdown_grace: config.shutdown_grace,
        }
    }
}

impl SupervisorConfig {
    pub fn new(streams: Vec<String>, seen: SeenStoreConfig) -> Self {
        Self {
            streams,
            seen,
            dispatcher: DispatcherConfig::default(),
            worker: WorkerConfig::default(),
            status: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// How a stream worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Stopped,
    Failed(String),
    /// Still busy when the grace period ran out; aborted.
    StillRunning,
}

/// Result of the final seen-set flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Written,
    NothingToWrite,
    Failed(String),
}

/// Summary returned once shutdown completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub workers: Vec<(String, WorkerOutcome)>,
    pub final_flush: FlushOutcome,
}

impl ShutdownReport {
    /// Streams whose worker did not finish within the grace period.
    pub fn still_running(&self) -> Vec<&str> {
        self.workers
            .iter()
            .filter(|(_, outcome)| *outcome == WorkerOutcome::StillRunning)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Number of workers that exited (cleanly or not) before the deadline.
    pub fn finished_count(&self) -> usize {
        self.workers.len() - self.still_running().len()
    }
}

/// Owns the shared services and starts the engine.
pub struct Supervisor {
    config: SupervisorConfig,
    factory: Arc<dyn SourceFactory>,
    handler: Arc<dyn DecisionHandler>,
    sender: Arc<dyn MessageSender>,
    jitter: Arc<dyn JitterSource>,
    metrics: Arc<MetricsCollector>,
    seen: Arc<SeenStore>,
}

impl Supervisor {
    pub fn new(
        mut config: SupervisorConfig,
        factory: Arc<dyn SourceFactory>,
        handler: Arc<dyn DecisionHandler>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        config.streams = dedup_stream_names(&config.streams);
        let seen = Arc::new(SeenStore::from_config(&config.seen));
        Self {
            config,
            factory,
            handler,
            sender,
            jitter: Arc::new(RandomJitter),
            metrics: Arc::new(MetricsCollector::new()),
            seen,
        }
    }

    /// Use a specific jitter source for dispatch and reconnect backoff.
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn seen(&self) -> Arc<SeenStore> {
        self.seen.clone()
    }

    /// Start everything and return a handle for shutting it down.
    pub async fn start(self) -> RunningSupervisor {
        let load = self.seen.load().await;
        if let LoadOutcome::Unreadable(reason) = &load {
            self.metrics
                .report_error(format!("Seen cache unreadable, starting empty: {}", reason));
        }

        for stream in &self.config.streams {
            self.metrics.register_stream(stream);
        }

        let dispatcher = Arc::new(Dispatcher::with_jitter(
            self.sender.clone(),
            self.config.dispatcher.clone(),
            self.metrics.clone(),
            self.jitter.clone(),
        ));
        let deps = WorkerDeps {
            seen: self.seen.clone(),
            metrics: self.metrics.clone(),
            dispatcher,
        };

        let worker_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let workers = self
            .config
            .streams
            .iter()
            .map(|stream| {
                let worker = StreamWorker::new(
                    stream.clone(),
                    self.factory.clone(),
                    self.handler.clone(),
                    deps.clone(),
                    self.config.worker.clone(),
                    worker_token.clone(),
                )
                .with_jitter(self.jitter.clone());
                (stream.clone(), tracker.spawn(worker.run()))
            })
            .collect::<Vec<_>>();
        info!(streams = workers.len(), "Stream workers started");

        let server_token = CancellationToken::new();
        let (status_addr, server) = match &self.config.status {
            Some(status) => {
                self.spawn_status_server(status.clone(), server_token.clone())
                    .await
            }
            None => (None, None),
        };

        let flush_token = CancellationToken::new();
        let flusher = tokio::spawn(run_periodic_flush(
            self.seen.clone(),
            self.metrics.clone(),
            self.config.seen.flush_interval,
            flush_token.clone(),
        ));

        RunningSupervisor {
            grace: self.config.shutdown_grace,
            metrics: self.metrics,
            seen: self.seen,
            worker_token,
            tracker,
            workers,
            flush_token,
            flusher,
            server_token,
            server,
            status_addr,
        }
    }

    async fn spawn_status_server(
        &self,
        config: StatusServerConfig,
        token: CancellationToken,
    ) -> (Option<SocketAddr>, Option<JoinHandle<()>>) {
        let server = StatusServer::new(config, self.metrics.clone(), token);
        match server.bind().await {
            Ok(listener) => {
                let addr = listener.local_addr().ok();
                let metrics = self.metrics.clone();
                let handle = tokio::spawn(async move {
                    if let Err(e) = server.serve(listener).await {
                        metrics.report_error(e.to_string());
                    }
                });
                (addr, Some(handle))
            }
            Err(e) => {
                warn!(error = %e, "Status endpoint disabled, continuing without it");
                self.metrics.record_error(e.to_string(), chrono::Utc::now());
                (None, None)
            }
        }
    }

    /// Start, wait for `shutdown`, then shut down.
    pub async fn run<F>(self, shutdown: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        let running = self.start().await;
        shutdown.await;
        info!("Shutdown requested");
        running.shutdown().await
    }
}

/// A started engine.
pub struct RunningSupervisor {
    grace: Duration,
    metrics: Arc<MetricsCollector>,
    seen: Arc<SeenStore>,
    worker_token: CancellationToken,
    tracker: TaskTracker,
    workers: Vec<(String, JoinHandle<Result<(), SourceError>>)>,
    flush_token: CancellationToken,
    flusher: JoinHandle<()>,
    server_token: CancellationToken,
    server: Option<JoinHandle<()>>,
    status_addr: Option<SocketAddr>,
}

impl RunningSupervisor {
    /// Address the status endpoint is listening on, if it could bind.
    pub fn status_addr(&self) -> Option<SocketAddr> {
        self.status_addr
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn seen(&self) -> Arc<SeenStore> {
        self.seen.clone()
    }

    /// Stop everything in order and report how it went.
    pub async fn shutdown(self) -> ShutdownReport {
        info!(grace = ?self.grace, "Stopping stream workers");
        self.worker_token.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!("Shutdown grace period elapsed with workers still running");
        }

        let mut workers = Vec::with_capacity(self.workers.len());
        for (stream, handle) in self.workers {
            let outcome = if handle.is_finished() {
                match handle.await {
                    Ok(Ok(())) => WorkerOutcome::Stopped,
                    Ok(Err(e)) => WorkerOutcome::Failed(e.to_string()),
                    Err(e) => WorkerOutcome::Failed(e.to_string()),
                }
            } else {
                warn!(stream = %stream, "Worker did not stop in time, aborting");
                handle.abort();
                WorkerOutcome::StillRunning
            };
            workers.push((stream, outcome));
        }

        self.flush_token.cancel();
        if let Err(e) = self.flusher.await {
            warn!(error = %e, "Periodic flusher ended abnormally");
        }

        let final_flush = match self.seen.flush_reporting(&self.metrics).await {
            Ok(true) => FlushOutcome::Written,
            Ok(false) => FlushOutcome::NothingToWrite,
            Err(e) => FlushOutcome::Failed(e.to_string()),
        };
        info!(outcome = ?final_flush, entries = self.seen.len(), "Final seen cache flush");

        self.server_token.cancel();
        if let Some(server) = self.server
            && let Err(e) = server.await
        {
            warn!(error = %e, "Status server task ended abnormally");
        }

        let report = ShutdownReport {
            workers,
            final_flush,
        };
        info!(
            finished = report.finished_count(),
            still_running = report.still_running().len(),
            "Shutdown complete"
        );
        report
    }
}
