//! Globally rate-limited outbound message dispatcher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::{BackoffPolicy, JitterSource, RandomJitter};
use crate::metrics::MetricsCollector;

/// Default minimum spacing between two outbound messages.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(2);

/// Default total number of attempts per message.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A message to deliver to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// Attempts made so far; maintained by the dispatcher.
    pub attempt_count: u32,
}

impl DispatchRequest {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            attempt_count: 0,
        }
    }
}

/// Failure of a single delivery attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// Worth retrying (rate limited, timeouts, server errors).
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying cannot help (unknown recipient, forbidden).
    #[error("permanent: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Transport that performs one delivery attempt.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, request: &DispatchRequest) -> Result<(), SendError>;
}

/// Proof of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub recipient: String,
    pub attempts: u32,
}

/// Terminal delivery failure returned to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("gave up messaging {recipient} after {attempts} attempts: {last_error}")]
    Exhausted {
        recipient: String,
        attempts: u32,
        last_error: String,
    },
    #[error("message to {recipient} rejected: {reason}")]
    Rejected {
        recipient: String,
        attempts: u32,
        reason: String,
    },
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    pub min_interval: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy {
                base: Duration::from_secs(1),
                cap: Duration::from_secs(60),
                jitter_ratio: 0.3,
            },
        }
    }
}

/// Pacing clock shared by every caller.
#[derive(Debug, Default)]
struct RateGate {
    last_send: Option<Instant>,
}

impl RateGate {
    fn wait_time(&self, min_interval: Duration) -> Duration {
        match self.last_send {
            Some(last) => min_interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }
}

/// Single process-wide gate for outbound messages.
///
/// The gate is held for the whole of one [`send`](Self::send) call, pacing
/// sleeps and retry backoff included, so concurrent callers are served one at
/// a time in arrival order and no two attempts are closer than
/// `min_interval`. Shutdown does not interrupt a send; it is bounded by
/// `max_attempts`.
pub struct Dispatcher {
    sender: Arc<dyn MessageSender>,
    config: DispatcherConfig,
    jitter: Arc<dyn JitterSource>,
    metrics: Arc<MetricsCollector>,
    gate: Mutex<RateGate>,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        config: DispatcherConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self::with_jitter(sender, config, metrics, Arc::new(RandomJitter))
    }

    pub fn with_jitter(
        sender: Arc<dyn MessageSender>,
        config: DispatcherConfig,
        metrics: Arc<MetricsCollector>,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        Self {
            sender,
            config,
            jitter,
            metrics,
            gate: Mutex::new(RateGate::default()),
        }
    }

    /// Deliver `request`, retrying transient failures with backoff.
    pub async fn send(
        &self,
        mut request: DispatchRequest,
    ) -> Result<DispatchReceipt, DispatchError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut gate = self.gate.lock().await;

        loop {
            let wait = gate.wait_time(self.config.min_interval);
            if !wait.is_zero() {
                debug!(recipient = %request.recipient, wait_ms = wait.as_millis() as u64, "Pacing outbound message");
                tokio::time::sleep(wait).await;
            }

            request.attempt_count += 1;
            let attempt = request.attempt_count;
            let result = self.sender.send_message(&request).await;
            gate.last_send = Some(Instant::now());

            match result {
                Ok(()) => {
                    self.metrics.record_message_sent();
                    info!(recipient = %request.recipient, attempt, "Message sent");
                    return Ok(DispatchReceipt {
                        recipient: request.recipient,
                        attempts: attempt,
                    });
                }
                Err(SendError::Permanent(reason)) => {
                    let err = DispatchError::Rejected {
                        recipient: request.recipient,
                        attempts: attempt,
                        reason,
                    };
                    self.fail(&err);
                    return Err(err);
                }
                Err(SendError::Transient(reason)) if attempt >= max_attempts => {
                    let err = DispatchError::Exhausted {
                        recipient: request.recipient,
                        attempts: attempt,
                        last_error: reason,
                    };
                    self.fail(&err);
                    return Err(err);
                }
                Err(SendError::Transient(reason)) => {
                    let delay = self.config.backoff.delay(attempt, self.jitter.as_ref());
                    warn!(
                        recipient = %request.recipient,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Message send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn fail(&self, err: &DispatchError) {
        warn!(error = %err, "Message dispatch failed");
        self.metrics.record_error(err.to_string(), Utc::now());
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}
