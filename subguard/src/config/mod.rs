//! Startup configuration.
//!
//! Everything is read once from environment variables (optionally loaded from
//! a `.env` file by the binary) and treated as immutable afterwards.

mod env;

pub use env::{dedup_stream_names, normalize_stream_list, parse_env};

use std::path::PathBuf;
use std::time::Duration;

use reddit_api::Credentials;

use crate::api::StatusServerConfig;
use crate::dispatch::{BackoffPolicy, DispatcherConfig};
use crate::monitor::WorkerConfig;
use crate::seen::SeenStoreConfig;
use crate::{Error, Result};

/// Default grace period for workers to stop after a termination signal.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default interval between listing polls of a subreddit.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Reddit account and polling settings.
#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub credentials: Credentials,
    pub user_agent: String,
    pub poll_interval: Duration,
}

/// Template for the built-in greeting handler.
#[derive(Debug, Clone, PartialEq)]
pub struct GreetingConfig {
    pub subject: String,
    pub body: String,
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Normalized, deduplicated subreddit names.
    pub streams: Vec<String>,
    pub seen: SeenStoreConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub status: StatusServerConfig,
    pub shutdown_grace: Duration,
    pub reddit: RedditConfig,
    pub greeting: Option<GreetingConfig>,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| Error::config(format!("missing required variable {}", key)))
        };

        let streams = normalize_stream_list(get("SUBREDDITS").as_deref().unwrap_or_default());
        if streams.is_empty() {
            return Err(Error::config(
                "no subreddits configured; set SUBREDDITS to a comma-separated list",
            ));
        }

        let jitter_ratio: f64 = parse_env(&lookup, "BACKOFF_JITTER_RATIO", 0.3)?;

        let seen = SeenStoreConfig {
            path: get("SEEN_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("seen_submissions.json")),
            autosave_every: parse_env(&lookup, "SEEN_AUTOSAVE_EVERY", 50)?,
            flush_interval: Duration::from_secs(parse_env(
                &lookup,
                "SEEN_FLUSH_INTERVAL_SECS",
                60,
            )?),
        };

        let dispatcher = DispatcherConfig {
            min_interval: secs_f64(&lookup, "MESSAGE_MIN_INTERVAL_SECS", 2.0)?,
            max_attempts: parse_env(&lookup, "MESSAGE_MAX_ATTEMPTS", 3)?,
            backoff: BackoffPolicy {
                base: secs_f64(&lookup, "MESSAGE_BACKOFF_BASE_SECS", 1.0)?,
                cap: secs_f64(&lookup, "MESSAGE_BACKOFF_CAP_SECS", 60.0)?,
                jitter_ratio,
            },
        };

        let worker = WorkerConfig {
            max_consecutive_failures: parse_env(&lookup, "SOURCE_MAX_CONSECUTIVE_FAILURES", 5)?,
            reconnect_backoff: BackoffPolicy {
                base: secs_f64(&lookup, "SOURCE_BACKOFF_BASE_SECS", 1.0)?,
                cap: secs_f64(&lookup, "SOURCE_BACKOFF_CAP_SECS", 30.0)?,
                jitter_ratio,
            },
        };

        let status = StatusServerConfig {
            bind_address: get("HEALTH_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_env(&lookup, "HEALTH_PORT", 8520)?,
        };

        let reddit = RedditConfig {
            credentials: Credentials {
                client_id: required("REDDIT_CLIENT_ID")?,
                client_secret: required("REDDIT_CLIENT_SECRET")?,
                username: required("REDDIT_USERNAME")?,
                password: required("REDDIT_PASSWORD")?,
            },
            user_agent: get("REDDIT_USER_AGENT")
                .unwrap_or_else(|| format!("subguard/{}", env!("CARGO_PKG_VERSION"))),
            poll_interval: secs_f64(
                &lookup,
                "SOURCE_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL.as_secs_f64(),
            )?,
        };

        let greeting = match (get("GREETING_SUBJECT"), get("GREETING_BODY")) {
            (Some(subject), Some(body)) => Some(GreetingConfig { subject, body }),
            (None, None) => None,
            _ => {
                return Err(Error::config(
                    "GREETING_SUBJECT and GREETING_BODY must be set together",
                ));
            }
        };

        let config = Self {
            streams,
            seen,
            dispatcher,
            worker,
            status,
            shutdown_grace: secs_f64(
                &lookup,
                "SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE.as_secs_f64(),
            )?,
            reddit,
            greeting,
            log_dir: get("LOG_DIR").map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would make the engine misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.max_attempts == 0 {
            return Err(Error::config("MESSAGE_MAX_ATTEMPTS must be at least 1"));
        }
        if self.worker.max_consecutive_failures == 0 {
            return Err(Error::config(
                "SOURCE_MAX_CONSECUTIVE_FAILURES must be at least 1",
            ));
        }
        if self.seen.autosave_every == 0 {
            return Err(Error::config("SEEN_AUTOSAVE_EVERY must be at least 1"));
        }
        if self.seen.flush_interval.is_zero() {
            return Err(Error::config("SEEN_FLUSH_INTERVAL_SECS must be positive"));
        }
        if self.reddit.poll_interval.is_zero() {
            return Err(Error::config("SOURCE_POLL_INTERVAL_SECS must be positive"));
        }
        for policy in [&self.dispatcher.backoff, &self.worker.reconnect_backoff] {
            if !(0.0..=1.0).contains(&policy.jitter_ratio) {
                return Err(Error::config("BACKOFF_JITTER_RATIO must be within [0, 1]"));
            }
        }
        Ok(())
    }
}

/// Parse a non-negative, finite number of seconds.
fn secs_f64<F>(lookup: &F, key: &str, default: f64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let value: f64 = parse_env(lookup, key, default)?;
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::config(format!("{} must be a non-negative number, got {}", key, value)))
}
