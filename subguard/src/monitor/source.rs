use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// A unit of content pulled from a stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    /// Stable identifier used for deduplication.
    pub id: String,
    /// Name of the stream the item came from.
    pub stream: String,
    /// Author's username, if known.
    pub author: Option<String>,
    pub title: String,
    pub body: String,
    pub permalink: Option<String>,
    pub flair: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(id: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stream: stream.into(),
            author: None,
            title: String::new(),
            body: String::new(),
            permalink: None,
            flair: None,
            created_at: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Failure to pull from a stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Connectivity or throttling; the worker backs off and retries.
    #[error("transient source error: {0}")]
    Transient(String),
    /// The stream cannot be read (missing, private, bad credentials).
    #[error("permanent source error: {0}")]
    Permanent(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// An ordered stream of new items.
///
/// `next_item` must be cancel-safe: dropping the future before it resolves
/// must not lose an item that a later call would have returned.
#[async_trait]
pub trait ItemSource: Send {
    async fn next_item(&mut self) -> Result<Item, SourceError>;
}

/// Opens one [`ItemSource`] per stream name.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn open(&self, stream: &str) -> Result<Box<dyn ItemSource>, SourceError>;
}
