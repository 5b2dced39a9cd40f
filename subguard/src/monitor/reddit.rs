//! Reddit-backed [`ItemSource`] and [`MessageSender`].

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reddit_api::{RedditClient, RedditError, Submission};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{Item, ItemSource, SourceError, SourceFactory};
use crate::dispatch::{DispatchRequest, MessageSender, SendError};

/// Listing page size requested on every poll.
const LISTING_LIMIT: u32 = 100;

/// Number of recently yielded ids remembered per stream.
const RECENT_WINDOW: usize = 1000;

/// Insertion-ordered set that forgets its oldest entries past `capacity`.
#[derive(Debug)]
struct RecentIds {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Returns `true` if `id` was not already remembered.
    fn insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.members.remove(&evicted);
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());
        true
    }
}

fn classify(err: RedditError) -> SourceError {
    if err.is_transient() {
        SourceError::Transient(err.to_string())
    } else {
        SourceError::Permanent(err.to_string())
    }
}

fn submission_to_item(submission: Submission, stream: &str) -> Item {
    let author = submission.author_name().map(str::to_string);
    let created_at = DateTime::<Utc>::from_timestamp(submission.created_utc as i64, 0);
    Item {
        id: submission.id,
        stream: stream.to_string(),
        author,
        title: submission.title,
        body: submission.selftext,
        permalink: (!submission.permalink.is_empty()).then_some(submission.permalink),
        flair: submission.link_flair_text,
        created_at,
    }
}

/// Polls `/r/{subreddit}/new` and yields unseen submissions oldest first.
///
/// Submissions already listed on the first poll are skipped, so only posts
/// made after the source was opened are delivered.
pub struct RedditSource {
    client: Arc<RedditClient>,
    subreddit: String,
    poll_interval: Duration,
    skip_existing: bool,
    primed: bool,
    recent: RecentIds,
    buffer: VecDeque<Submission>,
    last_poll: Option<Instant>,
}

impl RedditSource {
    pub fn new(
        client: Arc<RedditClient>,
        subreddit: impl Into<String>,
        poll_interval: Duration,
        skip_existing: bool,
    ) -> Self {
        Self {
            client,
            subreddit: subreddit.into(),
            poll_interval,
            skip_existing,
            primed: false,
            recent: RecentIds::new(RECENT_WINDOW),
            buffer: VecDeque::new(),
            last_poll: None,
        }
    }

    /// Queue the submissions of one listing (newest first) that were not yielded yet.
    fn absorb(&mut self, listing: Vec<Submission>) -> usize {
        let fresh: Vec<Submission> = listing
            .into_iter()
            .rev()
            .filter(|s| self.recent.insert(&s.id))
            .collect();

        if !self.primed {
            self.primed = true;
            if self.skip_existing {
                debug!(subreddit = %self.subreddit, skipped = fresh.len(), "Skipping existing submissions");
                return 0;
            }
        }

        let count = fresh.len();
        self.buffer.extend(fresh);
        count
    }
}

#[async_trait]
impl ItemSource for RedditSource {
    async fn next_item(&mut self) -> Result<Item, SourceError> {
        loop {
            if let Some(submission) = self.buffer.pop_front() {
                return Ok(submission_to_item(submission, &self.subreddit));
            }

            if let Some(last) = self.last_poll {
                tokio::time::sleep_until(last + self.poll_interval).await;
            }
            self.last_poll = Some(Instant::now());

            let listing = self
                .client
                .new_submissions(&self.subreddit, LISTING_LIMIT)
                .await
                .map_err(classify)?;
            let queued = self.absorb(listing);
            trace!(subreddit = %self.subreddit, queued, "Polled new submissions");
        }
    }
}

/// Opens a [`RedditSource`] per subreddit on a shared client.
pub struct RedditSourceFactory {
    client: Arc<RedditClient>,
    poll_interval: Duration,
    skip_existing: bool,
}

impl RedditSourceFactory {
    pub fn new(client: Arc<RedditClient>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
            skip_existing: true,
        }
    }
}

#[async_trait]
impl SourceFactory for RedditSourceFactory {
    async fn open(&self, stream: &str) -> Result<Box<dyn ItemSource>, SourceError> {
        Ok(Box::new(RedditSource::new(
            self.client.clone(),
            stream,
            self.poll_interval,
            self.skip_existing,
        )))
    }
}

/// Delivers dispatches as Reddit private messages.
pub struct RedditSender {
    client: Arc<RedditClient>,
}

impl RedditSender {
    pub fn new(client: Arc<RedditClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageSender for RedditSender {
    async fn send_message(&self, request: &DispatchRequest) -> Result<(), SendError> {
        self.client
            .send_private_message(&request.recipient, &request.subject, &request.body)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    SendError::Transient(e.to_string())
                } else {
                    SendError::Permanent(e.to_string())
                }
            })
    }
}
