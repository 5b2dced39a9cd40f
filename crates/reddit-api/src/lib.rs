//! Minimal Reddit API client.
//!
//! Covers exactly what a moderation bot needs:
//! - OAuth "script app" password-grant authentication with token caching
//! - Listing the newest submissions of a subreddit
//! - Sending private messages
//!
//! Errors are classified with [`RedditError::is_transient`] so callers can
//! decide between retrying and giving up.

mod auth;
mod client;
mod error;
mod http_client;
mod models;

pub use auth::Credentials;
pub use client::{DEFAULT_API_BASE, DEFAULT_AUTH_BASE, RedditClient};
pub use error::RedditError;
pub use http_client::{build_http_client, install_rustls_provider};
pub use models::{Listing, Submission};

pub type Result<T> = std::result::Result<T, RedditError>;
