//! OAuth credentials and token caching.

use std::fmt;
use std::time::{Duration, Instant};

/// Refresh tokens this long before Reddit says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Credentials of a Reddit "script" application.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A bearer token with its local expiry.
#[derive(Debug, Clone)]
pub(crate) struct AccessToken {
    pub value: String,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(value: String, expires_in: Duration) -> Self {
        let lifetime = expires_in.saturating_sub(EXPIRY_MARGIN);
        Self {
            value,
            expires_at: Instant::now() + lifetime,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}
