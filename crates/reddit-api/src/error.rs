use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedditError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("access token rejected")]
    Unauthorized,
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("subreddit or user not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("api error {code}: {message}")]
    Api { code: String, message: String },
}

impl RedditError {
    /// Whether retrying the same request later may succeed.
    ///
    /// Network failures, timeouts, 5xx, 429, rate-limit API errors and expired
    /// tokens are transient. Everything else (bad credentials, 4xx, API
    /// validation errors, malformed payloads) is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                if let Some(status) = e.status() {
                    return status.is_server_error() || status.as_u16() == 429;
                }
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            Self::Unauthorized | Self::RateLimited(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::InvalidUrl(_)
            | Self::Json(_)
            | Self::Auth(_)
            | Self::NotFound(_)
            | Self::Forbidden(_)
            | Self::Api { .. } => false,
        }
    }

    /// Map an API error code from a `json.errors` array.
    pub(crate) fn from_api(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        if code.eq_ignore_ascii_case("RATELIMIT") {
            Self::RateLimited(message)
        } else if code.eq_ignore_ascii_case("USER_DOESNT_EXIST") {
            Self::NotFound(message)
        } else {
            Self::Api { code, message }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let server = RedditError::Status {
            status: 503,
            body: String::new(),
        };
        assert!(server.is_transient());

        let throttled = RedditError::Status {
            status: 429,
            body: String::new(),
        };
        assert!(throttled.is_transient());

        let bad_request = RedditError::Status {
            status: 400,
            body: String::new(),
        };
        assert!(!bad_request.is_transient());
    }

    #[test]
    fn api_error_classification() {
        assert!(RedditError::from_api("RATELIMIT", "slow down").is_transient());
        assert!(matches!(
            RedditError::from_api("USER_DOESNT_EXIST", "nope"),
            RedditError::NotFound(_)
        ));
        assert!(!RedditError::from_api("NO_TEXT", "we need something here").is_transient());
    }

    #[test]
    fn auth_failures_are_permanent() {
        assert!(!RedditError::Auth("invalid_grant".into()).is_transient());
        assert!(RedditError::Unauthorized.is_transient());
    }
}
