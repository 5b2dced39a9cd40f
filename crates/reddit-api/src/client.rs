//! Reddit OAuth API client.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use url::Url;

use crate::auth::{AccessToken, Credentials};
use crate::models::{JsonEnvelope, Listing, Submission, TokenResponse};
use crate::{RedditError, Result};

/// Base URL for authenticated API calls.
pub const DEFAULT_API_BASE: &str = "https://oauth.reddit.com/";

/// Base URL for the token endpoint.
pub const DEFAULT_AUTH_BASE: &str = "https://www.reddit.com/";

/// Maximum page size Reddit accepts for listings.
const MAX_LISTING_LIMIT: u32 = 100;

/// Token lifetime assumed when Reddit omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Authenticated Reddit client.
///
/// Cheap to share behind an `Arc`; the access token is cached internally and
/// refreshed on demand.
#[derive(Debug)]
pub struct RedditClient {
    http: reqwest::Client,
    credentials: Credentials,
    api_base: Url,
    auth_base: Url,
    token: Mutex<Option<AccessToken>>,
}

impl RedditClient {
    /// Create a client against the public Reddit endpoints.
    pub fn new(http: reqwest::Client, credentials: Credentials) -> Result<Self> {
        Self::with_base_urls(http, credentials, DEFAULT_API_BASE, DEFAULT_AUTH_BASE)
    }

    /// Create a client against custom endpoints (proxies, test servers).
    pub fn with_base_urls(
        http: reqwest::Client,
        credentials: Credentials,
        api_base: &str,
        auth_base: &str,
    ) -> Result<Self> {
        Ok(Self {
            http,
            credentials,
            api_base: Url::parse(api_base)?,
            auth_base: Url::parse(auth_base)?,
            token: Mutex::new(None),
        })
    }

    /// Username the client authenticates as.
    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Fetch the newest submissions of `subreddit`, newest first.
    pub async fn new_submissions(&self, subreddit: &str, limit: u32) -> Result<Vec<Submission>> {
        let mut url = self.api_base.join(&format!("r/{}/new", subreddit))?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.clamp(1, MAX_LISTING_LIMIT).to_string())
            .append_pair("raw_json", "1");

        let token = self.access_token().await?;
        let response = self.http.get(url).bearer_auth(&token).send().await?;
        let response = self.check_status(response, subreddit).await?;

        let listing: Listing<Submission> = serde_json::from_str(&response.text().await?)?;
        let items = listing.into_items();
        trace!(subreddit, count = items.len(), "Fetched new submissions");
        Ok(items)
    }

    /// Send a private message to `recipient`.
    pub async fn send_private_message(
        &self,
        recipient: &str,
        subject: &str,
        text: &str,
    ) -> Result<()> {
        let url = self.api_base.join("api/compose")?;
        let token = self.access_token().await?;
        let form = [
            ("api_type", "json"),
            ("to", recipient),
            ("subject", subject),
            ("text", text),
        ];

        let response = self
            .http
            .post(url)
            .bearer_auth(&token)
            .form(&form)
            .send()
            .await?;
        let response = self.check_status(response, recipient).await?;

        let envelope: JsonEnvelope = serde_json::from_str(&response.text().await?)?;
        if let Some((code, message)) = envelope.json.first() {
            return Err(RedditError::from_api(code, message));
        }

        debug!(recipient, "Private message delivered");
        Ok(())
    }

    /// Drop the cached token so the next request re-authenticates.
    pub async fn invalidate_token(&self) {
        self.token.lock().await.take();
    }

    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref()
            && !token.is_expired()
        {
            return Ok(token.value.clone());
        }

        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<AccessToken> {
        let url = self.auth_base.join("api/v1/access_token")?;
        let form = [
            ("grant_type", "password"),
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
        ];

        let response = self
            .http
            .post(url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RedditError::Auth(format!(
                "token endpoint returned {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(RedditError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: TokenResponse = serde_json::from_str(&response.text().await?)?;
        match (body.access_token, body.error) {
            (Some(token), _) => {
                let lifetime = body
                    .expires_in
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_TOKEN_LIFETIME);
                debug!(username = %self.credentials.username, "Obtained Reddit access token");
                Ok(AccessToken::new(token, lifetime))
            }
            (None, Some(error)) => Err(RedditError::Auth(error)),
            (None, None) => Err(RedditError::Auth("missing access_token".to_string())),
        }
    }

    /// Map non-success statuses onto [`RedditError`] variants.
    async fn check_status(&self, response: Response, target: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::UNAUTHORIZED => {
                self.invalidate_token().await;
                Err(RedditError::Unauthorized)
            }
            StatusCode::FORBIDDEN => Err(RedditError::Forbidden(target.to_string())),
            StatusCode::NOT_FOUND => Err(RedditError::NotFound(target.to_string())),
            StatusCode::TOO_MANY_REQUESTS => Err(RedditError::RateLimited(format!(
                "HTTP 429 for {}",
                target
            ))),
            _ => Err(RedditError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
            username: "modbot".into(),
            password: "pw".into(),
        }
    }

    #[test]
    fn rejects_invalid_base_url() {
        let result = RedditClient::with_base_urls(
            crate::build_http_client("subguard-test", None),
            credentials(),
            "not a url",
            DEFAULT_AUTH_BASE,
        );
        assert!(matches!(result, Err(RedditError::InvalidUrl(_))));
    }

    #[test]
    fn listing_url_is_joined_on_api_base() {
        let client = RedditClient::new(crate::build_http_client("subguard-test", None), credentials()).unwrap();
        let url = client.api_base.join("r/rust/new").unwrap();
        assert_eq!(url.as_str(), "https://oauth.reddit.com/r/rust/new");
        assert_eq!(client.username(), "modbot");
    }

    #[tokio::test]
    async fn invalidate_clears_cached_token() {
        let client = RedditClient::new(crate::build_http_client("subguard-test", None), credentials()).unwrap();
        *client.token.lock().await = Some(AccessToken::new(
            "cached".into(),
            Duration::from_secs(3600),
        ));
        assert_eq!(client.access_token().await.unwrap(), "cached");

        client.invalidate_token().await;
        assert!(client.token.lock().await.is_none());
    }
}
