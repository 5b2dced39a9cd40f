//! Wire models for the subset of the Reddit API we consume.

use serde::{Deserialize, Serialize};

/// A `Listing` envelope: `{"kind": "Listing", "data": {"children": [...]}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Listing<T> {
    pub data: ListingData<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingData<T> {
    #[serde(default = "Vec::new")]
    pub children: Vec<Thing<T>>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thing<T> {
    pub kind: String,
    pub data: T,
}

impl<T> Listing<T> {
    /// Consume the listing and return the inner items in API order (newest first).
    pub fn into_items(self) -> Vec<T> {
        self.data.children.into_iter().map(|t| t.data).collect()
    }
}

/// A link submission (`t3`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Base36 id without the `t3_` prefix.
    pub id: String,
    /// Fullname, e.g. `t3_abc123`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_fullname: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub link_flair_text: Option<String>,
    #[serde(default)]
    pub permalink: String,
}

impl Submission {
    /// The author's username, if the account still exists.
    pub fn author_name(&self) -> Option<&str> {
        match self.author.as_deref() {
            None | Some("") | Some("[deleted]") => None,
            Some(name) => Some(name),
        }
    }
}

/// Response of `/api/compose` (and most `api_type=json` endpoints).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JsonEnvelope {
    pub json: JsonErrors,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JsonErrors {
    #[serde(default)]
    pub errors: Vec<Vec<serde_json::Value>>,
}

impl JsonErrors {
    /// First error as `(code, message)`, if any.
    pub fn first(&self) -> Option<(String, String)> {
        let entry = self.errors.first()?;
        let field = |idx: usize| {
            entry
                .get(idx)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Some((field(0), field(1)))
    }
}

/// Response of the OAuth token endpoint.
///
/// Reddit answers invalid credentials with HTTP 200 and `{"error": "..."}`,
/// so both shapes are modelled.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}
