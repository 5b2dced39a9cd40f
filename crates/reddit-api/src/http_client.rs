use std::{sync::OnceLock, time::Duration};

use tracing::{debug, warn};

/// Default request timeout for Reddit API calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the `reqwest::Client` used for every Reddit request.
///
/// Reddit rejects requests without a descriptive user agent, so one is
/// always required here.
pub fn build_http_client(user_agent: &str, request_timeout: Option<Duration>) -> reqwest::Client {
    install_rustls_provider();

    let builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(request_timeout.unwrap_or(DEFAULT_TIMEOUT))
        .pool_max_idle_per_host(4);

    builder.build().unwrap_or_else(|error| {
        warn!(
            error = %error,
            "Failed to create configured HTTP client; falling back to reqwest defaults"
        );
        reqwest::Client::new()
    })
}
