use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use reddit_api::{RedditClient, build_http_client};
use subguard::config::AppConfig;
use subguard::monitor::{
    DecisionHandler, GreetingHandler, LogOnlyHandler, RedditSender, RedditSourceFactory,
};
use subguard::services::{FlushOutcome, Supervisor, SupervisorConfig};
use subguard::{logging, panic_hook, signals};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_dir = std::env::var_os("LOG_DIR").map(std::path::PathBuf::from);
    let _log_guard = logging::init_logging(log_dir.as_deref())?;
    panic_hook::install(log_dir.as_deref());

    let config = AppConfig::from_env().context("invalid configuration")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        streams = ?config.streams,
        "Starting subguard"
    );

    let housekeeping = CancellationToken::new();
    if let Some(dir) = config.log_dir.as_deref() {
        logging::start_retention_cleanup(dir, housekeeping.clone());
    }

    let http = build_http_client(&config.reddit.user_agent, None);
    let client = Arc::new(
        RedditClient::new(http, config.reddit.credentials.clone())
            .context("failed to create Reddit client")?,
    );

    let handler: Arc<dyn DecisionHandler> = match config.greeting.clone() {
        Some(greeting) => {
            info!("Greeting handler enabled");
            Arc::new(GreetingHandler::new(greeting))
        }
        None => {
            info!("No greeting configured, logging new submissions only");
            Arc::new(LogOnlyHandler)
        }
    };

    let supervisor = Supervisor::new(
        SupervisorConfig::from(&config),
        Arc::new(RedditSourceFactory::new(
            client.clone(),
            config.reddit.poll_interval,
        )),
        handler,
        Arc::new(RedditSender::new(client)),
    );

    let report = supervisor
        .run(async {
            if let Err(e) = signals::wait_for_shutdown_signal().await {
                error!(error = %e, "Failed to listen for shutdown signals, stopping");
            }
        })
        .await;
    housekeeping.cancel();

    let still_running = report.still_running();
    if !still_running.is_empty() {
        warn!(streams = ?still_running, "Workers were still running at the shutdown deadline");
    }
    if let FlushOutcome::Failed(reason) = &report.final_flush {
        warn!(error = %reason, "Final seen cache flush failed");
    }

    info!("subguard stopped");
    Ok(())
}
