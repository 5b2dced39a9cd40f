//! Built-in decision handlers.

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{DecisionHandler, HandlerContext, Item};
use crate::config::GreetingConfig;
use crate::dispatch::DispatchRequest;

/// Rule name recorded when the greeting handler messages an author.
pub const GREETING_RULE: &str = "greeting";

/// Standard footer appended to every bot message.
pub fn message_footer(subreddit: &str) -> String {
    format!(
        "\n\n---\n\n*I am a bot, and this action was performed automatically. Please [contact the moderators of this subreddit](/message/compose/?to=/r/{subreddit}) if you have any questions or concerns.*"
    )
}

/// Observes items without acting on them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyHandler;

#[async_trait]
impl DecisionHandler for LogOnlyHandler {
    async fn handle(&self, item: &Item, ctx: &HandlerContext) -> anyhow::Result<()> {
        info!(
            stream = %ctx.stream_name,
            item_id = %item.id,
            author = item.author.as_deref().unwrap_or("<unknown>"),
            title = %item.title,
            "New submission"
        );
        Ok(())
    }
}

/// Messages the author of every new submission.
///
/// `{author}`, `{subreddit}` and `{title}` in the subject and body are
/// replaced before sending.
#[derive(Debug, Clone)]
pub struct GreetingHandler {
    subject: String,
    body: String,
}

impl GreetingHandler {
    pub fn new(config: GreetingConfig) -> Self {
        Self {
            subject: config.subject,
            body: config.body,
        }
    }

    fn render(template: &str, author: &str, item: &Item) -> String {
        template
            .replace("{author}", author)
            .replace("{subreddit}", &item.stream)
            .replace("{title}", &item.title)
    }

    /// Build the message for `item`, or `None` when it has no author.
    pub fn compose(&self, item: &Item) -> Option<DispatchRequest> {
        let author = item.author.as_deref()?;
        let mut body = Self::render(&self.body, author, item);
        body.push_str(&message_footer(&item.stream));
        Some(DispatchRequest::new(
            author,
            Self::render(&self.subject, author, item),
            body,
        ))
    }
}

#[async_trait]
impl DecisionHandler for GreetingHandler {
    async fn handle(&self, item: &Item, ctx: &HandlerContext) -> anyhow::Result<()> {
        let Some(request) = self.compose(item) else {
            debug!(stream = %ctx.stream_name, item_id = %item.id, "No author, skipping greeting");
            return Ok(());
        };

        ctx.record_rule(GREETING_RULE);
        let recipient = request.recipient.clone();
        ctx.send(request)
            .await
            .with_context(|| format!("greeting {} for {}", recipient, item.id))?;
        Ok(())
    }
}
