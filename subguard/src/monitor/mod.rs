//! Stream monitoring.
//!
//! One [`StreamWorker`] runs per configured subreddit. It pulls [`Item`]s from
//! an [`ItemSource`], drops those already in the seen set, and hands the rest
//! to the [`DecisionHandler`].

mod handler;
pub mod handlers;
mod reddit;
mod source;
mod worker;

pub use handler::{DecisionHandler, HandlerContext};
pub use handlers::{GreetingHandler, LogOnlyHandler, message_footer};
pub use reddit::{RedditSender, RedditSource, RedditSourceFactory};
pub use source::{Item, ItemSource, SourceError, SourceFactory};
pub use worker::{StreamWorker, WorkerConfig, WorkerDeps};
