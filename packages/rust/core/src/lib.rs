//! Candidate selection and chat delivery for pixivbot.
//!
//! This crate turns a list of tags into one artwork: it runs the search
//! strategies, scores and filters the results, avoids recent repeats, and
//! hands the winner to the chat side through [`command::CommandHandler`].

pub mod command;
pub mod pipeline;
pub mod recency;
pub mod rewrite;
pub mod scoring;
pub mod selection;
pub mod strategy;

use pixivbot_shared::ResultRecord;

pub use command::{ChatSink, CommandHandler, Cooldown, HandleOutcome, ParsedCommand, parse_command};
pub use pipeline::{Pipeline, StrategyOutcome};
pub use recency::{InMemoryRecencyCache, RecencyCache};
pub use rewrite::UrlRewriter;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called before each strategy is tried. `index` is 1-based.
    fn strategy(&self, name: &str, index: usize, total: usize);
    /// Called once a candidate has been accepted.
    fn selected(&self, record: &ResultRecord);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn strategy(&self, _name: &str, _index: usize, _total: usize) {}
    fn selected(&self, _record: &ResultRecord) {}
}
