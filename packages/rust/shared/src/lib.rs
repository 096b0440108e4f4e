//! Shared types, error model, and configuration for pixivbot.
//!
//! This crate is the foundation depended on by all other pixivbot crates.
//! It provides:
//! - [`PixivBotError`] — the unified error type
//! - Domain types ([`CandidateItem`], [`ArtworkDetail`], [`ResultRecord`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChatConfig, DownloadConfig, PageSelection, PixivConfig, ProxyConfig,
    ScoringConfig, SelectionConfig, StrategyConfig, config_dir, config_file_path,
    default_strategies, expand_home, init_config, load_config, load_config_from, resolve_cookie,
    validate_config,
};
pub use error::{PixivBotError, Result};
pub use types::{
    ArtworkDetail, CandidateItem, Engagement, RESTRICTED_REQUEST_TAGS, ResultRecord,
    has_restricted_tag, is_restricted_request,
};
