//! Application configuration for pixivbot.
//!
//! User config lives at `~/.pixivbot/pixivbot.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PixivBotError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pixivbot.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pixivbot";

// ---------------------------------------------------------------------------
// Config structs (matching pixivbot.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream site settings.
    #[serde(default)]
    pub pixiv: PixivConfig,

    /// Outbound proxy and image domain rewriting.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Candidate selection and repeat avoidance.
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Engagement and freshness weights.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Image download and temp storage.
    #[serde(default)]
    pub download: DownloadConfig,

    /// Chat command surface.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Search strategies, tried in order from strictest to loosest.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pixiv: PixivConfig::default(),
            proxy: ProxyConfig::default(),
            selection: SelectionConfig::default(),
            scoring: ScoringConfig::default(),
            download: DownloadConfig::default(),
            chat: ChatConfig::default(),
            strategies: default_strategies(),
        }
    }
}

/// `[pixiv]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixivConfig {
    /// Site origin; overridable so tests can point at a mock server.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the session cookie (never store the cookie itself).
    #[serde(default = "default_cookie_env")]
    pub cookie_env: String,

    /// `lang` query parameter sent with searches.
    #[serde(default = "default_lang")]
    pub lang: String,

    /// Browser-like User-Agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for search requests, in seconds.
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,

    /// Timeout for artwork detail requests, in seconds.
    #[serde(default = "default_detail_timeout")]
    pub detail_timeout_secs: u64,
}

impl Default for PixivConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            cookie_env: default_cookie_env(),
            lang: default_lang(),
            user_agent: default_user_agent(),
            search_timeout_secs: default_search_timeout(),
            detail_timeout_secs: default_detail_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.pixiv.net".into()
}
fn default_cookie_env() -> String {
    "PIXIV_COOKIE".into()
}
fn default_lang() -> String {
    "zh".into()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .into()
}
fn default_search_timeout() -> u64 {
    30
}
fn default_detail_timeout() -> u64 {
    20
}

/// `[proxy]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Route API and image requests through `address`.
    #[serde(default)]
    pub enabled: bool,

    /// Upstream HTTP(S) proxy address.
    #[serde(default = "default_proxy_address")]
    pub address: String,

    /// Base URL that replaces the image CDN origin in media links.
    #[serde(default = "default_image_proxy")]
    pub image_proxy_url: String,

    /// Known image CDN hosts collapsed onto `image_proxy_url`.
    #[serde(default = "default_cdn_hosts")]
    pub cdn_hosts: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_proxy_address(),
            image_proxy_url: default_image_proxy(),
            cdn_hosts: default_cdn_hosts(),
        }
    }
}

impl ProxyConfig {
    /// The proxy address to hand to HTTP clients, if proxying is on.
    pub fn upstream(&self) -> Option<&str> {
        self.enabled.then_some(self.address.as_str())
    }
}

fn default_proxy_address() -> String {
    "http://127.0.0.1:7890".into()
}
fn default_image_proxy() -> String {
    "https://i.pixiv.re/".into()
}
fn default_cdn_hosts() -> Vec<String> {
    vec!["i.pximg.net".into(), "pixiv.cat".into()]
}

/// `[selection]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Seconds during which a shown artwork is not preferentially picked again.
    #[serde(default = "default_exclude_duration")]
    pub exclude_duration_secs: u64,

    /// Candidates kept after scoring.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Size of the top-quality subset tried first.
    #[serde(default = "default_top_quality")]
    pub top_quality: usize,

    /// Detail fetches allowed per strategy before moving on.
    #[serde(default = "default_detail_attempts")]
    pub max_detail_attempts: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            exclude_duration_secs: default_exclude_duration(),
            top_k: default_top_k(),
            top_quality: default_top_quality(),
            max_detail_attempts: default_detail_attempts(),
        }
    }
}

fn default_exclude_duration() -> u64 {
    3600
}
fn default_top_k() -> usize {
    100
}
fn default_top_quality() -> usize {
    30
}
fn default_detail_attempts() -> usize {
    3
}

/// `[scoring]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_bookmark_weight")]
    pub bookmark_weight: f64,

    #[serde(default = "default_like_weight")]
    pub like_weight: f64,

    #[serde(default = "default_view_weight")]
    pub view_weight: f64,

    /// Works at most this many days old get `fresh_boost`.
    #[serde(default = "default_fresh_days")]
    pub fresh_days: i64,

    #[serde(default = "default_fresh_boost")]
    pub fresh_boost: f64,

    /// Age in days after which the score starts decaying.
    #[serde(default = "default_decay_after")]
    pub decay_after_days: i64,

    /// Age in days at which the linear decay would reach zero.
    #[serde(default = "default_decay_horizon")]
    pub decay_horizon_days: i64,

    /// Floor for the decay multiplier.
    #[serde(default = "default_min_multiplier")]
    pub min_multiplier: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            bookmark_weight: default_bookmark_weight(),
            like_weight: default_like_weight(),
            view_weight: default_view_weight(),
            fresh_days: default_fresh_days(),
            fresh_boost: default_fresh_boost(),
            decay_after_days: default_decay_after(),
            decay_horizon_days: default_decay_horizon(),
            min_multiplier: default_min_multiplier(),
        }
    }
}

fn default_bookmark_weight() -> f64 {
    3.0
}
fn default_like_weight() -> f64 {
    2.0
}
fn default_view_weight() -> f64 {
    0.05
}
fn default_fresh_days() -> i64 {
    30
}
fn default_fresh_boost() -> f64 {
    1.5
}
fn default_decay_after() -> i64 {
    90
}
fn default_decay_horizon() -> i64 {
    365
}
fn default_min_multiplier() -> f64 {
    0.3
}

/// How a strategy picks the result page to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSelection {
    /// Always request this page.
    Fixed(u32),
    /// Request a uniformly random page in the inclusive range.
    Random(u32, u32),
}

/// `[[strategies]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Name used in logs and the result record.
    pub name: String,

    /// Only search works created within this many days; `None` searches all time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_days: Option<u32>,

    /// Minimum bookmark count (`blt`).
    #[serde(default)]
    pub min_bookmarks: u32,

    #[serde(default = "default_page")]
    pub page: PageSelection,
}

fn default_page() -> PageSelection {
    PageSelection::Random(1, 3)
}

/// Strict, relaxed and open: 90 days / 500 bookmarks, 180 days / 100, then anything.
pub fn default_strategies() -> Vec<StrategyConfig> {
    vec![
        StrategyConfig {
            name: "strict".into(),
            window_days: Some(90),
            min_bookmarks: 500,
            page: default_page(),
        },
        StrategyConfig {
            name: "relaxed".into(),
            window_days: Some(180),
            min_bookmarks: 100,
            page: default_page(),
        },
        StrategyConfig {
            name: "open".into(),
            window_days: None,
            min_bookmarks: 0,
            page: default_page(),
        },
    ]
}

/// `[download]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory for downloaded originals; `~` expands to the home directory.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,

    /// Timeout for one original download attempt, in seconds.
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,

    /// Timeout for preview downloads, in seconds.
    #[serde(default = "default_preview_timeout")]
    pub preview_timeout_secs: u64,

    /// Timeout for the size probe, in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Attempts per original download.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between download attempts, in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Largest image the chat side accepts, in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,

    /// Temp files older than this are evicted, in seconds.
    #[serde(default = "default_temp_max_age")]
    pub temp_max_age_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            timeout_secs: default_download_timeout(),
            preview_timeout_secs: default_preview_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            max_image_bytes: default_max_image_bytes(),
            temp_max_age_secs: default_temp_max_age(),
        }
    }
}

impl DownloadConfig {
    /// Temp directory with a leading `~` expanded.
    pub fn resolved_temp_dir(&self) -> Result<PathBuf> {
        expand_home(&self.temp_dir)
    }
}

fn default_temp_dir() -> String {
    "~/.pixivbot/tmp".into()
}
fn default_download_timeout() -> u64 {
    60
}
fn default_preview_timeout() -> u64 {
    15
}
fn default_probe_timeout() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    2
}
fn default_retry_delay() -> u64 {
    2000
}
fn default_max_image_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_temp_max_age() -> u64 {
    12 * 3600
}

/// `[chat]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Primary command word, without the leading `/`.
    #[serde(default = "default_command")]
    pub command: String,

    /// Alternative command words.
    #[serde(default = "default_aliases")]
    pub aliases: Vec<String>,

    /// Minimum seconds between two requests from the same user.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            aliases: default_aliases(),
            cooldown_secs: default_cooldown(),
        }
    }
}

fn default_command() -> String {
    "pixiv".into()
}
fn default_aliases() -> Vec<String> {
    vec!["p".into()]
}
fn default_cooldown() -> u64 {
    25
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pixivbot/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PixivBotError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pixivbot/pixivbot.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PixivBotError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PixivBotError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PixivBotError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PixivBotError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PixivBotError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configs the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.strategies.is_empty() {
        return Err(PixivBotError::config("at least one [[strategies]] entry is required"));
    }
    for strategy in &config.strategies {
        if let PageSelection::Random(lo, hi) = strategy.page {
            if lo == 0 || lo > hi {
                return Err(PixivBotError::config(format!(
                    "strategy '{}': page range {lo}..={hi} is invalid",
                    strategy.name
                )));
            }
        }
        if strategy.page == PageSelection::Fixed(0) {
            return Err(PixivBotError::config(format!(
                "strategy '{}': pages start at 1",
                strategy.name
            )));
        }
    }
    if config.selection.top_k == 0 || config.selection.max_detail_attempts == 0 {
        return Err(PixivBotError::config(
            "selection.top_k and selection.max_detail_attempts must be positive",
        ));
    }
    Ok(())
}

/// Read the session cookie from the env var named in the config.
pub fn resolve_cookie(config: &AppConfig) -> Result<String> {
    let var_name = &config.pixiv.cookie_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(PixivBotError::config(format!(
            "pixiv cookie not found. Set the {var_name} environment variable to the \
             Cookie header of a logged-in browser session."
        ))),
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| PixivBotError::config("could not determine home directory"))?;
            Ok(home.join(rest.trim_start_matches('/')))
        }
        None => Ok(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("cookie_env"));
        assert!(toml_str.contains("PIXIV_COOKIE"));
        assert!(toml_str.contains("strict"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.selection.exclude_duration_secs, 3600);
        assert_eq!(parsed.strategies.len(), 3);
        assert_eq!(parsed.strategies[2].window_days, None);
        assert_eq!(parsed.strategies[0].page, PageSelection::Random(1, 3));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let toml_str = r#"
[proxy]
enabled = true
address = "http://10.0.0.2:8080"

[[strategies]]
name = "only"
min_bookmarks = 50
page = { fixed = 2 }
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.proxy.upstream(), Some("http://10.0.0.2:8080"));
        assert_eq!(config.strategies.len(), 1);
        assert_eq!(config.strategies[0].page, PageSelection::Fixed(2));
        assert_eq!(config.chat.cooldown_secs, 25);
        assert_eq!(config.pixiv.detail_timeout_secs, 20);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn proxy_disabled_by_default() {
        let config = AppConfig::default();
        assert_eq!(config.proxy.upstream(), None);
    }

    #[test]
    fn invalid_page_range_rejected() {
        let mut config = AppConfig::default();
        config.strategies[0].page = PageSelection::Random(5, 2);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("page range"));

        config.strategies[0].page = PageSelection::Fixed(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn empty_strategies_rejected() {
        let mut config = AppConfig::default();
        config.strategies.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn cookie_resolution() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.pixiv.cookie_env = "PB_TEST_NONEXISTENT_COOKIE_12345".into();
        let result = resolve_cookie(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("cookie not found"));
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/tmp/pixiv").unwrap(), PathBuf::from("/tmp/pixiv"));
        let expanded = expand_home("~/.pixivbot/tmp").unwrap();
        assert!(expanded.ends_with(".pixivbot/tmp"));
    }
}
