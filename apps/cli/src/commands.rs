//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use pixivbot_core::{
    CommandHandler, HandleOutcome, InMemoryRecencyCache, Pipeline, ProgressReporter,
};
use pixivbot_fetch::{DownloadOutcome, ImageFetcher};
use pixivbot_search::PixivClient;
use pixivbot_shared::{AppConfig, ResultRecord, init_config, load_config, resolve_cookie};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::sink::TerminalSink;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// pixivbot: pick a popular pixiv artwork for a set of tags.
#[derive(Parser)]
#[command(
    name = "pixivbot",
    version,
    about = "Search pixiv by tags and fetch one well-ranked, not-recently-shown artwork.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one search and save the selected image.
    Search {
        /// Search tags; include r-18 to lift the restricted-content filter.
        #[arg(required = true)]
        tags: Vec<String>,

        /// Directory to save the image into (defaults to the current directory).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Only print the selected work.
        #[arg(long)]
        no_download: bool,
    },

    /// Read chat messages from stdin and answer `/pixiv` commands.
    Chat {
        /// User id the messages are attributed to (for the cooldown).
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Directory replies' images are written to.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pixivbot=info",
        1 => "pixivbot=debug",
        _ => "pixivbot=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so chat replies on stdout stay clean.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Search {
            tags,
            out,
            no_download,
        } => cmd_search(&tags, out, no_download).await,
        Command::Chat { user, out } => cmd_chat(&user, out).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn build_pipeline(config: &AppConfig) -> Result<Pipeline> {
    let cookie = resolve_cookie(config)?;
    let client = PixivClient::new(&config.pixiv, cookie, config.proxy.upstream())?;
    let cache = Arc::new(InMemoryRecencyCache::new(Duration::from_secs(
        config.selection.exclude_duration_secs,
    )));
    Ok(Pipeline::new(client, cache, config))
}

fn build_fetcher(config: &AppConfig) -> Result<ImageFetcher> {
    let referer = format!("{}/", config.pixiv.base_url.trim_end_matches('/'));
    Ok(ImageFetcher::new(
        &config.download,
        &config.pixiv.user_agent,
        &referer,
        config.proxy.upstream(),
    )?)
}

fn output_dir(out: Option<PathBuf>) -> Result<PathBuf> {
    match out {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().wrap_err("cannot determine working directory"),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_search(tags: &[String], out: Option<PathBuf>, no_download: bool) -> Result<()> {
    let config = load_config()?;
    let pipeline = build_pipeline(&config)?;

    info!(?tags, "searching");
    let progress = CliProgress::new();
    let result = pipeline.run(tags, &progress).await;
    progress.finish();
    let record = result?;

    print_record(&record);

    if no_download {
        return Ok(());
    }

    let out_dir = output_dir(out)?;
    tokio::fs::create_dir_all(&out_dir)
        .await
        .wrap_err_with(|| format!("cannot create {}", out_dir.display()))?;

    let fetcher = build_fetcher(&config)?;
    fetcher.cleanup_temp().await;

    let saved = match fetcher.download_original(&record.image_url).await {
        Ok(DownloadOutcome::Saved(temp)) => {
            let ext = temp
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("jpg")
                .to_string();
            let dest = out_dir.join(format!("{}.{ext}", record.id));
            move_file(&temp, &dest).await?;
            dest
        }
        Ok(DownloadOutcome::TooLarge { size }) => {
            warn!(size, "original too large, saving the preview instead");
            save_preview(&fetcher, &record, &out_dir).await?
        }
        Err(e) => {
            warn!(error = %e, "original download failed, saving the preview instead");
            save_preview(&fetcher, &record, &out_dir).await?
        }
    };

    println!("  Saved:    {}", saved.display());
    println!();
    Ok(())
}

async fn cmd_chat(user: &str, out: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let handler = CommandHandler::new(build_pipeline(&config)?, build_fetcher(&config)?, &config);
    let sink = TerminalSink::new(output_dir(out)?);

    eprintln!(
        "Chatting as '{user}'. Try `/{} <tags>`; Ctrl-D to quit.",
        config.chat.command
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.wrap_err("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match handler.handle(user, line, &sink).await? {
            HandleOutcome::Ignored => eprintln!("(not a command)"),
            HandleOutcome::Delivered(record) | HandleOutcome::Degraded(record) => {
                info!(id = %record.id, strategy = %record.strategy, "reply sent");
            }
            HandleOutcome::Failed(e) => warn!(error = %e, "request failed"),
            HandleOutcome::CoolingDown(_) | HandleOutcome::Usage => {}
        }
    }

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn print_record(record: &ResultRecord) {
    println!();
    println!("  {}", record.title);
    println!("  Author:   {} (ID: {})", record.author, record.author_id);
    println!("  Work:     {}", record.work_url);
    println!(
        "  Stats:    {} bookmarks, {} likes, {} views",
        record.stats.bookmarks, record.stats.likes, record.stats.views
    );
    println!("  Strategy: {}", record.strategy);
    println!("  Image:    {}", record.image_url);
}

async fn save_preview(fetcher: &ImageFetcher, record: &ResultRecord, out_dir: &Path) -> Result<PathBuf> {
    let bytes = fetcher.download_preview(&record.preview_url).await?;
    let dest = out_dir.join(format!("{}_preview.jpg", record.id));
    tokio::fs::write(&dest, bytes)
        .await
        .wrap_err_with(|| format!("cannot write {}", dest.display()))?;
    Ok(dest)
}

/// Move across filesystems; the temp dir usually lives under the home directory.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| eyre!("cannot copy {} to {}: {e}", from.display(), to.display()))?;
    if let Err(e) = tokio::fs::remove_file(from).await {
        warn!(path = %from.display(), error = %e, "failed to remove temp file");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner.set_message("Searching...");
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn strategy(&self, name: &str, index: usize, total: usize) {
        self.spinner
            .set_message(format!("Searching with strategy '{name}' ({index}/{total})"));
    }

    fn selected(&self, record: &ResultRecord) {
        self.spinner.set_message(format!("Selected artwork {}", record.id));
    }
}
