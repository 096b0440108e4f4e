//! The `/pixiv` chat command: parsing, per-user cooldown and delivery.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use pixivbot_fetch::{DownloadOutcome, ImageFetcher};
use pixivbot_shared::{AppConfig, ChatConfig, PixivBotError, Result, ResultRecord};

use crate::SilentProgress;
use crate::pipeline::Pipeline;

// ---------------------------------------------------------------------------
// ChatSink
// ---------------------------------------------------------------------------

/// Where replies go. Implemented by the chat adapter.
pub trait ChatSink: Send + Sync {
    fn send_text(&self, text: &str) -> impl Future<Output = Result<()>> + Send;

    /// Send encoded image bytes (JPEG, PNG, ...).
    fn send_image(&self, image: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// A recognised command and its search tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub tags: Vec<String>,
}

/// Recognise `/pixiv tag...` or an alias. The leading `/` is optional.
///
/// Returns `None` for any other message. A bare command yields no tags.
pub fn parse_command(text: &str, config: &ChatConfig) -> Option<ParsedCommand> {
    let mut words = text.split_whitespace();
    let head = words.next()?;
    let name = head.strip_prefix('/').unwrap_or(head);

    if name != config.command && !config.aliases.iter().any(|alias| alias == name) {
        return None;
    }

    Some(ParsedCommand {
        tags: words.map(str::to_string).collect(),
    })
}

// ---------------------------------------------------------------------------
// Cooldown
// ---------------------------------------------------------------------------

/// Per-user minimum interval between requests.
#[derive(Debug)]
pub struct Cooldown {
    window: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Claim a request slot for `user` at `now`, or return how long they still have to wait.
    pub fn try_acquire(&self, user: &str, now: Instant) -> std::result::Result<(), Duration> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.retain(|_, previous| now.saturating_duration_since(*previous) < self.window);
        if let Some(previous) = last.get(user) {
            let elapsed = now.saturating_duration_since(*previous);
            if elapsed < self.window {
                return Err(self.window - elapsed);
            }
        }
        last.insert(user.to_string(), now);
        Ok(())
    }

    /// Number of users currently remembered.
    pub fn tracked(&self) -> usize {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

// ---------------------------------------------------------------------------
// CommandHandler
// ---------------------------------------------------------------------------

/// What happened to one inbound message.
#[derive(Debug)]
pub enum HandleOutcome {
    /// Not a command for us.
    Ignored,
    /// Refused; the user must wait this long.
    CoolingDown(Duration),
    /// Command without tags; usage was sent.
    Usage,
    /// The original image was sent.
    Delivered(ResultRecord),
    /// The original could not be sent; the link and preview were sent instead.
    Degraded(ResultRecord),
    /// Selection failed; an explanation was sent.
    Failed(PixivBotError),
}

/// Runs the whole command flow against a [`ChatSink`].
pub struct CommandHandler {
    pipeline: Pipeline,
    fetcher: ImageFetcher,
    cooldown: Cooldown,
    chat: ChatConfig,
    proxy_hint: String,
}

impl CommandHandler {
    pub fn new(pipeline: Pipeline, fetcher: ImageFetcher, config: &AppConfig) -> Self {
        Self {
            pipeline,
            fetcher,
            cooldown: Cooldown::new(Duration::from_secs(config.chat.cooldown_secs)),
            chat: config.chat.clone(),
            proxy_hint: format!(
                "local proxy {} (enabled: {}), image proxy {}",
                config.proxy.address, config.proxy.enabled, config.proxy.image_proxy_url
            ),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Handle one chat message from `user`.
    ///
    /// Errors are only returned when the sink itself fails; everything
    /// else is reported to the user and reflected in the outcome.
    #[instrument(skip_all, fields(user = %user))]
    pub async fn handle<S: ChatSink>(&self, user: &str, text: &str, sink: &S) -> Result<HandleOutcome> {
        let Some(command) = parse_command(text, &self.chat) else {
            return Ok(HandleOutcome::Ignored);
        };

        if let Err(remaining) = self.cooldown.try_acquire(user, Instant::now()) {
            sink.send_text(&cooldown_message(remaining)).await?;
            return Ok(HandleOutcome::CoolingDown(remaining));
        }

        if command.tags.is_empty() {
            sink.send_text(&usage_message(&self.chat)).await?;
            return Ok(HandleOutcome::Usage);
        }

        info!(tags = ?command.tags, "pixiv search requested");
        let record = match self.pipeline.run(&command.tags, &SilentProgress).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "search failed");
                sink.send_text(&failure_message(&e, &self.proxy_hint)).await?;
                return Ok(HandleOutcome::Failed(e));
            }
        };

        sink.send_text(&info_message(&record)).await?;
        self.fetcher.cleanup_temp().await;

        match self.send_original(&record, sink).await {
            Ok(()) => Ok(HandleOutcome::Delivered(record)),
            Err(e) => {
                warn!(id = %record.id, error = %e, "original delivery failed, sending preview");
                self.send_preview(&record, &e, sink).await?;
                Ok(HandleOutcome::Degraded(record))
            }
        }
    }

    async fn send_original<S: ChatSink>(&self, record: &ResultRecord, sink: &S) -> Result<()> {
        let path = match self.fetcher.download_original(&record.image_url).await? {
            DownloadOutcome::Saved(path) => path,
            DownloadOutcome::TooLarge { size } => {
                return Err(PixivBotError::Download(format!(
                    "original is {:.1} MB even after re-encoding",
                    size as f64 / (1024.0 * 1024.0)
                )));
            }
        };

        let sent = match tokio::fs::read(&path).await {
            Ok(bytes) => sink.send_image(bytes).await,
            Err(e) => Err(PixivBotError::io(&path, e)),
        };
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "failed to remove temp file");
        }
        sent
    }

    async fn send_preview<S: ChatSink>(&self, record: &ResultRecord, cause: &PixivBotError, sink: &S) -> Result<()> {
        sink.send_text(&fallback_message(record, cause)).await?;
        match self.fetcher.download_preview(&record.preview_url).await {
            Ok(bytes) => sink.send_image(bytes).await,
            Err(e) => {
                warn!(id = %record.id, error = %e, "preview download failed");
                sink.send_text("The preview could not be loaded either. Use the link above.")
                    .await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

fn cooldown_message(remaining: Duration) -> String {
    format!(
        "Too many requests. Please wait {:.1} seconds and try again.",
        remaining.as_secs_f64()
    )
}

fn usage_message(chat: &ChatConfig) -> String {
    let mut message = format!("Please give some tags, for example:\n/{} landscape", chat.command);
    for alias in &chat.aliases {
        message.push_str(&format!("\n/{alias} landscape"));
    }
    message
}

fn info_message(record: &ResultRecord) -> String {
    format!(
        "Title: {}\nAuthor: {} (ID: {})\nWork ID: {}\nLink: {}\n\nDownloading the original, this may take a while...",
        record.title, record.author, record.author_id, record.id, record.work_url
    )
}

fn fallback_message(record: &ResultRecord, cause: &PixivBotError) -> String {
    let reason = match cause {
        PixivBotError::Download(detail) if detail.contains("re-encoding") => "the original is too large",
        _ => "the original could not be sent",
    };
    format!(
        "Sending the preview instead: {reason}.\nOriginal: {}",
        record.image_url
    )
}

/// User-facing explanation of a selection failure.
pub fn failure_message(err: &PixivBotError, proxy_hint: &str) -> String {
    let text = err.to_string();
    let lower = text.to_lowercase();

    let detail = if lower.contains("cookie") || lower.contains("http 401") {
        "The pixiv cookie is missing or invalid. Log in at https://www.pixiv.net, copy the \
         Cookie header from the browser's developer tools and set it in the configured \
         environment variable."
            .to_string()
    } else if lower.contains("proxy") {
        format!("Proxy problem. Check that the proxy is running: {proxy_hint}.")
    } else if lower.contains("timed out") || lower.contains("timeout") {
        "The request timed out. The network or proxy may be slow; try again or use other tags."
            .to_string()
    } else if lower.contains("403") || lower.contains("404") {
        "The image resource could not be accessed. The proxy may be misconfigured or pixiv is \
         refusing the request."
            .to_string()
    } else {
        format!("Unexpected error: {text}")
    };

    format!("Search failed: {detail}")
}
