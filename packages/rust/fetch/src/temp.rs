//! Temp-file naming and time-based eviction.

use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Unique, extension-normalized file name for a downloaded image.
pub fn unique_name(url: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let id = Uuid::now_v7().simple().to_string();
    // v7 leads with the timestamp; the tail is random.
    let suffix = &id[id.len() - 8..];
    format!("pixiv_{millis}_{suffix}{}", normalized_extension(url))
}

/// Extension to store an image under, chat-friendly formats only.
pub fn normalized_extension(url: &str) -> &'static str {
    let ext = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.next_back().map(str::to_string))
        })
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()));

    match ext.as_deref() {
        Some("png") => ".png",
        Some("gif") => ".gif",
        Some("jpeg") => ".jpeg",
        Some("bmp") => ".bmp",
        Some("svg") => ".png",
        // webp/avif/heic and anything unknown are stored as JPEG
        _ => ".jpg",
    }
}

/// Delete regular files in `dir` last modified more than `max_age` before `now`.
///
/// Returns the number of files removed. Failures are logged per file and
/// never abort the sweep.
pub async fn cleanup_dir(dir: &Path, max_age: Duration, now: SystemTime) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "temp dir not readable, nothing to clean");
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "error while listing temp dir");
                break;
            }
        };

        let path = entry.path();
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if !age.is_some_and(|age| age > max_age) {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed stale temp file");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
        }
    }

    removed
}
