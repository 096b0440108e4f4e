//! Terminal stand-in for a chat session.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use pixivbot_core::ChatSink;
use pixivbot_shared::{PixivBotError, Result};
use tracing::debug;

/// Prints text replies to stdout and writes image replies into a directory.
pub(crate) struct TerminalSink {
    out_dir: PathBuf,
    images: AtomicUsize,
}

impl TerminalSink {
    pub(crate) fn new(out_dir: PathBuf) -> Self {
        Self {
            out_dir,
            images: AtomicUsize::new(0),
        }
    }

    /// File an image reply is written to, numbered in send order.
    fn image_path(&self, bytes: &[u8]) -> PathBuf {
        let n = self.images.fetch_add(1, Ordering::Relaxed) + 1;
        let ext = image::guess_format(bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("bin");
        self.out_dir.join(format!("reply_{n:03}.{ext}"))
    }
}

impl ChatSink for TerminalSink {
    async fn send_text(&self, text: &str) -> Result<()> {
        for line in text.lines() {
            println!("bot> {line}");
        }
        Ok(())
    }

    async fn send_image(&self, image: Vec<u8>) -> Result<()> {
        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| PixivBotError::io(&self.out_dir, e))?;
        let path = self.image_path(&image);
        let size = image.len();
        tokio::fs::write(&path, image)
            .await
            .map_err(|e| PixivBotError::io(&path, e))?;
        debug!(size, path = %path.display(), "image reply written");
        println!("bot> [image: {}]", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    #[tokio::test]
    async fn images_are_numbered_with_detected_extension() {
        let dir = std::env::temp_dir().join(format!("pb-sink-{}", Uuid::now_v7()));
        let sink = TerminalSink::new(dir.clone());

        let mut png = PNG_MAGIC.to_vec();
        png.extend_from_slice(&[0; 16]);
        sink.send_image(png).await.unwrap();
        sink.send_image(b"????".to_vec()).await.unwrap();

        assert!(dir.join("reply_001.png").exists());
        assert!(dir.join("reply_002.bin").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
