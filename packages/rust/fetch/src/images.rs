//! Image integrity checks and size-bounded re-encoding.
//!
//! Everything here is CPU-bound and synchronous; async callers go through
//! `tokio::task::spawn_blocking`.

use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{GenericImageView, ImageReader};
use pixivbot_shared::{PixivBotError, Result};
use tracing::debug;

/// JPEG qualities tried in order when shrinking an oversize image.
const JPEG_QUALITY_STEPS: [u8; 9] = [95, 90, 85, 80, 75, 70, 65, 60, 55];

/// Decode the file fully and return its dimensions.
pub fn verify(path: &Path) -> Result<(u32, u32)> {
    let reader = ImageReader::open(path)
        .map_err(|e| PixivBotError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| PixivBotError::io(path, e))?;
    let img = reader
        .decode()
        .map_err(|e| PixivBotError::Image(format!("{}: {e}", path.display())))?;
    Ok(img.dimensions())
}

/// Re-encode `path` as JPEG at decreasing quality until it fits in `max_bytes`.
///
/// Writes the first fitting encoding next to the source with a `.jpg`
/// extension and returns its path, or `None` if even the lowest quality is
/// too large.
pub fn recompress_to_fit(path: &Path, max_bytes: u64) -> Result<Option<PathBuf>> {
    let img = image::open(path)
        .map_err(|e| PixivBotError::Image(format!("{}: {e}", path.display())))?;
    // JPEG has no alpha channel.
    let rgb = img.to_rgb8();

    for quality in JPEG_QUALITY_STEPS {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality)
            .encode_image(&rgb)
            .map_err(|e| PixivBotError::Image(format!("JPEG encode failed: {e}")))?;

        debug!(quality, size = buf.len(), max_bytes, "re-encoded");
        if buf.len() as u64 <= max_bytes {
            let out = path.with_extension("jpg");
            std::fs::write(&out, &buf).map_err(|e| PixivBotError::io(&out, e))?;
            return Ok(Some(out));
        }
    }

    Ok(None)
}
