//! Image downloads for chat delivery.
//!
//! Originals are streamed to a temp directory, checked for truncation and
//! decodability, and re-encoded when they exceed the chat size limit.
//! Previews are small enough to keep in memory.

pub mod images;
pub mod temp;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use pixivbot_shared::{DownloadConfig, PixivBotError, Result};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE, REFERER};
use reqwest::{Client, Response, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// A download shorter than this fraction of the probed size is treated as truncated.
const MIN_COMPLETE_RATIO: f64 = 0.9;

// ---------------------------------------------------------------------------
// DownloadOutcome
// ---------------------------------------------------------------------------

/// Result of fetching an original image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The image is on disk and within the size limit.
    Saved(PathBuf),
    /// The image could not be brought under the size limit.
    TooLarge { size: u64 },
}

// ---------------------------------------------------------------------------
// ImageFetcher
// ---------------------------------------------------------------------------

/// Downloads images from the (possibly proxied) CDN.
pub struct ImageFetcher {
    client: Client,
    config: DownloadConfig,
    temp_dir: PathBuf,
    referer: String,
}

impl ImageFetcher {
    /// Build a fetcher. `referer` is sent with every request; the CDN rejects
    /// hotlinks without one.
    pub fn new(
        config: &DownloadConfig,
        user_agent: &str,
        referer: &str,
        proxy: Option<&str>,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(addr) = proxy {
            let proxy = reqwest::Proxy::all(addr)
                .map_err(|e| PixivBotError::config(format!("invalid proxy address '{addr}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| PixivBotError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            temp_dir: config.resolved_temp_dir()?,
            config: config.clone(),
            referer: referer.to_string(),
        })
    }

    /// Directory originals are downloaded into.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Best-effort size of the resource in bytes; `0` when unknown.
    ///
    /// Tries `HEAD` first, then a one-byte ranged `GET`. Never fails.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn probe_size(&self, url: &str) -> u64 {
        let timeout = Duration::from_secs(self.config.probe_timeout_secs);

        match self
            .client
            .head(url)
            .header(REFERER, &self.referer)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                if let Some(size) = total_from_content_range(&response).or_else(|| header_length(&response)) {
                    debug!(size, "size from HEAD");
                    return size;
                }
            }
            Ok(response) => debug!(status = %response.status(), "HEAD rejected"),
            Err(e) => debug!(error = %e, "HEAD failed"),
        }

        match self
            .client
            .get(url)
            .header(REFERER, &self.referer)
            .header(RANGE, "bytes=0-0")
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) if response.status() == StatusCode::PARTIAL_CONTENT => {
                total_from_content_range(&response).unwrap_or(0)
            }
            Ok(response) if response.status().is_success() => header_length(&response).unwrap_or(0),
            Ok(response) => {
                debug!(status = %response.status(), "ranged GET rejected");
                0
            }
            Err(e) => {
                debug!(error = %e, "ranged GET failed");
                0
            }
        }
    }

    /// Download an original image into the temp directory.
    ///
    /// Retries up to `max_attempts` times. Images over `max_image_bytes`
    /// are re-encoded as JPEG; if that cannot get them under the limit the
    /// file is removed and [`DownloadOutcome::TooLarge`] returned.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn download_original(&self, url: &str) -> Result<DownloadOutcome> {
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|e| PixivBotError::io(&self.temp_dir, e))?;

        let expected = self.probe_size(url).await;
        let path = self.temp_dir.join(temp::unique_name(url));
        let attempts = self.config.max_attempts.max(1);

        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.download_once(url, &path, expected).await {
                Ok(size) => {
                    info!(size, expected, attempt, path = %path.display(), "original downloaded");
                    return self.finalize(path, size).await;
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "download attempt failed");
                    let _ = tokio::fs::remove_file(&path).await;
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    }
                }
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(PixivBotError::Download(format!(
            "{url}: giving up after {attempts} attempts: {reason}"
        )))
    }

    /// Download a preview image into memory.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn download_preview(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header(REFERER, &self.referer)
            .timeout(Duration::from_secs(self.config.preview_timeout_secs))
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PixivBotError::Download(format!("{url}: HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(url, &e))?;
        debug!(size = bytes.len(), "preview downloaded");
        Ok(bytes.to_vec())
    }

    /// Remove temp files older than `temp_max_age_secs`. Returns how many were removed.
    pub async fn cleanup_temp(&self) -> usize {
        let max_age = Duration::from_secs(self.config.temp_max_age_secs);
        let removed = temp::cleanup_dir(&self.temp_dir, max_age, SystemTime::now()).await;
        if removed > 0 {
            info!(removed, dir = %self.temp_dir.display(), "evicted stale temp files");
        }
        removed
    }

    /// One streamed download attempt. Returns the number of bytes written.
    async fn download_once(&self, url: &str, path: &Path, expected: u64) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .header(REFERER, &self.referer)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PixivBotError::Download(format!("{url}: HTTP {status}")));
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| PixivBotError::io(path, e))?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error(url, &e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| PixivBotError::io(path, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| PixivBotError::io(path, e))?;

        if expected > 0 && (written as f64) < expected as f64 * MIN_COMPLETE_RATIO {
            return Err(PixivBotError::Download(format!(
                "{url}: incomplete download ({written} of {expected} bytes)"
            )));
        }
        Ok(written)
    }

    /// Verify and, if needed, shrink a finished download.
    async fn finalize(&self, path: PathBuf, size: u64) -> Result<DownloadOutcome> {
        let check = path.clone();
        match tokio::task::spawn_blocking(move || images::verify(&check)).await {
            Ok(Ok((width, height))) => debug!(width, height, "image verified"),
            Ok(Err(e)) => warn!(error = %e, "downloaded file does not decode, sending anyway"),
            Err(e) => warn!(error = %e, "verification task failed"),
        }

        let limit = self.config.max_image_bytes;
        if size <= limit {
            return Ok(DownloadOutcome::Saved(path));
        }

        info!(size, limit, "image over size limit, re-encoding");
        let source = path.clone();
        let shrunk = tokio::task::spawn_blocking(move || images::recompress_to_fit(&source, limit))
            .await
            .map_err(|e| PixivBotError::Image(format!("re-encode task failed: {e}")))?;

        match shrunk {
            Ok(Some(out)) => {
                if out != path {
                    let _ = tokio::fs::remove_file(&path).await;
                }
                info!(path = %out.display(), "re-encoded under limit");
                Ok(DownloadOutcome::Saved(out))
            }
            Ok(None) => {
                warn!(size, limit, "cannot bring image under limit");
                let _ = tokio::fs::remove_file(&path).await;
                Ok(DownloadOutcome::TooLarge { size })
            }
            Err(e) => {
                warn!(error = %e, "re-encode failed");
                let _ = tokio::fs::remove_file(&path).await;
                Ok(DownloadOutcome::TooLarge { size })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Total length from `Content-Range: bytes 0-0/12345`.
fn total_from_content_range(response: &Response) -> Option<u64> {
    let value = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
    value.rsplit_once('/')?.1.trim().parse().ok()
}

/// `Content-Length` as sent; `Response::content_length` reflects the body, which is empty for HEAD.
fn header_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
        .filter(|len| *len > 0)
}

fn transport_error(url: &str, err: &reqwest::Error) -> PixivBotError {
    let kind = if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed (check the proxy)"
    } else {
        "request failed"
    };
    PixivBotError::Download(format!("{url}: {kind}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(label: &str, tweak: impl FnOnce(&mut DownloadConfig)) -> ImageFetcher {
        let dir = std::env::temp_dir().join(format!("pb-fetch-{label}-{}", Uuid::now_v7()));
        let mut config = DownloadConfig {
            temp_dir: dir.to_string_lossy().into_owned(),
            retry_delay_ms: 0,
            ..DownloadConfig::default()
        };
        tweak(&mut config);
        ImageFetcher::new(&config, "pixivbot-test", "https://www.pixiv.net/", None).unwrap()
    }

    fn encoded(format: ImageFormat, width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn probe_uses_head_content_range() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/img.png"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", "bytes 0-0/5000"))
            .mount(&server)
            .await;

        let f = fetcher("probe-head", |_| {});
        assert_eq!(f.probe_size(&format!("{}/img.png", server.uri())).await, 5000);
    }

    #[tokio::test]
    async fn probe_falls_back_to_ranged_get() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .and(header("Range", "bytes=0-0"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 0-0/7777")
                    .set_body_bytes(vec![0u8]),
            )
            .mount(&server)
            .await;

        let f = fetcher("probe-range", |_| {});
        assert_eq!(f.probe_size(&format!("{}/img.png", server.uri())).await, 7777);
    }

    #[tokio::test]
    async fn probe_unknown_is_zero() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let f = fetcher("probe-none", |_| {});
        assert_eq!(f.probe_size(&format!("{}/gone.png", server.uri())).await, 0);
    }

    #[tokio::test]
    async fn download_saves_valid_image() {
        let server = MockServer::start().await;
        let png = encoded(ImageFormat::Png, 32, 24);
        Mock::given(method("GET"))
            .and(path("/img-original/1_p0.png"))
            .and(header("Referer", "https://www.pixiv.net/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png.clone()))
            .mount(&server)
            .await;

        let f = fetcher("save", |_| {});
        let outcome = f
            .download_original(&format!("{}/img-original/1_p0.png", server.uri()))
            .await
            .unwrap();

        let DownloadOutcome::Saved(saved) = outcome else {
            panic!("expected a saved file, got {outcome:?}");
        };
        assert!(saved.starts_with(f.temp_dir()));
        assert_eq!(saved.extension().unwrap(), "png");
        assert_eq!(std::fs::read(&saved).unwrap(), png);

        let _ = std::fs::remove_dir_all(f.temp_dir());
    }

    #[tokio::test]
    async fn oversize_image_is_reencoded() {
        let server = MockServer::start().await;
        let bmp = encoded(ImageFormat::Bmp, 200, 200);
        let limit = bmp.len() as u64 / 2;
        Mock::given(method("GET"))
            .and(path("/big.bmp"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bmp))
            .mount(&server)
            .await;

        let f = fetcher("shrink", |c| c.max_image_bytes = limit);
        let outcome = f
            .download_original(&format!("{}/big.bmp", server.uri()))
            .await
            .unwrap();

        let DownloadOutcome::Saved(saved) = outcome else {
            panic!("expected a re-encoded file, got {outcome:?}");
        };
        assert_eq!(saved.extension().unwrap(), "jpg");
        assert!(std::fs::metadata(&saved).unwrap().len() <= limit);
        // the oversize source is gone
        assert_eq!(std::fs::read_dir(f.temp_dir()).unwrap().count(), 1);

        let _ = std::fs::remove_dir_all(f.temp_dir());
    }

    #[tokio::test]
    async fn hopeless_image_is_too_large() {
        let server = MockServer::start().await;
        let png = encoded(ImageFormat::Png, 64, 64);
        let size = png.len() as u64;
        Mock::given(method("GET"))
            .and(path("/huge.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png))
            .mount(&server)
            .await;

        let f = fetcher("too-large", |c| c.max_image_bytes = 16);
        let outcome = f
            .download_original(&format!("{}/huge.png", server.uri()))
            .await
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::TooLarge { size });
        assert_eq!(std::fs::read_dir(f.temp_dir()).unwrap().count(), 0);

        let _ = std::fs::remove_dir_all(f.temp_dir());
    }

    #[tokio::test]
    async fn truncated_download_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", "bytes 0-0/100000"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cut.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 10]))
            .expect(2)
            .mount(&server)
            .await;

        let f = fetcher("truncated", |c| c.max_attempts = 2);
        let err = f
            .download_original(&format!("{}/cut.jpg", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, PixivBotError::Download(_)));
        assert!(err.to_string().contains("incomplete download"));
        assert_eq!(std::fs::read_dir(f.temp_dir()).unwrap().count(), 0);

        let _ = std::fs::remove_dir_all(f.temp_dir());
    }

    #[tokio::test]
    async fn undecodable_file_is_still_saved() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/odd.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not really a png".to_vec()))
            .mount(&server)
            .await;

        let f = fetcher("undecodable", |_| {});
        let outcome = f
            .download_original(&format!("{}/odd.png", server.uri()))
            .await
            .unwrap();
        assert!(matches!(outcome, DownloadOutcome::Saved(_)));

        let _ = std::fs::remove_dir_all(f.temp_dir());
    }

    #[tokio::test]
    async fn preview_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/master.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let f = fetcher("preview", |_| {});
        assert_eq!(
            f.download_preview(&format!("{}/master.jpg", server.uri())).await.unwrap(),
            vec![1, 2, 3]
        );
        let err = f
            .download_preview(&format!("{}/missing.jpg", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
