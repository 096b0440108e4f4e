//! Client for pixiv's internal search and artwork detail endpoints.
//!
//! The endpoints are the ones the site's own frontend calls over XHR
//! (`/ajax/search/artworks/{word}` and `/ajax/illust/{id}`). They are
//! undocumented, so requests mimic a logged-in browser: session cookie,
//! same-origin `Sec-Fetch-*` headers and a plausible `Referer`.

mod parser;

use std::time::Duration;

use chrono::NaiveDate;
use pixivbot_shared::{ArtworkDetail, CandidateItem, PixivBotError, PixivConfig, Result};
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, info, instrument};

use parser::{DetailPayload, SearchPayload};

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 3;

// ---------------------------------------------------------------------------
// SearchQuery
// ---------------------------------------------------------------------------

/// Safety mode sent as the `mode` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Restricted works excluded by the site.
    Safe,
    /// Everything the session is allowed to see.
    All,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Safe => "safe",
            SearchMode::All => "all",
        }
    }
}

/// Parameters for one search request, derived from a strategy.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Strategy name, for errors and logs.
    pub strategy: String,
    /// 1-based result page.
    pub page: u32,
    /// Inclusive creation-date window.
    pub window: Option<(NaiveDate, NaiveDate)>,
    /// Minimum bookmark count.
    pub min_bookmarks: u32,
    pub mode: SearchMode,
}

// ---------------------------------------------------------------------------
// PixivClient
// ---------------------------------------------------------------------------

/// HTTP client for the search and detail endpoints.
#[derive(Clone)]
pub struct PixivClient {
    client: Client,
    base_url: String,
    cookie: String,
    lang: String,
    detail_timeout: Duration,
}

impl PixivClient {
    /// Build a client. `proxy` routes every request through an upstream proxy.
    pub fn new(config: &PixivConfig, cookie: impl Into<String>, proxy: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.search_timeout_secs));

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
            base_url: config.base_url.trim_end_matches('/').to_string(),
            cookie: cookie.into(),
            lang: config.lang.clone(),
            detail_timeout: Duration::from_secs(config.detail_timeout_secs),
        })
    }

    /// Site origin this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Canonical page URL for an artwork.
    pub fn work_url(&self, id: &str) -> String {
        format!("{}/artworks/{id}", self.base_url)
    }

    /// Search works by tags, most popular first.
    ///
    /// Fails with [`PixivBotError::UpstreamRequest`] on a non-success status and
    /// with [`PixivBotError::EmptyResult`] when the page holds no usable works.
    #[instrument(skip_all, fields(strategy = %query.strategy, page = query.page, mode = query.mode.as_str()))]
    pub async fn search(&self, tags: &[String], query: &SearchQuery) -> Result<Vec<CandidateItem>> {
        let word = tags.join(" ");
        let encoded = urlencoding::encode(&word);
        let url = format!("{}/ajax/search/artworks/{encoded}", self.base_url);

        let mut params: Vec<(&str, String)> = vec![
            ("word", word.clone()),
            ("order", "popular_d".into()),
            ("mode", query.mode.as_str().into()),
            ("p", query.page.to_string()),
            ("s_mode", "s_tag".into()),
            ("type", "all".into()),
            ("lang", self.lang.clone()),
            ("blt", query.min_bookmarks.to_string()),
        ];
        if let Some((start, end)) = query.window {
            params.push(("scd", start.format("%Y-%m-%d").to_string()));
            params.push(("ecd", end.format("%Y-%m-%d").to_string()));
        }

        debug!(%url, %word, "searching");

        let referer = format!("{}/tags/{encoded}/artworks", self.base_url);
        let response = self
            .with_headers(self.client.get(&url), &referer)
            .query(&params)
            .send()
            .await
            .map_err(|e| transport_error(&url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_body(response).await.unwrap_or_default();
            return Err(PixivBotError::UpstreamRequest {
                endpoint: "search".into(),
                status: status.as_u16(),
                detail: parser::error_detail(&body),
            });
        }

        let body = read_body(response).await?;
        match parser::parse_search(&body)? {
            SearchPayload::ApiError(message) => Err(PixivBotError::UpstreamRequest {
                endpoint: "search".into(),
                status: status.as_u16(),
                detail: message,
            }),
            SearchPayload::Items(items) if items.is_empty() => Err(PixivBotError::EmptyResult {
                strategy: query.strategy.clone(),
            }),
            SearchPayload::Items(items) => {
                info!(count = items.len(), "search returned works");
                Ok(items)
            }
        }
    }

    /// Fetch the detail record for one artwork.
    ///
    /// Any failure, including an `error: true` body, is a
    /// [`PixivBotError::DetailFetch`].
    #[instrument(skip_all, fields(id = %id))]
    pub async fn artwork_detail(&self, id: &str) -> Result<ArtworkDetail> {
        let url = format!("{}/ajax/illust/{id}", self.base_url);
        let referer = self.work_url(id);
        let detail_error = |reason: String| PixivBotError::DetailFetch {
            id: id.to_string(),
            reason,
        };

        debug!(%url, "fetching artwork detail");

        let response = self
            .with_headers(self.client.get(&url), &referer)
            .timeout(self.detail_timeout)
            .send()
            .await
            .map_err(|e| detail_error(transport_error(&url, &e).to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_body(response).await.unwrap_or_default();
            return Err(detail_error(format!(
                "HTTP {status}: {}",
                parser::error_detail(&body)
            )));
        }

        let body = read_body(response)
            .await
            .map_err(|e| detail_error(e.to_string()))?;
        match parser::parse_detail(&body, id).map_err(|e| detail_error(e.to_string()))? {
            DetailPayload::ApiError(message) => Err(detail_error(message)),
            DetailPayload::Detail(detail) => Ok(detail),
        }
    }

    fn with_headers(&self, request: RequestBuilder, referer: &str) -> RequestBuilder {
        request
            .header(reqwest::header::REFERER, referer)
            .header(reqwest::header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8")
            .header(reqwest::header::COOKIE, self.cookie.as_str())
            .header("Sec-Fetch-Dest", "empty")
            .header("Sec-Fetch-Mode", "cors")
            .header("Sec-Fetch-Site", "same-origin")
            .header("X-Requested-With", "XMLHttpRequest")
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn read_body(response: Response) -> Result<String> {
    let url = response.url().to_string();
    response
        .text()
        .await
        .map_err(|e| PixivBotError::Network(format!("{url}: failed to read body: {e}")))
}

/// Classify a transport failure so callers can tell timeouts and connect errors apart.
pub fn transport_error(url: &str, err: &reqwest::Error) -> PixivBotError {
    let kind = if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed (check the proxy)"
    } else {
        "request failed"
    };
    PixivBotError::Network(format!("{url}: {kind}: {err}"))
}
