//! Response parsing for the search and artwork detail endpoints.
//!
//! Both endpoints wrap their payload in `{ "error": bool, "message": str, "body": ... }`.
//! The payloads are loosely typed in practice:
//! - ids arrive as strings or numbers
//! - tags are a flat list of names, a list of `{ "tag": ... }` objects, or `{ "tags": [...] }`
//! - counters may be missing or `null`
//! - result lists mix real works with ad containers and junk entries

use chrono::NaiveDate;
use pixivbot_shared::{ArtworkDetail, CandidateItem, Engagement, PixivBotError, Result};
use serde::Deserialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    body: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlexId {
    Text(String),
    Number(u64),
}

impl FlexId {
    fn into_string(self) -> String {
        match self {
            FlexId::Text(s) => s,
            FlexId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlexBool {
    Bool(bool),
    Number(i64),
}

impl FlexBool {
    fn is_set(&self) -> bool {
        match self {
            FlexBool::Bool(b) => *b,
            FlexBool::Number(n) => *n != 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTag {
    Name(String),
    Object { tag: String },
    Other(Value),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTags {
    List(Vec<RawTag>),
    Wrapped { tags: Vec<RawTag> },
}

impl Default for RawTags {
    fn default() -> Self {
        RawTags::List(Vec::new())
    }
}

impl RawTags {
    fn into_names(self) -> Vec<String> {
        let raw = match self {
            RawTags::List(tags) | RawTags::Wrapped { tags } => tags,
        };
        raw.into_iter()
            .filter_map(|tag| match tag {
                RawTag::Name(name) | RawTag::Object { tag: name } => Some(name.to_lowercase()),
                RawTag::Other(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSearchItem {
    id: Option<FlexId>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    user_name: String,
    user_id: Option<FlexId>,
    tags: Option<RawTags>,
    bookmark_count: Option<u64>,
    like_count: Option<u64>,
    view_count: Option<u64>,
    create_date: Option<String>,
    is_ad_container: Option<FlexBool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUrls {
    original: Option<String>,
    regular: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDetail {
    id: Option<FlexId>,
    illust_id: Option<FlexId>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    user_name: String,
    user_id: Option<FlexId>,
    tags: Option<RawTags>,
    #[serde(default)]
    urls: RawUrls,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Outcome of parsing a search response.
#[derive(Debug)]
pub(crate) enum SearchPayload {
    /// The API flagged the request as failed.
    ApiError(String),
    /// Usable works, ads and junk removed. May be empty.
    Items(Vec<CandidateItem>),
}

/// Parse a search response body.
pub(crate) fn parse_search(body: &str) -> Result<SearchPayload> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| PixivBotError::parse(format!("search response is not JSON: {e}")))?;

    if envelope.error {
        return Ok(SearchPayload::ApiError(envelope.message));
    }

    let data = match envelope.body.pointer("/illustManga/data") {
        Some(Value::Array(data)) => data,
        _ => return Ok(SearchPayload::Items(Vec::new())),
    };

    let items = data
        .iter()
        .filter(|entry| entry.is_object())
        .filter_map(|entry| serde_json::from_value::<RawSearchItem>(entry.clone()).ok())
        .filter_map(candidate_from_raw)
        .collect();

    Ok(SearchPayload::Items(items))
}

fn candidate_from_raw(raw: RawSearchItem) -> Option<CandidateItem> {
    if raw.is_ad_container.as_ref().is_some_and(FlexBool::is_set) {
        return None;
    }
    let id = raw.id?.into_string();
    if id.is_empty() {
        return None;
    }

    Some(CandidateItem {
        id,
        title: raw.title,
        author: raw.user_name,
        author_id: raw.user_id.map(FlexId::into_string).unwrap_or_default(),
        engagement: Engagement {
            bookmarks: raw.bookmark_count.unwrap_or(0),
            likes: raw.like_count.unwrap_or(0),
            views: raw.view_count.unwrap_or(0),
        },
        created: raw.create_date.as_deref().and_then(parse_create_date),
        tags: raw.tags.unwrap_or_default().into_names(),
    })
}

/// Parse `2024-05-01` or `2024-05-01T12:00:00+09:00` down to the date.
pub(crate) fn parse_create_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.split('T').next().unwrap_or(raw).trim();
    match NaiveDate::parse_from_str(day, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(e) => {
            tracing::debug!(raw, error = %e, "unparseable create date");
            None
        }
    }
}

/// Outcome of parsing an artwork detail response.
#[derive(Debug)]
pub(crate) enum DetailPayload {
    ApiError(String),
    Detail(ArtworkDetail),
}

/// Parse an artwork detail response body. `requested_id` fills in a missing id.
pub(crate) fn parse_detail(body: &str, requested_id: &str) -> Result<DetailPayload> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| PixivBotError::parse(format!("detail response is not JSON: {e}")))?;

    if envelope.error {
        let message = if envelope.message.is_empty() {
            "unknown error".to_string()
        } else {
            envelope.message
        };
        return Ok(DetailPayload::ApiError(message));
    }

    let raw: RawDetail = serde_json::from_value(envelope.body)
        .map_err(|e| PixivBotError::parse(format!("unexpected detail body: {e}")))?;

    let original_url = raw
        .urls
        .original
        .filter(|u| !u.is_empty())
        .ok_or_else(|| PixivBotError::parse("detail body has no original image URL"))?;
    // Some works only expose the original; fall back to it for previews.
    let regular_url = raw
        .urls
        .regular
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| original_url.clone());

    let id = raw
        .illust_id
        .or(raw.id)
        .map(FlexId::into_string)
        .unwrap_or_else(|| requested_id.to_string());

    Ok(DetailPayload::Detail(ArtworkDetail {
        id,
        title: raw.title,
        author: raw.user_name,
        author_id: raw.user_id.map(FlexId::into_string).unwrap_or_default(),
        tags: raw.tags.unwrap_or_default().into_names(),
        original_url,
        regular_url,
    }))
}

/// Pull the `message` out of an error body, or the first 200 chars of it.
pub(crate) fn error_detail(body: &str) -> String {
    serde_json::from_str::<Envelope>(body)
        .ok()
        .map(|e| e.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(body: &str) -> Vec<CandidateItem> {
        match parse_search(body).expect("parse") {
            SearchPayload::Items(items) => items,
            SearchPayload::ApiError(m) => panic!("unexpected api error: {m}"),
        }
    }

    #[test]
    fn parse_fixture_page() {
        let body = std::fs::read_to_string("../../../fixtures/pixiv/search-page.json")
            .expect("read search fixture");
        let items = items(&body);

        // One ad container and one junk entry are dropped
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].id, "118000001");
        assert_eq!(items[0].engagement.bookmarks, 1200);
        assert_eq!(items[0].created, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert!(items.iter().any(|i| i.is_restricted()));
    }

    #[test]
    fn numeric_ids_and_object_tags() {
        let body = r#"{"error":false,"body":{"illustManga":{"data":[
            {"id":42,"title":"x","userId":7,"userName":"u",
             "tags":{"tags":[{"tag":"Original"},{"tag":"R-18"}]},
             "bookmarkCount":null}
        ]}}}"#;
        let items = items(body);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "42");
        assert_eq!(items[0].author_id, "7");
        assert_eq!(items[0].tags, vec!["original", "r-18"]);
        assert_eq!(items[0].engagement, Engagement::default());
    }

    #[test]
    fn ad_container_as_int_is_dropped() {
        let body = r#"{"error":false,"body":{"illustManga":{"data":[
            {"id":"1","isAdContainer":1},
            {"id":"2","isAdContainer":0},
            {"isAdContainer":false}
        ]}}}"#;
        let items = items(body);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "2");
    }

    #[test]
    fn missing_data_is_empty() {
        assert!(items(r#"{"error":false,"body":{}}"#).is_empty());
        assert!(items(r#"{"error":false,"body":{"illustManga":{"data":[]}}}"#).is_empty());
    }

    #[test]
    fn api_error_flag() {
        let body = r#"{"error":true,"message":"Invalid request","body":[]}"#;
        assert!(matches!(
            parse_search(body).unwrap(),
            SearchPayload::ApiError(m) if m == "Invalid request"
        ));
    }

    #[test]
    fn not_json_is_parse_error() {
        let err = parse_search("<html>").unwrap_err();
        assert!(err.to_string().contains("not JSON"));
    }

    #[test]
    fn create_date_formats() {
        assert_eq!(parse_create_date("2023-01-02"), NaiveDate::from_ymd_opt(2023, 1, 2));
        assert_eq!(
            parse_create_date("2023-01-02T10:00:00+09:00"),
            NaiveDate::from_ymd_opt(2023, 1, 2)
        );
        assert_eq!(parse_create_date("yesterday"), None);
    }

    #[test]
    fn parse_detail_fixture() {
        let body = std::fs::read_to_string("../../../fixtures/pixiv/illust-detail.json")
            .expect("read detail fixture");
        let detail = match parse_detail(&body, "118000001").unwrap() {
            DetailPayload::Detail(d) => d,
            DetailPayload::ApiError(m) => panic!("unexpected api error: {m}"),
        };
        assert_eq!(detail.id, "118000001");
        assert_eq!(detail.author, "painter");
        assert!(detail.original_url.contains("img-original"));
        assert!(detail.regular_url.contains("img-master"));
        assert!(!detail.is_restricted());
    }

    #[test]
    fn detail_without_original_url_fails() {
        let body = r#"{"error":false,"body":{"id":"5","urls":{"regular":"https://x/y.jpg"}}}"#;
        assert!(parse_detail(body, "5").is_err());
    }

    #[test]
    fn detail_error_body() {
        let body = r#"{"error":true,"message":"","body":[]}"#;
        assert!(matches!(
            parse_detail(body, "5").unwrap(),
            DetailPayload::ApiError(m) if m == "unknown error"
        ));
    }

    #[test]
    fn error_detail_prefers_message() {
        assert_eq!(error_detail(r#"{"error":true,"message":"rate limited"}"#), "rate limited");
        assert_eq!(error_detail("plain text"), "plain text");
    }
}
