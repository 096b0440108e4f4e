//! Core domain types shared by the search, selection and delivery crates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Tags that, when requested explicitly, lift the restricted-content filter.
pub const RESTRICTED_REQUEST_TAGS: [&str; 4] = ["r-18", "r18", "r-18g", "r18g"];

/// Substrings that mark a work's tag as restricted.
const RESTRICTED_MARKERS: [&str; 2] = ["r-18", "r18"];

// ---------------------------------------------------------------------------
// Engagement
// ---------------------------------------------------------------------------

/// Bookmark/like/view counters used as quality proxies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub bookmarks: u64,
    pub likes: u64,
    pub views: u64,
}

// ---------------------------------------------------------------------------
// CandidateItem
// ---------------------------------------------------------------------------

/// One artwork as returned by the search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: String,
    pub title: String,
    pub author: String,
    pub author_id: String,
    pub engagement: Engagement,
    /// Creation date; `None` when the payload had no parseable date.
    pub created: Option<NaiveDate>,
    /// Tag names, lowercased.
    pub tags: Vec<String>,
}

impl CandidateItem {
    /// Whether any tag marks this work as restricted.
    pub fn is_restricted(&self) -> bool {
        has_restricted_tag(&self.tags)
    }
}

// ---------------------------------------------------------------------------
// ArtworkDetail
// ---------------------------------------------------------------------------

/// Full detail record for a single artwork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtworkDetail {
    pub id: String,
    pub title: String,
    pub author: String,
    pub author_id: String,
    /// Tag names, lowercased.
    pub tags: Vec<String>,
    /// Full-resolution image URL as served by the site.
    pub original_url: String,
    /// Reduced-size image URL as served by the site.
    pub regular_url: String,
}

impl ArtworkDetail {
    /// Whether any tag marks this work as restricted.
    pub fn is_restricted(&self) -> bool {
        has_restricted_tag(&self.tags)
    }
}

// ---------------------------------------------------------------------------
// ResultRecord
// ---------------------------------------------------------------------------

/// The normalized output of one successful selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    pub title: String,
    pub author: String,
    pub author_id: String,
    /// Canonical link to the artwork page.
    pub work_url: String,
    /// Original image, routed through the image proxy.
    pub image_url: String,
    /// Preview image, routed through the image proxy.
    pub preview_url: String,
    /// Original image URL before rewriting.
    pub original_url: String,
    pub stats: Engagement,
    /// Name of the strategy that produced this result.
    pub strategy: String,
}

// ---------------------------------------------------------------------------
// Restricted-content helpers
// ---------------------------------------------------------------------------

/// True if any requested tag explicitly asks for restricted content.
pub fn is_restricted_request<S: AsRef<str>>(tags: &[S]) -> bool {
    tags.iter().any(|tag| {
        let lower = tag.as_ref().to_lowercase();
        RESTRICTED_REQUEST_TAGS.contains(&lower.as_str())
    })
}

/// True if any (already lowercased) tag contains a restricted marker.
pub fn has_restricted_tag<S: AsRef<str>>(tags: &[S]) -> bool {
    tags.iter().any(|tag| {
        let tag = tag.as_ref();
        RESTRICTED_MARKERS.iter().any(|marker| tag.contains(marker))
    })
}
