//! Core types shared by the rendering and fetching pipeline

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// An annotated sub-range of a post's text
///
/// `start` and `end` are in the platform's own offset unit (see
/// [`OffsetUnit`](crate::render::OffsetUnit)) and index into the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpan {
    pub start: usize,
    pub end: usize,
    pub kind: EntityKind,
}

impl EntitySpan {
    pub fn new(start: usize, end: usize, kind: EntityKind) -> Self {
        Self { start, end, kind }
    }

    /// Short URL, if this is a link entity carrying one
    pub fn short_url(&self) -> Option<&str> {
        match &self.kind {
            EntityKind::Link { short_url, .. } => short_url.as_deref(),
            _ => None,
        }
    }
}

/// Entity kind with its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    /// Profile reference: a DID on Bluesky, a username on X
    Mention { target: String },
    /// Hashtag without the leading `#`
    Hashtag { tag: String },
    /// Cashtag without the leading `$`
    Cashtag { tag: String },
    /// Link to an expanded target URL
    Link {
        url: String,
        display: Option<String>,
        short_url: Option<String>,
        media_key: Option<String>,
    },
}

impl EntityKind {
    pub fn link(url: impl Into<String>) -> Self {
        EntityKind::Link {
            url: url.into(),
            display: None,
            short_url: None,
            media_key: None,
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, EntityKind::Link { .. })
    }

    pub fn has_media(&self) -> bool {
        matches!(self, EntityKind::Link { media_key: Some(key), .. } if !key.is_empty())
    }
}

/// Text shown for rendered links
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum LinkTextMode {
    /// Domain and path of the target URL
    #[serde(rename = "domain-path")]
    DomainPath,
    /// Text shown by the platform for the link
    #[default]
    #[serde(rename = "display-url", alias = "post-text")]
    DisplayText,
}

impl FromStr for LinkTextMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain-path" => Ok(LinkTextMode::DomainPath),
            "display-url" | "post-text" => Ok(LinkTextMode::DisplayText),
            _ => Err("`linkTextType` must be either `domain-path` or `display-url`".to_string()),
        }
    }
}

/// Post-processing of `\n` in rendered HTML
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NewlineMode {
    /// Keep as is
    #[default]
    None,
    /// Replace runs of newlines with a single `<br/>`
    Break,
    /// Wrap each non-empty line in `<p>`
    Paragraph,
}

impl FromStr for NewlineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(NewlineMode::None),
            "break" => Ok(NewlineMode::Break),
            "paragraph" => Ok(NewlineMode::Paragraph),
            _ => Err(
                "`newlineHandling` must be one of `none`, `break` or `paragraph`".to_string(),
            ),
        }
    }
}

/// Options controlling text rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub link_text_mode: LinkTextMode,
    pub newline_mode: NewlineMode,
    pub remove_trailing_links: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            link_text_mode: LinkTextMode::DisplayText,
            newline_mode: NewlineMode::None,
            remove_trailing_links: true,
        }
    }
}

/// How an item's trailing link should be presented
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
    #[default]
    None,
    Link,
    Media,
}

/// Rendered form of a text payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedText {
    pub html: String,
    pub markdown: String,
    pub view_type: ViewType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_view_url: Option<String>,
}

/// Position in a paginated listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageCursor {
    /// Opaque cursor or next-page URL returned by the API
    Token(String),
    /// Page number or item offset
    Offset(u64),
}

impl PageCursor {
    pub fn as_token(&self) -> Option<&str> {
        match self {
            PageCursor::Token(token) => Some(token),
            PageCursor::Offset(_) => None,
        }
    }

    pub fn as_offset(&self) -> Option<u64> {
        match self {
            PageCursor::Offset(offset) => Some(*offset),
            PageCursor::Token(_) => None,
        }
    }
}

/// Marker persisted between runs of the same job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchWatermark {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_digest: Option<String>,
}

impl FetchWatermark {
    /// Parsed `last_seen_timestamp`, if present and valid RFC 3339
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen_timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// Throttling details reported by an API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Result status of a loader run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadStatus {
    /// Data fetched and written
    Loaded,
    /// The API reported no modification since the stored ETag
    NotModified,
    /// Parameters identical to the previous successful run; fetch skipped
    Unchanged,
    /// Throttled by the API; retry on a later run
    RateLimited(RateLimit),
}

/// Summary returned by a loader run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadOutcome {
    #[serde(flatten)]
    pub status: LoadStatus,
    pub loaded: usize,
}

impl LoadOutcome {
    pub fn loaded(count: usize) -> Self {
        Self {
            status: LoadStatus::Loaded,
            loaded: count,
        }
    }

    pub fn skipped(status: LoadStatus) -> Self {
        Self { status, loaded: 0 }
    }
}
