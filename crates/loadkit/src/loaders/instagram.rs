//! Instagram media loader
//!
//! Lists the media of the account behind the access token through the
//! Instagram Graph API. Runs are incremental: the newest accepted item's
//! timestamp is kept and the next run stops once it reaches it.

use crate::client::{ApiClient, ApiResponse};
use crate::error::LoadError;
use crate::loaders::{commit_records, live_body, parse_date, require_token, LiveCollection, LiveLoader, Loader};
use crate::paginate::{Boundary, Page, PageRequest, PageSource, Paginator, Timestamped};
use crate::store::{ContentStore, Record};
use crate::types::{FetchWatermark, LoadOutcome, LoadStatus, PageCursor};
use crate::watermark::{format_timestamp, job_key, Tracker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_API_BASE: &str = "https://graph.instagram.com";
const DEFAULT_API_VERSION: &str = "v23.0";
const DEFAULT_FIELDS: &str = "id,media_product_type,media_type,caption,permalink,media_url,like_count,timestamp,children{media_type,media_url},comments{id,username,text,timestamp}";

/// Graph API default page size
const PAGE_SIZE: usize = 25;

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_fields() -> String {
    DEFAULT_FIELDS.to_string()
}

fn default_media_types() -> Vec<MediaType> {
    vec![MediaType::Image, MediaType::Video, MediaType::CarouselAlbum]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
    Image,
    Video,
    CarouselAlbum,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "IMAGE",
            MediaType::Video => "VIDEO",
            MediaType::CarouselAlbum => "CAROUSEL_ALBUM",
        }
    }
}

/// A point in time: Unix milliseconds, a date, or an RFC 3339 timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum DateLike {
    Millis(i64),
    Text(String),
}

impl DateLike {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            DateLike::Millis(ms) => DateTime::<Utc>::from_timestamp_millis(*ms),
            DateLike::Text(text) => parse_date(text),
        }
    }
}

/// Media filters shared by the stored and the live collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstagramFilter {
    /// Graph API field selection
    #[serde(default = "default_fields")]
    pub fields: String,
    #[serde(default = "default_media_types")]
    pub media_types: Vec<MediaType>,
    #[serde(default)]
    pub since: Option<DateLike>,
    #[serde(default)]
    pub until: Option<DateLike>,
    /// Upper bound on returned items
    #[serde(default)]
    pub limit: Option<u32>,
}

impl Default for InstagramFilter {
    fn default() -> Self {
        Self {
            fields: default_fields(),
            media_types: default_media_types(),
            since: None,
            until: None,
            limit: None,
        }
    }
}

impl InstagramFilter {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.media_types.is_empty() {
            errors.push("`mediaTypes` must contain at least one media type".to_string());
        }
        if self.limit == Some(0) {
            errors.push("`limit` must be a positive integer".to_string());
        }
        let since = self.since.as_ref().map(DateLike::to_datetime);
        let until = self.until.as_ref().map(DateLike::to_datetime);
        if matches!(since, Some(None)) || matches!(until, Some(None)) {
            errors.push("`since`/`until` must be a valid date, timestamp or Unix milliseconds".to_string());
        }
        if let (Some(Some(since)), Some(Some(until))) = (since, until) {
            if since > until {
                errors.push("`since` must be earlier than `until`".to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Options for [`InstagramMediaLoader`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstagramConfig {
    #[serde(flatten)]
    pub filter: InstagramFilter,
    /// Graph API version, e.g. `v23.0`
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default, skip_serializing)]
    pub instagram_token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            filter: InstagramFilter::default(),
            api_version: default_api_version(),
            instagram_token: None,
            api_base: default_api_base(),
        }
    }
}

impl InstagramConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = match self.filter.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };
        if !self.api_version.starts_with('v') {
            errors.push("`apiVersion` must start with `v`".to_string());
        }
        if Url::parse(&self.api_base).is_err() {
            errors.push("`apiBase` must be a valid URL".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Single media lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstagramEntryFilter {
    pub media_id: String,
    /// Defaults to the loader's field selection
    #[serde(default)]
    pub fields: Option<String>,
}

/// A media object; unrequested fields are absent, everything passes through
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Graph API timestamps look like `2024-01-01T12:00:00+0000`
fn parse_media_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(ts))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

impl Timestamped for Media {
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_deref().and_then(parse_media_timestamp)
    }
}

impl Media {
    /// Items of an unknown type pass; known types must be selected
    fn is_selected(&self, types: &[MediaType]) -> bool {
        match self.media_type.as_deref() {
            Some(kind) => types.iter().any(|t| t.as_str() == kind),
            None => true,
        }
    }

    fn into_record(self) -> Result<Record, LoadError> {
        Record::new(self.id.clone(), &self)
    }
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<String>,
}

struct MediaSource<'a> {
    client: &'a ApiClient,
    first: Url,
    media_types: &'a [MediaType],
}

#[async_trait]
impl PageSource for MediaSource<'_> {
    type Item = Media;

    async fn fetch_page(&self, request: PageRequest) -> Result<Page<Media>, LoadError> {
        let url = match request.cursor.as_ref().and_then(PageCursor::as_token) {
            Some(next) => Url::parse(next).map_err(|e| LoadError::Http(format!("invalid paging URL: {}", e)))?,
            None => self.first.clone(),
        };
        let body: MediaResponse = match self.client.get_json(&url, None).await? {
            ApiResponse::Ok { body, .. } => body,
            ApiResponse::NotModified => return Ok(Page::not_modified()),
            ApiResponse::RateLimited(limit) => return Ok(Page::rate_limited(limit)),
        };

        let mut items = Vec::with_capacity(body.data.len());
        for raw in body.data {
            match serde_json::from_value::<Media>(raw) {
                Ok(media) => items.push(media),
                Err(e) => debug!(error = %e, "skipping malformed media item"),
            }
        }
        let next = body.paging.and_then(|p| p.next).map(PageCursor::Token);
        Ok(Page::new(items, next))
    }

    fn keep(&self, media: &Media) -> bool {
        let selected = media.is_selected(self.media_types);
        if !selected {
            debug!(id = %media.id, media_type = ?media.media_type, "media type not selected");
        }
        selected
    }
}

/// Loader for Instagram media
pub struct InstagramMediaLoader {
    config: InstagramConfig,
    token: String,
    client: ApiClient,
}

impl InstagramMediaLoader {
    /// Fails with [`LoadError::AuthMissing`] without a token
    pub fn new(config: InstagramConfig) -> Result<Self, LoadError> {
        let token = require_token(config.instagram_token.as_deref(), "Instagram", "INSTAGRAM_TOKEN")?;
        let client = ApiClient::builder().build()?;
        Ok(Self { config, token, client })
    }

    fn url(&self, path: &str) -> Result<Url, LoadError> {
        let mut url = Url::parse(&format!(
            "{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.api_version,
            path
        ))
        .map_err(|e| LoadError::config(format!("`apiBase` is not a valid URL: {}", e)))?;
        url.query_pairs_mut().append_pair("access_token", &self.token);
        Ok(url)
    }

    /// App-scoped id of the token's account
    async fn user_id(&self) -> Result<ApiResponse<String>, LoadError> {
        let response: ApiResponse<MeResponse> = self.client.get_json(&self.url("me")?, None).await?;
        Ok(response.map(|me| me.id))
    }

    fn media_url(
        &self,
        user_id: &str,
        fields: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Url, LoadError> {
        let mut url = self.url(&format!("{}/media", urlencoding::encode(user_id)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("fields", fields);
            if let Some(since) = since {
                query.append_pair("since", &since.timestamp().to_string());
            }
            if let Some(until) = until {
                query.append_pair("until", &until.timestamp().to_string());
            }
        }
        Ok(url)
    }

    async fn list(
        &self,
        user_id: &str,
        filter: &InstagramFilter,
        since: Option<DateTime<Utc>>,
        boundary: Option<Boundary>,
    ) -> Result<(LoadStatus, Vec<Media>, Option<DateTime<Utc>>), LoadError> {
        let until = filter.until.as_ref().and_then(DateLike::to_datetime);
        let source = MediaSource {
            client: &self.client,
            first: self.media_url(user_id, &filter.fields, since, until)?,
            media_types: &filter.media_types,
        };
        let run = Paginator::new(PAGE_SIZE)
            .max_entries(filter.limit.map(|n| n as usize))
            .boundary(boundary)
            .run(&source)
            .await?;
        let newest = run.newest();
        debug!(pages = run.pages, items = run.items.len(), "fetched media");
        Ok((run.status, run.items, newest))
    }
}

#[async_trait]
impl Loader for InstagramMediaLoader {
    fn name(&self) -> &'static str {
        "instagram-media"
    }

    async fn load(&self, store: &dyn ContentStore) -> Result<LoadOutcome, LoadError> {
        self.config.validate().map_err(LoadError::ConfigInvalid)?;

        let user_id = match self.user_id().await? {
            ApiResponse::Ok { body, .. } => body,
            ApiResponse::NotModified => return Ok(LoadOutcome::skipped(LoadStatus::NotModified)),
            ApiResponse::RateLimited(limit) => {
                warn!(loader = self.name(), remaining = ?limit.remaining, "Instagram rate limit reached");
                return Ok(LoadOutcome::skipped(LoadStatus::RateLimited(limit)));
            }
        };

        let tracker = Tracker::open(store, job_key(self.name(), &user_id)?).await?;
        // an explicit `since` wins over the stored watermark
        let since = self
            .config
            .filter
            .since
            .as_ref()
            .and_then(DateLike::to_datetime)
            .or_else(|| tracker.last_seen());

        let (status, media, newest) = self
            .list(&user_id, &self.config.filter, since, since.map(Boundary::AtOrBefore))
            .await?;
        if status != LoadStatus::Loaded {
            warn!(loader = self.name(), status = ?status, "Instagram media not loaded, nothing written");
            return Ok(LoadOutcome::skipped(status));
        }

        let records = media.into_iter().map(Media::into_record).collect::<Result<Vec<_>, _>>()?;
        let count = commit_records(store, records, false).await?;
        tracker
            .commit(
                count,
                FetchWatermark {
                    last_seen_timestamp: newest.map(format_timestamp),
                    ..Default::default()
                },
            )
            .await?;
        info!(loader = self.name(), count, "Successfully loaded Instagram medias");
        Ok(LoadOutcome::loaded(count))
    }
}

#[async_trait]
impl LiveLoader for InstagramMediaLoader {
    type CollectionFilter = InstagramFilter;
    type EntryFilter = InstagramEntryFilter;

    async fn load_collection(&self, filter: &InstagramFilter) -> Result<LiveCollection, LoadError> {
        filter.validate().map_err(LoadError::ConfigInvalid)?;
        let user_id = live_body(self.user_id().await?)?;
        let since = filter.since.as_ref().and_then(DateLike::to_datetime);
        let (status, media, _) = self.list(&user_id, filter, since, None).await?;
        let records = media.into_iter().map(Media::into_record).collect::<Result<Vec<_>, _>>()?;
        Ok(LiveCollection { status, records })
    }

    async fn load_entry(&self, filter: &InstagramEntryFilter) -> Result<Option<Record>, LoadError> {
        if filter.media_id.trim().is_empty() {
            return Err(LoadError::InvalidIdentifier("`mediaId` cannot be empty".to_string()));
        }
        let mut url = self.url(&urlencoding::encode(&filter.media_id))?;
        let fields = filter.fields.as_deref().unwrap_or(&self.config.filter.fields);
        url.query_pairs_mut().append_pair("fields", fields);

        match self.client.get_json::<Media>(&url, None).await {
            Ok(response) => live_body(response)?.into_record().map(Some),
            // unknown ids come back as 400 "does not exist"
            Err(LoadError::Api { status: 400 | 404, message }) if message.contains("does not exist") => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let config: InstagramConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, InstagramConfig::default());
        assert_eq!(config.api_version, "v23.0");
        assert_eq!(config.filter.media_types.len(), 3);
        assert!(config.filter.fields.starts_with("id,media_product_type"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config: InstagramConfig = serde_json::from_value(json!({
            "mediaTypes": [],
            "since": "2024-02-01",
            "until": "2024-01-01",
            "limit": 0,
            "apiVersion": "23.0"
        }))
        .unwrap();
        let errors = config.validate().unwrap_err();
        assert!(errors.contains(&"`since` must be earlier than `until`".to_string()));
        assert!(errors.contains(&"`mediaTypes` must contain at least one media type".to_string()));
        assert!(errors.contains(&"`limit` must be a positive integer".to_string()));
        assert!(errors.contains(&"`apiVersion` must start with `v`".to_string()));

        let bad_date = InstagramFilter {
            since: Some(DateLike::Text("soon".into())),
            ..Default::default()
        };
        assert!(bad_date.validate().is_err());
    }

    #[test]
    fn test_media_type_rejected() {
        assert!(serde_json::from_value::<InstagramFilter>(json!({ "mediaTypes": ["REEL"] })).is_err());
    }

    #[test]
    fn test_date_like() {
        assert_eq!(
            DateLike::Millis(1_704_067_200_000).to_datetime(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            DateLike::Text("2024-01-01".into()).to_datetime(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_media_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_media_timestamp("2024-01-01T12:00:00+0000"), Some(expected));
        assert_eq!(parse_media_timestamp("2024-01-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_media_timestamp("yesterday"), None);
    }

    #[test]
    fn test_media_selection() {
        let media: Media = serde_json::from_value(json!({
            "id": "1",
            "media_type": "VIDEO",
            "caption": "hi",
            "timestamp": "2024-01-01T12:00:00+0000"
        }))
        .unwrap();
        assert!(media.is_selected(&[MediaType::Video]));
        assert!(!media.is_selected(&[MediaType::Image]));

        let record = media.into_record().unwrap();
        assert_eq!(record.id, "1");
        assert_eq!(record.data["caption"], "hi");
        assert_eq!(record.data["media_type"], "VIDEO");
    }

    #[test]
    fn test_token_required() {
        assert!(matches!(
            InstagramMediaLoader::new(InstagramConfig::default()),
            Err(LoadError::AuthMissing { env_var: "INSTAGRAM_TOKEN", .. })
        ));
    }

    #[test]
    fn test_media_url() {
        let loader = InstagramMediaLoader::new(InstagramConfig {
            instagram_token: Some("tok".into()),
            ..Default::default()
        })
        .unwrap();
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let url = loader.media_url("17841", "id,caption", Some(since), None).unwrap();
        assert_eq!(url.path(), "/v23.0/17841/media");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("access_token".into(), "tok".into())));
        assert!(pairs.contains(&("fields".into(), "id,caption".into())));
        assert!(pairs.contains(&("since".into(), "1704067200".into())));
    }
}
