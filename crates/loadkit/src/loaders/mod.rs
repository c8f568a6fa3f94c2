//! Platform loaders
//!
//! A [`Loader`] runs one configured job against a [`ContentStore`]:
//! validate the configuration, fetch everything, then write records and
//! advance the watermark. Nothing is written unless the whole fetch
//! succeeded. A [`LiveLoader`] answers one request directly, without a
//! store or watermark.
//!
//! Built-in loaders:
//! - [`BlueskyPostsLoader`] - posts and threads by AT-URI
//! - [`GithubPrsLoader`] - pull requests matching a search query
//! - [`GithubReleasesLoader`] - releases from push events or repositories
//! - [`InstagramMediaLoader`] - media of the token's account
//! - [`TweetsLoader`] - tweets by id

mod bluesky;
mod github_prs;
mod github_releases;
mod instagram;
mod tweets;

pub use bluesky::{BlueskyConfig, BlueskyPostsLoader};
pub use github_prs::{GithubPrsConfig, GithubPrsFilter, GithubPrsLoader, PrIdentifier};
pub use github_releases::{
    EntryReturnType, GithubReleasesConfig, GithubReleasesLoader, ReleaseIdentifier, ReleaseMode,
};
pub use instagram::{
    DateLike, InstagramConfig, InstagramEntryFilter, InstagramFilter, InstagramMediaLoader, MediaType,
};
pub use tweets::{StorageMode, TweetsConfig, TweetsLoader};

use crate::client::ApiResponse;
use crate::error::LoadError;
use crate::store::{ContentStore, Record};
use crate::types::{LoadOutcome, LoadStatus, PageCursor};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, warn};

/// A configured job that writes into a store
#[async_trait]
pub trait Loader: Send + Sync {
    /// Identifier used in logs and watermark keys
    fn name(&self) -> &'static str;

    /// Run the job once
    async fn load(&self, store: &dyn ContentStore) -> Result<LoadOutcome, LoadError>;
}

/// Records returned by a live collection request
#[derive(Debug, Clone, PartialEq)]
pub struct LiveCollection {
    pub status: LoadStatus,
    pub records: Vec<Record>,
}

impl LiveCollection {
    pub fn loaded(records: Vec<Record>) -> Self {
        Self {
            status: LoadStatus::Loaded,
            records,
        }
    }

    pub fn rate_limited(limit: crate::types::RateLimit) -> Self {
        Self {
            status: LoadStatus::RateLimited(limit),
            records: Vec::new(),
        }
    }
}

/// Request-time access to a platform, without a store
#[async_trait]
pub trait LiveLoader: Send + Sync {
    type CollectionFilter: Send + Sync;
    type EntryFilter: Send + Sync;

    /// All entries matching `filter`
    async fn load_collection(&self, filter: &Self::CollectionFilter) -> Result<LiveCollection, LoadError>;

    /// A single entry; `Ok(None)` when it does not exist
    async fn load_entry(&self, filter: &Self::EntryFilter) -> Result<Option<Record>, LoadError>;
}

struct NamedLoader {
    name: String,
    loader: Box<dyn Loader>,
}

/// Named loaders run in registration order
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: Vec<NamedLoader>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loader under a collection name
    pub fn register(&mut self, name: impl Into<String>, loader: Box<dyn Loader>) {
        self.loaders.push(NamedLoader {
            name: name.into(),
            loader,
        });
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.loaders.iter().map(|l| l.name.as_str())
    }

    /// Run the loader registered as `name`
    pub async fn load(&self, name: &str, store: &dyn ContentStore) -> Result<LoadOutcome, LoadError> {
        let entry = self
            .loaders
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| LoadError::InvalidIdentifier(format!("no collection named `{}`", name)))?;
        run_logged(entry, store).await
    }

    /// Run every loader against one shared store
    ///
    /// A failing loader does not stop the others.
    pub async fn load_all(&self, store: &dyn ContentStore) -> Vec<(String, Result<LoadOutcome, LoadError>)> {
        let mut results = Vec::with_capacity(self.loaders.len());
        for entry in &self.loaders {
            results.push((entry.name.clone(), run_logged(entry, store).await));
        }
        results
    }
}

async fn run_logged(entry: &NamedLoader, store: &dyn ContentStore) -> Result<LoadOutcome, LoadError> {
    let result = entry.loader.load(store).await;
    match &result {
        Ok(outcome) => info!(
            collection = %entry.name,
            loader = entry.loader.name(),
            loaded = outcome.loaded,
            status = ?outcome.status,
            "collection loaded"
        ),
        Err(err) => warn!(collection = %entry.name, loader = entry.loader.name(), error = %err, "collection failed"),
    }
    result
}

/// Non-empty token or [`LoadError::AuthMissing`]
pub(crate) fn require_token(
    token: Option<&str>,
    platform: &'static str,
    env_var: &'static str,
) -> Result<String, LoadError> {
    match token.map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(LoadError::AuthMissing { platform, env_var }),
    }
}

/// First day of the month `months_back - 1` months before `today`
///
/// `months_back = 1` is the current month.
pub fn months_back_start(today: NaiveDate, months_back: u32) -> NaiveDate {
    let index = today.year() * 12 + today.month0() as i32 - (months_back.max(1) as i32 - 1);
    let year = index.div_euclid(12);
    let month = index.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(today)
}

/// `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp
pub(crate) fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// GraphQL connection `pageInfo`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

impl PageInfo {
    pub(crate) fn next_cursor(&self) -> Option<PageCursor> {
        if self.has_next_page {
            self.end_cursor.clone().map(PageCursor::Token)
        } else {
            None
        }
    }
}

/// Body of a single live request; throttling is an error here
pub(crate) fn live_body<T>(response: ApiResponse<T>) -> Result<T, LoadError> {
    match response {
        ApiResponse::Ok { body, .. } => Ok(body),
        ApiResponse::NotModified => Err(LoadError::Api {
            status: 304,
            message: "Not Modified".to_string(),
        }),
        ApiResponse::RateLimited(limit) => Err(LoadError::Api {
            status: 429,
            message: match limit.reset_at {
                Some(reset) => format!("Rate limit exceeded, resets at {}", reset.to_rfc3339()),
                None => "Rate limit exceeded".to_string(),
            },
        }),
    }
}

/// Write records after an all-or-nothing fetch
pub(crate) async fn commit_records(
    store: &dyn ContentStore,
    records: Vec<Record>,
    clear_first: bool,
) -> Result<usize, LoadError> {
    if clear_first {
        store.clear().await?;
    }
    let count = records.len();
    for record in records {
        store.upsert(record).await?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    struct StaticLoader(Vec<&'static str>);

    #[async_trait]
    impl Loader for StaticLoader {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn load(&self, store: &dyn ContentStore) -> Result<LoadOutcome, LoadError> {
            let records = self
                .0
                .iter()
                .map(|id| Record::new(*id, &json!({ "id": id })))
                .collect::<Result<Vec<_>, _>>()?;
            let count = commit_records(store, records, false).await?;
            Ok(LoadOutcome::loaded(count))
        }
    }

    struct FailingLoader;

    #[async_trait]
    impl Loader for FailingLoader {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn load(&self, _store: &dyn ContentStore) -> Result<LoadOutcome, LoadError> {
            Err(LoadError::Timeout)
        }
    }

    #[test]
    fn test_months_back_start() {
        let today = NaiveDate::from_ymd_opt(2024, 12, 4).unwrap();
        assert_eq!(months_back_start(today, 3), NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());
        assert_eq!(months_back_start(today, 1), NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());

        let january = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_eq!(months_back_start(january, 2), NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert_eq!(months_back_start(january, 14), NaiveDate::from_ymd_opt(2023, 12, 1).unwrap());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2024-03-01").unwrap().to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert_eq!(parse_date("2024-03-01T10:00:00+02:00").unwrap().to_rfc3339(), "2024-03-01T08:00:00+00:00");
        assert!(parse_date("March 1st").is_none());
    }

    #[test]
    fn test_require_token() {
        assert_eq!(require_token(Some(" abc "), "GitHub", "GITHUB_TOKEN").unwrap(), "abc");
        assert!(matches!(
            require_token(Some(""), "GitHub", "GITHUB_TOKEN"),
            Err(LoadError::AuthMissing { env_var: "GITHUB_TOKEN", .. })
        ));
        assert!(require_token(None, "X", "X_TOKEN").is_err());
    }

    #[tokio::test]
    async fn test_registry_runs_in_order_and_isolates_failures() {
        let mut registry = LoaderRegistry::new();
        registry.register("first", Box::new(StaticLoader(vec!["a", "b"])));
        registry.register("broken", Box::new(FailingLoader));
        registry.register("second", Box::new(StaticLoader(vec!["c"])));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["first", "broken", "second"]);

        let store = MemoryStore::new();
        let results = registry.load_all(&store).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].1.as_ref().unwrap().loaded, 2);
        assert!(matches!(results[1].1, Err(LoadError::Timeout)));
        assert_eq!(results[2].1.as_ref().unwrap().loaded, 1);
        assert_eq!(store.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_registry_unknown_name() {
        let registry = LoaderRegistry::new();
        let store = MemoryStore::new();
        assert!(matches!(
            registry.load("missing", &store).await,
            Err(LoadError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_page_info_cursor() {
        let info: PageInfo = serde_json::from_value(json!({ "hasNextPage": true, "endCursor": "Y3Vy" })).unwrap();
        assert_eq!(info.next_cursor(), Some(PageCursor::Token("Y3Vy".into())));
        let info: PageInfo = serde_json::from_value(json!({ "hasNextPage": false, "endCursor": "Y3Vy" })).unwrap();
        assert_eq!(info.next_cursor(), None);
    }

    #[test]
    fn test_live_body_rate_limited_is_error() {
        let response: ApiResponse<u8> = ApiResponse::RateLimited(Default::default());
        assert!(matches!(live_body(response), Err(LoadError::Api { status: 429, .. })));
        assert_eq!(live_body(ApiResponse::Ok { body: 1u8, etag: None }).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_records_clears_first() {
        let store = MemoryStore::new();
        store.upsert(Record::new("old", &json!({})).unwrap()).await.unwrap();
        let records = vec![Record::new("new", &json!({})).unwrap()];
        commit_records(&store, records, true).await.unwrap();
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("new").await.unwrap().is_some());
    }
}
