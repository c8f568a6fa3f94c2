//! GitHub pull requests loader
//!
//! Runs a GraphQL issue search restricted to pull requests and stores every
//! match. Also usable live, for a search or a single pull request.

use crate::client::{ApiClient, ApiResponse};
use crate::error::LoadError;
use crate::loaders::{
    commit_records, live_body, months_back_start, require_token, LiveCollection, LiveLoader, Loader, PageInfo,
};
use crate::paginate::{Page, PageRequest, PageSource, Paginator, Timestamped};
use crate::store::{ContentStore, Record};
use crate::types::{LoadOutcome, LoadStatus, PageCursor, RenderedText};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::LazyLock;
use tracing::{info, warn};
use url::Url;

const DEFAULT_API_BASE: &str = "https://api.github.com/graphql";

/// Search results per GraphQL page
const PAGE_SIZE: usize = 100;

/// GitHub search never returns more than this many results
const MAX_SEARCH_RESULTS: u32 = 1000;

static NODE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^PR_[A-Za-z0-9+/=]{16}$").expect("valid node id pattern"));

static PR_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://github\.com/([^/]+)/([^/]+)/pull/(\d+)/?$").expect("valid pull request URL pattern")
});

const PR_FIELDS: &str = r#"
fragment PrFields on PullRequest {
  id url title titleHTML number state isDraft body bodyHTML bodyText
  author { login url avatarUrl ... on User { name } }
  repository {
    name nameWithOwner url stargazerCount isInOrganization
    owner { login url avatarUrl ... on User { name } ... on Organization { name } }
  }
  createdAt mergedAt
}"#;

const SEARCH_QUERY: &str = r#"
query GetPrs($search: String!, $first: Int!, $cursor: String) {
  search(query: $search, type: ISSUE, first: $first, after: $cursor) {
    pageInfo { hasNextPage endCursor }
    nodes { ...PrFields }
  }
}"#;

const BY_ID_QUERY: &str = r#"
query GetPrById($id: ID!) {
  node(id: $id) { ...PrFields }
}"#;

const BY_NUMBER_QUERY: &str = r#"
query GetPrByNumber($owner: String!, $repo: String!, $number: Int!) {
  repository(owner: $owner, name: $repo) { pullRequest(number: $number) { ...PrFields } }
}"#;

fn with_fields(query: &str) -> String {
    format!("{}\n{}", query.trim(), PR_FIELDS.trim())
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

/// Options for [`GithubPrsLoader`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GithubPrsConfig {
    /// GitHub search string, e.g. `author:octocat -user:octocat`
    pub search: String,
    /// Recent months to load, including the current one; ignored when
    /// `search` already has a `created` qualifier
    #[serde(default)]
    pub months_back: Option<u32>,
    /// Upper bound on loaded pull requests (1..=1000)
    #[serde(default)]
    pub max_entries: Option<u32>,
    /// Clear the store before writing
    #[serde(default)]
    pub clear_store: bool,
    #[serde(default, skip_serializing)]
    pub github_token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl GithubPrsConfig {
    pub fn new(search: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            months_back: None,
            max_entries: None,
            clear_store: false,
            github_token: None,
            api_base: default_api_base(),
        }
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = validate_search(&self.search, self.months_back, self.max_entries);
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

/// Live collection filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GithubPrsFilter {
    pub search: String,
    #[serde(default)]
    pub months_back: Option<u32>,
    #[serde(default)]
    pub max_entries: Option<u32>,
}

impl GithubPrsFilter {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let errors = validate_search(&self.search, self.months_back, self.max_entries);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn validate_search(search: &str, months_back: Option<u32>, max_entries: Option<u32>) -> Vec<String> {
    let mut errors = Vec::new();
    if search.trim().is_empty() {
        errors.push("`search` cannot be empty.".to_string());
    }
    if months_back == Some(0) {
        errors.push("`monthsBack` must be greater than or equal to 1".to_string());
    }
    match max_entries {
        Some(0) => errors.push("`maxEntries` must be greater than or equal to 1".to_string()),
        Some(n) if n > MAX_SEARCH_RESULTS => {
            errors.push("`maxEntries` must be less than or equal to 1000".to_string())
        }
        _ => {}
    }
    errors
}

/// Complete search string sent to GitHub
///
/// Adds `type:pr` unless a pull request qualifier is present, and a
/// `created:>=` lower bound from `months_back` unless the search already
/// constrains `created`.
pub fn search_query(search: &str, months_back: Option<u32>, today: NaiveDate) -> String {
    let mut query = search.trim().to_string();
    if !query.contains("type:pr") && !query.contains("is:pr") {
        query = format!("type:pr {}", query);
    }
    if let Some(months) = months_back.filter(|_| !search.contains("created")) {
        let start = months_back_start(today, months);
        query = format!("{} created:>={}", query, start.format("%Y-%m-%d"));
    }
    query
}

/// How a single pull request is addressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawIdentifier", into = "RawIdentifier")]
pub enum PrIdentifier {
    /// Global node id, `PR_` followed by 16 base64 characters
    NodeId(String),
    Number { owner: String, repo: String, number: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawIdentifier {
    Text(String),
    Parts { owner: String, repo: String, number: i64 },
}

impl TryFrom<RawIdentifier> for PrIdentifier {
    type Error = String;

    fn try_from(raw: RawIdentifier) -> Result<Self, Self::Error> {
        match raw {
            RawIdentifier::Text(text) => PrIdentifier::parse(&text).map_err(|e| e.to_string()),
            RawIdentifier::Parts { owner, repo, number } => {
                let mut errors = Vec::new();
                if owner.is_empty() {
                    errors.push("`owner` cannot be empty");
                }
                if repo.is_empty() {
                    errors.push("`repo` cannot be empty");
                }
                if number < 1 {
                    errors.push("`number` must be >= 1");
                }
                if !errors.is_empty() {
                    return Err(errors.join("\n"));
                }
                Ok(PrIdentifier::Number { owner, repo, number: number as u64 })
            }
        }
    }
}

impl From<PrIdentifier> for RawIdentifier {
    fn from(id: PrIdentifier) -> Self {
        match id {
            PrIdentifier::NodeId(id) => RawIdentifier::Text(id),
            PrIdentifier::Number { owner, repo, number } => RawIdentifier::Parts {
                owner,
                repo,
                number: number as i64,
            },
        }
    }
}

impl PrIdentifier {
    /// Parse a node id or a pull request URL
    pub fn parse(input: &str) -> Result<Self, LoadError> {
        if NODE_ID.is_match(input) {
            return Ok(PrIdentifier::NodeId(input.to_string()));
        }
        if let Some(caps) = PR_URL.captures(input) {
            let number = caps[3].parse::<u64>().ok().filter(|n| *n >= 1);
            if let Some(number) = number {
                return Ok(PrIdentifier::Number {
                    owner: caps[1].to_string(),
                    repo: caps[2].to_string(),
                    number,
                });
            }
        }
        Err(LoadError::InvalidIdentifier(
            "Invalid identifier string: expected PR node ID (start with \"PR_\" followed by 16 Base64 characters) or GitHub PR URL"
                .to_string(),
        ))
    }
}

/// A pull request; fields beyond the ones used here pass through verbatim
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub id: String,
    #[serde(rename = "bodyHTML", default)]
    pub body_html: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Timestamped for PullRequest {
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl PullRequest {
    fn into_record(self) -> Result<Record, LoadError> {
        let rendered = RenderedText {
            html: self.body_html.clone(),
            ..Default::default()
        };
        Ok(Record::new(self.id.clone(), &self)?.with_rendered(rendered))
    }
}

/// Search results other than pull requests come back as empty objects
fn pull_request(node: Value) -> Option<PullRequest> {
    if node.get("id").and_then(Value::as_str).is_none() {
        return None;
    }
    serde_json::from_value(node).ok()
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct NodeData {
    node: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryData {
    repository: Option<RepositoryPr>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryPr {
    pull_request: Option<Value>,
}

struct SearchSource<'a> {
    client: &'a ApiClient,
    endpoint: &'a Url,
    query: String,
}

#[async_trait]
impl PageSource for SearchSource<'_> {
    type Item = PullRequest;

    async fn fetch_page(&self, request: PageRequest) -> Result<Page<PullRequest>, LoadError> {
        let variables = json!({
            "search": self.query,
            "first": request.page_size,
            "cursor": request.cursor.as_ref().and_then(PageCursor::as_token),
        });
        let data: SearchData = match self
            .client
            .post_graphql(self.endpoint, &with_fields(SEARCH_QUERY), variables)
            .await?
        {
            ApiResponse::Ok { body, .. } => body,
            ApiResponse::NotModified => return Ok(Page::not_modified()),
            ApiResponse::RateLimited(limit) => return Ok(Page::rate_limited(limit)),
        };
        let next = data.search.page_info.next_cursor();
        let items = data.search.nodes.into_iter().filter_map(pull_request).collect();
        Ok(Page::new(items, next))
    }
}

/// Loader for pull requests matching a GitHub search
pub struct GithubPrsLoader {
    config: GithubPrsConfig,
    client: ApiClient,
    endpoint: Url,
}

impl GithubPrsLoader {
    /// Fails with [`LoadError::AuthMissing`] without a token
    pub fn new(config: GithubPrsConfig) -> Result<Self, LoadError> {
        let token = require_token(config.github_token.as_deref(), "GitHub", "GITHUB_TOKEN")?;
        let endpoint = Url::parse(&config.api_base)
            .map_err(|e| LoadError::config(format!("`apiBase` is not a valid URL: {}", e)))?;
        let client = ApiClient::builder()
            .bearer_token(token)
            .default_header("x-github-next-global-id", "1")
            .build()?;
        Ok(Self { config, client, endpoint })
    }

    async fn search(
        &self,
        search: &str,
        months_back: Option<u32>,
        max_entries: Option<u32>,
    ) -> Result<(LoadStatus, Vec<PullRequest>), LoadError> {
        let query = search_query(search, months_back, Utc::now().date_naive());
        info!(loader = "github-prs", "Loading GitHub pull requests with a search key: `{}`", query);

        let source = SearchSource {
            client: &self.client,
            endpoint: &self.endpoint,
            query,
        };
        let run = Paginator::new(PAGE_SIZE)
            .max_entries(max_entries.map(|n| n as usize))
            .run(&source)
            .await?;
        Ok((run.status, run.items))
    }
}

#[async_trait]
impl Loader for GithubPrsLoader {
    fn name(&self) -> &'static str {
        "github-prs"
    }

    async fn load(&self, store: &dyn ContentStore) -> Result<LoadOutcome, LoadError> {
        self.config.validate().map_err(LoadError::ConfigInvalid)?;

        let (status, prs) = self
            .search(&self.config.search, self.config.months_back, self.config.max_entries)
            .await?;
        if let LoadStatus::RateLimited(limit) = &status {
            warn!(
                loader = self.name(),
                limit = ?limit.limit,
                remaining = ?limit.remaining,
                "GitHub rate limit reached, nothing written"
            );
        }
        if status != LoadStatus::Loaded {
            return Ok(LoadOutcome::skipped(status));
        }

        let records = prs
            .into_iter()
            .map(PullRequest::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        let count = commit_records(store, records, self.config.clear_store).await?;
        info!(loader = self.name(), count, "Successfully loaded GitHub pull requests");
        Ok(LoadOutcome::loaded(count))
    }
}

#[async_trait]
impl LiveLoader for GithubPrsLoader {
    type CollectionFilter = GithubPrsFilter;
    type EntryFilter = PrIdentifier;

    async fn load_collection(&self, filter: &GithubPrsFilter) -> Result<LiveCollection, LoadError> {
        filter.validate().map_err(LoadError::ConfigInvalid)?;
        let (status, prs) = self
            .search(&filter.search, filter.months_back, filter.max_entries)
            .await?;
        let records = prs
            .into_iter()
            .map(PullRequest::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LiveCollection { status, records })
    }

    async fn load_entry(&self, filter: &PrIdentifier) -> Result<Option<Record>, LoadError> {
        let node = match filter {
            PrIdentifier::NodeId(id) => {
                let response: ApiResponse<NodeData> = self
                    .client
                    .post_graphql(&self.endpoint, &with_fields(BY_ID_QUERY), json!({ "id": id }))
                    .await?;
                live_body(response)?.node
            }
            PrIdentifier::Number { owner, repo, number } => {
                let response: ApiResponse<RepositoryData> = self
                    .client
                    .post_graphql(
                        &self.endpoint,
                        &with_fields(BY_NUMBER_QUERY),
                        json!({ "owner": owner, "repo": repo, "number": number }),
                    )
                    .await?;
                live_body(response)?.repository.and_then(|r| r.pull_request)
            }
        };
        node.and_then(pull_request).map(PullRequest::into_record).transpose()
    }
}
