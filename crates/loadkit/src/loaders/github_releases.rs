//! GitHub releases loader
//!
//! Two sources:
//! - `userCommit`: a user's public push events, where a commit whose first
//!   line mentions the keyword and carries a version number counts as a
//!   release. Incremental through the events ETag and the newest push time.
//! - `repoList`: the release list of each configured repository, bounded by
//!   a date. Needs a token.

use crate::client::{ApiClient, ApiResponse};
use crate::error::LoadError;
use crate::loaders::{
    commit_records, live_body, months_back_start, parse_date, require_token, LiveCollection, LiveLoader, Loader,
    PageInfo,
};
use crate::paginate::{Page, PageRequest, PageSource, Paginator, Timestamped};
use crate::store::{ContentStore, Record};
use crate::types::{FetchWatermark, LoadOutcome, LoadStatus, PageCursor, RenderedText};
use crate::watermark::{format_timestamp, job_key, Tracker};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_GRAPHQL_URL: &str = "https://api.github.com/graphql";

const PER_PAGE: usize = 100;

/// The public events API serves at most 300 events
const MAX_EVENT_PAGES: usize = 3;

const DEFAULT_TAG_REGEX: &str = r"v?(\d+\.\d+\.\d+(?:-[\w.]+)?)(?:\s|$)";

const DEFAULT_BRANCHES: [&str; 6] = [
    "refs/heads/main",
    "refs/heads/master",
    "refs/heads/latest",
    "refs/heads/stable",
    "refs/heads/release",
    "refs/heads/dev",
];

static REPO_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^/]+/[^/]+$").expect("valid repository name pattern"));

const RELEASE_FIELDS: &str = r#"
fragment ReleaseFields on Release {
  id url name tagName description descriptionHTML publishedAt
  repository { nameWithOwner url }
}"#;

const RELEASES_QUERY: &str = r#"
query GetReleases($owner: String!, $repo: String!, $first: Int!, $cursor: String) {
  repository(owner: $owner, name: $repo) {
    releases(first: $first, after: $cursor, orderBy: { field: CREATED_AT, direction: DESC }) {
      pageInfo { hasNextPage endCursor }
      nodes { ...ReleaseFields }
    }
  }
}"#;

const RELEASE_BY_ID_QUERY: &str = r#"
query GetReleaseById($id: ID!) {
  node(id: $id) { ...ReleaseFields }
}"#;

const RELEASE_BY_TAG_QUERY: &str = r#"
query GetReleaseByTagName($owner: String!, $repo: String!, $tagName: String!) {
  repository(owner: $owner, name: $repo) { release(tagName: $tagName) { ...ReleaseFields } }
}"#;

fn with_fields(query: &str) -> String {
    format!("{}\n{}", query.trim(), RELEASE_FIELDS.trim())
}

fn default_tag_regex() -> String {
    DEFAULT_TAG_REGEX.to_string()
}

fn default_keyword() -> String {
    "release".to_string()
}

fn default_branches() -> Vec<String> {
    DEFAULT_BRANCHES.iter().map(|b| b.to_string()).collect()
}

fn default_true() -> bool {
    true
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_graphql_url() -> String {
    DEFAULT_GRAPHQL_URL.to_string()
}

/// Shape of `repoList` entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum EntryReturnType {
    /// One entry per release
    ByRelease,
    /// One entry per repository listing its releases
    #[default]
    ByRepository,
}

/// Where releases come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode")]
pub enum ReleaseMode {
    #[serde(rename = "userCommit", rename_all = "camelCase")]
    UserCommit {
        username: String,
        /// First capture group is the version number
        #[serde(default = "default_tag_regex", alias = "versionRegex")]
        tag_name_regex: String,
        #[serde(default = "default_keyword")]
        keyword: String,
        /// Push refs that count; pushes to other branches are ignored
        #[serde(default = "default_branches")]
        branches: Vec<String>,
        /// Prefix `v` to the version in release URLs
        #[serde(default = "default_true")]
        prepend_v: bool,
    },
    #[serde(rename = "repoList", rename_all = "camelCase")]
    RepoList {
        /// `owner/repo` names
        repos: Vec<String>,
        /// Date or RFC 3339 timestamp
        #[serde(default)]
        since_date: Option<String>,
        #[serde(default)]
        months_back: Option<u32>,
        #[serde(default)]
        entry_return_type: EntryReturnType,
    },
}

impl ReleaseMode {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        match self {
            ReleaseMode::UserCommit {
                username,
                tag_name_regex,
                ..
            } => {
                if username.trim().is_empty() {
                    errors.push("`username` cannot be empty".to_string());
                }
                if tag_name_regex.is_empty() {
                    errors.push("`tagNameRegex` cannot be empty".to_string());
                } else if let Err(e) = Regex::new(tag_name_regex) {
                    errors.push(format!("`tagNameRegex` is not a valid regular expression: {}", e));
                }
            }
            ReleaseMode::RepoList {
                repos,
                since_date,
                months_back,
                ..
            } => {
                if repos.is_empty() {
                    errors.push("At least one repository must be provided".to_string());
                }
                if repos.iter().any(|repo| !REPO_NAME.is_match(repo)) {
                    errors.push("Repository name must follow the 'owner/repo' format".to_string());
                }
                if since_date.as_deref().is_some_and(|d| parse_date(d).is_none()) {
                    errors.push("Invalid date string in `sinceDate`.".to_string());
                }
                if *months_back == Some(0) {
                    errors.push("`monthsBack` must be a positive integer".to_string());
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Options for [`GithubReleasesLoader`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GithubReleasesConfig {
    #[serde(flatten)]
    pub mode: ReleaseMode,
    #[serde(default)]
    pub clear_store: bool,
    /// Required for `repoList`; optional for `userCommit`
    #[serde(default, skip_serializing)]
    pub github_token: Option<String>,
    /// REST API base
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
}

impl GithubReleasesConfig {
    pub fn new(mode: ReleaseMode) -> Self {
        Self {
            mode,
            clear_store: false,
            github_token: None,
            api_base: default_api_base(),
            graphql_url: default_graphql_url(),
        }
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = match self.mode.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };
        if Url::parse(&self.api_base).is_err() {
            errors.push("`apiBase` must be a valid URL".to_string());
        }
        if Url::parse(&self.graphql_url).is_err() {
            errors.push("`graphqlUrl` must be a valid URL".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// How a single release is addressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReleaseIdentifier {
    /// Global node id
    NodeId(String),
    #[serde(rename_all = "camelCase")]
    Tag {
        owner: String,
        repo: String,
        tag_name: String,
    },
}

/// Lower bound for `repoList` releases; the more recent of both settings wins
pub fn since_bound(months_back: Option<u32>, since_date: Option<&str>, today: NaiveDate) -> Option<DateTime<Utc>> {
    let since = since_date.and_then(parse_date);
    let months = months_back
        .and_then(|m| months_back_start(today, m).and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());
    match (months, since) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Public event from `/users/{username}/events/public`
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub public: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub repo: EventRepo,
    pub actor: EventActor,
    #[serde(default)]
    pub org: Option<EventActor>,
    #[serde(default)]
    pub payload: PushPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRepo {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventActor {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// Fields of interest in a `PushEvent` payload; empty for other events
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushCommit {
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub message: String,
}

impl Timestamped for Event {
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

/// Release found in a push event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRelease {
    pub id: String,
    pub repo_name: String,
    pub repo_url: String,
    pub release_version: String,
    pub release_url: String,
    pub commit_message: String,
    pub commit_sha: String,
    pub commit_url: String,
    pub actor_login: String,
    pub actor_avatar_url: String,
    pub is_org: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_avatar_url: Option<String>,
    pub created_at: String,
}

/// Release entry from a repository's release list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoRelease {
    pub id: String,
    pub repo_name: String,
    pub repo_url: String,
    pub release_version: String,
    pub release_url: String,
    pub release_title: String,
    pub release_desc: String,
    pub release_desc_html: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl Timestamped for RepoRelease {
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }
}

impl RepoRelease {
    fn into_record(self) -> Result<Record, LoadError> {
        let rendered = RenderedText {
            html: self.release_desc_html.clone(),
            ..Default::default()
        };
        Ok(Record::new(self.id.clone(), &self)?.with_rendered(rendered))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseNode {
    id: String,
    url: String,
    name: Option<String>,
    tag_name: String,
    description: Option<String>,
    #[serde(rename = "descriptionHTML")]
    description_html: Option<String>,
    published_at: Option<DateTime<Utc>>,
    repository: NodeRepository,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeRepository {
    name_with_owner: String,
    url: String,
}

impl From<ReleaseNode> for RepoRelease {
    fn from(node: ReleaseNode) -> Self {
        Self {
            id: node.id,
            repo_name: node.repository.name_with_owner,
            repo_url: node.repository.url,
            release_version: node.tag_name,
            release_url: node.url,
            release_title: node.name.unwrap_or_default(),
            release_desc: node.description.unwrap_or_default(),
            release_desc_html: node.description_html.unwrap_or_default(),
            published_at: node.published_at,
        }
    }
}

/// Nodes without an id are not releases
fn release_node(node: Value) -> Option<RepoRelease> {
    if node.get("id").and_then(Value::as_str).is_none() {
        return None;
    }
    serde_json::from_value::<ReleaseNode>(node).ok().map(RepoRelease::from)
}

/// Scans push events for release commits
pub struct ReleaseMatcher {
    pattern: Regex,
    keyword: String,
    branches: Vec<String>,
    prepend_v: bool,
}

impl ReleaseMatcher {
    pub fn new(tag_name_regex: &str, keyword: &str, branches: &[String], prepend_v: bool) -> Result<Self, LoadError> {
        let pattern = Regex::new(tag_name_regex)
            .map_err(|e| LoadError::config(format!("`tagNameRegex` is not a valid regular expression: {}", e)))?;
        Ok(Self {
            pattern,
            keyword: keyword.to_string(),
            branches: branches.to_vec(),
            prepend_v,
        })
    }

    /// Public pushes to a tracked branch
    pub fn is_tracked_push(&self, event: &Event) -> bool {
        event.kind == "PushEvent"
            && event.public
            && event.created_at.is_some()
            && event
                .payload
                .git_ref
                .as_ref()
                .is_some_and(|r| self.branches.contains(r))
    }

    /// Releases announced by the commits of one push event
    ///
    /// The first release takes the event id; any further ones in the same
    /// push get `-{n}` appended so they do not overwrite each other.
    pub fn releases(&self, event: &Event) -> Vec<CommitRelease> {
        let repo = &event.repo.name;
        let created_at = event.created_at.map(format_timestamp).unwrap_or_default();
        let mut out = Vec::new();

        for commit in &event.payload.commits {
            let message = commit.message.lines().next().unwrap_or_default();
            if !message.contains(&self.keyword) {
                continue;
            }
            let Some(version) = self
                .pattern
                .captures(message)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .filter(|v| !v.is_empty())
            else {
                continue;
            };
            let tag = if self.prepend_v { format!("v{}", version) } else { version.clone() };
            let id = match out.len() {
                0 => event.id.clone(),
                n => format!("{}-{}", event.id, n),
            };

            out.push(CommitRelease {
                id,
                repo_name: repo.clone(),
                repo_url: format!("https://github.com/{}", repo),
                release_version: version,
                release_url: format!("https://github.com/{}/releases/tag/{}", repo, tag),
                commit_message: message.to_string(),
                commit_sha: commit.sha.clone(),
                commit_url: format!("https://github.com/{}/commit/{}", repo, commit.sha),
                actor_login: event.actor.login.clone(),
                actor_avatar_url: event.actor.avatar_url.clone(),
                is_org: event.org.is_some(),
                org_login: event.org.as_ref().map(|o| o.login.clone()).filter(|l| !l.is_empty()),
                org_avatar_url: event.org.as_ref().map(|o| o.avatar_url.clone()).filter(|a| !a.is_empty()),
                created_at: created_at.clone(),
            });
        }
        out
    }
}

struct EventsSource<'a> {
    client: &'a ApiClient,
    base: String,
    matcher: &'a ReleaseMatcher,
}

#[async_trait]
impl PageSource for EventsSource<'_> {
    type Item = Event;

    async fn fetch_page(&self, request: PageRequest) -> Result<Page<Event>, LoadError> {
        let page = request.cursor.as_ref().and_then(PageCursor::as_offset).unwrap_or(1);
        let mut url = Url::parse(&self.base)
            .map_err(|e| LoadError::config(format!("`apiBase` is not a valid URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("per_page", &request.page_size.to_string())
            .append_pair("page", &page.to_string());

        let (events, etag) = match self
            .client
            .get_json::<Vec<Event>>(&url, request.etag.as_deref())
            .await?
        {
            ApiResponse::Ok { body, etag } => (body, etag),
            ApiResponse::NotModified => return Ok(Page::not_modified()),
            ApiResponse::RateLimited(limit) => return Ok(Page::rate_limited(limit)),
        };

        // a short page is the last one
        let next = (events.len() >= request.page_size).then_some(PageCursor::Offset(page + 1));
        let pushes: Vec<Event> = events.into_iter().filter(|e| self.matcher.is_tracked_push(e)).collect();
        debug!(page, pushes = pushes.len(), "fetched public events");
        Ok(Page::new(pushes, next).with_etag(etag))
    }
}

struct ReleasesSource<'a> {
    client: &'a ApiClient,
    endpoint: &'a Url,
    owner: &'a str,
    repo: &'a str,
}

#[derive(Debug, Deserialize)]
struct ReleasesData {
    repository: Option<ReleasesRepository>,
}

#[derive(Debug, Deserialize)]
struct ReleasesRepository {
    releases: ReleaseConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Value>,
}

#[async_trait]
impl PageSource for ReleasesSource<'_> {
    type Item = RepoRelease;

    async fn fetch_page(&self, request: PageRequest) -> Result<Page<RepoRelease>, LoadError> {
        let variables = json!({
            "owner": self.owner,
            "repo": self.repo,
            "first": request.page_size,
            "cursor": request.cursor.as_ref().and_then(PageCursor::as_token),
        });
        let data: ReleasesData = match self
            .client
            .post_graphql(self.endpoint, &with_fields(RELEASES_QUERY), variables)
            .await?
        {
            ApiResponse::Ok { body, .. } => body,
            ApiResponse::NotModified => return Ok(Page::not_modified()),
            ApiResponse::RateLimited(limit) => return Ok(Page::rate_limited(limit)),
        };
        let Some(repository) = data.repository else {
            warn!(repo = %format!("{}/{}", self.owner, self.repo), "repository not found");
            return Ok(Page::new(Vec::new(), None));
        };
        let next = repository.releases.page_info.next_cursor();
        let items = repository.releases.nodes.into_iter().filter_map(release_node).collect();
        Ok(Page::new(items, next))
    }
}

/// Result of a `userCommit` scan
struct CommitScan {
    status: LoadStatus,
    releases: Vec<CommitRelease>,
    pushes: usize,
    newest: Option<DateTime<Utc>>,
    etag: Option<String>,
}

/// Loader for GitHub releases
pub struct GithubReleasesLoader {
    config: GithubReleasesConfig,
    client: ApiClient,
    graphql_url: Url,
    has_token: bool,
}

impl GithubReleasesLoader {
    pub fn new(config: GithubReleasesConfig) -> Result<Self, LoadError> {
        let token = config
            .github_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        if matches!(config.mode, ReleaseMode::RepoList { .. }) {
            require_token(token.as_deref(), "GitHub", "GITHUB_TOKEN")?;
        }
        let graphql_url = Url::parse(&config.graphql_url)
            .map_err(|e| LoadError::config(format!("`graphqlUrl` is not a valid URL: {}", e)))?;

        let mut builder = ApiClient::builder()
            .accept("application/vnd.github+json")
            .default_header("x-github-api-version", "2022-11-28")
            .default_header("x-github-next-global-id", "1");
        if let Some(token) = &token {
            builder = builder.bearer_token(token.clone());
        }
        Ok(Self {
            has_token: token.is_some(),
            client: builder.build()?,
            graphql_url,
            config,
        })
    }

    fn require_token(&self) -> Result<(), LoadError> {
        if self.has_token {
            Ok(())
        } else {
            Err(LoadError::AuthMissing {
                platform: "GitHub",
                env_var: "GITHUB_TOKEN",
            })
        }
    }

    async fn scan_commits(&self, mode: &ReleaseMode, tracker: Option<&Tracker<'_>>) -> Result<CommitScan, LoadError> {
        let ReleaseMode::UserCommit {
            username,
            tag_name_regex,
            keyword,
            branches,
            prepend_v,
        } = mode
        else {
            return Err(LoadError::config("not a `userCommit` configuration"));
        };

        let matcher = ReleaseMatcher::new(tag_name_regex, keyword, branches, *prepend_v)?;
        let source = EventsSource {
            client: &self.client,
            base: format!(
                "{}/users/{}/events/public",
                self.config.api_base.trim_end_matches('/'),
                urlencoding::encode(username)
            ),
            matcher: &matcher,
        };
        let run = Paginator::new(PER_PAGE)
            .start_at(PageCursor::Offset(1))
            .max_pages(MAX_EVENT_PAGES)
            .etag(tracker.and_then(Tracker::etag))
            .boundary(tracker.and_then(Tracker::exact_boundary))
            .run(&source)
            .await?;

        let newest = run.newest();
        let releases = run.items.iter().flat_map(|event| matcher.releases(event)).collect();
        Ok(CommitScan {
            status: run.status,
            releases,
            pushes: run.items.len(),
            newest,
            etag: run.etag,
        })
    }

    async fn fetch_repo_releases(
        &self,
        repos: &[String],
        since: Option<DateTime<Utc>>,
    ) -> Result<(LoadStatus, Vec<(String, Vec<RepoRelease>)>), LoadError> {
        let mut out = Vec::with_capacity(repos.len());
        for repo in repos {
            let Some((owner, name)) = repo.split_once('/') else {
                return Err(LoadError::config("Repository name must follow the 'owner/repo' format"));
            };
            let source = ReleasesSource {
                client: &self.client,
                endpoint: &self.graphql_url,
                owner,
                repo: name,
            };
            let run = Paginator::new(PER_PAGE).since(since).run(&source).await?;
            if run.status != LoadStatus::Loaded {
                return Ok((run.status, Vec::new()));
            }
            debug!(repo = %repo, releases = run.items.len(), pages = run.pages, "fetched releases");
            out.push((repo.clone(), run.items));
        }
        Ok((LoadStatus::Loaded, out))
    }

    async fn repo_list_records(
        &self,
        mode: &ReleaseMode,
    ) -> Result<(LoadStatus, Vec<Record>), LoadError> {
        let ReleaseMode::RepoList {
            repos,
            since_date,
            months_back,
            entry_return_type,
        } = mode
        else {
            return Err(LoadError::config("not a `repoList` configuration"));
        };
        self.require_token()?;

        let since = since_bound(*months_back, since_date.as_deref(), Utc::now().date_naive());
        let (status, per_repo) = self.fetch_repo_releases(repos, since).await?;

        let mut records = Vec::new();
        for (repo, releases) in per_repo {
            match entry_return_type {
                EntryReturnType::ByRelease => {
                    for release in releases {
                        records.push(release.into_record()?);
                    }
                }
                EntryReturnType::ByRepository => {
                    let data = json!({ "repo": repo, "repoReleases": releases });
                    records.push(Record::new(repo, &data)?);
                }
            }
        }
        Ok((status, records))
    }
}

fn commit_records_of(releases: &[CommitRelease]) -> Result<Vec<Record>, LoadError> {
    releases.iter().map(|r| Record::new(r.id.clone(), r)).collect()
}

#[async_trait]
impl Loader for GithubReleasesLoader {
    fn name(&self) -> &'static str {
        "github-releases"
    }

    async fn load(&self, store: &dyn ContentStore) -> Result<LoadOutcome, LoadError> {
        self.config.validate().map_err(LoadError::ConfigInvalid)?;

        match &self.config.mode {
            ReleaseMode::UserCommit { username, .. } => {
                let tracker = Tracker::open(store, job_key(self.name(), &("userCommit", username))?).await?;
                let scan = self.scan_commits(&self.config.mode, Some(&tracker)).await?;

                match &scan.status {
                    LoadStatus::NotModified => {
                        info!(loader = self.name(), "No new GitHub releases since last fetch");
                        return Ok(LoadOutcome::skipped(scan.status));
                    }
                    LoadStatus::RateLimited(limit) => {
                        warn!(
                            loader = self.name(),
                            limit = ?limit.limit,
                            remaining = ?limit.remaining,
                            "GitHub rate limit reached, nothing written"
                        );
                        return Ok(LoadOutcome::skipped(scan.status));
                    }
                    _ => {}
                }

                let count = commit_records(store, commit_records_of(&scan.releases)?, self.config.clear_store).await?;
                tracker
                    .commit(
                        scan.pushes,
                        FetchWatermark {
                            etag: scan.etag,
                            last_seen_timestamp: scan.newest.map(format_timestamp),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(loader = self.name(), count, pushes = scan.pushes, "Successfully loaded GitHub releases");
                Ok(LoadOutcome::loaded(count))
            }
            ReleaseMode::RepoList { .. } => {
                let (status, records) = self.repo_list_records(&self.config.mode).await?;
                if status != LoadStatus::Loaded {
                    warn!(loader = self.name(), status = ?status, "Releases not loaded, nothing written");
                    return Ok(LoadOutcome::skipped(status));
                }
                let count = commit_records(store, records, self.config.clear_store).await?;
                info!(loader = self.name(), count, "Successfully loaded GitHub releases");
                Ok(LoadOutcome::loaded(count))
            }
        }
    }
}

#[async_trait]
impl LiveLoader for GithubReleasesLoader {
    type CollectionFilter = ReleaseMode;
    type EntryFilter = ReleaseIdentifier;

    async fn load_collection(&self, filter: &ReleaseMode) -> Result<LiveCollection, LoadError> {
        filter.validate().map_err(LoadError::ConfigInvalid)?;
        match filter {
            ReleaseMode::UserCommit { .. } => {
                let scan = self.scan_commits(filter, None).await?;
                Ok(LiveCollection {
                    records: commit_records_of(&scan.releases)?,
                    status: scan.status,
                })
            }
            ReleaseMode::RepoList { .. } => {
                let (status, records) = self.repo_list_records(filter).await?;
                Ok(LiveCollection { status, records })
            }
        }
    }

    async fn load_entry(&self, filter: &ReleaseIdentifier) -> Result<Option<Record>, LoadError> {
        self.require_token()?;
        let node = match filter {
            ReleaseIdentifier::NodeId(id) => {
                if id.trim().is_empty() {
                    return Err(LoadError::InvalidIdentifier("release id cannot be empty".to_string()));
                }
                let data: Value = live_body(
                    self.client
                        .post_graphql(&self.graphql_url, &with_fields(RELEASE_BY_ID_QUERY), json!({ "id": id }))
                        .await?,
                )?;
                data.get("node").cloned()
            }
            ReleaseIdentifier::Tag { owner, repo, tag_name } => {
                let data: Value = live_body(
                    self.client
                        .post_graphql(
                            &self.graphql_url,
                            &with_fields(RELEASE_BY_TAG_QUERY),
                            json!({ "owner": owner, "repo": repo, "tagName": tag_name }),
                        )
                        .await?,
                )?;
                data.pointer("/repository/release").cloned()
            }
        };
        node.and_then(release_node).map(RepoRelease::into_record).transpose()
    }
}
