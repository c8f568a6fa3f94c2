//! Bluesky posts loader
//!
//! Loads posts by AT-URI (or `bsky.app` post URL) from the public AppView,
//! either as single posts or as threads with replies. Post text is rendered
//! from its facets, whose offsets are UTF-8 byte positions.

use crate::client::{ApiClient, ApiResponse};
use crate::error::LoadError;
use crate::loaders::{commit_records, Loader};
use crate::projection::{flatten_by_author, project_by_author, Authored, Projected, ReplyTree};
use crate::render::{render_text, BLUESKY};
use crate::store::{digest, ContentStore, Record};
use crate::types::{
    EntityKind, EntitySpan, FetchWatermark, LinkTextMode, LoadOutcome, LoadStatus, NewlineMode,
    RenderOptions, RenderedText,
};
use crate::watermark::{job_key, Tracker};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};
use url::Url;

const DEFAULT_API_BASE: &str = "https://public.api.bsky.app";

/// `app.bsky.feed.getPosts` accepts at most 25 URIs
const POSTS_CHUNK: usize = 25;

const MAX_THREAD_DEPTH: u32 = 1000;

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Options for [`BlueskyPostsLoader`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlueskyConfig {
    /// AT-URIs or `https://bsky.app/profile/{handle}/post/{rkey}` URLs
    pub uris: Vec<String>,
    #[serde(default)]
    pub link_text_type: LinkTextMode,
    #[serde(default)]
    pub newline_handling: NewlineMode,
    /// Fetch each post's thread with replies and parents
    #[serde(default)]
    pub fetch_thread: bool,
    /// Levels of replies to fetch
    #[serde(default = "default_one")]
    pub thread_depth: u32,
    /// Levels of parents to fetch; ignored with `fetchOnlyAuthorReplies`
    #[serde(default = "default_one")]
    pub thread_parent_height: u32,
    /// Keep only the post author's own reply chains
    #[serde(default)]
    pub fetch_only_author_replies: bool,
    /// Return author replies as one list instead of a nested tree
    #[serde(default = "default_true")]
    pub flatten_author_replies: bool,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl BlueskyConfig {
    pub fn new(uris: Vec<String>) -> Self {
        Self {
            uris,
            link_text_type: LinkTextMode::default(),
            newline_handling: NewlineMode::default(),
            fetch_thread: false,
            thread_depth: 1,
            thread_parent_height: 1,
            fetch_only_author_replies: false,
            flatten_author_replies: true,
            api_base: default_api_base(),
        }
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.thread_depth > MAX_THREAD_DEPTH {
            errors.push("`threadDepth` must be less than or equal to 1000".to_string());
        }
        if self.thread_parent_height > MAX_THREAD_DEPTH {
            errors.push("`threadParentHeight` must be less than or equal to 1000".to_string());
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

    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            link_text_mode: self.link_text_type,
            newline_mode: self.newline_handling,
            remove_trailing_links: false,
        }
    }
}

/// Hydrated post as returned by the AppView
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub author: Author,
    pub record: PostRecord,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub did: String,
    pub handle: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Post record; everything besides the text is kept verbatim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PostRecord {
    /// Facets that parse; malformed ones are dropped individually
    pub fn facets(&self) -> Vec<Facet> {
        match self.extra.get("facets") {
            Some(Value::Array(raw)) => raw
                .iter()
                .filter_map(|facet| serde_json::from_value(facet.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Facet {
    pub index: ByteSlice,
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: usize,
    pub byte_end: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: String },
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },
    #[serde(other)]
    Unknown,
}

impl PostView {
    /// Facets as entity spans; unknown features are dropped
    pub fn spans(&self) -> Vec<EntitySpan> {
        self.record
            .facets()
            .iter()
            .filter_map(|facet| {
                let kind = facet.features.iter().find_map(|feature| match feature {
                    FacetFeature::Mention { did } => Some(EntityKind::Mention { target: did.clone() }),
                    FacetFeature::Link { uri } => Some(EntityKind::link(uri.clone())),
                    FacetFeature::Tag { tag } => Some(EntityKind::Hashtag { tag: tag.clone() }),
                    FacetFeature::Unknown => None,
                })?;
                Some(EntitySpan::new(facet.index.byte_start, facet.index.byte_end, kind))
            })
            .collect()
    }

    pub fn render(&self, options: &RenderOptions) -> RenderedText {
        render_text(&self.record.text, &self.spans(), &BLUESKY, options)
    }

    /// Web URL of the post
    pub fn link(&self) -> String {
        post_link(&self.uri)
    }
}

impl Authored for PostView {
    fn author_id(&self) -> &str {
        &self.author.did
    }
}

/// Branch of a thread response
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum ThreadNode {
    #[serde(rename = "app.bsky.feed.defs#threadViewPost")]
    Post(ThreadViewPost),
    #[serde(rename = "app.bsky.feed.defs#notFoundPost")]
    NotFound { uri: String },
    #[serde(rename = "app.bsky.feed.defs#blockedPost")]
    Blocked { uri: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadViewPost {
    pub post: PostView,
    #[serde(default)]
    pub replies: Vec<ThreadNode>,
}

const THREAD_VIEW_POST: &str = "app.bsky.feed.defs#threadViewPost";

/// Thread node whose replies are still being collected
enum PendingNode {
    Post(PostView, Vec<ThreadNode>),
    Done(ThreadNode),
}

impl ThreadNode {
    /// Convert a decoded thread without recursing per reply level
    ///
    /// Nodes are laid out in pre-order, so every reply sits after its
    /// parent; assembling from the back attaches finished replies to
    /// parents that are still pending.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let mut nodes: Vec<(Option<usize>, PendingNode)> = Vec::new();
        let mut stack = vec![(value, None)];

        while let Some((value, parent)) = stack.pop() {
            let index = nodes.len();
            let mut map = match value {
                Value::Object(map) => map,
                other => {
                    nodes.push((parent, PendingNode::Done(serde_json::from_value(other)?)));
                    continue;
                }
            };
            let pending = if map.get("$type").and_then(Value::as_str) == Some(THREAD_VIEW_POST) {
                let post: PostView = serde_json::from_value(map.remove("post").unwrap_or(Value::Null))?;
                if let Some(Value::Array(replies)) = map.remove("replies") {
                    stack.extend(replies.into_iter().rev().map(|reply| (reply, Some(index))));
                }
                PendingNode::Post(post, Vec::new())
            } else {
                PendingNode::Done(serde_json::from_value(Value::Object(map))?)
            };
            nodes.push((parent, pending));
        }

        let mut root = None;
        while let Some((parent, pending)) = nodes.pop() {
            let node = match pending {
                PendingNode::Post(post, mut replies) => {
                    replies.reverse();
                    ThreadNode::Post(ThreadViewPost { post, replies })
                }
                PendingNode::Done(node) => node,
            };
            match parent.and_then(|p| nodes.get_mut(p)) {
                Some((_, PendingNode::Post(_, replies))) => replies.push(node),
                _ => root = Some(node),
            }
        }
        root.ok_or_else(|| serde::de::Error::custom("empty thread"))
    }
}

impl ReplyTree for ThreadNode {
    type Item = PostView;

    fn view(&self) -> Option<(&PostView, &[ThreadNode])> {
        match self {
            ThreadNode::Post(thread) => Some((&thread.post, &thread.replies)),
            _ => None,
        }
    }
}

/// `https://bsky.app/profile/{did}/post/{rkey}` for an AT-URI
pub fn post_link(at_uri: &str) -> String {
    let parts: Vec<&str> = at_uri.split('/').collect();
    let did = parts.get(2).copied().unwrap_or_default();
    let rkey = parts.get(4).copied().unwrap_or_default();
    format!("https://bsky.app/profile/{}/post/{}", did, rkey)
}

/// Repository (DID or handle) and record key of a post reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRef {
    pub actor: String,
    pub rkey: String,
}

impl PostRef {
    /// Parse an AT-URI or a `bsky.app` post URL
    pub fn parse(input: &str) -> Result<Self, LoadError> {
        let invalid = || LoadError::InvalidIdentifier(format!("Invalid post URL: {}.", input));
        let segments: Vec<String> = if input.starts_with("at:") {
            input.split('/').map(str::to_string).collect()
        } else {
            let url = Url::parse(input).map_err(|_| invalid())?;
            url.path().split('/').map(str::to_string).collect()
        };
        // at://{actor}/app.bsky.feed.post/{rkey} or /profile/{actor}/post/{rkey}
        match (segments.get(2), segments.get(4)) {
            (Some(actor), Some(rkey)) if !actor.is_empty() && !rkey.is_empty() => Ok(Self {
                actor: actor.clone(),
                rkey: rkey.clone(),
            }),
            _ => Err(invalid()),
        }
    }

    fn at_uri(&self, did: &str) -> String {
        format!("at://{}/app.bsky.feed.post/{}", did, self.rkey)
    }
}

#[derive(Debug, Deserialize)]
struct ResolveHandleResponse {
    did: String,
}

#[derive(Debug, Deserialize)]
struct GetPostsResponse {
    posts: Vec<PostView>,
}

#[derive(Debug, Deserialize)]
struct GetPostThreadResponse {
    thread: Value,
}

/// Loader for Bluesky posts and threads
pub struct BlueskyPostsLoader {
    config: BlueskyConfig,
    client: ApiClient,
}

impl BlueskyPostsLoader {
    pub fn new(config: BlueskyConfig) -> Result<Self, LoadError> {
        let client = ApiClient::builder().build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, method: &str) -> Result<Url, LoadError> {
        let base = self.config.api_base.trim_end_matches('/');
        Url::parse(&format!("{}/xrpc/{}", base, method))
            .map_err(|e| LoadError::config(format!("`apiBase` is not a valid URL: {}", e)))
    }

    /// Normalise a configured reference to an AT-URI with a DID authority
    async fn resolve_uri(&self, input: &str) -> Result<ApiResponse<String>, LoadError> {
        let post = PostRef::parse(input)?;
        if post.actor.starts_with("did:") {
            return Ok(ApiResponse::Ok {
                body: post.at_uri(&post.actor),
                etag: None,
            });
        }
        let mut url = self.endpoint("com.atproto.identity.resolveHandle")?;
        url.query_pairs_mut().append_pair("handle", &post.actor);
        let response: ApiResponse<ResolveHandleResponse> = self.client.get_json(&url, None).await?;
        Ok(response.map(|resolved| post.at_uri(&resolved.did)))
    }

    async fn fetch_posts(&self, uris: &[String]) -> Result<ApiResponse<Vec<Record>>, LoadError> {
        let options = self.config.render_options();
        let mut records = Vec::with_capacity(uris.len());

        for (index, chunk) in uris.chunks(POSTS_CHUNK).enumerate() {
            let mut url = self.endpoint("app.bsky.feed.getPosts")?;
            {
                let mut query = url.query_pairs_mut();
                for uri in chunk {
                    query.append_pair("uris", uri);
                }
            }
            let posts = match self.client.get_json::<GetPostsResponse>(&url, None).await? {
                ApiResponse::Ok { body, .. } => body.posts,
                ApiResponse::NotModified => continue,
                ApiResponse::RateLimited(limit) => return Ok(ApiResponse::RateLimited(limit)),
            };
            tracing::debug!(chunk = index, requested = chunk.len(), returned = posts.len(), "fetched posts");

            for post in posts {
                let rendered = post.render(&options);
                let data = post_with_extras(&post, &rendered)?;
                records.push(Record::new(post.uri.clone(), &data)?.with_rendered(rendered));
            }
        }

        Ok(ApiResponse::Ok {
            body: records,
            etag: None,
        })
    }

    async fn fetch_threads(&self, uris: &[String]) -> Result<ApiResponse<Vec<Record>>, LoadError> {
        let options = self.config.render_options();
        let author_only = self.config.fetch_only_author_replies;
        let parent_height = if author_only { 0 } else { self.config.thread_parent_height };
        let mut records = Vec::with_capacity(uris.len());

        for uri in uris {
            let mut url = self.endpoint("app.bsky.feed.getPostThread")?;
            url.query_pairs_mut()
                .append_pair("uri", uri)
                .append_pair("depth", &self.config.thread_depth.to_string())
                .append_pair("parentHeight", &parent_height.to_string());

            let mut raw = match self.client.get_json::<GetPostThreadResponse>(&url, None).await {
                Ok(ApiResponse::Ok { body, .. }) => body.thread,
                Ok(ApiResponse::NotModified) => continue,
                Ok(ApiResponse::RateLimited(limit)) => return Ok(ApiResponse::RateLimited(limit)),
                Err(LoadError::Api { status: 400, message }) if message.to_lowercase().contains("not found") => {
                    warn!(uri = %uri, "Post not found");
                    continue;
                }
                Err(err) => return Err(err),
            };

            // raw branches are stored as returned unless replies are projected
            let passthrough = if author_only {
                None
            } else {
                raw.as_object_mut()
                    .map(|map| (map.remove("replies"), map.remove("parent")))
            };

            let thread = match ThreadNode::from_json(raw)? {
                ThreadNode::Post(thread) => thread,
                ThreadNode::NotFound { .. } => {
                    warn!(uri = %uri, "Post not found");
                    continue;
                }
                ThreadNode::Blocked { .. } => {
                    warn!(uri = %uri, "Post is blocked");
                    continue;
                }
                ThreadNode::Unknown => {
                    warn!(uri = %uri, "Unrecognised thread type");
                    continue;
                }
            };

            let rendered = thread.post.render(&options);
            let mut data = Map::new();
            data.insert("uri".to_string(), Value::String(thread.post.uri.clone()));
            data.insert("post".to_string(), post_with_extras(&thread.post, &rendered)?);

            if author_only {
                let did = thread.post.author.did.as_str();
                let depth = self.config.thread_depth as usize;
                let replies = if self.config.flatten_author_replies {
                    flatten_by_author(&thread.replies, did, depth)
                        .into_iter()
                        .map(|post| post_with_extras(post, &post.render(&options)))
                        .collect::<Result<Vec<_>, _>>()?
                } else {
                    project_by_author(&thread.replies, did, depth)
                        .iter()
                        .map(|node| projected_to_json(node, &options))
                        .collect::<Result<Vec<_>, _>>()?
                };
                data.insert("replies".to_string(), Value::Array(replies));
            } else if let Some((replies, parent)) = passthrough {
                data.insert("replies".to_string(), replies.unwrap_or(Value::Array(Vec::new())));
                if let Some(parent) = parent {
                    data.insert("parent".to_string(), parent);
                }
            }

            records.push(Record::new(thread.post.uri.clone(), &Value::Object(data))?.with_rendered(rendered));
        }

        Ok(ApiResponse::Ok {
            body: records,
            etag: None,
        })
    }
}

/// A post's JSON with `link` and `html` added
fn post_with_extras(post: &PostView, rendered: &RenderedText) -> Result<Value, LoadError> {
    let mut value = serde_json::to_value(post)?;
    if let Value::Object(map) = &mut value {
        map.insert("link".to_string(), Value::String(post.link()));
        map.insert("html".to_string(), Value::String(rendered.html.clone()));
    }
    Ok(value)
}

fn projected_to_json(node: &Projected<'_, PostView>, options: &RenderOptions) -> Result<Value, LoadError> {
    let replies = node
        .replies
        .iter()
        .map(|reply| projected_to_json(reply, options))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(serde_json::json!({
        "post": post_with_extras(node.item, &node.item.render(options))?,
        "replies": replies,
    }))
}

#[async_trait]
impl Loader for BlueskyPostsLoader {
    fn name(&self) -> &'static str {
        "bluesky-posts"
    }

    async fn load(&self, store: &dyn ContentStore) -> Result<LoadOutcome, LoadError> {
        self.config.validate().map_err(LoadError::ConfigInvalid)?;
        if self.config.uris.is_empty() {
            warn!(loader = self.name(), "No AT-URIs provided and no posts will be loaded");
            return Ok(LoadOutcome::loaded(0));
        }

        let tracker = Tracker::open(store, job_key(self.name(), &self.config.uris)?).await?;
        let config_digest = digest(&self.config)?;
        if tracker.is_unchanged(&config_digest) {
            info!(loader = self.name(), "Configuration unchanged since last load, skipping");
            return Ok(LoadOutcome::skipped(LoadStatus::Unchanged));
        }

        let mut uris = Vec::with_capacity(self.config.uris.len());
        for input in &self.config.uris {
            match self.resolve_uri(input).await? {
                ApiResponse::Ok { body, .. } => uris.push(body),
                ApiResponse::RateLimited(limit) => {
                    warn!(loader = self.name(), remaining = ?limit.remaining, "Rate limited while resolving handles");
                    return Ok(LoadOutcome::skipped(LoadStatus::RateLimited(limit)));
                }
                ApiResponse::NotModified => {}
            }
        }

        let fetched = if self.config.fetch_thread {
            info!(
                loader = self.name(),
                "Loading {} posts and {}",
                uris.len(),
                if self.config.fetch_only_author_replies { "direct replies" } else { "threads" }
            );
            self.fetch_threads(&uris).await?
        } else {
            info!(loader = self.name(), "Loading {} posts", uris.len());
            self.fetch_posts(&uris).await?
        };

        let records = match fetched {
            ApiResponse::Ok { body, .. } => body,
            ApiResponse::RateLimited(limit) => {
                warn!(loader = self.name(), remaining = ?limit.remaining, "Rate limited, nothing written");
                return Ok(LoadOutcome::skipped(LoadStatus::RateLimited(limit)));
            }
            ApiResponse::NotModified => return Ok(LoadOutcome::skipped(LoadStatus::NotModified)),
        };

        if records.len() < uris.len() {
            info!(loader = self.name(), "Successfully loaded {} posts", records.len());
        } else {
            info!(loader = self.name(), "Successfully loaded all posts");
        }

        let count = commit_records(store, records, false).await?;
        tracker
            .commit(
                count,
                FetchWatermark {
                    config_digest: Some(config_digest),
                    ..Default::default()
                },
            )
            .await?;
        Ok(LoadOutcome::loaded(count))
    }
}
