//! X (Twitter) tweets loader
//!
//! Looks tweets up by id and renders their text with entity links. Trailing
//! `t.co` links that only point at attachments or quoted tweets are
//! stripped, and each tweet is classified as a media card, a link preview,
//! or plain text. Author, place, media and poll objects from the response's
//! `includes` are joined onto each record.

use crate::client::{ApiClient, ApiResponse};
use crate::error::LoadError;
use crate::loaders::{commit_records, require_token, Loader};
use crate::render::{render_text, X};
use crate::store::{merge_json_array, ContentStore, Record};
use crate::trailing::strip_trailing_links;
use crate::types::{EntityKind, EntitySpan, LinkTextMode, LoadOutcome, LoadStatus, NewlineMode, RenderOptions, RenderedText};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_API_BASE: &str = "https://api.x.com";

/// Tweet lookup accepts at most 100 ids per request
const MAX_IDS_PER_REQUEST: usize = 100;

const EXPANSIONS: &str = "author_id,geo.place_id,attachments.media_keys,attachments.poll_ids";
const TWEET_FIELDS: &str = "id,text,attachments,author_id,conversation_id,created_at,entities,geo,in_reply_to_user_id,lang,public_metrics,referenced_tweets";
const USER_FIELDS: &str = "id,name,username,connection_status,created_at,description,entities,profile_image_url,public_metrics,url";
const PLACE_FIELDS: &str = "id,full_name,contained_within,country,country_code,geo,name,place_type";
const MEDIA_FIELDS: &str = "media_key,type,url,preview_image_url,height,width,alt_text,duration_ms,public_metrics,variants";
const POLL_FIELDS: &str = "id,options,duration_minutes,end_datetime,voting_status";

fn default_true() -> bool {
    true
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

/// Where loaded tweets are written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// The content store only
    #[default]
    Default,
    /// The JSON file at `storePath` only
    Custom,
    /// Both
    Both,
}

/// Options for [`TweetsLoader`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TweetsConfig {
    #[serde(alias = "tweetIds")]
    pub ids: Vec<String>,
    #[serde(default = "default_true", alias = "removeTrailingUrls")]
    pub remove_trailing_links: bool,
    #[serde(default)]
    pub link_text_type: LinkTextMode,
    #[serde(default)]
    pub newline_handling: NewlineMode,
    #[serde(default)]
    pub storage: StorageMode,
    /// JSON array file for `custom` and `both` storage
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl TweetsConfig {
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            ids,
            remove_trailing_links: true,
            link_text_type: LinkTextMode::default(),
            newline_handling: NewlineMode::default(),
            storage: StorageMode::default(),
            store_path: None,
            auth_token: None,
            api_base: default_api_base(),
        }
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.storage != StorageMode::Default && self.store_path.is_none() {
            errors.push("`storePath` is required when `storage` is `custom` or `both`".to_string());
        }
        if self.ids.iter().any(|id| id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit())) {
            errors.push("`ids` must contain numeric tweet ids".to_string());
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
            remove_trailing_links: self.remove_trailing_links,
        }
    }
}

/// Tweet object; fields not used here pass through verbatim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    /// As returned by the API, with `&`, `<` and `>` escaped
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Entities {
    #[serde(default)]
    urls: Vec<UrlEntity>,
    #[serde(default)]
    hashtags: Vec<TagEntity>,
    #[serde(default)]
    cashtags: Vec<TagEntity>,
    #[serde(default)]
    mentions: Vec<MentionEntity>,
}

#[derive(Debug, Deserialize)]
struct UrlEntity {
    start: usize,
    end: usize,
    url: String,
    expanded_url: Option<String>,
    display_url: Option<String>,
    media_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagEntity {
    start: usize,
    end: usize,
    tag: String,
}

#[derive(Debug, Deserialize)]
struct MentionEntity {
    start: usize,
    end: usize,
    username: String,
}

#[derive(Debug, Default, Deserialize)]
struct Attachments {
    #[serde(default)]
    media_keys: Vec<String>,
    #[serde(default)]
    poll_ids: Vec<String>,
}

impl Tweet {
    fn field<T: serde::de::DeserializeOwned + Default>(&self, key: &str) -> T {
        self.extra
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    fn attachments(&self) -> Attachments {
        self.field("attachments")
    }

    fn author_id(&self) -> Option<&str> {
        self.extra.get("author_id").and_then(Value::as_str)
    }

    fn place_id(&self) -> Option<&str> {
        self.extra.get("geo").and_then(|g| g.get("place_id")).and_then(Value::as_str)
    }

    /// Entities as spans over the unescaped text, in code points
    pub fn spans(&self) -> Vec<EntitySpan> {
        let entities: Entities = self.field("entities");
        let mut spans = Vec::new();
        for u in entities.urls {
            spans.push(EntitySpan::new(
                u.start,
                u.end,
                EntityKind::Link {
                    url: u.expanded_url.unwrap_or_else(|| u.url.clone()),
                    display: u.display_url,
                    short_url: Some(u.url),
                    media_key: u.media_key,
                },
            ));
        }
        for h in entities.hashtags {
            spans.push(EntitySpan::new(h.start, h.end, EntityKind::Hashtag { tag: h.tag }));
        }
        for c in entities.cashtags {
            spans.push(EntitySpan::new(c.start, c.end, EntityKind::Cashtag { tag: c.tag }));
        }
        for m in entities.mentions {
            spans.push(EntitySpan::new(m.start, m.end, EntityKind::Mention { target: m.username }));
        }
        spans
    }

    /// Render the text, stripping and classifying trailing short links
    pub fn render(&self, options: &RenderOptions) -> RenderedText {
        let text = unescape_text(&self.text);
        let spans = self.spans();
        let has_attachments = !self.attachments().media_keys.is_empty();
        let stripped = strip_trailing_links(&text, &spans, has_attachments, options.remove_trailing_links);

        let mut rendered = render_text(&stripped.text, &spans, &X, options);
        rendered.view_type = stripped.view_type;
        rendered.link_view_url = stripped.link_view_url;
        rendered
    }
}

/// Undo the API's escaping of `&`, `<` and `>`
pub fn unescape_text(text: &str) -> String {
    text.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<Value>,
    #[serde(default)]
    places: Vec<Value>,
    #[serde(default)]
    media: Vec<Value>,
    #[serde(default)]
    polls: Vec<Value>,
}

fn find_by<'a>(items: &'a [Value], key: &str, wanted: &str) -> Option<&'a Value> {
    items.iter().find(|item| item.get(key).and_then(Value::as_str) == Some(wanted))
}

fn filter_by(items: &[Value], key: &str, wanted: &[String]) -> Value {
    let matched: Vec<Value> = items
        .iter()
        .filter(|item| {
            item.get(key)
                .and_then(Value::as_str)
                .is_some_and(|v| wanted.iter().any(|w| w == v))
        })
        .cloned()
        .collect();
    if matched.is_empty() {
        Value::Null
    } else {
        Value::Array(matched)
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    includes: Includes,
    #[serde(default)]
    errors: Vec<LookupError>,
}

#[derive(Debug, Deserialize)]
struct LookupError {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

/// Record for one tweet with its includes joined
fn tweet_entry(tweet: &Tweet, includes: &Includes, options: &RenderOptions) -> Result<(Value, RenderedText), LoadError> {
    let rendered = tweet.render(options);
    let attachments = tweet.attachments();

    let mut data = serde_json::to_value(tweet)?;
    if let Value::Object(map) = &mut data {
        map.insert("text_html".to_string(), Value::String(rendered.html.clone()));
        map.insert("text_markdown".to_string(), Value::String(rendered.markdown.clone()));
        map.insert("view_type".to_string(), serde_json::to_value(rendered.view_type)?);
        if let Some(url) = &rendered.link_view_url {
            map.insert("url_for_link_view".to_string(), Value::String(url.clone()));
        }
    }

    let user = tweet
        .author_id()
        .and_then(|id| find_by(&includes.users, "id", id))
        .cloned()
        .unwrap_or(Value::Null);
    let place = tweet
        .place_id()
        .and_then(|id| find_by(&includes.places, "id", id))
        .cloned()
        .unwrap_or(Value::Null);

    let entry = json!({
        "id": tweet.id,
        "tweet": data,
        "user": user,
        "place": place,
        "media": filter_by(&includes.media, "media_key", &attachments.media_keys),
        "poll": filter_by(&includes.polls, "id", &attachments.poll_ids),
    });
    Ok((entry, rendered))
}

/// Loader for tweets by id
pub struct TweetsLoader {
    config: TweetsConfig,
    client: ApiClient,
}

impl TweetsLoader {
    /// Fails with [`LoadError::AuthMissing`] without a token
    pub fn new(config: TweetsConfig) -> Result<Self, LoadError> {
        let token = require_token(config.auth_token.as_deref(), "X (Twitter)", "X_TOKEN")?;
        let client = ApiClient::builder().bearer_token(token).build()?;
        Ok(Self { config, client })
    }

    fn lookup_url(&self, ids: &[String]) -> Result<Url, LoadError> {
        let mut url = Url::parse(&format!("{}/2/tweets", self.config.api_base.trim_end_matches('/')))
            .map_err(|e| LoadError::config(format!("`apiBase` is not a valid URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("ids", &ids.join(","))
            .append_pair("expansions", EXPANSIONS)
            .append_pair("tweet.fields", TWEET_FIELDS)
            .append_pair("user.fields", USER_FIELDS)
            .append_pair("place.fields", PLACE_FIELDS)
            .append_pair("media.fields", MEDIA_FIELDS)
            .append_pair("poll.fields", POLL_FIELDS);
        Ok(url)
    }
}

#[async_trait]
impl Loader for TweetsLoader {
    fn name(&self) -> &'static str {
        "tweets"
    }

    async fn load(&self, store: &dyn ContentStore) -> Result<LoadOutcome, LoadError> {
        self.config.validate().map_err(LoadError::ConfigInvalid)?;
        if self.config.ids.is_empty() {
            warn!(loader = self.name(), "No tweet IDs provided and no tweets will be loaded");
            return Ok(LoadOutcome::loaded(0));
        }
        info!(loader = self.name(), "Loading {} tweets", self.config.ids.len());

        let options = self.config.render_options();
        let mut entries = Vec::with_capacity(self.config.ids.len());
        for batch in self.config.ids.chunks(MAX_IDS_PER_REQUEST) {
            let response: LookupResponse = match self.client.get_json(&self.lookup_url(batch)?, None).await? {
                ApiResponse::Ok { body, .. } => body,
                ApiResponse::NotModified => return Ok(LoadOutcome::skipped(LoadStatus::NotModified)),
                ApiResponse::RateLimited(limit) => {
                    warn!(
                        loader = self.name(),
                        "Please try again later as the rate limit of {} per 15 minutes is exceeded with {} left",
                        limit.limit.map_or_else(|| "?".to_string(), |n| n.to_string()),
                        limit.remaining.unwrap_or(0)
                    );
                    return Ok(LoadOutcome::skipped(LoadStatus::RateLimited(limit)));
                }
            };
            for error in &response.errors {
                debug!(
                    id = error.value.as_deref().unwrap_or_default(),
                    detail = error.detail.as_deref().unwrap_or_default(),
                    "tweet not returned"
                );
            }
            for tweet in &response.data {
                entries.push(tweet_entry(tweet, &response.includes, &options)?);
            }
        }

        let count = entries.len();
        if matches!(self.config.storage, StorageMode::Custom | StorageMode::Both) {
            let path = self
                .config
                .store_path
                .as_deref()
                .ok_or_else(|| LoadError::config("`storePath` is required when `storage` is `custom` or `both`"))?;
            let values: Vec<Value> = entries.iter().map(|(entry, _)| entry.clone()).collect();
            let total = merge_json_array(path, &values)?;
            info!(loader = self.name(), total, "Successfully loaded {} tweets into '{}'", count, path.display());
        }
        if matches!(self.config.storage, StorageMode::Default | StorageMode::Both) {
            let records = entries
                .into_iter()
                .map(|(entry, rendered)| {
                    let id = entry["id"].as_str().unwrap_or_default().to_string();
                    Ok(Record::new(id, &entry)?.with_rendered(rendered))
                })
                .collect::<Result<Vec<_>, LoadError>>()?;
            commit_records(store, records, false).await?;
            info!(loader = self.name(), "Successfully loaded {} tweets into the store", count);
        }
        Ok(LoadOutcome::loaded(count))
    }
}
