//! HTTP client shared by all loaders
//!
//! Wraps `reqwest` with the conventions the supported APIs have in common:
//! bearer tokens, JSON bodies, conditional requests, and a distinguished
//! outcome for "not modified" and throttled responses. Anything else that
//! is not a success becomes [`LoadError::Api`] with the best message that
//! can be extracted from the body.

use crate::error::LoadError;
use crate::types::RateLimit;
use crate::DEFAULT_USER_AGENT;
use chrono::{DateTime, Utc};
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, ETAG, IF_NONE_MATCH, RETRY_AFTER, USER_AGENT,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default timeout for a single API request
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a single API call
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse<T> {
    Ok { body: T, etag: Option<String> },
    NotModified,
    RateLimited(RateLimit),
}

impl<T> ApiResponse<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        match self {
            ApiResponse::Ok { body, etag } => ApiResponse::Ok {
                body: f(body),
                etag,
            },
            ApiResponse::NotModified => ApiResponse::NotModified,
            ApiResponse::RateLimited(limit) => ApiResponse::RateLimited(limit),
        }
    }
}

/// Builder for [`ApiClient`]
#[derive(Debug, Clone, Default)]
pub struct ApiClientBuilder {
    user_agent: Option<String>,
    token: Option<String>,
    accept: Option<String>,
    timeout: Option<Duration>,
    extra_headers: Vec<(&'static str, &'static str)>,
}

impl ApiClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Token sent as `Authorization: Bearer ...`
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Value of the `Accept` header, `application/json` by default
    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Static header sent with every request
    pub fn default_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.extra_headers.push((name, value));
        self
    }

    pub fn build(self) -> Result<ApiClient, LoadError> {
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(LoadError::ClientBuild)?;

        let user_agent = self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_USER_AGENT)),
        );
        headers.insert(
            ACCEPT,
            self.accept
                .as_deref()
                .and_then(|a| HeaderValue::from_str(a).ok())
                .unwrap_or_else(|| HeaderValue::from_static("application/json")),
        );
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| LoadError::config("token contains characters not allowed in a header"))?;
            headers.insert(AUTHORIZATION, value);
        }
        for (name, value) in self.extra_headers {
            headers.insert(name, HeaderValue::from_static(value));
        }

        Ok(ApiClient { http, headers })
    }
}

/// Configured API client
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    headers: HeaderMap,
}

impl ApiClient {
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::new()
    }

    /// GET a JSON document, optionally as a conditional request
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        etag: Option<&str>,
    ) -> Result<ApiResponse<T>, LoadError> {
        let mut request = self.http.get(url.as_str()).headers(self.headers.clone());
        if let Some(etag) = etag.and_then(|e| HeaderValue::from_str(e).ok()) {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await.map_err(LoadError::from_reqwest)?;
        let status = response.status();
        debug!(url = %redact(url), status = status.as_u16(), "GET");

        if status == StatusCode::NOT_MODIFIED {
            return Ok(ApiResponse::NotModified);
        }
        if let Some(limit) = rate_limit(status, response.headers()) {
            return Ok(ApiResponse::RateLimited(limit));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.map_err(LoadError::from_reqwest)?;

        if !status.is_success() {
            return Err(LoadError::Api {
                status: status.as_u16(),
                message: error_message(status, &text),
            });
        }

        let body = decode_json(&text)?;
        Ok(ApiResponse::Ok { body, etag })
    }

    /// POST a GraphQL query and return its `data`
    ///
    /// A `RATE_LIMITED` error in the body is reported like an HTTP 429.
    /// `NOT_FOUND` errors are ignored when `data` is present; any other
    /// GraphQL error fails the call.
    pub async fn post_graphql<T: DeserializeOwned>(
        &self,
        url: &Url,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<ApiResponse<T>, LoadError> {
        let payload = serde_json::json!({ "query": query, "variables": variables });
        let response = self
            .http
            .post(url.as_str())
            .headers(self.headers.clone())
            .json(&payload)
            .send()
            .await
            .map_err(LoadError::from_reqwest)?;
        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "POST graphql");

        if let Some(limit) = rate_limit(status, response.headers()) {
            return Ok(ApiResponse::RateLimited(limit));
        }
        let headers = response.headers().clone();
        let text = response.text().await.map_err(LoadError::from_reqwest)?;

        if !status.is_success() {
            return Err(LoadError::Api {
                status: status.as_u16(),
                message: error_message(status, &text),
            });
        }

        let envelope: GraphQlEnvelope<T> = serde_json::from_str(&text)?;
        if envelope.errors.iter().any(|e| e.kind.as_deref() == Some("RATE_LIMITED")) {
            return Ok(ApiResponse::RateLimited(parse_rate_limit(&headers)));
        }
        // NOT_FOUND alongside data means a lookup resolved to null
        let fatal: Vec<&GraphQlError> = envelope
            .errors
            .iter()
            .filter(|e| envelope.data.is_none() || e.kind.as_deref() != Some("NOT_FOUND"))
            .collect();
        if !fatal.is_empty() {
            let message = fatal
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(LoadError::Api {
                status: status.as_u16(),
                message,
            });
        }

        match envelope.data {
            Some(body) => Ok(ApiResponse::Ok { body, etag: None }),
            None => Err(LoadError::Api {
                status: status.as_u16(),
                message: "GraphQL response contained no data".to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn header_u64(headers: &HeaderMap, names: &[&str]) -> Option<u64> {
    names
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Rate-limit details from GitHub (`x-ratelimit-*`) or X (`x-rate-limit-*`) headers
pub fn parse_rate_limit(headers: &HeaderMap) -> RateLimit {
    RateLimit {
        limit: header_u64(headers, &["x-ratelimit-limit", "x-rate-limit-limit"]),
        remaining: header_u64(headers, &["x-ratelimit-remaining", "x-rate-limit-remaining"]),
        reset_at: header_u64(headers, &["x-ratelimit-reset", "x-rate-limit-reset"])
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        retry_after_secs: header_u64(headers, &[RETRY_AFTER.as_str()]),
    }
}

/// `Some` when the response means "throttled, try again later"
fn rate_limit(status: StatusCode, headers: &HeaderMap) -> Option<RateLimit> {
    let limit = parse_rate_limit(headers);
    let exhausted = limit.remaining == Some(0);
    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted) {
        Some(limit)
    } else {
        None
    }
}

/// Human-readable message from an error body
///
/// Understands GitHub (`message`), X (`detail`/`title`) and Graph API
/// (`error.{message, type, code, error_subcode}`) shapes; falls back to
/// the status reason.
pub fn error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return fallback();
    };

    if let Some(error) = value.get("error").filter(|e| e.is_object()) {
        let field = |key: &str| {
            error.get(key).and_then(|v| match v {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };
        let message = field("error_user_msg")
            .or_else(|| field("message"))
            .unwrap_or_else(|| "No error message provided".to_string());
        return format!(
            "{}\nType: {}\nCode: {} / Subcode: {}",
            message,
            field("type").unwrap_or_else(|| "UnknownErrorType".to_string()),
            field("code").unwrap_or_else(|| "UnknownCode".to_string()),
            field("error_subcode").unwrap_or_else(|| "N/A".to_string()),
        );
    }

    ["message", "detail", "title"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(fallback)
}

/// URL with any `access_token` query value masked, for logging
fn redact(url: &Url) -> String {
    if !url.query_pairs().any(|(k, _)| k == "access_token") {
        return url.to_string();
    }
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "access_token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

/// Parse JSON without serde_json's nesting limit
///
/// Thread responses nest a level per reply. The stack grows on the heap
/// while parsing, so depth is bounded by the body size alone.
pub(crate) fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    let mut de = serde_json::Deserializer::from_str(text);
    de.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}
