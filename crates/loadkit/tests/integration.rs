//! Integration tests for Loadkit loaders using wiremock

use loadkit::watermark::job_key;
use loadkit::{
    BlueskyConfig, BlueskyPostsLoader, ContentStore, GithubPrsConfig, GithubPrsFilter, GithubPrsLoader,
    FetchWatermark, GithubReleasesConfig, GithubReleasesLoader, InstagramConfig, InstagramMediaLoader, LiveLoader, LoadError,
    LoadStatus, Loader, LoaderRegistry, MemoryStore, StorageMode, TweetsConfig, TweetsLoader, ViewType,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DID: &str = "did:plc:abc123";

fn bluesky_post(rkey: &str, text: &str, facets: Value) -> Value {
    json!({
        "uri": format!("at://{}/app.bsky.feed.post/{}", DID, rkey),
        "cid": "bafy",
        "author": { "did": DID, "handle": "alice.bsky.social" },
        "record": {
            "$type": "app.bsky.feed.post",
            "text": text,
            "facets": facets,
            "createdAt": "2024-11-11T17:16:41.000Z"
        },
        "indexedAt": "2024-11-11T17:16:41.000Z"
    })
}

#[tokio::test]
async fn test_bluesky_posts_rendered_and_unchanged_on_rerun() {
    let mock_server = MockServer::start().await;

    let post = bluesky_post(
        "3kq",
        "see example.com",
        json!([{
            "index": { "byteStart": 4, "byteEnd": 15 },
            "features": [{ "$type": "app.bsky.richtext.facet#link", "uri": "https://example.com/" }]
        }]),
    );
    Mock::given(method("GET"))
        .and(path("/xrpc/app.bsky.feed.getPosts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "posts": [post] })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let uri = format!("at://{}/app.bsky.feed.post/3kq", DID);
    let mut config = BlueskyConfig::new(vec![uri.clone()]);
    config.api_base = mock_server.uri();
    let loader = BlueskyPostsLoader::new(config).unwrap();
    let store = MemoryStore::new();

    let outcome = loader.load(&store).await.unwrap();
    assert_eq!(outcome.status, LoadStatus::Loaded);
    assert_eq!(outcome.loaded, 1);

    let record = store.get(&uri).await.unwrap().unwrap();
    let rendered = record.rendered.unwrap();
    assert_eq!(rendered.html, "see <a href=\"https://example.com/\">example.com</a>");
    assert_eq!(record.data["link"], "https://bsky.app/profile/did:plc:abc123/post/3kq");
    assert_eq!(record.data["record"]["facets"][0]["index"]["byteStart"], 4);

    // identical configuration: no request is made
    let outcome = loader.load(&store).await.unwrap();
    assert_eq!(outcome.status, LoadStatus::Unchanged);
}

#[tokio::test]
async fn test_bluesky_thread_author_replies() {
    let mock_server = MockServer::start().await;

    let reply = |rkey: &str, did: &str, replies: Value| {
        let mut post = bluesky_post(rkey, "reply", json!([]));
        post["author"]["did"] = json!(did);
        json!({ "$type": "app.bsky.feed.defs#threadViewPost", "post": post, "replies": replies })
    };
    let thread = json!({
        "$type": "app.bsky.feed.defs#threadViewPost",
        "post": bluesky_post("root", "root post", json!([])),
        "replies": [
            reply("r1", DID, json!([reply("r2", DID, json!([]))])),
            reply("x1", "did:plc:other", json!([reply("x2", DID, json!([]))])),
            { "$type": "app.bsky.feed.defs#blockedPost", "uri": "at://blocked", "blocked": true }
        ]
    });
    Mock::given(method("GET"))
        .and(path("/xrpc/app.bsky.feed.getPostThread"))
        .and(query_param("parentHeight", "0"))
        .and(query_param("depth", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "thread": thread })))
        .mount(&mock_server)
        .await;

    let uri = format!("at://{}/app.bsky.feed.post/root", DID);
    let mut config = BlueskyConfig::new(vec![uri.clone()]);
    config.api_base = mock_server.uri();
    config.fetch_thread = true;
    config.fetch_only_author_replies = true;
    config.thread_depth = 5;
    let loader = BlueskyPostsLoader::new(config).unwrap();
    let store = MemoryStore::new();

    loader.load(&store).await.unwrap();
    let record = store.get(&uri).await.unwrap().unwrap();
    let replies = record.data["replies"].as_array().unwrap();
    let uris: Vec<&str> = replies.iter().map(|r| r["uri"].as_str().unwrap()).collect();
    assert_eq!(
        uris,
        vec![
            "at://did:plc:abc123/app.bsky.feed.post/r1",
            "at://did:plc:abc123/app.bsky.feed.post/r2",
        ]
    );
    assert!(record.data.get("parent").is_none());
}

#[tokio::test]
async fn test_bluesky_deep_thread() {
    let mock_server = MockServer::start().await;

    let depth = 250;
    let mut node = json!({
        "$type": "app.bsky.feed.defs#threadViewPost",
        "post": bluesky_post(&format!("r{}", depth), "reply", json!([])),
        "replies": []
    });
    for level in (1..depth).rev() {
        node = json!({
            "$type": "app.bsky.feed.defs#threadViewPost",
            "post": bluesky_post(&format!("r{}", level), "reply", json!([])),
            "replies": [node]
        });
    }
    let thread = json!({
        "$type": "app.bsky.feed.defs#threadViewPost",
        "post": bluesky_post("root", "root post", json!([])),
        "replies": [node]
    });
    Mock::given(method("GET"))
        .and(path("/xrpc/app.bsky.feed.getPostThread"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "thread": thread })))
        .mount(&mock_server)
        .await;

    let uri = format!("at://{}/app.bsky.feed.post/root", DID);
    let mut config = BlueskyConfig::new(vec![uri.clone()]);
    config.api_base = mock_server.uri();
    config.fetch_thread = true;
    config.fetch_only_author_replies = true;
    config.thread_depth = 1000;
    let store = MemoryStore::new();

    let outcome = BlueskyPostsLoader::new(config.clone()).unwrap().load(&store).await.unwrap();
    assert_eq!(outcome.loaded, 1);
    let record = store.get(&uri).await.unwrap().unwrap();
    let replies = record.data["replies"].as_array().unwrap();
    assert_eq!(replies.len(), depth);
    assert_eq!(replies[0]["uri"], format!("at://{}/app.bsky.feed.post/r1", DID));
    assert_eq!(replies[depth - 1]["uri"], format!("at://{}/app.bsky.feed.post/r{}", DID, depth));

    // raw branches are kept as returned
    config.fetch_only_author_replies = false;
    let store = MemoryStore::new();
    BlueskyPostsLoader::new(config).unwrap().load(&store).await.unwrap();
    let record = store.get(&uri).await.unwrap().unwrap();
    assert_eq!(
        record.data["replies"][0]["post"]["uri"],
        format!("at://{}/app.bsky.feed.post/r1", DID)
    );
}

#[tokio::test]
async fn test_bluesky_handle_resolution() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/xrpc/com.atproto.identity.resolveHandle"))
        .and(query_param("handle", "alice.bsky.social"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "did": DID })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/xrpc/app.bsky.feed.getPosts"))
        .and(query_param("uris", "at://did:plc:abc123/app.bsky.feed.post/3kq"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "posts": [bluesky_post("3kq", "hi", json!([]))] })),
        )
        .mount(&mock_server)
        .await;

    let mut config = BlueskyConfig::new(vec!["https://bsky.app/profile/alice.bsky.social/post/3kq".to_string()]);
    config.api_base = mock_server.uri();
    let loader = BlueskyPostsLoader::new(config).unwrap();
    let store = MemoryStore::new();

    let outcome = loader.load(&store).await.unwrap();
    assert_eq!(outcome.loaded, 1);
    assert!(store.get("at://did:plc:abc123/app.bsky.feed.post/3kq").await.unwrap().is_some());
}

fn pr_node(id: &str, created: &str) -> Value {
    json!({
        "id": id,
        "url": format!("https://github.com/o/r/pull/{}", id),
        "title": format!("PR {}", id),
        "bodyHTML": format!("<p>{}</p>", id),
        "createdAt": created,
        "repository": { "nameWithOwner": "o/r" }
    })
}

fn prs_loader(uri: &str, max_entries: Option<u32>) -> GithubPrsLoader {
    let mut config = GithubPrsConfig::new("author:octocat");
    config.github_token = Some("ghp_test".to_string());
    config.api_base = format!("{}/graphql", uri);
    config.max_entries = max_entries;
    GithubPrsLoader::new(config).unwrap()
}

#[tokio::test]
async fn test_github_prs_paginates_and_truncates() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer ghp_test"))
        .and(body_string_contains("\"cursor\":null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "search": {
                "pageInfo": { "hasNextPage": true, "endCursor": "c1" },
                "nodes": [pr_node("PR_1", "2024-05-03T00:00:00Z"), {}, pr_node("PR_2", "2024-05-02T00:00:00Z")]
            } }
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("\"cursor\":\"c1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "search": {
                "pageInfo": { "hasNextPage": false, "endCursor": null },
                "nodes": [pr_node("PR_3", "2024-05-01T00:00:00Z"), pr_node("PR_4", "2024-04-30T00:00:00Z")]
            } }
        })))
        .mount(&mock_server)
        .await;

    let store = MemoryStore::new();
    let outcome = prs_loader(&mock_server.uri(), Some(3)).load(&store).await.unwrap();
    assert_eq!(outcome.loaded, 3);

    let ids: Vec<String> = store.records().await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["PR_1", "PR_2", "PR_3"]);
    let pr = store.get("PR_2").await.unwrap().unwrap();
    assert_eq!(pr.rendered.unwrap().html, "<p>PR_2</p>");
    assert_eq!(pr.data["title"], "PR PR_2");
}

#[tokio::test]
async fn test_github_prs_rate_limited_writes_nothing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-limit", "5000")
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", "1735689600")
                .set_body_json(json!({ "message": "API rate limit exceeded" })),
        )
        .mount(&mock_server)
        .await;

    let store = MemoryStore::new();
    let outcome = prs_loader(&mock_server.uri(), None).load(&store).await.unwrap();
    match outcome.status {
        LoadStatus::RateLimited(limit) => {
            assert_eq!(limit.limit, Some(5000));
            assert_eq!(limit.remaining, Some(0));
            assert!(limit.reset_at.is_some());
        }
        other => panic!("expected rate limited, got {:?}", other),
    }
    assert_eq!(store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_github_prs_graphql_error_fails() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{ "type": "INVALID_QUERY", "message": "Bad search" }]
        })))
        .mount(&mock_server)
        .await;

    let store = MemoryStore::new();
    let err = prs_loader(&mock_server.uri(), None).load(&store).await.unwrap_err();
    assert!(matches!(err, LoadError::Api { ref message, .. } if message == "Bad search"));
}

#[tokio::test]
async fn test_github_prs_live_collection() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("type:pr is:open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "search": {
                "pageInfo": { "hasNextPage": false, "endCursor": null },
                "nodes": [pr_node("PR_9", "2024-05-03T00:00:00Z")]
            } }
        })))
        .mount(&mock_server)
        .await;

    let filter = GithubPrsFilter {
        search: "is:open".to_string(),
        months_back: None,
        max_entries: None,
    };
    let live = prs_loader(&mock_server.uri(), None).load_collection(&filter).await.unwrap();
    assert_eq!(live.status, LoadStatus::Loaded);
    assert_eq!(live.records.len(), 1);
    assert_eq!(live.records[0].id, "PR_9");
}

#[test]
fn test_github_prs_requires_token() {
    let err = GithubPrsLoader::new(GithubPrsConfig::new("author:octocat")).err().unwrap();
    assert!(matches!(err, LoadError::AuthMissing { env_var: "GITHUB_TOKEN", .. }));
}

fn push_event(id: &str, created: &str, branch: &str, messages: &[&str]) -> Value {
    let commits: Vec<Value> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| json!({ "sha": format!("{}{}", id, i), "message": m }))
        .collect();
    json!({
        "id": id,
        "type": "PushEvent",
        "public": true,
        "created_at": created,
        "repo": { "name": "octo/tool" },
        "actor": { "login": "octo", "avatar_url": "https://avatars/octo" },
        "payload": { "ref": branch, "commits": commits }
    })
}

#[tokio::test]
async fn test_github_releases_user_commit_etag() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octo/events/public"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/octo/events/public"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"v1\"")
                .set_body_json(json!([
                    push_event("202", "2024-06-02T10:00:00Z", "refs/heads/main", &["release v1.3.0\n\nnotes", "release v1.3.1"]),
                    push_event("201", "2024-06-01T10:00:00Z", "refs/heads/feature", &["release v9.9.9"]),
                    { "id": "200", "type": "WatchEvent", "public": true, "created_at": "2024-05-31T10:00:00Z",
                      "repo": { "name": "octo/tool" }, "actor": { "login": "octo" }, "payload": {} },
                    push_event("199", "2024-05-30T10:00:00Z", "refs/heads/main", &["fix typo"]),
                ])),
        )
        .mount(&mock_server)
        .await;

    let config: GithubReleasesConfig = serde_json::from_value(json!({
        "mode": "userCommit",
        "username": "octo",
        "apiBase": mock_server.uri(),
    }))
    .unwrap();
    let loader = GithubReleasesLoader::new(config).unwrap();
    let store = MemoryStore::new();

    let outcome = loader.load(&store).await.unwrap();
    assert_eq!(outcome.loaded, 2);
    let first = store.get("202").await.unwrap().unwrap();
    assert_eq!(first.data["releaseVersion"], "1.3.0");
    assert_eq!(first.data["releaseUrl"], "https://github.com/octo/tool/releases/tag/v1.3.0");
    assert_eq!(first.data["commitMessage"], "release v1.3.0");
    let second = store.get("202-1").await.unwrap().unwrap();
    assert_eq!(second.data["releaseVersion"], "1.3.1");

    let job = job_key("github-releases", &("userCommit", "octo")).unwrap();
    let watermark = store.get_watermark(&job).await.unwrap().unwrap();
    assert_eq!(watermark.etag.as_deref(), Some("\"v1\""));
    assert_eq!(watermark.last_seen_timestamp.as_deref(), Some("2024-06-02T10:00:00Z"));

    let outcome = loader.load(&store).await.unwrap();
    assert_eq!(outcome.status, LoadStatus::NotModified);
    assert_eq!(store.len().await.unwrap(), 2);
}

fn release_node(id: &str, tag: &str, published: &str) -> Value {
    json!({
        "id": id,
        "url": format!("https://github.com/o/r/releases/tag/{}", tag),
        "name": tag,
        "tagName": tag,
        "description": "notes",
        "descriptionHTML": "<p>notes</p>",
        "publishedAt": published,
        "repository": { "nameWithOwner": "o/r", "url": "https://github.com/o/r" }
    })
}

#[tokio::test]
async fn test_github_releases_repo_list_since_date() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "repository": { "releases": {
                "pageInfo": { "hasNextPage": true, "endCursor": "next" },
                "nodes": [
                    release_node("RE_2", "v2.0.0", "2024-07-01T00:00:00Z"),
                    release_node("RE_1", "v1.0.0", "2024-01-01T00:00:00Z")
                ]
            } } }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config: GithubReleasesConfig = serde_json::from_value(json!({
        "mode": "repoList",
        "repos": ["o/r"],
        "sinceDate": "2024-06-01",
        "entryReturnType": "byRelease",
        "githubToken": "ghp_test",
        "graphqlUrl": format!("{}/graphql", mock_server.uri()),
    }))
    .unwrap();
    let loader = GithubReleasesLoader::new(config).unwrap();
    let store = MemoryStore::new();

    let outcome = loader.load(&store).await.unwrap();
    assert_eq!(outcome.loaded, 1);
    let record = store.get("RE_2").await.unwrap().unwrap();
    assert_eq!(record.data["releaseVersion"], "v2.0.0");
    assert_eq!(record.rendered.unwrap().html, "<p>notes</p>");
}

#[test]
fn test_github_releases_repo_list_requires_token() {
    let config: GithubReleasesConfig =
        serde_json::from_value(json!({ "mode": "repoList", "repos": ["o/r"] })).unwrap();
    assert!(matches!(
        GithubReleasesLoader::new(config),
        Err(LoadError::AuthMissing { .. })
    ));
}

fn instagram_loader(uri: &str) -> InstagramMediaLoader {
    let config = InstagramConfig {
        instagram_token: Some("IGQ_test".to_string()),
        api_base: uri.to_string(),
        ..Default::default()
    };
    InstagramMediaLoader::new(config).unwrap()
}

#[tokio::test]
async fn test_instagram_paging_and_watermark() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v23.0/me"))
        .and(query_param("access_token", "IGQ_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "17841" })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v23.0/17841/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": "m3", "media_type": "IMAGE", "timestamp": "2024-05-03T10:00:00+0000" },
                { "id": "m2", "media_type": "STORY", "timestamp": "2024-05-02T10:00:00+0000" }
            ],
            "paging": { "next": format!("{}/v23.0/17841/media/page2", mock_server.uri()) }
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v23.0/17841/media/page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "m1", "media_type": "VIDEO", "timestamp": "2024-05-01T10:00:00+0000" }]
        })))
        .mount(&mock_server)
        .await;

    let loader = instagram_loader(&mock_server.uri());
    let store = MemoryStore::new();

    let outcome = loader.load(&store).await.unwrap();
    assert_eq!(outcome.loaded, 2);
    assert!(store.get("m3").await.unwrap().is_some());
    assert!(store.get("m2").await.unwrap().is_none());
    assert!(store.get("m1").await.unwrap().is_some());

    let job = job_key("instagram-media", "17841").unwrap();
    let watermark = store.get_watermark(&job).await.unwrap().unwrap();
    assert_eq!(watermark.last_seen_timestamp.as_deref(), Some("2024-05-03T10:00:00Z"));

    // nothing newer than the watermark on the next run
    let outcome = loader.load(&store).await.unwrap();
    assert_eq!(outcome.loaded, 0);
    assert_eq!(store.len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_instagram_unselected_old_media_stops_paging() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v23.0/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "17841" })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v23.0/17841/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": "m3", "media_type": "IMAGE", "timestamp": "2024-05-03T10:00:00+0000" },
                { "id": "m2", "media_type": "STORY", "timestamp": "2024-05-01T10:00:00+0000" }
            ],
            "paging": { "next": format!("{}/v23.0/17841/media/page2", mock_server.uri()) }
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v23.0/17841/media/page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "m1", "media_type": "IMAGE", "timestamp": "2024-04-30T10:00:00+0000" }]
        })))
        .expect(0)
        .mount(&mock_server)
        .await;

    let store = MemoryStore::new();
    let job = job_key("instagram-media", "17841").unwrap();
    store
        .set_watermark(
            &job,
            FetchWatermark {
                last_seen_timestamp: Some("2024-05-02T10:00:00Z".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let outcome = instagram_loader(&mock_server.uri()).load(&store).await.unwrap();
    assert_eq!(outcome.loaded, 1);
    assert!(store.get("m3").await.unwrap().is_some());
    assert!(store.get("m1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_instagram_missing_media_is_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v23.0/999"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "Unsupported get request. Object with ID '999' does not exist",
                "type": "GraphMethodException",
                "code": 100,
                "error_subcode": 33
            }
        })))
        .mount(&mock_server)
        .await;

    let filter = loadkit::InstagramEntryFilter {
        media_id: "999".to_string(),
        fields: None,
    };
    let entry = instagram_loader(&mock_server.uri()).load_entry(&filter).await.unwrap();
    assert!(entry.is_none());
}

fn tweets_response() -> Value {
    json!({
        "data": [
            {
                "id": "1",
                "text": "Fish &amp; chips @bob https://t.co/aaa",
                "author_id": "u1",
                "attachments": { "media_keys": ["3_1"] },
                "entities": {
                    "mentions": [{ "start": 13, "end": 17, "username": "bob", "id": "u2" }],
                    "urls": [{
                        "start": 18, "end": 34, "url": "https://t.co/aaa",
                        "expanded_url": "https://x.com/alice/status/1/photo/1",
                        "display_url": "pic.x.com/aaa", "media_key": "3_1"
                    }]
                }
            },
            { "id": "2", "text": "plain", "author_id": "u1" }
        ],
        "includes": {
            "users": [{ "id": "u1", "username": "alice", "name": "Alice" }],
            "media": [{ "media_key": "3_1", "type": "photo", "url": "https://pbs/1.jpg" }]
        },
        "errors": [{ "value": "3", "detail": "Could not find tweet with ids: [3]." }]
    })
}

fn tweets_config(uri: &str) -> TweetsConfig {
    let mut config = TweetsConfig::new(vec!["1".into(), "2".into(), "3".into()]);
    config.auth_token = Some("x_test".to_string());
    config.api_base = uri.to_string();
    config
}

#[tokio::test]
async fn test_tweets_loaded_with_includes() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/2/tweets"))
        .and(query_param("ids", "1,2,3"))
        .and(header("authorization", "Bearer x_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tweets_response()))
        .mount(&mock_server)
        .await;

    let loader = TweetsLoader::new(tweets_config(&mock_server.uri())).unwrap();
    let store = MemoryStore::new();

    let outcome = loader.load(&store).await.unwrap();
    assert_eq!(outcome.loaded, 2);

    let record = store.get("1").await.unwrap().unwrap();
    let rendered = record.rendered.clone().unwrap();
    assert_eq!(rendered.view_type, ViewType::Media);
    assert_eq!(
        rendered.html,
        "Fish &amp; chips <a href=\"https://x.com/bob\" target=\"_blank\" rel=\"noopener noreferrer\" \
         aria-label=\"Mention @bob\">@bob</a>"
    );
    assert_eq!(record.data["user"]["username"], "alice");
    assert_eq!(record.data["media"][0]["url"], "https://pbs/1.jpg");
    assert_eq!(record.data["tweet"]["view_type"], "media");
    assert_eq!(record.data["poll"], Value::Null);
}

#[tokio::test]
async fn test_tweets_custom_storage_merges_file() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/2/tweets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tweets_response()))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("tweets.json");
    std::fs::write(&file, r#"[{"id":"0","tweet":{}},{"id":"2","tweet":{"text":"stale"}}]"#).unwrap();

    let mut config = tweets_config(&mock_server.uri());
    config.storage = StorageMode::Custom;
    config.store_path = Some(file.clone());
    let loader = TweetsLoader::new(config).unwrap();
    let store = MemoryStore::new();

    let outcome = loader.load(&store).await.unwrap();
    assert_eq!(outcome.loaded, 2);
    assert_eq!(store.len().await.unwrap(), 0);

    let saved: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
    let ids: Vec<&str> = saved.iter().map(|e| e["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["0", "2", "1"]);
    assert_eq!(saved[1]["tweet"]["text"], "plain");
}

#[tokio::test]
async fn test_tweets_quote_strips_media_links() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/2/tweets"))
        .and(query_param("ids", "9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "9",
                "text": "x https://t.co/m1 https://t.co/l https://t.co/q",
                "entities": {
                    "urls": [
                        {
                            "start": 2, "end": 17, "url": "https://t.co/m1",
                            "expanded_url": "https://x.com/a/status/9/photo/1",
                            "display_url": "pic.x.com/m1", "media_key": "3_1"
                        },
                        {
                            "start": 18, "end": 32, "url": "https://t.co/l",
                            "expanded_url": "https://example.com/read", "display_url": "example.com/read"
                        },
                        {
                            "start": 33, "end": 47, "url": "https://t.co/q",
                            "expanded_url": "https://twitter.com/b/status/7", "display_url": "twitter.com/b/status/7"
                        }
                    ]
                }
            }]
        })))
        .mount(&mock_server)
        .await;

    let mut config = TweetsConfig::new(vec!["9".into()]);
    config.auth_token = Some("x_test".to_string());
    config.api_base = mock_server.uri();
    let store = MemoryStore::new();

    let outcome = TweetsLoader::new(config).unwrap().load(&store).await.unwrap();
    assert_eq!(outcome.loaded, 1);

    let record = store.get("9").await.unwrap().unwrap();
    let rendered = record.rendered.clone().unwrap();
    assert_eq!(rendered.html, "x");
    assert_eq!(rendered.view_type, ViewType::Link);
    assert_eq!(record.data["tweet"]["url_for_link_view"], "https://twitter.com/b/status/7");
}

#[tokio::test]
async fn test_tweets_rate_limited() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/2/tweets"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-rate-limit-limit", "15")
                .insert_header("x-rate-limit-remaining", "0"),
        )
        .mount(&mock_server)
        .await;

    let loader = TweetsLoader::new(tweets_config(&mock_server.uri())).unwrap();
    let store = MemoryStore::new();
    let outcome = loader.load(&store).await.unwrap();
    assert!(matches!(outcome.status, LoadStatus::RateLimited(ref l) if l.limit == Some(15)));
    assert_eq!(store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_tweets_without_ids_load_nothing() {
    let mut config = TweetsConfig::new(Vec::new());
    config.auth_token = Some("x_test".to_string());
    let loader = TweetsLoader::new(config).unwrap();
    let outcome = loader.load(&MemoryStore::new()).await.unwrap();
    assert_eq!(outcome.status, LoadStatus::Loaded);
    assert_eq!(outcome.loaded, 0);
}

#[tokio::test]
async fn test_registry_isolates_failures() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/2/tweets"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/xrpc/app.bsky.feed.getPosts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "posts": [bluesky_post("3kq", "hi", json!([]))] })),
        )
        .mount(&mock_server)
        .await;

    let mut bluesky = BlueskyConfig::new(vec![format!("at://{}/app.bsky.feed.post/3kq", DID)]);
    bluesky.api_base = mock_server.uri();

    let mut registry = LoaderRegistry::new();
    registry.register("tweets", Box::new(TweetsLoader::new(tweets_config(&mock_server.uri())).unwrap()));
    registry.register("posts", Box::new(BlueskyPostsLoader::new(bluesky).unwrap()));

    let store = MemoryStore::new();
    let results = registry.load_all(&store).await;
    assert_eq!(results.len(), 2);
    assert!(matches!(results[0].1, Err(LoadError::Api { status: 500, .. })));
    assert_eq!(results[1].1.as_ref().unwrap().loaded, 1);
    assert_eq!(store.len().await.unwrap(), 1);
}
