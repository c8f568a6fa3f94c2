//! Collection file: named loader configurations in TOML
//!
//! ```toml
//! [[collections]]
//! name = "releases"
//! loader = "github-releases"
//! mode = "userCommit"
//! username = "octocat"
//! ```

use loadkit::{
    BlueskyConfig, BlueskyPostsLoader, GithubPrsConfig, GithubPrsLoader, GithubReleasesConfig,
    GithubReleasesLoader, InstagramConfig, InstagramMediaLoader, LoadError, Loader, LoaderRegistry, TweetsConfig,
    TweetsLoader,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CollectionFile {
    pub collections: Vec<Collection>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct Collection {
    /// Also the snapshot file name
    pub name: String,
    #[serde(flatten)]
    pub loader: LoaderConfig,
}

/// Loader selected by the `loader` key; the remaining keys are its options
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(tag = "loader", rename_all = "kebab-case")]
pub enum LoaderConfig {
    BlueskyPosts(BlueskyConfig),
    GithubPrs(GithubPrsConfig),
    GithubReleases(GithubReleasesConfig),
    InstagramMedia(InstagramConfig),
    Tweets(TweetsConfig),
}

/// Environment lookup, injectable for tests
pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

impl CollectionFile {
    pub fn read(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let file: CollectionFile = toml::from_str(content).map_err(|e| format!("invalid collection file: {}", e))?;
        let mut seen = std::collections::HashSet::new();
        for collection in &file.collections {
            if collection.name.trim().is_empty() {
                return Err("collection names cannot be empty".to_string());
            }
            if !seen.insert(collection.name.as_str()) {
                return Err(format!("duplicate collection name `{}`", collection.name));
            }
        }
        Ok(file)
    }

    /// Registry of the selected collections, in file order
    pub fn registry(self, only: &[String], env: &dyn Env) -> Result<LoaderRegistry, LoadError> {
        let mut registry = LoaderRegistry::new();
        for collection in self.collections {
            if !only.is_empty() && !only.contains(&collection.name) {
                continue;
            }
            registry.register(collection.name, collection.loader.build(env)?);
        }
        Ok(registry)
    }
}

fn fallback(token: &mut Option<String>, env: &dyn Env, key: &str) {
    if token.as_deref().is_none_or(|t| t.trim().is_empty()) {
        *token = env.var(key);
    }
}

impl LoaderConfig {
    /// Construct the loader, filling missing credentials from the environment
    pub fn build(self, env: &dyn Env) -> Result<Box<dyn Loader>, LoadError> {
        Ok(match self {
            LoaderConfig::BlueskyPosts(config) => Box::new(BlueskyPostsLoader::new(config)?),
            LoaderConfig::GithubPrs(mut config) => {
                fallback(&mut config.github_token, env, "GITHUB_TOKEN");
                Box::new(GithubPrsLoader::new(config)?)
            }
            LoaderConfig::GithubReleases(mut config) => {
                fallback(&mut config.github_token, env, "GITHUB_TOKEN");
                Box::new(GithubReleasesLoader::new(config)?)
            }
            LoaderConfig::InstagramMedia(mut config) => {
                fallback(&mut config.instagram_token, env, "INSTAGRAM_TOKEN");
                Box::new(InstagramMediaLoader::new(config)?)
            }
            LoaderConfig::Tweets(mut config) => {
                fallback(&mut config.auth_token, env, "X_TOKEN");
                Box::new(TweetsLoader::new(config)?)
            }
        })
    }
}
