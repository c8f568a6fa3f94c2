//! Loadkit - content loaders for social and developer platforms
//!
//! This crate fetches posts, pull requests, releases, media and tweets from
//! their platform APIs and normalizes them into [`Record`]s with rendered
//! HTML and Markdown.
//!
//! ## Loader System
//!
//! Each platform has a [`Loader`] that runs a configured job against a
//! [`ContentStore`]. Incremental fetching is driven by a per-job
//! [`FetchWatermark`] (ETag, last-seen timestamp, config digest) kept in the
//! store, so unchanged data is skipped on later runs. Most loaders also
//! implement [`LiveLoader`] for request-time queries.
//!
//! Built-in loaders:
//! - [`BlueskyPostsLoader`] - Bluesky posts and author threads
//! - [`GithubPrsLoader`] - GitHub pull requests via GraphQL search
//! - [`GithubReleasesLoader`] - GitHub releases from push events or repositories
//! - [`InstagramMediaLoader`] - Instagram media of the authorized account
//! - [`TweetsLoader`] - X tweets by id
//!
//! ## Rendering
//!
//! [`render_text`] turns text plus [`EntitySpan`]s into HTML and Markdown,
//! and [`strip_trailing_links`] removes attachment short links from tweets.

pub mod client;
mod error;
pub mod loaders;
pub mod paginate;
pub mod projection;
pub mod render;
pub mod store;
pub mod trailing;
mod types;
pub mod watermark;

pub use client::{ApiClient, ApiResponse};
pub use error::LoadError;
pub use loaders::{
    BlueskyConfig, BlueskyPostsLoader, DateLike, EntryReturnType, GithubPrsConfig, GithubPrsFilter,
    GithubPrsLoader, GithubReleasesConfig, GithubReleasesLoader, InstagramConfig, InstagramEntryFilter,
    InstagramFilter, InstagramMediaLoader, LiveCollection, LiveLoader, Loader, LoaderRegistry, MediaType,
    PrIdentifier, ReleaseIdentifier, ReleaseMode, StorageMode, TweetsConfig, TweetsLoader,
};
pub use paginate::{Boundary, Page, PageRun, PageSource, Paginator};
pub use projection::{flatten_by_author, project_by_author};
pub use render::{render_text, Platform, BLUESKY, X};
pub use store::{ContentStore, MemoryStore, Record};
pub use trailing::strip_trailing_links;
pub use types::{
    EntityKind, EntitySpan, FetchWatermark, LinkTextMode, LoadOutcome, LoadStatus, NewlineMode,
    PageCursor, RateLimit, RenderOptions, RenderedText, ViewType,
};
pub use watermark::Tracker;

/// Default User-Agent string
pub const DEFAULT_USER_AGENT: &str = "Loadkit/0.1";
