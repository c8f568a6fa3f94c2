//! Forward-only pagination
//!
//! A [`Paginator`] drives a [`PageSource`] one page at a time, feeding each
//! cursor back into the next request. It stops when the source reports no
//! next cursor, a page comes back short, a cap on items or pages is hit, a
//! previously seen item is reached, or a page ends older than the `since`
//! boundary.
//!
//! Results are all-or-nothing: a "not modified" or "rate limited" page
//! discards anything gathered so far, and errors propagate unchanged.

use crate::error::LoadError;
use crate::types::{LoadStatus, PageCursor, RateLimit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Items whose creation time can bound pagination
pub trait Timestamped {
    fn timestamp(&self) -> Option<DateTime<Utc>>;
}

/// One page request issued by the paginator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// `None` for the first page
    pub cursor: Option<PageCursor>,
    pub page_size: usize,
    /// Conditional-request tag; only set on the first page
    pub etag: Option<String>,
}

/// One page returned by a [`PageSource`]
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<PageCursor>,
    pub not_modified: bool,
    pub rate_limited: Option<RateLimit>,
    pub etag: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<PageCursor>) -> Self {
        Self {
            items,
            next_cursor,
            not_modified: false,
            rate_limited: None,
            etag: None,
        }
    }

    pub fn not_modified() -> Self {
        Self {
            not_modified: true,
            ..Self::new(Vec::new(), None)
        }
    }

    pub fn rate_limited(limit: RateLimit) -> Self {
        Self {
            rate_limited: Some(limit),
            ..Self::new(Vec::new(), None)
        }
    }

    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }
}

/// Network collaborator fetching a single page
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;

    async fn fetch_page(&self, request: PageRequest) -> Result<Page<Self::Item>, LoadError>;

    /// Whether a fetched item is collected
    ///
    /// Applied after the boundary and `since` checks, so skipped items
    /// still stop pagination.
    fn keep(&self, _item: &Self::Item) -> bool {
        true
    }
}

/// Stop rule for items already processed by an earlier run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Stop at the item whose timestamp equals the watermark
    Exact(DateTime<Utc>),
    /// Stop at the first item at or before the watermark
    AtOrBefore(DateTime<Utc>),
}

impl Boundary {
    fn reached(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        match (self, timestamp) {
            (Boundary::Exact(mark), Some(ts)) => ts == *mark,
            (Boundary::AtOrBefore(mark), Some(ts)) => ts <= *mark,
            (_, None) => false,
        }
    }
}

/// Accumulated result of a pagination run
#[derive(Debug, Clone)]
pub struct PageRun<T> {
    pub items: Vec<T>,
    pub status: LoadStatus,
    /// ETag returned with the first page
    pub etag: Option<String>,
    pub pages: usize,
}

impl<T: Timestamped> PageRun<T> {
    /// Newest timestamp among the accepted items
    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.items.iter().filter_map(Timestamped::timestamp).max()
    }
}

/// Pagination driver
#[derive(Debug, Clone)]
pub struct Paginator {
    page_size: usize,
    max_entries: Option<usize>,
    max_pages: Option<usize>,
    stop_on_short_page: bool,
    since: Option<DateTime<Utc>>,
    boundary: Option<Boundary>,
    etag: Option<String>,
    start: Option<PageCursor>,
}

impl Paginator {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            max_entries: None,
            max_pages: None,
            stop_on_short_page: false,
            since: None,
            boundary: None,
            etag: None,
            start: None,
        }
    }

    /// Truncate results to exactly this many items
    pub fn max_entries(mut self, max: Option<usize>) -> Self {
        self.max_entries = max;
        self
    }

    pub fn max_pages(mut self, max: usize) -> Self {
        self.max_pages = Some(max);
        self
    }

    /// Treat a page shorter than the page size as the last one
    pub fn stop_on_short_page(mut self, stop: bool) -> Self {
        self.stop_on_short_page = stop;
        self
    }

    /// Drop items older than `since`; stop once a page ends older than it
    ///
    /// Assumes the source returns items newest first.
    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    pub fn boundary(mut self, boundary: Option<Boundary>) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    /// Cursor of the first request, e.g. page number 1
    pub fn start_at(mut self, cursor: PageCursor) -> Self {
        self.start = Some(cursor);
        self
    }

    /// Fetch pages until a stop condition holds
    pub async fn run<S>(&self, source: &S) -> Result<PageRun<S::Item>, LoadError>
    where
        S: PageSource + ?Sized,
        S::Item: Timestamped,
    {
        let mut cursor = self.start.clone();
        let mut items = Vec::new();
        let mut etag = None;
        let mut pages = 0;

        loop {
            let request = PageRequest {
                cursor: cursor.clone(),
                page_size: self.page_size,
                etag: if pages == 0 { self.etag.clone() } else { None },
            };
            let page = source.fetch_page(request).await?;
            pages += 1;

            if page.not_modified {
                debug!(pages, "source not modified");
                return Ok(PageRun {
                    items: Vec::new(),
                    status: LoadStatus::NotModified,
                    etag: self.etag.clone(),
                    pages,
                });
            }
            if let Some(limit) = page.rate_limited {
                debug!(pages, discarded = items.len(), "rate limited");
                return Ok(PageRun {
                    items: Vec::new(),
                    status: LoadStatus::RateLimited(limit),
                    etag: self.etag.clone(),
                    pages,
                });
            }
            if pages == 1 {
                etag = page.etag;
            }

            let raw_len = page.items.len();
            let ended_before_since = match (self.since, page.items.last()) {
                (Some(since), Some(last)) => last.timestamp().is_some_and(|ts| ts < since),
                _ => false,
            };

            let mut stop = false;
            for item in page.items {
                let timestamp = item.timestamp();
                if self.boundary.is_some_and(|b| b.reached(timestamp)) {
                    debug!(pages, "reached previously seen item");
                    stop = true;
                    break;
                }
                if let (Some(since), Some(ts)) = (self.since, timestamp) {
                    if ts < since {
                        continue;
                    }
                }
                if !source.keep(&item) {
                    continue;
                }
                if self.max_entries.is_some_and(|max| items.len() >= max) {
                    stop = true;
                    break;
                }
                items.push(item);
            }

            if self.max_entries.is_some_and(|max| items.len() >= max) {
                stop = true;
            }
            if ended_before_since {
                debug!(pages, "page ended before since boundary");
                stop = true;
            }
            if self.max_pages.is_some_and(|max| pages >= max) {
                stop = true;
            }
            if self.stop_on_short_page && raw_len < self.page_size {
                stop = true;
            }

            match page.next_cursor {
                Some(next) if !stop && Some(&next) != cursor.as_ref() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(PageRun {
            items,
            status: LoadStatus::Loaded,
            etag,
            pages,
        })
    }
}
