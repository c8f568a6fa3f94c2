//! Incremental fetch tracking
//!
//! Each logical job (loader plus identifying parameters) owns one
//! [`FetchWatermark`] in the store. A [`Tracker`] reads it once at the start
//! of a run and writes the advanced watermark back only when the run
//! succeeded and produced at least one new item.

use crate::error::LoadError;
use crate::paginate::Boundary;
use crate::store::{digest, ContentStore};
use crate::types::FetchWatermark;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

/// Store key for a job: loader name plus a short digest of its identity
pub fn job_key<T: Serialize + ?Sized>(loader: &str, identity: &T) -> Result<String, LoadError> {
    let hash = digest(identity)?;
    Ok(format!("{}:{}", loader, &hash[..16]))
}

/// Watermark state for one run of a job
pub struct Tracker<'a> {
    store: &'a dyn ContentStore,
    job: String,
    previous: Option<FetchWatermark>,
}

impl<'a> Tracker<'a> {
    pub async fn open(store: &'a dyn ContentStore, job: String) -> Result<Tracker<'a>, LoadError> {
        let previous = store.get_watermark(&job).await?;
        debug!(job = %job, found = previous.is_some(), "opened watermark");
        Ok(Self {
            store,
            job,
            previous,
        })
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn previous(&self) -> Option<&FetchWatermark> {
        self.previous.as_ref()
    }

    /// ETag to send as `If-None-Match`
    pub fn etag(&self) -> Option<String> {
        self.previous.as_ref().and_then(|wm| wm.etag.clone())
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.previous.as_ref().and_then(FetchWatermark::last_seen)
    }

    /// Stop rule matching the previous run's newest item exactly
    pub fn exact_boundary(&self) -> Option<Boundary> {
        self.last_seen().map(Boundary::Exact)
    }

    /// Stop rule for anything at or before the previous run's newest item
    pub fn inclusive_boundary(&self) -> Option<Boundary> {
        self.last_seen().map(Boundary::AtOrBefore)
    }

    /// True when the previous successful run used identical parameters
    pub fn is_unchanged(&self, config_digest: &str) -> bool {
        self.previous
            .as_ref()
            .and_then(|wm| wm.config_digest.as_deref())
            .is_some_and(|prev| prev == config_digest)
    }

    /// Persist `update` over the previous watermark if the run found anything
    ///
    /// Fields left `None` in `update` keep their previous values. Returns
    /// whether the watermark was written.
    pub async fn commit(&self, found: usize, update: FetchWatermark) -> Result<bool, LoadError> {
        if found == 0 {
            debug!(job = %self.job, "nothing new, watermark untouched");
            return Ok(false);
        }
        let previous = self.previous.clone().unwrap_or_default();
        let merged = FetchWatermark {
            etag: update.etag.or(previous.etag),
            last_seen_timestamp: update.last_seen_timestamp.or(previous.last_seen_timestamp),
            last_seen_key: update.last_seen_key.or(previous.last_seen_key),
            config_digest: update.config_digest.or(previous.config_digest),
        };
        self.store.set_watermark(&self.job, merged).await?;
        debug!(job = %self.job, found, "watermark advanced");
        Ok(true)
    }
}

/// RFC 3339 form used for stored timestamps
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
