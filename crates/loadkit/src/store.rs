//! Persistence collaborator
//!
//! Loaders write records and watermarks through the [`ContentStore`] trait.
//! [`MemoryStore`] keeps everything in memory and can be snapshotted to a
//! JSON file between runs, which is what the CLI does.

use crate::client::decode_json;
use crate::error::LoadError;
use crate::types::{FetchWatermark, RenderedText};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;

/// A stored entry keyed by its platform identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub data: serde_json::Value,
    /// Hex SHA-256 of `data`
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<RenderedText>,
}

impl Record {
    pub fn new<T: Serialize>(id: impl Into<String>, data: &T) -> Result<Self, LoadError> {
        let data = serde_json::to_value(data)?;
        let digest = digest(&data)?;
        Ok(Self {
            id: id.into(),
            data,
            digest,
            rendered: None,
        })
    }

    pub fn with_rendered(mut self, rendered: RenderedText) -> Self {
        self.rendered = Some(rendered);
        self
    }
}

/// Hex SHA-256 digest of a value's JSON serialization
pub fn digest<T: Serialize + ?Sized>(value: &T) -> Result<String, LoadError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Storage backend for loaded records and per-job watermarks
///
/// Upserting an id that already exists overwrites the record.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get_watermark(&self, job: &str) -> Result<Option<FetchWatermark>, LoadError>;

    async fn set_watermark(&self, job: &str, watermark: FetchWatermark) -> Result<(), LoadError>;

    async fn upsert(&self, record: Record) -> Result<(), LoadError>;

    async fn get(&self, id: &str) -> Result<Option<Record>, LoadError>;

    /// Remove all records; watermarks are kept
    async fn clear(&self) -> Result<(), LoadError>;

    async fn len(&self) -> Result<usize, LoadError>;

    /// All records in insertion order
    async fn records(&self) -> Result<Vec<Record>, LoadError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    watermarks: BTreeMap<String, FetchWatermark>,
    #[serde(default)]
    records: Vec<Record>,
}

/// In-memory store with optional JSON file persistence
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`save`](Self::save); a missing file yields an empty store
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| LoadError::Store(format!("failed to read {}: {}", path.display(), e)))?;
        let snapshot: Snapshot = decode_json(&content)?;
        Ok(Self {
            inner: RwLock::new(snapshot),
        })
    }

    /// Write the current contents to `path`, creating parent directories
    pub async fn save(&self, path: &Path) -> Result<(), LoadError> {
        let snapshot = self.inner.read().await.clone();
        write_json(path, &snapshot)
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get_watermark(&self, job: &str) -> Result<Option<FetchWatermark>, LoadError> {
        Ok(self.inner.read().await.watermarks.get(job).cloned())
    }

    async fn set_watermark(&self, job: &str, watermark: FetchWatermark) -> Result<(), LoadError> {
        self.inner
            .write()
            .await
            .watermarks
            .insert(job.to_string(), watermark);
        Ok(())
    }

    async fn upsert(&self, record: Record) -> Result<(), LoadError> {
        let mut inner = self.inner.write().await;
        match inner.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => inner.records.push(record),
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Record>, LoadError> {
        Ok(self
            .inner
            .read()
            .await
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn clear(&self) -> Result<(), LoadError> {
        self.inner.write().await.records.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, LoadError> {
        Ok(self.inner.read().await.records.len())
    }

    async fn records(&self) -> Result<Vec<Record>, LoadError> {
        Ok(self.inner.read().await.records.clone())
    }
}

/// Merge `entries` into a JSON array file keyed by each object's `id`
///
/// Existing entries with a matching id are replaced in place and new ones
/// are appended. Returns the number of entries in the file afterwards.
pub fn merge_json_array(path: &Path, entries: &[serde_json::Value]) -> Result<usize, LoadError> {
    let mut saved: Vec<serde_json::Value> = if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LoadError::Store(format!("failed to read {}: {}", path.display(), e)))?;
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&content).map_err(|_| invalid_array())?;
        if parsed.iter().any(|entry| entry_id(entry).is_none()) {
            return Err(invalid_array());
        }
        parsed
    } else {
        Vec::new()
    };

    for entry in entries {
        let Some(id) = entry_id(entry) else {
            return Err(LoadError::Store("entry without a string `id` field".to_string()));
        };
        match saved.iter().position(|s| entry_id(s) == Some(id)) {
            Some(idx) => saved[idx] = entry.clone(),
            None => saved.push(entry.clone()),
        }
    }

    write_json(path, &saved)?;
    Ok(saved.len())
}

fn entry_id(entry: &serde_json::Value) -> Option<&str> {
    entry.get("id").and_then(serde_json::Value::as_str)
}

fn invalid_array() -> LoadError {
    LoadError::Store(
        "Invalid JSON format. Ensure the file contains an array of objects, each with a valid `id` field as a string."
            .to_string(),
    )
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), LoadError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| LoadError::Store(format!("failed to create {}: {}", parent.display(), e)))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)
        .map_err(|e| LoadError::Store(format!("failed to write {}: {}", path.display(), e)))
}
