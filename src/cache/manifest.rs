//! The single persisted record mapping every cache key to its entry.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use super::storage::KeyValueStore;

/// A stored value and when it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub data: serde_json::Value,
  /// Milliseconds since the Unix epoch
  #[serde(rename = "storedAt")]
  pub stored_at: i64,
}

/// Whole-manifest snapshot. Every write goes through load, modify, save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
  entries: HashMap<String, CacheEntry>,
}

impl Manifest {
  /// Read the manifest stored under `namespace`.
  ///
  /// A blob that doesn't parse is treated as an empty manifest; the next
  /// save overwrites it.
  pub fn load(store: &dyn KeyValueStore, namespace: &str) -> Result<Self> {
    let Some(raw) = store.get(namespace)? else {
      return Ok(Self::default());
    };

    match serde_json::from_str(&raw) {
      Ok(manifest) => Ok(manifest),
      Err(e) => {
        warn!(namespace, error = %e, "discarding unreadable cache manifest");
        Ok(Self::default())
      }
    }
  }

  pub fn save(&self, store: &dyn KeyValueStore, namespace: &str) -> Result<()> {
    let raw =
      serde_json::to_string(self).map_err(|e| eyre!("Failed to serialize manifest: {}", e))?;
    store.set(namespace, &raw)
  }

  pub fn get(&self, key: &str) -> Option<&CacheEntry> {
    self.entries.get(key)
  }

  pub fn insert(&mut self, key: &str, entry: CacheEntry) {
    self.entries.insert(key.to_string(), entry);
  }

  pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
    self.entries.remove(key)
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.entries.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStore;
  use serde_json::json;

  #[test]
  fn test_manifest_is_one_record() {
    let store = MemoryStore::new();
    let mut manifest = Manifest::default();
    manifest.insert(
      "a",
      CacheEntry {
        data: json!([1, 2]),
        stored_at: 10,
      },
    );
    manifest.insert(
      "b",
      CacheEntry {
        data: json!("x"),
        stored_at: 20,
      },
    );
    manifest.save(&store, "swr_cache").unwrap();

    let raw = store.get("swr_cache").unwrap().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["a"]["storedAt"], json!(10));
    assert_eq!(parsed["b"]["data"], json!("x"));

    let mut loaded = Manifest::load(&store, "swr_cache").unwrap();
    assert_eq!(loaded, manifest);
    assert_eq!(loaded.len(), 2);

    loaded.remove("a");
    assert_eq!(loaded.len(), 1);
  }

  #[test]
  fn test_corrupt_manifest_loads_empty() {
    let store = MemoryStore::new();
    store.set("swr_cache", "{not json").unwrap();
    let manifest = Manifest::load(&store, "swr_cache").unwrap();
    assert!(manifest.is_empty());
  }
}
