//! Stale-while-revalidate cache over a durable key-value store.

use chrono::Duration;
use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::manifest::{CacheEntry, Manifest};
use super::storage::KeyValueStore;
use super::traits::{Cacheable, Swr, Update, UpdateMeta};
use crate::clock::{Clock, SystemClock};

/// Record name the manifest is stored under unless configured otherwise.
pub const DEFAULT_NAMESPACE: &str = "swr_cache";

/// Per-call options for [`RevalidationCache::get`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
  /// Overrides the cache's default time-to-live
  pub ttl: Option<Duration>,
}

impl GetOptions {
  pub fn ttl(ttl: Duration) -> Self {
    Self { ttl: Some(ttl) }
  }
}

/// Stale-while-revalidate cache.
///
/// Cached values are always returned without waiting on the fetcher. Values
/// older than the ttl are refreshed in the background and the refreshed value
/// is pushed on the lookup's update channel.
pub struct RevalidationCache<S: KeyValueStore> {
  store: Arc<S>,
  clock: Arc<dyn Clock>,
  namespace: Arc<str>,
  /// How long before cached data is considered stale
  ttl: Duration,
}

impl<S: KeyValueStore + 'static> RevalidationCache<S> {
  /// Create a cache over `store` using the wall clock.
  pub fn new(store: S) -> Self {
    Self {
      store: Arc::new(store),
      clock: Arc::new(SystemClock),
      namespace: Arc::from(DEFAULT_NAMESPACE),
      ttl: Duration::milliseconds(120_000),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_namespace(mut self, namespace: &str) -> Self {
    self.namespace = Arc::from(namespace);
    self
  }

  /// Set the default time-to-live.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  /// Look up `key`, calling `fetcher` when there is nothing usable cached or
  /// the cached value is stale.
  ///
  /// 1. No entry: await the fetcher, store and return its value. A fetch
  ///    error is returned to the caller.
  /// 2. Entry present: return it immediately. If it is older than the ttl,
  ///    revalidate in the background; a failed revalidation keeps the stale
  ///    entry and is only logged.
  pub async fn get<T, F, Fut>(&self, key: &str, fetcher: F, options: GetOptions) -> Result<Swr<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let ttl = options.ttl.unwrap_or(self.ttl);
    let (tx, rx) = mpsc::unbounded_channel();

    let Some((cached, stored_at)) = self.read::<T>(key) else {
      debug!(key, "cold fetch");
      let data = fetcher().await?;
      self.persist(key, &data);
      let _ = tx.send(Update {
        data: data.clone(),
        meta: UpdateMeta::network(),
      });
      return Ok(Swr::new(data, UpdateMeta::network(), None, rx, None));
    };

    let now = self.clock.now().timestamp_millis();
    let fresh = now - stored_at <= ttl.num_milliseconds();
    let meta = UpdateMeta::cached(fresh);
    let cached_at = chrono::DateTime::from_timestamp_millis(stored_at);

    // The receiver is only readable once we return, so this never runs
    // ahead of the caller seeing `data`.
    let _ = tx.send(Update {
      data: cached.clone(),
      meta,
    });

    if fresh {
      return Ok(Swr::new(cached, meta, cached_at, rx, None));
    }

    debug!(key, age_ms = now - stored_at, "stale entry, revalidating");
    let cache = self.clone();
    let key = key.to_string();
    let revalidation = tokio::spawn(async move {
      match fetcher().await {
        Ok(data) => {
          cache.persist(&key, &data);
          let _ = tx.send(Update {
            data,
            meta: UpdateMeta::network(),
          });
        }
        Err(e) => {
          // Stale entry stays; the next lookup retries.
          warn!(key = %key, error = %e, "revalidation failed, keeping stale entry");
        }
      }
    });

    Ok(Swr::new(cached, meta, cached_at, rx, Some(revalidation)))
  }

  /// Drop the entry for `key`. The next lookup is cold.
  pub fn invalidate(&self, key: &str) {
    let result = Manifest::load(self.store.as_ref(), &self.namespace).and_then(|mut manifest| {
      if manifest.remove(key).is_some() {
        manifest.save(self.store.as_ref(), &self.namespace)
      } else {
        Ok(())
      }
    });

    if let Err(e) = result {
      warn!(key, error = %e, "failed to invalidate cache entry");
    }
  }

  /// Raw stored entry for `key`.
  pub fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
    let manifest = Manifest::load(self.store.as_ref(), &self.namespace)?;
    Ok(manifest.get(key).cloned())
  }

  /// All keys currently in the manifest, sorted.
  pub fn keys(&self) -> Result<Vec<String>> {
    let manifest = Manifest::load(self.store.as_ref(), &self.namespace)?;
    let mut keys: Vec<String> = manifest.keys().map(String::from).collect();
    keys.sort();
    Ok(keys)
  }

  /// Cached value and its stored-at millis, if present and readable as `T`.
  fn read<T: Cacheable>(&self, key: &str) -> Option<(T, i64)> {
    let manifest = match Manifest::load(self.store.as_ref(), &self.namespace) {
      Ok(manifest) => manifest,
      Err(e) => {
        warn!(key, error = %e, "failed to read cache manifest");
        return None;
      }
    };

    let entry = manifest.get(key)?;
    match serde_json::from_value(entry.data.clone()) {
      Ok(data) => Some((data, entry.stored_at)),
      Err(e) => {
        debug!(key, error = %e, "cached entry has an old shape, treating as cold");
        None
      }
    }
  }

  /// Best-effort write of `data` under `key`. Last writer wins.
  fn persist<T: Cacheable>(&self, key: &str, data: &T) {
    let result = serde_json::to_value(data)
      .map_err(|e| color_eyre::eyre::eyre!("Failed to serialize cache entry: {}", e))
      .and_then(|data| {
        let mut manifest = Manifest::load(self.store.as_ref(), &self.namespace)?;
        manifest.insert(
          key,
          CacheEntry {
            data,
            stored_at: self.clock.now().timestamp_millis(),
          },
        );
        manifest.save(self.store.as_ref(), &self.namespace)
      });

    if let Err(e) = result {
      warn!(key, error = %e, "failed to store cache entry");
    }
  }
}

impl<S: KeyValueStore> Clone for RevalidationCache<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      clock: Arc::clone(&self.clock),
      namespace: Arc::clone(&self.namespace),
      ttl: self.ttl,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{MemoryStore, NoopStore, SqliteStore};
  use crate::clock::ManualClock;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn cache_with_clock() -> (RevalidationCache<MemoryStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let cache = RevalidationCache::new(MemoryStore::new()).with_clock(clock.clone());
    (cache, clock)
  }

  #[tokio::test]
  async fn test_cold_fetch_then_fresh_hit() {
    let (cache, clock) = cache_with_clock();

    let first = cache
      .get("items", || async { Ok(vec![1, 2, 3]) }, GetOptions::default())
      .await
      .unwrap();
    assert_eq!(first.data, vec![1, 2, 3]);
    assert_eq!(first.meta, UpdateMeta::network());
    assert!(!first.is_revalidating());

    let mut updates = first.settled().await.unwrap();
    assert_eq!(updates.recv().await.unwrap().meta, UpdateMeta::network());

    clock.advance(Duration::seconds(60));
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let second = cache
      .get(
        "items",
        move || async move {
          counter.fetch_add(1, Ordering::SeqCst);
          Ok(vec![9])
        },
        GetOptions::default(),
      )
      .await
      .unwrap();

    assert_eq!(second.data, vec![1, 2, 3]);
    assert_eq!(second.meta, UpdateMeta::cached(true));
    assert!(!second.is_revalidating());
    second.settled().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_cold_fetch_error_propagates() {
    let (cache, _clock) = cache_with_clock();

    let result = cache
      .get::<Vec<u32>, _, _>(
        "items",
        || async { Err(eyre!("offline")) },
        GetOptions::default(),
      )
      .await;

    assert!(result.is_err());
    assert!(cache.peek("items").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_stale_entry_revalidates_in_background() {
    let (cache, clock) = cache_with_clock();
    let ttl = Duration::milliseconds(1_000);

    cache
      .get("gallery", || async { Ok("old".to_string()) }, GetOptions::ttl(ttl))
      .await
      .unwrap();

    clock.advance(ttl + Duration::milliseconds(1));
    let refreshed_at = clock.now().timestamp_millis();

    let stale = cache
      .get(
        "gallery",
        || async { Ok("new".to_string()) },
        GetOptions::ttl(ttl),
      )
      .await
      .unwrap();
    assert_eq!(stale.data, "old");
    assert_eq!(stale.meta, UpdateMeta::cached(false));
    assert!(stale.is_revalidating());

    let mut updates = stale.settled().await.unwrap();
    assert_eq!(
      updates.recv().await.unwrap(),
      Update {
        data: "old".to_string(),
        meta: UpdateMeta::cached(false),
      }
    );
    assert_eq!(
      updates.recv().await.unwrap(),
      Update {
        data: "new".to_string(),
        meta: UpdateMeta::network(),
      }
    );

    let entry = cache.peek("gallery").unwrap().unwrap();
    assert_eq!(entry.data, serde_json::json!("new"));
    assert_eq!(entry.stored_at, refreshed_at);
  }

  #[tokio::test]
  async fn test_entry_exactly_at_ttl_is_fresh() {
    let (cache, clock) = cache_with_clock();
    let ttl = Duration::milliseconds(500);

    cache
      .get("k", || async { Ok(1u32) }, GetOptions::ttl(ttl))
      .await
      .unwrap();
    clock.advance(ttl);

    let hit = cache
      .get("k", || async { Ok(2u32) }, GetOptions::ttl(ttl))
      .await
      .unwrap();
    assert_eq!(hit.meta, UpdateMeta::cached(true));
    assert!(!hit.is_revalidating());
  }

  #[tokio::test]
  async fn test_failed_revalidation_keeps_stale_entry() {
    let (cache, clock) = cache_with_clock();

    cache
      .get("trades", || async { Ok(vec!["a".to_string()]) }, GetOptions::default())
      .await
      .unwrap();
    let before = cache.peek("trades").unwrap();

    clock.advance(Duration::minutes(10));
    let stale = cache
      .get::<Vec<String>, _, _>(
        "trades",
        || async { Err(eyre!("network down")) },
        GetOptions::default(),
      )
      .await
      .unwrap();
    assert_eq!(stale.data, vec!["a".to_string()]);

    let mut updates = stale.settled().await.unwrap();
    assert_eq!(updates.recv().await.unwrap().meta, UpdateMeta::cached(false));
    // Sender is dropped with the task, nothing else arrives.
    assert!(updates.recv().await.is_none());

    assert_eq!(cache.peek("trades").unwrap(), before);
  }

  #[tokio::test]
  async fn test_invalidate_is_idempotent() {
    let (cache, _clock) = cache_with_clock();

    cache
      .get("store", || async { Ok(5u8) }, GetOptions::default())
      .await
      .unwrap();
    cache
      .get("other", || async { Ok(6u8) }, GetOptions::default())
      .await
      .unwrap();

    cache.invalidate("store");
    let once = cache.keys().unwrap();
    cache.invalidate("store");
    assert_eq!(cache.keys().unwrap(), once);
    assert_eq!(once, vec!["other".to_string()]);

    let cold = cache
      .get("store", || async { Ok(7u8) }, GetOptions::default())
      .await
      .unwrap();
    assert_eq!(cold.data, 7);
    assert_eq!(cold.meta, UpdateMeta::network());
  }

  #[tokio::test]
  async fn test_write_failure_still_returns_data() {
    let (cache, _clock) = cache_with_clock();
    cache.store().fail_writes(true);

    let result = cache
      .get("items", || async { Ok(42u32) }, GetOptions::default())
      .await
      .unwrap();
    assert_eq!(result.data, 42);
    assert!(cache.peek("items").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_changed_shape_is_treated_as_cold() {
    let (cache, _clock) = cache_with_clock();

    cache
      .get("profile", || async { Ok("plain".to_string()) }, GetOptions::default())
      .await
      .unwrap();

    let result = cache
      .get("profile", || async { Ok(vec![1u8, 2]) }, GetOptions::default())
      .await
      .unwrap();
    assert_eq!(result.data, vec![1, 2]);
    assert_eq!(result.meta, UpdateMeta::network());
  }

  #[tokio::test]
  async fn test_namespaces_do_not_share_entries() {
    let clock = Arc::new(ManualClock::default());
    let store = SqliteStore::open_in_memory().unwrap();
    let cache = RevalidationCache::new(store).with_clock(clock);
    let other = cache.clone().with_namespace("other_cache");

    cache
      .get("k", || async { Ok(1u32) }, GetOptions::default())
      .await
      .unwrap();

    assert!(other.peek("k").unwrap().is_none());
    assert!(cache.peek("k").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_noop_store_always_fetches() {
    let cache = RevalidationCache::new(NoopStore);
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
      let counter = calls.clone();
      cache
        .get(
          "k",
          move || async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) },
          GetOptions::default(),
        )
        .await
        .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
