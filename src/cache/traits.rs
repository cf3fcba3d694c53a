//! Core types for the revalidation cache.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Values that can live in the manifest.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Cacheable for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Where a value handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateMeta {
  /// Value was read from the manifest rather than the fetcher
  pub from_cache: bool,
  /// Value is within its time-to-live
  pub fresh: bool,
}

impl UpdateMeta {
  pub fn network() -> Self {
    Self {
      from_cache: false,
      fresh: true,
    }
  }

  pub fn cached(fresh: bool) -> Self {
    Self {
      from_cache: true,
      fresh,
    }
  }

  pub fn source(&self) -> CacheSource {
    match (self.from_cache, self.fresh) {
      (false, _) => CacheSource::Network,
      (true, true) => CacheSource::CacheFresh,
      (true, false) => CacheSource::CacheStale,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the fetcher
  Network,
  /// Data from cache, still within its ttl
  CacheFresh,
  /// Data from cache, past its ttl; a revalidation was started
  CacheStale,
}

/// A value pushed on the notification channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Update<T> {
  pub data: T,
  pub meta: UpdateMeta,
}

/// Result of a cache lookup.
///
/// `data` is available as soon as `get` returns. Everything the cache learns
/// afterwards (the cached-value notification and, for stale entries, the
/// revalidated value) arrives on `updates`.
#[derive(Debug)]
pub struct Swr<T> {
  pub data: T,
  pub meta: UpdateMeta,
  pub cached_at: Option<DateTime<Utc>>,
  pub updates: mpsc::UnboundedReceiver<Update<T>>,
  revalidation: Option<JoinHandle<()>>,
}

impl<T> Swr<T> {
  pub(crate) fn new(
    data: T,
    meta: UpdateMeta,
    cached_at: Option<DateTime<Utc>>,
    updates: mpsc::UnboundedReceiver<Update<T>>,
    revalidation: Option<JoinHandle<()>>,
  ) -> Self {
    Self {
      data,
      meta,
      cached_at,
      updates,
      revalidation,
    }
  }

  /// Whether a background revalidation was started for this lookup.
  pub fn is_revalidating(&self) -> bool {
    self.revalidation.is_some()
  }

  /// Wait for the background revalidation (if any) to finish.
  ///
  /// Returns the update receiver so remaining notifications can be drained.
  pub async fn settled(mut self) -> Result<mpsc::UnboundedReceiver<Update<T>>> {
    if let Some(handle) = self.revalidation.take() {
      handle
        .await
        .map_err(|e| eyre!("Revalidation task failed: {}", e))?;
    }
    Ok(self.updates)
  }
}
