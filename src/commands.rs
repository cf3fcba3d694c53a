//! Command line entry points.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::info;
use url::Url;

use hubcache::cache::{build_key, GetOptions, KeyPart, RevalidationCache, SqliteStore, Swr};
use hubcache::config::{ttl_from_secs, Config};
use hubcache::worker::{
  FetchEvent, Handled, HttpNetwork, Network, Request, ResponseStore, ServiceWorker,
  SqliteResponseStore,
};

/// Send `url` through the current worker generation, installing it first if
/// this generation has never run.
pub async fn fetch(config: &Config, url: &str, navigate: bool) -> Result<()> {
  let url = Url::parse(url).map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
  let store = Arc::new(SqliteResponseStore::open(&config.storage_path()?)?);
  let network = Arc::new(HttpNetwork::new(config.worker.fetch_timeout())?);

  let mut worker = ServiceWorker::new(config.worker.options()?, store, network.clone());
  if !worker.resume()? {
    worker.install().await?;
    let deleted = worker.activate().await?;
    info!(deleted = deleted.len(), "activated {}", worker.options().cache_name());
  }

  let request = if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  };

  match worker.handle_fetch(FetchEvent::new(request.clone())).await? {
    Handled::Respond(served) => {
      let source = served.source;
      let response = served.settled().await?;
      println!(
        "{} {:?} {} bytes",
        response.status,
        source,
        response.body.len()
      );
    }
    Handled::PassThrough => {
      let response = network.fetch(&request).await?;
      println!("{} PassThrough {} bytes", response.status, response.body.len());
    }
  }

  Ok(())
}

pub fn caches(config: &Config) -> Result<()> {
  let store = SqliteResponseStore::open(&config.storage_path()?)?;
  let current = config.worker.options()?.cache_name();
  for name in store.names()? {
    let marker = if name == current { "*" } else { " " };
    println!("{} {}", marker, name);
  }
  Ok(())
}

fn kv_cache(config: &Config) -> Result<RevalidationCache<SqliteStore>> {
  let store = SqliteStore::open(&config.storage_path()?)?;
  Ok(
    RevalidationCache::new(store)
      .with_namespace(&config.kv.namespace)
      .with_ttl(config.kv_ttl()?),
  )
}

/// Parse a `--key` argument: JSON objects, arrays and scalars are structured
/// parts, anything else is a plain string.
fn key_part(raw: &str) -> KeyPart {
  match serde_json::from_str::<serde_json::Value>(raw) {
    Ok(value) => value.into(),
    Err(_) => raw.into(),
  }
}

pub async fn kv_get(config: &Config, url: &str, ttl: Option<u64>, key: &[String]) -> Result<()> {
  let cache = kv_cache(config)?;
  let key = if key.is_empty() {
    build_key(&["GET".into(), url.into()])
  } else {
    build_key(&key.iter().map(|k| key_part(k.as_str())).collect::<Vec<_>>())
  };

  let client = HttpNetwork::new(config.worker.fetch_timeout())?
    .client()
    .clone();
  let target = url.to_string();
  let fetcher = move || async move {
    client
      .get(&target)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| eyre!("Failed to fetch {}: {}", target, e))?
      .json::<serde_json::Value>()
      .await
      .map_err(|e| eyre!("Failed to parse JSON from {}: {}", target, e))
  };

  let options = GetOptions {
    ttl: ttl.map(ttl_from_secs).transpose()?,
  };
  let result = cache.get(&key, fetcher, options).await?;
  println!("key: {}", key);
  println!("source: {:?}", result.meta.source());
  println!("{}", serde_json::to_string_pretty(&result.data)?);

  for value in revalidated(result).await? {
    println!("revalidated:");
    println!("{}", serde_json::to_string_pretty(&value)?);
  }

  Ok(())
}

/// Values that replaced a cached one once background revalidation settled.
/// A cold fetch has nothing to report: its network value is the result itself.
async fn revalidated<T>(result: Swr<T>) -> Result<Vec<T>> {
  let served_from_cache = result.meta.from_cache;
  let mut updates = result.settled().await?;

  let mut values = Vec::new();
  while let Ok(update) = updates.try_recv() {
    if served_from_cache && !update.meta.from_cache {
      values.push(update.data);
    }
  }
  Ok(values)
}

pub fn kv_invalidate(config: &Config, key: &str) -> Result<()> {
  kv_cache(config)?.invalidate(key);
  Ok(())
}

pub fn kv_keys(config: &Config) -> Result<()> {
  for key in kv_cache(config)?.keys()? {
    println!("{}", key);
  }
  Ok(())
}
