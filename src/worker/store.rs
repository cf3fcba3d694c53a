//! Named response caches and their backends.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::http::{Request, Response};

/// Durable `request identity -> response` caches, grouped by name.
///
/// A whole named cache is the eviction unit; entries never expire on their
/// own.
pub trait ResponseStore: Send + Sync + 'static {
  /// Create the named cache if it doesn't exist.
  fn open(&self, name: &str) -> Result<()>;

  /// Names of all caches.
  fn names(&self) -> Result<Vec<String>>;

  /// Drop a whole cache. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Look up `request` in one cache.
  fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>>;

  /// Store a copy of `response` for `request`, creating the cache if needed.
  fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()>;

  /// Look up `request` in every cache, oldest name first.
  fn match_any(&self, request: &Request) -> Result<Option<Response>> {
    for name in self.names()? {
      if let Some(response) = self.match_request(&name, request)? {
        return Ok(Some(response));
      }
    }
    Ok(None)
  }
}

/// Process-local response store.
#[derive(Default)]
pub struct MemoryResponseStore {
  caches: Mutex<BTreeMap<String, HashMap<String, Response>>>,
  fail_writes: AtomicBool,
  fail_listing: AtomicBool,
}

impl MemoryResponseStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every subsequent `put` fail, as a full quota would.
  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  /// Make every subsequent `names` fail.
  pub fn fail_listing(&self, fail: bool) {
    self.fail_listing.store(fail, Ordering::SeqCst);
  }
}

impl ResponseStore for MemoryResponseStore {
  fn open(&self, name: &str) -> Result<()> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    caches.entry(name.to_string()).or_default();
    Ok(())
  }

  fn names(&self) -> Result<Vec<String>> {
    if self.fail_listing.load(Ordering::SeqCst) {
      return Err(eyre!("Cache index unavailable"));
    }
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(caches.keys().cloned().collect())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(caches.remove(name).is_some())
  }

  fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      caches
        .get(name)
        .and_then(|cache| cache.get(&request.identity()))
        .cloned(),
    )
  }

  fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("Cache quota exceeded"));
    }
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    caches
      .entry(name.to_string())
      .or_default()
      .insert(request.identity(), response.clone());
    Ok(())
  }
}

/// SQLite-backed response store.
pub struct SqliteResponseStore {
  conn: Mutex<Connection>,
}

impl SqliteResponseStore {
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(RESPONSE_SCHEMA)
      .map_err(|e| eyre!("Failed to run response cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

const RESPONSE_SCHEMA: &str = r#"
-- One row per named cache
CREATE TABLE IF NOT EXISTS response_caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by sha256 of the request identity
CREATE TABLE IF NOT EXISTS response_entries (
    cache_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    request TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_hash)
);
"#;

/// Fixed-length key for a request identity.
fn request_hash(request: &Request) -> String {
  let mut hasher = Sha256::new();
  hasher.update(request.identity().as_bytes());
  hex::encode(hasher.finalize())
}

impl ResponseStore for SqliteResponseStore {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO response_caches (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    Ok(())
  }

  fn names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM response_caches ORDER BY created_at, rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM response_entries WHERE cache_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM response_caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, response_url, headers, body FROM response_entries
         WHERE cache_name = ? AND request_hash = ?",
        params![name, request_hash(request)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request.url, e))?;

    match row {
      Some((status, url, headers, body)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to parse cached headers: {}", e))?;
        Ok(Some(Response {
          status,
          url,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO response_caches (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO response_entries
         (cache_name, request_hash, request, status, response_url, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        request_hash(request),
        request.identity(),
        response.status,
        response.url,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store response for {}: {}", request.url, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn request(path: &str) -> Request {
    Request::get(Url::parse("http://localhost:8080").unwrap().join(path).unwrap())
  }

  fn exercise(store: &dyn ResponseStore) {
    store.open("static-v1").unwrap();
    store.open("static-v1").unwrap();
    assert_eq!(store.names().unwrap(), vec!["static-v1".to_string()]);

    let req = request("/app.js");
    let response = Response::new(200, req.url.as_str(), "console.log(1)")
      .with_header("Content-Type", "text/javascript");
    store.put("static-v1", &req, &response).unwrap();

    assert_eq!(
      store.match_request("static-v1", &req).unwrap(),
      Some(response.clone())
    );
    assert_eq!(store.match_request("static-v2", &req).unwrap(), None);
    assert_eq!(store.match_any(&req).unwrap(), Some(response));

    // put creates missing caches
    store.put("api-v1", &request("/x"), &Response::new(200, "", "")).unwrap();
    assert_eq!(store.names().unwrap().len(), 2);

    assert!(store.delete("static-v1").unwrap());
    assert!(!store.delete("static-v1").unwrap());
    assert_eq!(store.match_request("static-v1", &req).unwrap(), None);
    assert_eq!(store.names().unwrap(), vec!["api-v1".to_string()]);
  }

  #[test]
  fn test_memory_response_store() {
    exercise(&MemoryResponseStore::new());
  }

  #[test]
  fn test_sqlite_response_store() {
    exercise(&SqliteResponseStore::open_in_memory().unwrap());
  }

  #[test]
  fn test_request_hash_depends_on_method() {
    let get = request("/a");
    let head = request("/a").with_method(reqwest::Method::HEAD);
    assert_ne!(request_hash(&get), request_hash(&head));
    assert_eq!(request_hash(&get).len(), 64);
  }
}
