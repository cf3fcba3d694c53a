//! Scripted network for worker tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use super::http::{Request, Response};
use super::network::Network;

pub const ORIGIN: &str = "http://localhost:8080";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Serves fixed bodies by URL; unknown URLs fail like a dropped connection.
#[derive(Default)]
pub struct ScriptedNetwork {
  routes: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  delay: Mutex<Option<Duration>>,
  calls: AtomicUsize,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, path: &str, status: u16, body: &str) {
    let url = url(path);
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Response::new(status, url.as_str(), body));
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Network for ScriptedNetwork {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let outcome = if self.offline.load(Ordering::SeqCst) {
      Err(eyre!("network unreachable"))
    } else {
      self
        .routes
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .ok_or_else(|| eyre!("connection refused: {}", request.url))
    };
    let delay = *self.delay.lock().unwrap();

    async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      outcome
    }
  }
}
