//! Install and activate lifecycle of the interception layer.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::http::Request;
use super::network::Network;
use super::store::ResponseStore;

/// Everything a worker generation needs to know about the site it fronts.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
  /// First half of the cache name, e.g. "static"
  pub purpose: String,
  /// Generation tag, e.g. "v3". Bumping it is the only way to evict.
  pub version: String,
  /// Origin whose subresources are cached
  pub origin: Url,
  /// Paths fetched into the cache at install time
  pub shell: Vec<String>,
  /// Entry page served to navigations when offline
  pub app_shell: String,
  pub offline_page: String,
  /// Requests whose path contains this are never intercepted
  pub auth_path: String,
  pub navigation_preload: bool,
}

impl WorkerOptions {
  pub fn new(origin: Url, version: &str) -> Self {
    Self {
      purpose: "static".to_string(),
      version: version.to_string(),
      origin,
      shell: Vec::new(),
      app_shell: "/index.html".to_string(),
      offline_page: "/offline.html".to_string(),
      auth_path: "/auth/".to_string(),
      navigation_preload: true,
    }
  }

  /// `<purpose>-<version>`
  pub fn cache_name(&self) -> String {
    format!("{}-{}", self.purpose, self.version)
  }

  /// Resolve a site path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path {}: {}", path, e))
  }
}

/// Lifecycle state of one worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Created, install not yet run
  Parsed,
  Installing,
  /// Installed and not waiting for older generations
  Installed,
  Activating,
  /// Controlling clients and intercepting fetches
  Active,
  /// Replaced by a newer generation or failed to install
  Redundant,
}

/// One generation of the response cache layer.
pub struct ServiceWorker<S: ResponseStore, N: Network> {
  pub(super) options: Arc<WorkerOptions>,
  pub(super) store: Arc<S>,
  pub(super) network: Arc<N>,
  pub(super) state: WorkerState,
  pub(super) preload_enabled: bool,
  skip_waiting: bool,
}

impl<S: ResponseStore, N: Network> ServiceWorker<S, N> {
  pub fn new(options: WorkerOptions, store: Arc<S>, network: Arc<N>) -> Self {
    Self {
      options: Arc::new(options),
      store,
      network,
      state: WorkerState::Parsed,
      preload_enabled: false,
      skip_waiting: false,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn options(&self) -> &WorkerOptions {
    &self.options
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  pub fn preload_enabled(&self) -> bool {
    self.preload_enabled
  }

  /// Open this generation's cache and fill it with the shell.
  ///
  /// Shell fetches are best effort: a missing icon must not keep the rest of
  /// the site from working offline.
  pub async fn install(&mut self) -> Result<()> {
    if self.state != WorkerState::Parsed {
      return Err(eyre!("Cannot install worker in state {:?}", self.state));
    }
    self.state = WorkerState::Installing;

    let cache_name = self.options.cache_name();
    if let Err(e) = self.store.open(&cache_name) {
      self.state = WorkerState::Redundant;
      return Err(eyre!("Failed to open cache {}: {}", cache_name, e));
    }

    let cached = self.add_all(&cache_name).await;
    info!(
      cache = %cache_name,
      cached,
      total = self.options.shell.len(),
      "installed worker"
    );

    self.skip_waiting = true;
    self.state = WorkerState::Installed;
    Ok(())
  }

  /// Fetch every shell path and store the 200s. Returns how many were stored.
  async fn add_all(&self, cache_name: &str) -> usize {
    let requests: Vec<Request> = self
      .options
      .shell
      .iter()
      .filter_map(|path| match self.options.resolve(path) {
        Ok(url) => Some(Request::get(url)),
        Err(e) => {
          warn!(error = %e, "skipping shell resource");
          None
        }
      })
      .collect();

    let responses = join_all(requests.iter().map(|request| self.network.fetch(request))).await;

    let mut cached = 0;
    for (request, response) in requests.iter().zip(responses) {
      match response {
        Ok(response) if response.is_cacheable() => {
          match self.store.put(cache_name, request, &response) {
            Ok(()) => cached += 1,
            Err(e) => warn!(url = %request.url, error = %e, "failed to cache shell resource"),
          }
        }
        Ok(response) => {
          warn!(url = %request.url, status = response.status, "shell resource not cacheable")
        }
        Err(e) => warn!(url = %request.url, error = %e, "failed to fetch shell resource"),
      }
    }
    cached
  }

  /// Evict every older generation and start controlling clients.
  ///
  /// Returns the names of the deleted caches.
  pub async fn activate(&mut self) -> Result<Vec<String>> {
    if self.state != WorkerState::Installed {
      return Err(eyre!("Cannot activate worker in state {:?}", self.state));
    }
    if !self.skip_waiting {
      return Err(eyre!("Worker is waiting for older generations"));
    }
    self.state = WorkerState::Activating;

    let names = match self.store.names() {
      Ok(names) => names,
      Err(e) => {
        self.state = WorkerState::Installed;
        return Err(eyre!("Failed to list caches: {}", e));
      }
    };

    let mut deleted = Vec::new();
    for name in names {
      if name.contains(&self.options.version) {
        continue;
      }
      match self.store.delete(&name) {
        Ok(true) => {
          info!(cache = %name, "deleted old cache generation");
          deleted.push(name);
        }
        Ok(false) => {}
        Err(e) => warn!(cache = %name, error = %e, "failed to delete old cache generation"),
      }
    }

    self.preload_enabled = self.options.navigation_preload;
    self.state = WorkerState::Active;
    debug!(
      version = %self.options.version,
      preload = self.preload_enabled,
      "worker active, claiming clients"
    );

    Ok(deleted)
  }

  /// Pick up a generation that was installed and activated by an earlier
  /// process. Returns false (and changes nothing) if its cache is missing.
  pub fn resume(&mut self) -> Result<bool> {
    if self.state != WorkerState::Parsed {
      return Err(eyre!("Cannot resume worker in state {:?}", self.state));
    }
    if !self.store.names()?.contains(&self.options.cache_name()) {
      return Ok(false);
    }

    self.preload_enabled = self.options.navigation_preload;
    self.state = WorkerState::Active;
    Ok(true)
  }

  /// Stop intercepting; a newer generation took over.
  pub fn mark_redundant(&mut self) {
    debug!(version = %self.options.version, "worker redundant");
    self.state = WorkerState::Redundant;
  }
}

/// Holds whichever worker generation currently controls the site.
pub struct Registration<S: ResponseStore, N: Network> {
  active: Option<ServiceWorker<S, N>>,
}

impl<S: ResponseStore, N: Network> Default for Registration<S, N> {
  fn default() -> Self {
    Self { active: None }
  }
}

impl<S: ResponseStore, N: Network> Registration<S, N> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn active(&self) -> Option<&ServiceWorker<S, N>> {
    self.active.as_ref()
  }

  /// Install and activate `worker`, replacing the current generation.
  ///
  /// Returns the previous worker, now redundant. If `worker` fails to
  /// install the current generation stays in control.
  pub async fn update(
    &mut self,
    mut worker: ServiceWorker<S, N>,
  ) -> Result<Option<ServiceWorker<S, N>>> {
    worker.install().await?;
    worker.activate().await?;

    let previous = self.active.replace(worker);
    Ok(previous.map(|mut old| {
      old.mark_redundant();
      old
    }))
  }
}
