//! Fetch interception: network-first navigations, stale-while-revalidate
//! for same-origin subresources.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::http::{Method, Request, Response};
use super::lifecycle::{ServiceWorker, WorkerState};
use super::network::Network;
use super::store::ResponseStore;

/// A preloaded navigation response, started by the platform in parallel with
/// the worker. Resolves to `None` when preload produced nothing.
pub type PreloadFuture = BoxFuture<'static, Option<Response>>;

/// An intercepted request.
pub struct FetchEvent {
  pub request: Request,
  pub preload: Option<PreloadFuture>,
}

impl FetchEvent {
  pub fn new(request: Request) -> Self {
    Self {
      request,
      preload: None,
    }
  }

  pub fn with_preload(mut self, preload: PreloadFuture) -> Self {
    self.preload = Some(preload);
    self
  }
}

/// Which link of the fallback chain produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Preload,
  Cache,
  AppShell,
  OfflinePage,
  Redirect,
}

/// A response produced by the worker.
#[derive(Debug)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  revalidation: Option<JoinHandle<()>>,
}

impl Served {
  fn new(response: Response, source: ResponseSource) -> Self {
    Self {
      response,
      source,
      revalidation: None,
    }
  }

  /// Wait for the background cache refresh started for this response, if any.
  pub async fn settled(mut self) -> Result<Response> {
    if let Some(handle) = self.revalidation.take() {
      handle
        .await
        .map_err(|e| eyre!("Revalidation task failed: {}", e))?;
    }
    Ok(self.response)
  }
}

/// Outcome of [`ServiceWorker::handle_fetch`].
#[derive(Debug)]
pub enum Handled {
  /// Not intercepted; the platform performs a plain network fetch.
  PassThrough,
  Respond(Served),
}

impl<S: ResponseStore, N: Network> ServiceWorker<S, N> {
  /// Route an intercepted request.
  ///
  /// Only GETs are handled. Navigations go to the network first; same-origin
  /// subresources are served stale-while-revalidate. Cross-origin requests
  /// and anything under the auth path pass through untouched so credentialed
  /// responses never land in the cache.
  pub async fn handle_fetch(&self, event: FetchEvent) -> Result<Handled> {
    let FetchEvent { request, preload } = event;

    if self.state != WorkerState::Active || request.method != Method::GET {
      return Ok(Handled::PassThrough);
    }

    if request.url.origin() != self.options.origin.origin() {
      debug!(url = %request.url, "cross-origin, passing through");
      return Ok(Handled::PassThrough);
    }

    if request.is_navigation() {
      return Ok(Handled::Respond(self.navigate(request, preload).await?));
    }

    if request.url.path().contains(&self.options.auth_path) {
      debug!(url = %request.url, "auth request, passing through");
      return Ok(Handled::PassThrough);
    }

    Ok(Handled::Respond(self.stale_while_revalidate(request).await?))
  }

  /// Network first; on failure fall back to the app shell, then the offline
  /// page, then a redirect to the offline page.
  async fn navigate(&self, request: Request, preload: Option<PreloadFuture>) -> Result<Served> {
    let network = self.network.fetch(&request);

    let outcome = match preload {
      Some(preload) if self.preload_enabled => {
        tokio::pin!(network);
        tokio::select! {
          Some(response) = preload => Ok(Served::new(response, ResponseSource::Preload)),
          result = &mut network => result.map(|r| Served::new(r, ResponseSource::Network)),
        }
      }
      _ => network
        .await
        .map(|r| Served::new(r, ResponseSource::Network)),
    };

    let error = match outcome {
      Ok(served) => return Ok(served),
      Err(e) => e,
    };
    warn!(url = %request.url, error = %error, "navigation failed, serving fallback");

    if let Some(shell) = self.cached_page(&self.options.app_shell)? {
      return Ok(Served::new(shell, ResponseSource::AppShell));
    }
    if let Some(offline) = self.cached_page(&self.options.offline_page)? {
      return Ok(Served::new(offline, ResponseSource::OfflinePage));
    }

    let location = self.options.resolve(&self.options.offline_page)?;
    Ok(Served::new(
      Response::redirect(&location),
      ResponseSource::Redirect,
    ))
  }

  /// A site page from any cache. Lookup failures count as a miss.
  fn cached_page(&self, path: &str) -> Result<Option<Response>> {
    let request = Request::get(self.options.resolve(path)?);
    match self.store.match_any(&request) {
      Ok(found) => Ok(found),
      Err(e) => {
        warn!(url = %request.url, error = %e, "cache lookup failed");
        Ok(None)
      }
    }
  }

  /// Serve the cached copy immediately when there is one, refreshing it in
  /// the background; otherwise wait for the network.
  async fn stale_while_revalidate(&self, request: Request) -> Result<Served> {
    let cache_name = self.options.cache_name();
    let cached = match self.store.match_request(&cache_name, &request) {
      Ok(cached) => cached,
      Err(e) => {
        warn!(url = %request.url, error = %e, "cache lookup failed");
        None
      }
    };

    let url = request.url.clone();
    let refresh = refresh(
      Arc::clone(&self.store),
      Arc::clone(&self.network),
      cache_name,
      request,
    );

    match cached {
      Some(response) => {
        let revalidation = tokio::spawn(async move {
          if let Err(e) = refresh.await {
            debug!(url = %url, error = %e, "background refresh failed");
          }
        });
        Ok(Served {
          response,
          source: ResponseSource::Cache,
          revalidation: Some(revalidation),
        })
      }
      None => {
        let response = refresh.await?;
        Ok(Served::new(response, ResponseSource::Network))
      }
    }
  }
}

/// Fetch `request` and store a copy when it comes back 200.
async fn refresh<S: ResponseStore, N: Network>(
  store: Arc<S>,
  network: Arc<N>,
  cache_name: String,
  request: Request,
) -> Result<Response> {
  let response = network.fetch(&request).await?;
  if response.is_cacheable() {
    if let Err(e) = store.put(&cache_name, &request, &response) {
      warn!(url = %request.url, error = %e, "failed to cache response");
    }
  }
  Ok(response)
}
