//! Outbound fetch primitive.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use super::http::{Request, Response};

/// Something that can turn a request into a response.
///
/// Any HTTP status is a successful fetch; `Err` means the request never
/// completed (offline, DNS failure, deadline hit).
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// reqwest-backed network.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  /// `timeout` bounds each fetch end to end. `None` waits forever.
  pub fn new(timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder().gzip(true).deflate(true);
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  pub fn client(&self) -> &reqwest::Client {
    &self.client
  }
}

impl Network for HttpNetwork {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send {
    let pending = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send();
    let url = request.url.to_string();

    async move {
      let response = pending
        .await
        .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

      let status = response.status().as_u16();
      let final_url = response.url().to_string();
      let headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?;

      Ok(Response {
        status,
        url: final_url,
        headers,
        body: body.to_vec(),
      })
    }
  }
}
