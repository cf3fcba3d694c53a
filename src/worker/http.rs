//! Request and response snapshots seen by the interception layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

pub use reqwest::Method;

/// How the page issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  /// Anything else: scripts, images, API calls
  Subresource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
}

impl Request {
  /// A GET for a subresource.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Subresource,
    }
  }

  /// A GET issued by a page navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Navigate,
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Cache identity of this request: method and URL.
  pub fn identity(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

/// Fully buffered response that can be cloned into a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub url: String,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      url: url.into(),
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  /// 302 pointing at `location`.
  pub fn redirect(location: &Url) -> Self {
    let mut response = Self::new(302, location.as_str(), Vec::new());
    response
      .headers
      .insert("location".to_string(), location.to_string());
    response
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  /// Only exact 200s are written to the cache.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }
}
