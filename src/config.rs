use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::worker::WorkerOptions;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub kv: KvConfig,
  #[serde(default)]
  pub worker: WorkerConfig,
  /// Directory for rolling log files (logs go to stderr if not set)
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database holding both caches
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KvConfig {
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
  /// Record name the manifest is stored under
  #[serde(default = "default_namespace")]
  pub namespace: String,
}

impl Default for KvConfig {
  fn default() -> Self {
    Self {
      ttl_secs: default_ttl_secs(),
      namespace: default_namespace(),
    }
  }
}

fn default_ttl_secs() -> u64 {
  120
}

fn default_namespace() -> String {
  crate::cache::DEFAULT_NAMESPACE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  pub purpose: String,
  pub version: String,
  pub origin: String,
  /// Paths cached at install time
  pub shell: Vec<String>,
  pub app_shell: String,
  pub offline_page: String,
  /// Requests whose path contains this are never cached
  pub auth_path: String,
  pub navigation_preload: bool,
  /// Deadline for each network fetch (no deadline if not set)
  pub fetch_timeout_secs: Option<u64>,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      purpose: "static".to_string(),
      version: "v1".to_string(),
      origin: "http://localhost:8080".to_string(),
      shell: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
        "/js/app.js".to_string(),
        "/icons/icon-192.png".to_string(),
        "/offline.html".to_string(),
      ],
      app_shell: "/index.html".to_string(),
      offline_page: "/offline.html".to_string(),
      auth_path: "/auth/".to_string(),
      navigation_preload: true,
      fetch_timeout_secs: None,
    }
  }
}

impl WorkerConfig {
  pub fn options(&self) -> Result<WorkerOptions> {
    let origin =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;

    let mut options = WorkerOptions::new(origin, &self.version);
    options.purpose = self.purpose.clone();
    options.shell = self.shell.clone();
    options.app_shell = self.app_shell.clone();
    options.offline_page = self.offline_page.clone();
    options.auth_path = self.auth_path.clone();
    options.navigation_preload = self.navigation_preload;
    Ok(options)
  }

  pub fn fetch_timeout(&self) -> Option<std::time::Duration> {
    self.fetch_timeout_secs.map(std::time::Duration::from_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./hubcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/hubcache/config.yaml
  ///
  /// With no file found, defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("hubcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("hubcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// SQLite database path, defaulting to the user data directory.
  pub fn storage_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.storage.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("hubcache").join("cache.db"))
  }

  pub fn kv_ttl(&self) -> Result<Duration> {
    ttl_from_secs(self.kv.ttl_secs)
  }
}

/// Whole seconds as a ttl, rejecting values chrono can't represent.
pub fn ttl_from_secs(secs: u64) -> Result<Duration> {
  i64::try_from(secs)
    .ok()
    .and_then(Duration::try_seconds)
    .ok_or_else(|| eyre!("Invalid ttl {}s: out of range", secs))
}
