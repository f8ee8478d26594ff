use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the remote data service.
  #[serde(default = "default_api_url")]
  pub url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
    }
  }
}

fn default_api_url() -> String {
  "http://localhost:1337".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Maximum cached restaurants before the oldest are evicted.
  #[serde(default = "default_restaurant_cap")]
  pub restaurant_cap: usize,
  /// Maximum cached reviews before the oldest are evicted.
  #[serde(default = "default_review_cap")]
  pub review_cap: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      restaurant_cap: default_restaurant_cap(),
      review_cap: default_review_cap(),
    }
  }
}

fn default_restaurant_cap() -> usize {
  30
}

fn default_review_cap() -> usize {
  15
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Seconds to wait before resubmitting queued reviews.
  #[serde(default = "default_retry_delay_secs")]
  pub retry_delay_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      retry_delay_secs: default_retry_delay_secs(),
    }
  }
}

fn default_retry_delay_secs() -> u64 {
  3
}

impl SyncConfig {
  pub fn retry_delay(&self) -> Duration {
    Duration::from_secs(self.retry_delay_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./bistro.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/bistro/config.yaml
  ///
  /// Every field has a default, so no config file at all just yields
  /// `Config::default()`.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::StorageUnavailable(format!(
          "config file not found: {}",
          p.display()
        )));
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
    let local = PathBuf::from("bistro.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("bistro").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      Error::StorageUnavailable(format!(
        "failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    let config: Config = serde_yaml::from_str(&contents).map_err(|e| {
      Error::StorageUnavailable(format!(
        "failed to parse config file {}: {}",
        path.display(),
        e
      ))
    })?;

    Ok(config)
  }

  /// Default location for the entity cache database.
  pub fn default_data_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("bistro").join("cache.db"))
  }

  /// Default location for the page/asset request cache database.
  pub fn default_request_cache_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("bistro").join("pages.db"))
  }
}

fn data_dir() -> Result<PathBuf> {
  dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| Error::StorageUnavailable("could not determine data directory".into()))
}
