use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{FetchPolicy, DEFAULT_PAGE_LIMIT, DEFAULT_PARTITION};
use crate::request::KeyMode;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL that relative request URLs are resolved against
  pub base_url: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      timeout_secs: default_timeout_secs(),
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
  /// Entries live in process memory
  #[default]
  Memory,
  /// Entries live in a SQLite file (still wiped every session)
  Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Partition reserved for this session's pages
  pub partition: String,
  /// Highest page number written to the cache, and the entry ceiling
  pub page_limit: u32,
  pub backend: Backend,
  /// SQLite file (default: $XDG_DATA_HOME/pagesync/cache.db)
  pub path: Option<PathBuf>,
  pub policy: FetchPolicy,
  pub key_mode: KeyMode,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      partition: DEFAULT_PARTITION.to_string(),
      page_limit: DEFAULT_PAGE_LIMIT,
      backend: Backend::default(),
      path: None,
      policy: FetchPolicy::default(),
      key_mode: KeyMode::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pagesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pagesync/config.yaml
  ///
  /// Falls back to defaults when no file exists.
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
    let local = PathBuf::from("pagesync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pagesync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Resolve the API base URL.
  ///
  /// Command line wins, then PAGESYNC_API_URL, then the config file.
  pub fn base_url(&self, cli: Option<String>) -> Option<String> {
    cli
      .or_else(|| std::env::var("PAGESYNC_API_URL").ok())
      .or_else(|| self.api.base_url.clone())
  }
}
