use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::PartitionNames;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the application is served from (static assets, root document)
  pub origin: Url,
  /// Backend base URL for mutation replay
  pub backend: Url,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  pub notifications: NotificationConfig,
  pub storage: StorageConfig,
}

impl Default for Config {
  fn default() -> Self {
    let local = Url::parse("http://localhost:3000/").expect("static url is valid");
    Self {
      origin: local.clone(),
      backend: local,
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
      storage: StorageConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub static_version: String,
  pub dynamic_version: String,
  pub api_version: String,
  /// Critical routes pre-cached on install and served cache-first
  pub static_manifest: Vec<String>,
  /// API paths (prefix match) whose successful responses are cached
  pub api_cache_allowlist: Vec<String>,
  /// API paths pre-warmed on install, best effort
  pub api_prewarm: Vec<String>,
  /// The one API path that gets a built-in offline payload
  pub crisis_path: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      static_version: "v4".to_string(),
      dynamic_version: "v4".to_string(),
      api_version: "v4".to_string(),
      static_manifest: [
        "/",
        "/index.html",
        "/manifest.json",
        "/static/js/bundle.js",
        "/static/css/main.css",
        "/favicon.ico",
        "/offline.html",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      api_cache_allowlist: [
        "/api/crisis/resources",
        "/api/auth/preferences",
        "/api/mood/history",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      api_prewarm: ["/api/crisis/resources", "/api/auth/preferences"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      crisis_path: "/api/crisis/resources".to_string(),
    }
  }
}

impl CacheConfig {
  pub fn partition_names(&self) -> PartitionNames {
    PartitionNames::new(&self.static_version, &self.dynamic_version, &self.api_version)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Tag under which mood replays are registered
  pub tag: String,
  /// Endpoint queued mood writes are replayed against
  pub track_path: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "mood-sync".to_string(),
      track_path: "/api/mood/track".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub default_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "MoodSync".to_string(),
      body: "Time to check in with your mood".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/badge-72x72.png".to_string(),
      default_url: "/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Override for the data directory (defaults to $XDG_DATA_HOME/moodsync)
  pub data_dir: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./moodsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/moodsync/config.yaml
  ///
  /// With no file found the defaults are used.
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
    let local = PathBuf::from("moodsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("moodsync").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Directory holding the partition and queue databases.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.storage.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("moodsync"))
  }

  /// Get the auth token captured for queued writes.
  ///
  /// Checks MOODSYNC_TOKEN.
  pub fn get_auth_token() -> Option<String> {
    std::env::var("MOODSYNC_TOKEN").ok().filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
backend: "http://localhost:8000/"
cache:
  api_version: v5
"#,
    )
    .unwrap();

    assert_eq!(config.backend.as_str(), "http://localhost:8000/");
    assert_eq!(config.origin.as_str(), "http://localhost:3000/");
    assert_eq!(config.cache.api_version, "v5");
    assert_eq!(config.cache.static_version, "v4");
    assert_eq!(config.sync.tag, "mood-sync");
    assert!(config
      .cache
      .api_cache_allowlist
      .contains(&"/api/crisis/resources".to_string()));
  }

  #[test]
  fn test_partition_names_follow_versions() {
    let config = Config::from_yaml("cache:\n  static_version: v3\n").unwrap();
    let names = config.cache.partition_names();
    assert_eq!(names.static_assets, "static-v3");
    assert_eq!(names.api, "api-v4");
  }

  #[test]
  fn test_explicit_missing_path_is_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/moodsync.yaml"))).is_err());
  }

  #[test]
  fn test_data_dir_override() {
    let config = Config::from_yaml("storage:\n  data_dir: /tmp/moodsync-test\n").unwrap();
    assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/moodsync-test"));
  }
}
