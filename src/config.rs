use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable that overrides the configured generation id.
pub const VERSION_ENV: &str = "SWCACHE_VERSION";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the interceptor is installed for; requests to any other origin bypass it
  pub origin: Url,
  /// Current cache generation id. Change it to invalidate everything cached.
  pub version: String,
  /// Paths fetched and stored during install, in order
  pub precache: Vec<String>,
  /// Document served for navigations that fail offline with no cached entry
  pub shell_path: String,
  pub routes: RoutesConfig,
  pub network: NetworkConfig,
  pub storage: StorageConfig,
  /// Write logs to this file instead of stderr
  pub log_file: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      version: "v1".to_string(),
      precache: vec![
        "/".to_string(),
        "/static/style.css".to_string(),
        "/static/ramallah.js".to_string(),
      ],
      shell_path: "/".to_string(),
      routes: RoutesConfig::default(),
      network: NetworkConfig::default(),
      storage: StorageConfig::default(),
      log_file: None,
    }
  }
}

fn default_origin() -> Url {
  Url::parse("http://localhost:8000/").expect("static origin url is valid")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoutesConfig {
  /// Requests under this prefix are never cached
  pub api_prefix: String,
  /// Requests under this prefix are served cache-first
  pub static_prefix: String,
  /// Additional exact paths served cache-first
  pub static_paths: Vec<String>,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_prefix: "/api/".to_string(),
      static_prefix: "/static/".to_string(),
      static_paths: vec!["/manifest.json".to_string()],
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
  pub user_agent: String,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 30,
      user_agent: concat!("swcache/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite database path (default: $XDG_DATA_HOME/swcache/<origin>.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  ///
  /// Falls back to defaults when no file exists. `SWCACHE_VERSION` overrides
  /// the generation id in every case.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    config.with_env_overrides().validated()
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
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
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  fn with_env_overrides(self) -> Self {
    match std::env::var(VERSION_ENV) {
      Ok(version) if !version.trim().is_empty() => Self {
        version: version.trim().to_string(),
        ..self
      },
      _ => self,
    }
  }

  /// Reject configurations the interceptor cannot run with.
  pub fn validated(self) -> Result<Self> {
    if self.version.trim().is_empty() {
      return Err(eyre!("Cache version must not be empty"));
    }
    if self.origin.cannot_be_a_base() || self.origin.host_str().is_none() {
      return Err(eyre!("Origin {} is not a valid http(s) origin", self.origin));
    }
    let mut paths = self
      .precache
      .iter()
      .chain(&self.routes.static_paths)
      .chain(std::iter::once(&self.shell_path));
    if let Some(bad) = paths.find(|p| !p.starts_with('/')) {
      return Err(eyre!("Path '{}' must start with '/'", bad));
    }
    for (name, prefix) in [
      ("api_prefix", &self.routes.api_prefix),
      ("static_prefix", &self.routes.static_prefix),
    ] {
      if !prefix.starts_with('/') || prefix.len() < 2 {
        return Err(eyre!("{} '{}' must be a non-root path prefix", name, prefix));
      }
    }
    Ok(self)
  }

  /// Resolve the storage database path for this origin.
  pub fn storage_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.storage.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    let host = self.origin.host_str().unwrap_or("default");
    let file = match self.origin.port_or_known_default() {
      Some(port) => format!("{}_{}.db", host, port),
      None => format!("{}.db", host),
    };

    Ok(data_dir.join("swcache").join(file))
  }
}
