use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub worker: WorkerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Rows per list page
  #[serde(default = "default_page_size")]
  pub page_size: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
  /// Script endpoint handling every action
  pub url: String,
  #[serde(default = "default_api_timeout")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
  /// Edge cache read endpoint; reads go straight to the API when unset
  pub url: Option<String>,
  #[serde(default = "default_worker_timeout")]
  pub timeout_secs: u64,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      url: None,
      timeout_secs: default_worker_timeout(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Upper bound on the bytes held by cache entries
  pub max_bytes: Option<usize>,
  /// Per-category TTL overrides in seconds, keyed by the leading key segment
  #[serde(default)]
  pub ttl_secs: HashMap<String, u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      max_bytes: None,
      ttl_secs: HashMap::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Unconfirmed writes older than this are abandoned instead of replayed
  #[serde(default = "default_stale_after")]
  pub stale_after_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      stale_after_secs: default_stale_after(),
    }
  }
}

impl SyncConfig {
  pub fn stale_after(&self) -> Duration {
    Duration::from_secs(self.stale_after_secs)
  }
}

fn default_page_size() -> u32 {
  20
}

fn default_api_timeout() -> u64 {
  30
}

fn default_worker_timeout() -> u64 {
  5
}

fn default_stale_after() -> u64 {
  60 * 60
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./stockroom.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/stockroom/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/stockroom/config.yaml\n\
                 with at least `api: {{ url: <script endpoint> }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("stockroom.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("stockroom").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.api.url.trim().is_empty() {
      return Err(eyre!("api.url must not be empty"));
    }
    if config.page_size == 0 {
      return Err(eyre!("page_size must be at least 1"));
    }
    Ok(config)
  }

  /// Get the API key from environment variables.
  ///
  /// Checks STOCKROOM_API_KEY first, then ADMIN_API_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("STOCKROOM_API_KEY")
      .or_else(|_| std::env::var("ADMIN_API_KEY"))
      .map_err(|_| {
        eyre!("API key not found. Set STOCKROOM_API_KEY or ADMIN_API_KEY environment variable.")
      })
  }

  /// Get the login password from environment variables.
  ///
  /// Checks STOCKROOM_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("STOCKROOM_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set STOCKROOM_PASSWORD environment variable."))
  }
}
