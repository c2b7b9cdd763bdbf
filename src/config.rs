use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub github: GithubConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubConfig {
  /// Default repository to sync, as "owner/name"
  pub repo: Option<String>,
  /// Personal access token; environment variables take precedence
  pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Where the SQLite cache lives (defaults to the platform data dir)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offhub.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offhub/config.yaml
  /// 4. ~/.config/offhub/config.yaml
  ///
  /// No config file is fine: everything can come from flags and
  /// environment variables instead.
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
    let local = PathBuf::from("offhub.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offhub").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the GitHub API token.
  ///
  /// Checks OFFHUB_GITHUB_TOKEN first, then GITHUB_TOKEN, then the
  /// config file, then whatever `gh auth token` prints.
  pub fn resolve_token(&self) -> Result<String> {
    if let Ok(token) = std::env::var("OFFHUB_GITHUB_TOKEN") {
      return Ok(token);
    }
    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
      return Ok(token);
    }
    if let Some(token) = &self.github.token {
      return Ok(token.clone());
    }
    if let Some(token) = gh_cli_token() {
      return Ok(token);
    }

    Err(eyre!(
      "GitHub token not found. Set OFFHUB_GITHUB_TOKEN or GITHUB_TOKEN, \
       add github.token to the config file, or log in with `gh auth login`."
    ))
  }

  /// Resolve the cache database path, creating no directories yet
  pub fn cache_path(&self) -> PathBuf {
    self
      .cache
      .path
      .clone()
      .unwrap_or_else(default_cache_path)
  }
}

fn default_cache_path() -> PathBuf {
  match dirs::data_dir() {
    Some(data_dir) => data_dir.join("offhub").join("cache.db"),
    None => PathBuf::from("offhub-cache.db"),
  }
}

fn gh_cli_token() -> Option<String> {
  let output = Command::new("gh").args(["auth", "token"]).output().ok()?;
  if !output.status.success() {
    return None;
  }
  let token = String::from_utf8(output.stdout).ok()?.trim().to_string();
  if token.is_empty() {
    None
  } else {
    Some(token)
  }
}
