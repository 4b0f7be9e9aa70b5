use serde::{Deserialize, Serialize};

use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub fetch: FetchConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub tokens: TokenConfig,
  #[serde(default)]
  pub providers: ProvidersConfig,
  pub logging: Option<LoggingConfig>,
  #[serde(default)]
  pub vidcloud: Option<VidcloudConfig>,
  #[serde(default)]
  pub livearena: Option<LivearenaConfig>,
  /// Path to the hot-reloadable secrets file (PoW material, skew windows).
  #[serde(default = "default_secrets_path")]
  pub secrets_path: String,
}

fn default_secrets_path() -> String {
  "secrets.toml".to_string()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      server: ServerConfig::default(),
      fetch: FetchConfig::default(),
      cache: CacheConfig::default(),
      tokens: TokenConfig::default(),
      providers: ProvidersConfig::default(),
      logging: None,
      vidcloud: None,
      livearena: None,
      secrets_path: default_secrets_path(),
    }
  }
}

use crate::common::types::AnyResult;

impl Config {
  pub fn load() -> AnyResult<Self> {
    let config_path = if std::path::Path::new("config.toml").exists() {
      "config.toml"
    } else if std::path::Path::new("config.default.toml").exists() {
      "config.default.toml"
    } else {
      return Err("config.toml or config.default.toml not found".into());
    };

    eprintln!("Loading configuration from: {}", config_path);
    Self::load_from(config_path)
  }

  pub fn load_from(path: &str) -> AnyResult<Self> {
    let config_str = std::fs::read_to_string(path)?;
    if config_str.is_empty() {
      return Err(format!("{} is empty", path).into());
    }

    let config: Config = toml::from_str(&config_str)?;
    Ok(config)
  }
}
