use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Spotify application client id (public PKCE client, no secret).
    #[serde(default)]
    pub client_id: String,

    #[serde(default = "default_api_base")]
    pub api_base_url: String,
    #[serde(default = "default_auth_base")]
    pub auth_base_url: String,

    // path to database file holding the token
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Tokens this close to expiry are refreshed before use.
    #[serde(default = "default_token_leeway")]
    pub token_leeway_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_api_base() -> String { "https://api.spotify.com/v1".into() }
fn default_auth_base() -> String { "https://accounts.spotify.com".into() }
fn default_token_leeway() -> u64 { 60 }
fn default_http_timeout() -> u64 { 30 }
fn default_user_agent() -> String { format!("genrify/{}", env!("CARGO_PKG_VERSION")) }

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("genrify")
}

fn default_db_path() -> PathBuf { data_dir().join("genrify.db") }
fn default_log_dir() -> PathBuf { data_dir().join("logs") }

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            api_base_url: default_api_base(),
            auth_base_url: default_auth_base(),
            db_path: default_db_path(),
            log_dir: default_log_dir(),
            token_leeway_secs: default_token_leeway(),
            user_agent: default_user_agent(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl Config {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// `<config dir>/genrify/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("genrify").join("config.toml"))
    }

    /// Load the config file (explicit path or the default location), falling
    /// back to defaults when the default file does not exist, then apply
    /// environment overrides.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match explicit {
            Some(p) => Self::from_path(p)
                .with_context(|| format!("loading config from {}", p.display()))?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_path(&p)
                    .with_context(|| format!("loading config from {}", p.display()))?,
                _ => Self::default(),
            },
        };
        cfg.apply_env_overrides();
        cfg.normalize();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = non_blank_env("SPOTIFY_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = non_blank_env("SPOTIFY_API_BASE") {
            self.api_base_url = v;
        }
        if let Some(v) = non_blank_env("SPOTIFY_AUTH_BASE") {
            self.auth_base_url = v;
        }
    }

    fn normalize(&mut self) {
        self.client_id = self.client_id.trim().to_string();
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
        self.auth_base_url = self.auth_base_url.trim().trim_end_matches('/').to_string();
        if self.api_base_url.is_empty() {
            self.api_base_url = default_api_base();
        }
        if self.auth_base_url.is_empty() {
            self.auth_base_url = default_auth_base();
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty()
    }

    pub fn token_leeway(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_leeway_secs as i64)
    }
}

fn non_blank_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
