use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = concat!("remote_wiki/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;
pub const DEFAULT_CONFIG_PATH: &str = ".remote_wiki/config.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RemoteWikiConfig {
    #[serde(default)]
    pub remote_wiki: RemoteWikiSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RemoteWikiSection {
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    #[serde(default)]
    pub verbose: bool,
    pub user_agent: Option<String>,
    /// Keyed by normalized endpoint (`host + path`, no scheme, no trailing slash).
    #[serde(default)]
    pub bot_passwords: BTreeMap<String, BotCredentials>,
}

impl Default for RemoteWikiSection {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
            cache_ttl: DEFAULT_CACHE_TTL_SECS,
            verbose: false,
            user_agent: None,
            bot_passwords: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BotCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BotCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl RemoteWikiConfig {
    /// Request and connect timeout: env REMOTE_WIKI_TIMEOUT > config.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(env_u64("REMOTE_WIKI_TIMEOUT").unwrap_or(self.remote_wiki.timeout))
    }

    /// Cache TTL in seconds, zero disables caching: env REMOTE_WIKI_CACHE_TTL > config.
    pub fn cache_ttl(&self) -> u64 {
        env_u64("REMOTE_WIKI_CACHE_TTL").unwrap_or(self.remote_wiki.cache_ttl)
    }

    /// Whether soft failures render their message: env REMOTE_WIKI_VERBOSE > config.
    pub fn verbose(&self) -> bool {
        env::var("REMOTE_WIKI_VERBOSE")
            .ok()
            .and_then(|value| parse_flag(&value))
            .unwrap_or(self.remote_wiki.verbose)
    }

    /// Resolve user agent: env REMOTE_WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        if let Ok(value) = env::var("REMOTE_WIKI_USER_AGENT") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.remote_wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn bot_credentials(&self, key: &str) -> Option<&BotCredentials> {
        self.remote_wiki.bot_passwords.get(key)
    }
}

/// Load and parse a RemoteWikiConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<RemoteWikiConfig> {
    if !config_path.exists() {
        return Ok(RemoteWikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: RemoteWikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}
