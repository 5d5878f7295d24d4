//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (FIELDTALLY_*)
//! 2. TOML config file (if FIELDTALLY_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::aggregate::{RelevanceTable, SearchSettings};
use crate::cache::CacheSettings;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (FIELDTALLY_*)
/// 2. TOML config file (if FIELDTALLY_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding cached payloads and the index database.
    ///
    /// Set via FIELDTALLY_CACHE_DIR environment variable.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Query parameters ignored when matching cached URLs.
    #[serde(default = "default_cache_denylist")]
    pub cache_denylist: Vec<String>,

    /// Cache expiry in minutes. Negative values never expire.
    ///
    /// Set via FIELDTALLY_CACHE_TTL_MINUTES environment variable.
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: i64,

    /// Folder for per-session progress records.
    #[serde(default = "default_progress_dir")]
    pub progress_dir: PathBuf,

    /// Filename prefix for progress records.
    #[serde(default = "default_progress_prefix")]
    pub progress_prefix: String,

    /// Relevance table: flattened field name -> display name.
    #[serde(default)]
    pub relevant_fields: BTreeMap<String, String>,

    /// Separator placed between ancestor and child names when flattening.
    #[serde(default = "default_field_separator")]
    pub field_separator: String,

    /// Maximum number of in-flight fetches per search session.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Search session deadline in milliseconds. 0 disables the deadline.
    #[serde(default = "default_search_deadline_ms")]
    pub search_deadline_ms: u64,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum bytes to fetch per request.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Graph API access token.
    ///
    /// Set via FIELDTALLY_FACEBOOK_ACCESS_TOKEN environment variable.
    #[serde(default)]
    pub facebook_access_token: Option<String>,

    /// Bearer token for the status search API.
    ///
    /// Set via FIELDTALLY_TWITTER_BEARER_TOKEN environment variable.
    #[serde(default)]
    pub twitter_bearer_token: Option<String>,

    #[serde(default = "default_facebook_base_url")]
    pub facebook_base_url: String,

    #[serde(default = "default_twitter_base_url")]
    pub twitter_base_url: String,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./fieldtally-cache")
}

fn default_cache_denylist() -> Vec<String> {
    vec!["access_token".into()]
}

fn default_cache_ttl_minutes() -> i64 {
    60
}

fn default_progress_dir() -> PathBuf {
    PathBuf::from("./fieldtally-progress")
}

fn default_progress_prefix() -> String {
    "search-".into()
}

fn default_field_separator() -> String {
    " ".into()
}

fn default_max_concurrency() -> usize {
    4
}

fn default_search_deadline_ms() -> u64 {
    300_000
}

fn default_user_agent() -> String {
    "fieldtally/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_facebook_base_url() -> String {
    "https://graph.facebook.com".into()
}

fn default_twitter_base_url() -> String {
    "https://api.twitter.com/1.1".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache_denylist: default_cache_denylist(),
            cache_ttl_minutes: default_cache_ttl_minutes(),
            progress_dir: default_progress_dir(),
            progress_prefix: default_progress_prefix(),
            relevant_fields: BTreeMap::new(),
            field_separator: default_field_separator(),
            max_concurrency: default_max_concurrency(),
            search_deadline_ms: default_search_deadline_ms(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            facebook_access_token: None,
            twitter_bearer_token: None,
            facebook_base_url: default_facebook_base_url(),
            twitter_base_url: default_twitter_base_url(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Session deadline, or `None` when disabled.
    pub fn search_deadline(&self) -> Option<Duration> {
        (self.search_deadline_ms > 0).then(|| Duration::from_millis(self.search_deadline_ms))
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `FIELDTALLY_`
    /// 2. TOML file from `FIELDTALLY_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("FIELDTALLY_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("FIELDTALLY_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Cache settings derived from this configuration.
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings { root: self.cache_dir.clone(), denylist: self.cache_denylist.clone() }
    }

    /// Search settings derived from this configuration.
    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            ttl_minutes: self.cache_ttl_minutes,
            max_concurrency: self.max_concurrency,
            deadline: self.search_deadline(),
            separator: self.field_separator.clone(),
            relevance: RelevanceTable::new(self.relevant_fields.clone()),
        }
    }

    /// Graph API access token, required before the facebook connector is built.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the token is not set.
    pub fn require_facebook_access_token(&self) -> Result<&str, ConfigError> {
        self.facebook_access_token.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "facebook_access_token".into(),
            hint: "Set FIELDTALLY_FACEBOOK_ACCESS_TOKEN environment variable".into(),
        })
    }

    /// Bearer token, required before the twitter connector is built.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the token is not set.
    pub fn require_twitter_bearer_token(&self) -> Result<&str, ConfigError> {
        self.twitter_bearer_token.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "twitter_bearer_token".into(),
            hint: "Set FIELDTALLY_TWITTER_BEARER_TOKEN environment variable".into(),
        })
    }
}
