//! Configuration schema and file loading.
//!
//! A single file carries both proxy settings and filter settings at the top
//! level. The filter settings may instead live in a separate file named by
//! `filter_config`, in which case that file wins over any filter keys in the
//! main one.
//!
//! Files ending in `.yaml` or `.yml` are parsed as YAML, everything else as
//! JSON. Unknown top-level keys are ignored so the file can be shared with
//! other tools; rule entries are validated strictly (see [`crate::rule`]).

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{ConfigError, Result};
use crate::rule::FilterRule;

/// Default decision cache capacity.
pub const DEFAULT_DECISION_CACHE_CAPACITY: usize = 10_000;

/// Default decision cache TTL in seconds.
pub const DEFAULT_DECISION_CACHE_TTL_SECS: u64 = 300;

/// Serialization format of a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON document.
    Json,
    /// YAML document.
    Yaml,
}

impl ConfigFormat {
    /// Picks the format from a file extension.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Json,
        }
    }

    /// Parses a document in this format.
    pub fn parse<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        match self {
            ConfigFormat::Json => Ok(serde_json::from_str(text)?),
            ConfigFormat::Yaml => Ok(serde_yaml::from_str(text)?),
        }
    }
}

fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    ConfigFormat::from_path(path).parse(&text)
}

/// Settings for the listening proxy and request handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Address to listen on.
    pub listen_host: String,
    /// Port to listen on.
    pub listen_port: u16,
    /// Upstream proxy URL, passed through to the engine when it supports one.
    pub upstream_proxy: Option<String>,
    /// CA certificate (PEM) used to intercept TLS.
    pub ssl_cert: Option<PathBuf>,
    /// CA private key (PEM) used to intercept TLS.
    pub ssl_key: Option<PathBuf>,
    /// Log level name.
    pub log_level: String,
    /// Response cache switch, kept for compatibility with existing files.
    pub cache_enabled: bool,
    /// Response cache size in bytes, kept for compatibility.
    pub cache_size: u64,
    /// Strip identifying request headers and fill browser-like defaults.
    pub stealth_mode: bool,
    /// Include the suspicious-TLD rules in the built-in rule set.
    pub block_malware: bool,
    /// Rewrite HTML responses with cosmetic filters and scriptlets.
    pub inject_cosmetic_filters: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 8080,
            upstream_proxy: None,
            ssl_cert: None,
            ssl_key: None,
            log_level: "info".to_string(),
            cache_enabled: true,
            cache_size: 100 * 1024 * 1024,
            stealth_mode: true,
            block_malware: true,
            inject_cosmetic_filters: true,
        }
    }
}

impl ProxySettings {
    /// Returns the `host:port` listen address string.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

/// Filter rules, lists, rewriting content, and cache tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Domains that are never blocked.
    pub whitelist_domains: Vec<String>,
    /// Domains that are always blocked.
    pub blacklist_domains: Vec<String>,
    /// Rule list; `None` means use the built-in rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<FilterRule>>,
    /// Cosmetic selectors; `None` means use the built-in list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cosmetic_selectors: Option<Vec<String>>,
    /// Scriptlets; `None` means use the built-in list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scriptlets: Option<Vec<String>>,
    /// Maximum number of cached decisions. Zero disables the cache.
    pub decision_cache_capacity: usize,
    /// Lifetime of a cached decision in seconds.
    pub decision_cache_ttl_secs: u64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            whitelist_domains: Vec::new(),
            blacklist_domains: Vec::new(),
            rules: None,
            cosmetic_selectors: None,
            scriptlets: None,
            decision_cache_capacity: DEFAULT_DECISION_CACHE_CAPACITY,
            decision_cache_ttl_secs: DEFAULT_DECISION_CACHE_TTL_SECS,
        }
    }
}

impl FilterSettings {
    /// Loads filter settings from a standalone file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        read_file(path.as_ref())
    }

    /// Returns the configured rules, or the built-in ones.
    pub fn rules_or_default(&self, block_malware: bool) -> Vec<FilterRule> {
        match &self.rules {
            Some(rules) => rules.clone(),
            None => defaults::default_rules(block_malware),
        }
    }

    /// Returns the configured cosmetic selectors, or the built-in ones.
    pub fn selectors_or_default(&self) -> Vec<String> {
        self.cosmetic_selectors
            .clone()
            .unwrap_or_else(defaults::default_selectors)
    }

    /// Returns the configured scriptlets, or the built-in ones.
    pub fn scriptlets_or_default(&self) -> Vec<String> {
        self.scriptlets
            .clone()
            .unwrap_or_else(defaults::default_scriptlets)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Proxy settings.
    #[serde(flatten)]
    pub proxy: ProxySettings,
    /// Inline filter settings.
    #[serde(flatten)]
    pub filter: FilterSettings,
    /// Separate file holding the filter settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_config: Option<PathBuf>,
}

impl Config {
    /// Loads a configuration file.
    ///
    /// A relative `filter_config` is resolved against the file's directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config: Config = read_file(path)?;

        if let (Some(filter_path), Some(dir)) = (&config.filter_config, path.parent()) {
            if filter_path.is_relative() {
                config.filter_config = Some(dir.join(filter_path));
            }
        }

        Ok(config)
    }

    /// Parses a configuration document.
    pub fn parse(text: &str, format: ConfigFormat) -> Result<Self> {
        format.parse(text)
    }

    /// Resolves the effective filter settings.
    ///
    /// Reads `filter_config` when set, otherwise returns the inline settings.
    pub fn load_filter_settings(&self) -> Result<FilterSettings> {
        match &self.filter_config {
            Some(path) => FilterSettings::from_path(path),
            None => Ok(self.filter.clone()),
        }
    }
}
