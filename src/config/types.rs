//! Configuration types for chain-dns
//!
//! The configuration mirrors the server's runtime shape: a `server` section
//! (bind address and response cache), a `log` section, and a `source`
//! section holding the ordered enable list plus one sub-section per
//! built-in source. All fields have defaults so a missing config file means
//! "run with defaults", and every duration is written in human form
//! (`200ms`, `2s`, `1m`).
//!
//! # Example
//!
//! ```
//! use chain_dns::config::Config;
//!
//! let config = Config::default();
//! assert_eq!(config.server.addr, "0.0.0.0:53");
//! assert_eq!(config.server.cache.size, 1024);
//! assert!(config.validate().is_ok());
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server section: bind address and response cache
    pub server: ServerConfig,
    /// Logging section
    pub log: LogConfig,
    /// Source section: enable list and per-source options
    pub source: SourceConfig,
}

/// Server section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP bind address
    pub addr: String,
    /// Response cache settings
    pub cache: ServerCacheConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:53".to_string(),
            cache: ServerCacheConfig::default(),
        }
    }
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerCacheConfig {
    /// Cache capacity: 0 disables the cache, -1 means unbounded,
    /// a positive value is the LRU capacity
    pub size: i64,
    /// Whole-entry lifetime ceiling on top of per-record TTLs
    pub timeout: String,
}

impl Default for ServerCacheConfig {
    fn default() -> Self {
        Self {
            size: 1024,
            timeout: "1m".to_string(),
        }
    }
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Verbosity level: one of fatal, warn, info, debug
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Source section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Sources to consult, in order
    pub enable: Vec<String>,
    /// Plain-file source options
    pub plain: PlainConfig,
    /// Relay source options
    pub relay: RelayConfig,
    /// Key-value store source options
    pub etcd: EtcdConfig,
}

/// Plain-file source options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlainConfig {
    /// Root of the zone file or directory tree
    pub path: String,
}

/// Relay source options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Upstream servers, `host[:port]` with an optional `U` suffix for
    /// upstreams trusted to be free of response forgery
    pub upstream: Vec<String>,
    /// Query timeout for upstream servers
    pub timeout: String,
    /// Extra-reply collection window; leave at zero unless racing a
    /// forging middlebox
    pub delay: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream: Vec::new(),
            timeout: "2s".to_string(),
            delay: "0".to_string(),
        }
    }
}

/// Key-value store source options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    /// Store endpoints
    pub machines: Vec<String>,
    /// Raw-response cache settings
    pub cache: EtcdCacheConfig,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            machines: Vec::new(),
            cache: EtcdCacheConfig::default(),
        }
    }
}

/// Raw-response cache settings for the key-value store source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdCacheConfig {
    /// Cache capacity for items fetched from the store
    pub size: i64,
    /// How long a fetched item (including a miss) stays valid
    pub ttl: String,
}

impl Default for EtcdCacheConfig {
    fn default() -> Self {
        Self {
            size: 64,
            ttl: "60s".to_string(),
        }
    }
}

impl Config {
    /// Create a configuration with all defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ordered enable list (builder style)
    #[must_use]
    pub fn with_sources(mut self, names: Vec<String>) -> Self {
        self.source.enable = names;
        self
    }

    /// Set the bind address (builder style)
    #[must_use]
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.server.addr = addr.into();
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` when the bind address does not
    /// parse, a duration field is malformed, or the log level is unknown.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.addr.parse::<SocketAddr>().map_err(|e| {
            ConfigError::validation(format!("server.addr '{}': {}", self.server.addr, e))
        })?;

        parse_duration(&self.server.cache.timeout)
            .map_err(|_| ConfigError::invalid_duration("server.cache.timeout", &self.server.cache.timeout))?;
        parse_duration(&self.source.relay.timeout)
            .map_err(|_| ConfigError::invalid_duration("source.relay.timeout", &self.source.relay.timeout))?;
        parse_duration(&self.source.relay.delay)
            .map_err(|_| ConfigError::invalid_duration("source.relay.delay", &self.source.relay.delay))?;
        parse_duration(&self.source.etcd.cache.ttl)
            .map_err(|_| ConfigError::invalid_duration("source.etcd.cache.ttl", &self.source.etcd.cache.ttl))?;

        match self.log.level.as_str() {
            "fatal" | "warn" | "info" | "debug" => {}
            other => {
                return Err(ConfigError::validation(format!(
                    "log.level '{other}' (expected fatal, warn, info or debug)"
                )));
            }
        }

        Ok(())
    }

    /// Parsed UDP bind address
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` when the address is malformed.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.addr.parse().map_err(|e| {
            ConfigError::validation(format!("server.addr '{}': {}", self.server.addr, e))
        })
    }

    /// Parsed whole-entry cache timeout
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidDuration` when the field is malformed.
    pub fn cache_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.server.cache.timeout)
            .map_err(|_| ConfigError::invalid_duration("server.cache.timeout", &self.server.cache.timeout))
    }

    /// The ordered list of enabled sources, trimmed of surrounding
    /// whitespace with empty entries removed
    #[must_use]
    pub fn enabled_sources(&self) -> Vec<String> {
        self.source
            .enable
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Build the flat option map handed to a source's `reload`
    ///
    /// The source's config sub-section is flattened to dotted string keys
    /// with list values joined by commas, so the relay sees `upstream`,
    /// `timeout` and `delay`, and the store source sees `machines`,
    /// `cache.size` and `cache.ttl`.
    ///
    /// # Example
    ///
    /// ```
    /// use chain_dns::config::Config;
    ///
    /// let config = Config::default();
    /// let opts = config.source_options("etcd");
    /// assert_eq!(opts.get("cache.size").map(String::as_str), Some("64"));
    /// assert_eq!(opts.get("cache.ttl").map(String::as_str), Some("60s"));
    /// ```
    #[must_use]
    pub fn source_options(&self, name: &str) -> HashMap<String, String> {
        let mut options = HashMap::new();

        let section = match name {
            "plain" => serde_json::to_value(&self.source.plain),
            "relay" => serde_json::to_value(&self.source.relay),
            "etcd" => serde_json::to_value(&self.source.etcd),
            _ => return options,
        };

        if let Ok(value) = section {
            flatten_into(&mut options, "", &value);
        }
        options
    }
}

/// Flatten a JSON object into dotted `key => value` pairs
///
/// Arrays become comma-joined strings, scalars are stringified without
/// quotes. Nested objects extend the key with a `.` separator.
fn flatten_into(out: &mut HashMap<String, String>, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_into(out, &key, v);
            }
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(scalar_to_string)
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix.to_string(), joined);
        }
        other => {
            out.insert(prefix.to_string(), scalar_to_string(other));
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a duration written as `<n><unit>` with unit `ms`, `s`, `m` or `h`
///
/// A bare number is taken as seconds; `0` with no unit is accepted.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use chain_dns::config::parse_duration;
///
/// assert_eq!(parse_duration("200ms").unwrap(), Duration::from_millis(200));
/// assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
/// assert!(parse_duration("fast").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let err = || ConfigError::invalid_duration("duration", s);

    if s.is_empty() {
        return Err(err());
    }

    let (number, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    };
    let value: u64 = number.parse().map_err(|_| err())?;

    let duration = match unit {
        "ms" => Duration::from_millis(value),
        "s" | "" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        _ => return Err(err()),
    };
    Ok(duration)
}
