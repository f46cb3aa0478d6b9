//! Error types for chain-dns
//!
//! This module defines the error hierarchy for the server. Errors are
//! categorized by subsystem and carry an `is_recoverable` classification:
//! configuration and source-initialization errors require operator
//! intervention, while transient source failures (an upstream timeout, a
//! store hiccup) never abort anything: the query pipeline treats them as
//! an empty answer and moves on.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Top-level error type for chain-dns
#[derive(Debug, Error)]
pub enum ChainDnsError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Source initialization and lookup errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// UDP listener errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ChainDnsError {
    /// Check if this error is recoverable (the operation can be retried)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Source(e) => e.is_recoverable(),
            Self::Server(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// Malformed duration string (expected forms like `200ms`, `2s`, `1m`)
    #[error("Invalid duration '{value}' for {field}")]
    InvalidDuration { field: String, value: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are never recoverable without operator intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create an invalid duration error
    pub fn invalid_duration(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidDuration {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Answer-source errors
///
/// Initialization errors (`NotRegistered`, `OptionMissing`, `OptionValue`,
/// `ZoneLoad`, `Store` during reload) are fatal at startup and abort a
/// reload. Everything that can happen inside `query` is transient and is
/// logged rather than propagated.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The enabled-source list names a source that was never registered
    #[error("Unknown source: {name}")]
    NotRegistered { name: String },

    /// A required source option is absent from the option map
    #[error("Source option not found: {key}")]
    OptionMissing { key: String },

    /// A source option is present but malformed
    #[error("Source option value error: {key}: {reason}")]
    OptionValue { key: String, reason: String },

    /// A zone file failed to load or parse
    #[error("Failed to load zone file {path}: {reason}")]
    ZoneLoad { path: String, reason: String },

    /// The key-value store client failed (connect or lookup)
    #[error("Key-value store error: {0}")]
    Store(String),

    /// An upstream resolver failed (bad reply, send/receive error)
    #[error("Upstream error ({upstream}): {reason}")]
    Upstream { upstream: SocketAddr, reason: String },
}

impl SourceError {
    /// Create a not-registered error
    pub fn not_registered(name: impl Into<String>) -> Self {
        Self::NotRegistered { name: name.into() }
    }

    /// Create a missing-option error
    pub fn option_missing(key: impl Into<String>) -> Self {
        Self::OptionMissing { key: key.into() }
    }

    /// Create a bad-option error
    pub fn option_value(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OptionValue {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a zone-load error
    pub fn zone_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ZoneLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a store error
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store(reason.into())
    }

    /// Create an upstream error
    pub fn upstream(upstream: SocketAddr, reason: impl Into<String>) -> Self {
        Self::Upstream {
            upstream,
            reason: reason.into(),
        }
    }

    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NotRegistered { .. }
            | Self::OptionMissing { .. }
            | Self::OptionValue { .. }
            | Self::ZoneLoad { .. } => false,
            Self::Store(_) | Self::Upstream { .. } => true,
        }
    }
}

/// UDP listener errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listen address
    #[error("Failed to bind to {addr}: {reason}")]
    BindError { addr: SocketAddr, reason: String },

    /// Socket I/O error while serving
    #[error("Server I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ServerError {
    /// Create a bind error
    pub fn bind(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr,
            reason: reason.into(),
        }
    }

    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::BindError { .. } => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
        }
    }
}

/// Type alias for Result with [`ChainDnsError`]
pub type Result<T> = std::result::Result<T, ChainDnsError>;
