//! Configuration types and loading
//!
//! See [`types::Config`] for the configuration shape and
//! [`loader::load_config`] for file loading with environment overrides.

pub mod loader;
pub mod types;

pub use loader::{
    apply_env_overrides, default_config_json, load_config, load_config_str, load_config_with_env,
};
pub use types::{
    parse_duration, Config, EtcdCacheConfig, EtcdConfig, LogConfig, PlainConfig, RelayConfig,
    ServerCacheConfig, ServerConfig, SourceConfig,
};
