//! chain-dns: an authoritative-plus-forwarding DNS server
//!
//! chain-dns answers DNS queries over UDP by consulting an ordered chain
//! of pluggable answer **sources** and caching the composed result with
//! TTL decay. Three sources are built in: zone files on disk, records in
//! an etcd keyspace, and a racing UDP forwarder with an anti-forgery
//! heuristic.
//!
//! # Architecture
//!
//! ```text
//! UDP datagram ──▶ QueryHandler
//!                     │
//!                 ResponseCache ── hit ──▶ reply
//!                     │ miss
//!                     ▼
//!          [plain] → [etcd] → [relay]     (configured order,
//!                     │                    first non-empty answer wins)
//!                     ▼
//!              compose flags, cache, reply
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chain_dns::config::Config;
//! use chain_dns::server::{build_context, QueryHandler, UdpServer};
//! use chain_dns::source::SourceRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::default().with_sources(vec!["plain".into()]);
//! config.source.plain.path = "/etc/chain-dns/zones".into();
//!
//! let registry = SourceRegistry::builtin();
//! let context = Arc::new(build_context(&config, &registry).await?);
//!
//! let handler = Arc::new(QueryHandler::new(context.clone()));
//! let server = UdpServer::bind(context.addr, handler).await?;
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! server.run(shutdown_rx).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`]: TTL-decaying response cache
//! - [`client_subnet`]: client `(address, prefix)` derivation
//! - [`config`]: configuration types and loading
//! - [`error`]: error types
//! - [`server`]: UDP listener, query handler, reloadable context
//! - [`source`]: the source chain (zone files, etcd, relay)

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cache;
pub mod client_subnet;
pub mod config;
pub mod error;
pub mod server;
pub mod source;

// Re-export commonly used types at the crate root
pub use cache::{CacheKey, ResponseCache};
pub use client_subnet::ClientSubnet;
pub use config::Config;
pub use error::{ChainDnsError, ConfigError, Result, ServerError, SourceError};
pub use server::{build_context, QueryHandler, ServerContext, UdpServer};
pub use source::{Answer, Source, SourceRegistry};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
