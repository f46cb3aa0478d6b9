//! Server runtime
//!
//! The [`ServerContext`] bundles everything one serving generation needs:
//! the ordered, initialized source chain, the response cache and the bind
//! address. A reload builds a complete new context from a fresh config
//! read and swaps it in atomically; the previous generation's listener is
//! then shut down. A failed build leaves the serving context untouched.

pub mod handler;
pub mod udp;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::ChainDnsError;
use crate::source::{Source, SourceRegistry};

pub use handler::QueryHandler;
pub use udp::UdpServer;

/// Everything one serving generation needs
pub struct ServerContext {
    /// Initialized sources, in consultation order
    pub sources: Vec<Arc<dyn Source>>,
    /// Response cache
    pub cache: ResponseCache,
    /// UDP bind address
    pub addr: SocketAddr,
}

/// Build a serving context from a validated configuration
///
/// Every enabled source is resolved against the registry and reloaded
/// with its option map; the first failure aborts the build so a reload
/// can fall back to the previous context.
///
/// # Errors
///
/// Returns an error for unknown source names, source option errors and
/// unparseable server settings.
pub async fn build_context(
    config: &Config,
    registry: &SourceRegistry,
) -> Result<ServerContext, ChainDnsError> {
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();

    for name in config.enabled_sources() {
        let source = registry
            .create(&name)
            .ok_or_else(|| crate::error::SourceError::not_registered(name.clone()))?;

        source.reload(&config.source_options(&name)).await?;
        info!(source = %source, "source loaded");
        sources.push(source);
    }

    let cache = ResponseCache::new(config.server.cache.size, config.cache_timeout()?);
    let addr = config.listen_addr()?;

    Ok(ServerContext {
        sources,
        cache,
        addr,
    })
}
