//! UDP listener
//!
//! Binds the configured address and fans every datagram out to its own
//! task. The listener runs until told to stop over a watch channel; a
//! reload builds a fresh listener and stops this one, draining in-flight
//! queries naturally (their tasks hold the socket alive until they have
//! replied).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::handler::QueryHandler;
use crate::error::ServerError;

/// Receive buffer size; large enough for EDNS0 queries
const RECV_BUFFER_SIZE: usize = 4096;

/// UDP DNS listener
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    handler: Arc<QueryHandler>,
    local_addr: SocketAddr,
}

impl UdpServer {
    /// Bind the listen address
    ///
    /// # Errors
    ///
    /// Returns `ServerError::BindError` when the socket cannot be bound.
    pub async fn bind(addr: SocketAddr, handler: Arc<QueryHandler>) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| ServerError::bind(addr, e.to_string()))?;
        let local_addr = socket.local_addr().map_err(ServerError::IoError)?;

        info!(addr = %local_addr, "server started");

        Ok(Self {
            socket: Arc::new(socket),
            handler,
            local_addr,
        })
    }

    /// The bound address (useful when binding port 0 in tests)
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the shutdown signal fires
    ///
    /// Each datagram is dispatched on its own task; receive errors are
    /// logged and serving continues.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            warn!(error = %e, "receive failed");
                            continue;
                        }
                    };

                    let data = buf[..len].to_vec();
                    let socket = Arc::clone(&self.socket);
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        if let Some(reply) = handler.handle(peer, &data).await {
                            if let Err(e) = socket.send_to(&reply, peer).await {
                                debug!(peer = %peer, error = %e, "failed to send reply");
                            }
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!(addr = %self.local_addr, "server shutting down");
                    break;
                }
            }
        }
    }
}
