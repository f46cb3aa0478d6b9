//! Client subnet derivation
//!
//! Subnet-aware record selection needs to know which network the client
//! sits in. The subnet starts as the UDP source address with a host-length
//! prefix; when the query carries an EDNS0 Client-Subnet option (RFC 7871)
//! with a usable family, the option's `(address, source prefix)` pair wins.
//! IPv6 options are accepted and used for containment checks as-is.
//!
//! # Example
//!
//! ```
//! use std::net::{IpAddr, Ipv4Addr};
//! use chain_dns::client_subnet::ClientSubnet;
//!
//! let client = ClientSubnet::from_addr(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)));
//! assert_eq!(client.prefix_len(), 32);
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use hickory_proto::op::Message;
use hickory_proto::rr::rdata::opt::{EdnsCode, EdnsOption};
use ipnet::IpNet;
use tracing::debug;

/// Address family code for IPv4 in an EDNS0 Client-Subnet option
const ECS_FAMILY_IPV4: u16 = 1;
/// Address family code for IPv6 in an EDNS0 Client-Subnet option
const ECS_FAMILY_IPV6: u16 = 2;

/// The client's `(address, prefix)` pair used for subnet record selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSubnet {
    net: IpNet,
}

impl ClientSubnet {
    /// Create a subnet from an address and prefix length
    ///
    /// An out-of-range prefix falls back to the host-length prefix for the
    /// address family.
    #[must_use]
    pub fn new(addr: IpAddr, prefix: u8) -> Self {
        let net = IpNet::new(addr, prefix).unwrap_or_else(|_| Self::host_net(addr));
        Self { net }
    }

    /// Create a host subnet (`/32` or `/128`) from a bare address
    #[must_use]
    pub fn from_addr(addr: IpAddr) -> Self {
        Self {
            net: Self::host_net(addr),
        }
    }

    /// Derive the client subnet for a query message
    ///
    /// Starts from the transport source address, then lets an EDNS0
    /// Client-Subnet option override it.
    #[must_use]
    pub fn from_query(query: &Message, src: SocketAddr) -> Self {
        let transport = Self::from_addr(src.ip());

        let Some(edns) = query.extensions().as_ref() else {
            return transport;
        };
        let Some(option) = edns.option(EdnsCode::Subnet) else {
            return transport;
        };

        match decode_ecs(option) {
            Some(subnet) => {
                debug!(client = %subnet.net, "client subnet from EDNS option");
                subnet
            }
            None => transport,
        }
    }

    /// The client address
    #[must_use]
    pub fn addr(&self) -> IpAddr {
        self.net.addr()
    }

    /// The client prefix length
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    /// The subnet as an [`IpNet`]
    #[must_use]
    pub fn net(&self) -> IpNet {
        self.net
    }

    fn host_net(addr: IpAddr) -> IpNet {
        let prefix = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        // A host-length prefix is always valid for its family
        IpNet::new(addr, prefix).expect("host prefix length")
    }
}

impl std::fmt::Display for ClientSubnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.net.fmt(f)
    }
}

/// Decode an EDNS0 Client-Subnet option body
///
/// Wire layout per RFC 7871 §6: family (2 octets), source prefix length,
/// scope prefix length, then `ceil(source_prefix / 8)` address octets.
fn decode_ecs(option: &EdnsOption) -> Option<ClientSubnet> {
    let data: Vec<u8> = match option {
        EdnsOption::Unknown(_, data) => data.clone(),
        _ => return None,
    };

    if data.len() < 4 {
        return None;
    }

    let family = u16::from_be_bytes([data[0], data[1]]);
    let source_prefix = data[2];
    let address = &data[4..];

    let expected = usize::from(source_prefix.div_ceil(8));
    if address.len() < expected {
        return None;
    }

    let addr = match family {
        ECS_FAMILY_IPV4 => {
            if source_prefix > 32 {
                return None;
            }
            let mut octets = [0u8; 4];
            for (i, b) in address.iter().take(4).enumerate() {
                octets[i] = *b;
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        ECS_FAMILY_IPV6 => {
            if source_prefix > 128 {
                return None;
            }
            let mut octets = [0u8; 16];
            for (i, b) in address.iter().take(16).enumerate() {
                octets[i] = *b;
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };

    Some(ClientSubnet::new(addr, source_prefix))
}
