//! Answer sources
//!
//! A **source** is a named authority that can be asked for an answer to a
//! DNS question. The server consults an ordered chain of sources and the
//! first one to produce a non-empty answer wins. Three sources are built
//! in:
//!
//! - [`plain::PlainSource`]: authoritative records loaded from zone files
//! - [`etcd::EtcdSource`]: authoritative records looked up lazily in an
//!   external key-value store
//! - [`relay::RelaySource`]: a racing forwarder over UDP upstreams
//!
//! The authoritative sources share one lookup algorithm
//! ([`authority::resolve`]) parameterized over tree descent
//! (`find_node`) and record retrieval (`get_rr`).
//!
//! # Architecture
//!
//! ```text
//! Query ──▶ [plain] ──▶ [etcd] ──▶ [relay]
//!              │           │          │
//!              └── authority::resolve ┘
//!                  (plain, etcd only)
//! ```

pub mod authority;
pub mod etcd;
pub mod plain;
pub mod records;
pub mod relay;
pub mod tree;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{Name, Record, RecordType};

use crate::client_subnet::ClientSubnet;
use crate::error::SourceError;

pub use authority::{resolve, ZoneAuthority};
pub use etcd::EtcdSource;
pub use plain::PlainSource;
pub use records::SubnetRecordSet;
pub use relay::RelaySource;
pub use tree::ZoneNode;

/// The answer a source produces for one question
///
/// Mirrors the three record sections of a DNS message plus the flags the
/// pipeline composes: `authoritative` means the source owns `qname`,
/// `recursion_available` advertises that the source recursed (or forwarded)
/// on the client's behalf.
#[derive(Debug, Clone)]
pub struct Answer {
    /// Answer section records
    pub answers: Vec<Record>,
    /// Authority section records (NS delegations)
    pub authorities: Vec<Record>,
    /// Additional section records
    pub additionals: Vec<Record>,
    /// Response code
    pub rcode: ResponseCode,
    /// The source is authoritative for the queried name
    pub authoritative: bool,
    /// The source recursed on the client's behalf
    pub recursion_available: bool,
}

impl Default for Answer {
    fn default() -> Self {
        Self {
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
            rcode: ResponseCode::NoError,
            authoritative: false,
            recursion_available: false,
        }
    }
}

impl Answer {
    /// An empty NOERROR answer
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// An empty answer with the given response code
    #[must_use]
    pub fn with_rcode(rcode: ResponseCode) -> Self {
        Self {
            rcode,
            ..Self::default()
        }
    }

    /// True when any of the three record sections holds a record
    ///
    /// This is the pipeline's winning condition: the first source whose
    /// answer `has_records` ends the chain.
    #[must_use]
    pub fn has_records(&self) -> bool {
        !self.answers.is_empty() || !self.authorities.is_empty() || !self.additionals.is_empty()
    }
}

/// A named authority for DNS questions
///
/// `reload` (re)builds the source's internal state from its flat option
/// map and must leave the previous state untouched on failure. `query`
/// answers one question; it never fails: transient trouble is logged and
/// surfaces as an empty answer so the pipeline can move on to the next
/// source.
///
/// Calling `query` on a source that was never successfully reloaded is a
/// programming error and panics; the server only enables sources whose
/// `reload` succeeded.
#[async_trait]
pub trait Source: Send + Sync + fmt::Display {
    /// The registered name of this source
    fn name(&self) -> &'static str;

    /// Rebuild internal state from the flat option map
    async fn reload(&self, options: &HashMap<String, String>) -> Result<(), SourceError>;

    /// Answer a single question for the given client subnet
    async fn query(&self, qname: &Name, qtype: RecordType, client: &ClientSubnet) -> Answer;
}

/// The table of known sources
///
/// Built once at startup; the configuration's `source.enable` list is
/// resolved against it in order. Each enabled name gets a fresh,
/// not-yet-initialized source instance that the server reloads before
/// serving.
pub struct SourceRegistry {
    entries: Vec<(&'static str, fn() -> Arc<dyn Source>)>,
}

impl SourceRegistry {
    /// The registry of built-in sources
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                ("plain", || Arc::new(PlainSource::new()) as Arc<dyn Source>),
                ("etcd", || Arc::new(EtcdSource::new()) as Arc<dyn Source>),
                ("relay", || Arc::new(RelaySource::new()) as Arc<dyn Source>),
            ],
        }
    }

    /// Names of all registered sources, in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    /// Create a fresh instance of the named source
    ///
    /// Returns `None` for unknown names; the caller treats that as a fatal
    /// configuration error.
    #[must_use]
    pub fn create(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, make)| make())
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_default_is_empty_noerror() {
        let answer = Answer::default();
        assert!(!answer.has_records());
        assert_eq!(answer.rcode, ResponseCode::NoError);
        assert!(!answer.authoritative);
        assert!(!answer.recursion_available);
    }

    #[test]
    fn test_answer_with_rcode() {
        let answer = Answer::with_rcode(ResponseCode::NXDomain);
        assert_eq!(answer.rcode, ResponseCode::NXDomain);
        assert!(!answer.has_records());
    }

    #[test]
    fn test_answer_has_records_any_section() {
        use hickory_proto::rr::{rdata::A, RData};
        use std::net::Ipv4Addr;
        use std::str::FromStr;

        let record = Record::from_rdata(
            Name::from_str("foo.com.").unwrap(),
            60,
            RData::A(A(Ipv4Addr::new(1, 1, 1, 1))),
        );

        let mut answer = Answer::default();
        answer.authorities.push(record);
        assert!(answer.has_records());
    }

    #[test]
    fn test_registry_lists_builtin_sources() {
        let registry = SourceRegistry::builtin();
        assert_eq!(registry.names(), vec!["plain", "etcd", "relay"]);
    }

    #[test]
    fn test_registry_creates_known_sources() {
        let registry = SourceRegistry::builtin();
        for name in registry.names() {
            let source = registry.create(name).expect("registered source");
            assert_eq!(source.name(), name);
        }
    }

    #[test]
    fn test_registry_rejects_unknown_source() {
        let registry = SourceRegistry::builtin();
        assert!(registry.create("carrier-pigeon").is_none());
    }
}
