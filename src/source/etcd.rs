//! Key-value store source
//!
//! Authoritative records looked up lazily in an etcd keyspace. Names map
//! to `/`-joined reversed labels (`a.b.c.` → `c/b/a`); the entries one
//! level below a name's key are its records, each value an RFC 1035
//! text-form resource record:
//!
//! ```text
//! com/example/www/a1  =>  "www.example.com. 300 IN A 192.0.2.10"
//! com/example/www/a2  =>  "www.example.com. 300 IN A 192.0.2.11"
//! ```
//!
//! Tree descent probes progressively shorter key prefixes; a name "has a
//! node" when its key exists or anything lives below it. Raw store
//! responses, misses included, are cached in a small per-source cache
//! with a configured TTL, so a burst of queries for the same name costs
//! one round trip.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use etcd_client::{Client, GetOptions};
use hickory_proto::rr::{Name, Record, RecordType};
use hickory_proto::serialize::txt::Parser;
use moka::sync::Cache;
use parking_lot::RwLock;
use tracing::debug;

use super::authority::{resolve, ZoneAuthority};
use super::tree::name_labels;
use super::{Answer, Source};
use crate::client_subnet::ClientSubnet;
use crate::config::parse_duration;
use crate::error::SourceError;

/// One `(relative key, value)` pair fetched from the store
type KvEntry = (String, String);

/// A cached store response: the entries at and below a key, or `None`
/// for a miss
type KvResponse = Arc<Option<Vec<KvEntry>>>;

/// Authoritative source backed by an external key-value store
pub struct EtcdSource {
    state: RwLock<Option<Arc<EtcdState>>>,
}

struct EtcdState {
    client: Client,
    cache: Cache<String, KvResponse>,
}

impl EtcdSource {
    /// Create a source with no loaded state
    ///
    /// The source must be reloaded before its first query.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }

    fn snapshot(&self) -> Arc<EtcdState> {
        self.state
            .read()
            .clone()
            .expect("etcd source queried before reload")
    }
}

impl Default for EtcdSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EtcdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source.etcd")
    }
}

#[async_trait]
impl Source for EtcdSource {
    fn name(&self) -> &'static str {
        "etcd"
    }

    async fn reload(&self, options: &HashMap<String, String>) -> Result<(), SourceError> {
        let machines = options
            .get("machines")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SourceError::option_missing("machines"))?;
        let endpoints: Vec<String> = machines
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(SourceError::option_value("machines", machines.clone()));
        }

        let size = options
            .get("cache.size")
            .ok_or_else(|| SourceError::option_missing("cache.size"))?
            .parse::<u64>()
            .map_err(|e| SourceError::option_value("cache.size", e.to_string()))?;

        let ttl = options
            .get("cache.ttl")
            .ok_or_else(|| SourceError::option_missing("cache.ttl"))?;
        let ttl =
            parse_duration(ttl).map_err(|e| SourceError::option_value("cache.ttl", e.to_string()))?;

        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| SourceError::store(format!("cannot connect to {machines}: {e}")))?;

        let cache = Cache::builder().max_capacity(size).time_to_live(ttl).build();

        *self.state.write() = Some(Arc::new(EtcdState { client, cache }));
        Ok(())
    }

    async fn query(&self, qname: &Name, qtype: RecordType, client: &ClientSubnet) -> Answer {
        let state = self.snapshot();

        let mut answer = resolve(state.as_ref(), qname, qtype, client).await;
        answer.authoritative = true;
        answer
    }
}

impl EtcdState {
    /// The store key for a name: reversed labels joined with `/`
    fn key_for(labels: &[String]) -> String {
        labels.iter().rev().cloned().collect::<Vec<_>>().join("/")
    }

    /// Fetch the entries at and below `key`, serving fresh responses
    /// (including misses) from the per-source cache
    async fn fetch(&self, key: &str) -> KvResponse {
        if let Some(hit) = self.cache.get(key) {
            return hit;
        }

        let response = self.fetch_from_store(key).await;
        self.cache.insert(key.to_string(), response.clone());
        response
    }

    async fn fetch_from_store(&self, key: &str) -> KvResponse {
        let mut client = self.client.clone();
        let mut entries: Vec<KvEntry> = Vec::new();
        let mut exists = false;

        // Children and deeper descendants
        let prefix = format!("{key}/");
        match client
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await
        {
            Ok(resp) => {
                for kv in resp.kvs() {
                    let (Ok(full_key), Ok(value)) = (kv.key_str(), kv.value_str()) else {
                        continue;
                    };
                    let Some(relative) = full_key.strip_prefix(prefix.as_str()) else {
                        continue;
                    };
                    exists = true;
                    entries.push((relative.to_string(), value.to_string()));
                }
            }
            Err(e) => {
                debug!(key = %key, error = %e, "store prefix lookup failed");
                return Arc::new(None);
            }
        }

        // The key itself may exist as a leaf with no children
        if !exists {
            match client.get(key, None).await {
                Ok(resp) => exists = !resp.kvs().is_empty(),
                Err(e) => {
                    debug!(key = %key, error = %e, "store lookup failed");
                    return Arc::new(None);
                }
            }
        }

        if exists {
            Arc::new(Some(entries))
        } else {
            Arc::new(None)
        }
    }
}

#[async_trait]
impl ZoneAuthority for EtcdState {
    async fn find_node(&self, qname: &Name) -> usize {
        let labels = name_labels(qname);

        for matched in (1..=labels.len()).rev() {
            let key = Self::key_for(&labels[labels.len() - matched..]);
            if self.fetch(&key).await.is_some() {
                return labels.len() - matched;
            }
        }
        labels.len()
    }

    // Store records carry no subnet buckets, so the client subnet is unused
    async fn get_rr(&self, name: &Name, qtype: RecordType, _client: &ClientSubnet) -> Vec<Record> {
        let labels = name_labels(name);
        let key = Self::key_for(&labels);

        let response = self.fetch(&key).await;
        let Some(entries) = response.as_ref() else {
            return Vec::new();
        };

        let mut records = Vec::new();
        for (child, value) in entries {
            // Only direct children hold this name's records
            if child.contains('/') {
                continue;
            }
            let Some(record) = parse_text_record(value) else {
                debug!(key = %key, child = %child, "skipping malformed record");
                continue;
            };
            if qtype != RecordType::ANY && record.record_type() != qtype {
                continue;
            }
            records.push(record);
        }
        records
    }
}

/// Parse one RFC 1035 text-form resource record
fn parse_text_record(text: &str) -> Option<Record> {
    let (_, sets) = Parser::new(text, None, Some(Name::root())).parse().ok()?;
    sets.into_values()
        .flat_map(|set| set.records_without_rrsigs().cloned().collect::<Vec<_>>())
        .next()
}
