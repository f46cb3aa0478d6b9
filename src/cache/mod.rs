//! Response cache
//!
//! A bounded LRU of complete answers with TTL decay on read. Entries are
//! immutable once stored: a hit returns fresh record copies whose TTLs are
//! reduced by the entry's age. An entry whose age exceeds the configured
//! ceiling, or in which *any* record's TTL has run out, is a miss.
//!
//! Capacity semantics: `0` disables the cache entirely, `-1` means
//! unbounded, anything positive is the LRU capacity.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use hickory_proto::rr::{DNSClass, RecordType};
//! use chain_dns::cache::{CacheKey, ResponseCache};
//! use chain_dns::source::Answer;
//!
//! let cache = ResponseCache::new(1024, Duration::from_secs(60));
//! let key = CacheKey::new("foo.com.", DNSClass::IN, RecordType::A);
//!
//! cache.put(key.clone(), Answer::empty());
//! assert!(cache.get(&key).is_some());
//! ```

pub mod key;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hickory_proto::rr::Record;
use moka::sync::Cache;
use tracing::debug;

use crate::source::Answer;

pub use key::CacheKey;

/// Cache hit/miss counters
///
/// All counters are atomic; readers take a [`CacheStatsSnapshot`].
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot
    #[must_use]
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the cache counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStatsSnapshot {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that fell through (absent, stale or expired)
    pub misses: u64,
    /// Entries stored
    pub inserts: u64,
}

/// One stored answer with its insertion time
#[derive(Debug, Clone)]
struct CacheEntry {
    answer: Answer,
    inserted_at: Instant,
}

/// TTL-decaying LRU of complete answers
#[derive(Clone)]
pub struct ResponseCache {
    cache: Option<Cache<CacheKey, CacheEntry>>,
    timeout: Duration,
    stats: Arc<CacheStats>,
}

impl ResponseCache {
    /// Create a cache
    ///
    /// `size` semantics: `0` disables caching (every lookup misses and
    /// `put` is a no-op), `-1` builds an unbounded cache, positive values
    /// bound the LRU. `timeout` is the whole-entry age ceiling applied on
    /// top of per-record TTLs.
    #[must_use]
    pub fn new(size: i64, timeout: Duration) -> Self {
        let cache = match size {
            0 => None,
            -1 => Some(Cache::builder().build()),
            _ => Some(
                Cache::builder()
                    .max_capacity(size.unsigned_abs())
                    .build(),
            ),
        };

        Self {
            cache,
            timeout,
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// A cache that never stores anything
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// True when the cache stores entries at all
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> u64 {
        self.cache.as_ref().map_or(0, Cache::entry_count)
    }

    /// True when nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Store an answer under the key
    pub fn put(&self, key: CacheKey, answer: Answer) {
        let Some(cache) = &self.cache else {
            return;
        };

        cache.insert(
            key,
            CacheEntry {
                answer,
                inserted_at: Instant::now(),
            },
        );
        self.stats.record_insert();
    }

    /// Look up an answer, decaying TTLs by the entry's age
    ///
    /// Misses when the key is absent, the entry is older than the
    /// configured ceiling, or any stored record's TTL is used up. Stored
    /// entries are never mutated; hits carry copies.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Answer> {
        let cache = self.cache.as_ref()?;

        let Some(entry) = cache.get(key) else {
            debug!(key = %key, "cache miss");
            self.stats.record_miss();
            return None;
        };

        match decay(&entry, entry.inserted_at.elapsed(), self.timeout) {
            Some(answer) => {
                self.stats.record_hit();
                Some(answer)
            }
            None => {
                debug!(key = %key, "cache entry expired");
                self.stats.record_miss();
                None
            }
        }
    }
}

/// Apply TTL decay to a stored entry
///
/// Returns `None` when the entry's age exceeds the ceiling or any record
/// has no TTL left; otherwise a fresh answer whose record copies carry
/// the reduced TTLs.
fn decay(entry: &CacheEntry, elapsed: Duration, timeout: Duration) -> Option<Answer> {
    if elapsed > timeout {
        return None;
    }

    let seconds = u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX);

    let answers = decay_section(&entry.answer.answers, seconds)?;
    let authorities = decay_section(&entry.answer.authorities, seconds)?;
    let additionals = decay_section(&entry.answer.additionals, seconds)?;

    Some(Answer {
        answers,
        authorities,
        additionals,
        rcode: entry.answer.rcode,
        authoritative: entry.answer.authoritative,
        recursion_available: false,
    })
}

/// Copy a section with TTLs reduced by `seconds`
///
/// `None` when any record's TTL is used up; one stale record expires the
/// whole entry.
fn decay_section(records: &[Record], seconds: u32) -> Option<Vec<Record>> {
    let mut fresh = Vec::with_capacity(records.len());
    for record in records {
        if record.ttl() <= seconds {
            debug!(record = %record, elapsed = seconds, "record TTL expired");
            return None;
        }
        let mut copy = record.clone();
        copy.set_ttl(record.ttl() - seconds);
        fresh.push(copy);
    }
    Some(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::ResponseCode;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    fn a_record(ttl: u32) -> Record {
        Record::from_rdata(
            Name::from_str("foo.com.").unwrap(),
            ttl,
            RData::A(A(Ipv4Addr::new(1, 1, 1, 1))),
        )
    }

    fn answer_with_ttl(ttl: u32) -> Answer {
        Answer {
            answers: vec![a_record(ttl)],
            authoritative: true,
            ..Answer::empty()
        }
    }

    fn key() -> CacheKey {
        CacheKey::new("foo.com.", DNSClass::IN, RecordType::A)
    }

    fn entry(answer: Answer) -> CacheEntry {
        CacheEntry {
            answer,
            inserted_at: Instant::now(),
        }
    }

    const MINUTE: Duration = Duration::from_secs(60);

    // ========================================================================
    // Basic Operations
    // ========================================================================

    #[test]
    fn test_put_then_get() {
        let cache = ResponseCache::new(16, MINUTE);
        cache.put(key(), answer_with_ttl(60));

        let hit = cache.get(&key()).expect("hit");
        assert_eq!(hit.answers.len(), 1);
        assert!(hit.authoritative);
        assert_eq!(hit.rcode, ResponseCode::NoError);
    }

    #[test]
    fn test_get_absent_key_misses() {
        let cache = ResponseCache::new(16, MINUTE);
        assert!(cache.get(&key()).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_hit_clears_recursion_flag() {
        let cache = ResponseCache::new(16, MINUTE);
        let mut answer = answer_with_ttl(60);
        answer.recursion_available = true;
        cache.put(key(), answer);

        let hit = cache.get(&key()).expect("hit");
        assert!(!hit.recursion_available);
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let cache = ResponseCache::new(0, MINUTE);
        assert!(!cache.is_enabled());

        cache.put(key(), answer_with_ttl(60));
        assert!(cache.get(&key()).is_none());
    }

    #[test]
    fn test_unbounded_cache_stores() {
        let cache = ResponseCache::new(-1, MINUTE);
        assert!(cache.is_enabled());

        cache.put(key(), answer_with_ttl(60));
        assert!(cache.get(&key()).is_some());
    }

    #[test]
    fn test_stats_track_operations() {
        let cache = ResponseCache::new(16, MINUTE);
        cache.put(key(), answer_with_ttl(60));
        let _ = cache.get(&key());
        let _ = cache.get(&CacheKey::new("other.com.", DNSClass::IN, RecordType::A));

        let stats = cache.stats();
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    // ========================================================================
    // TTL Decay
    // ========================================================================

    #[test]
    fn test_decay_reduces_ttl_by_elapsed() {
        let e = entry(answer_with_ttl(60));
        let hit = decay(&e, Duration::from_secs(30), MINUTE).expect("fresh");
        assert_eq!(hit.answers[0].ttl(), 30);
    }

    #[test]
    fn test_decay_keeps_stored_entry_untouched() {
        let e = entry(answer_with_ttl(60));
        let _ = decay(&e, Duration::from_secs(30), MINUTE);
        assert_eq!(e.answer.answers[0].ttl(), 60);
    }

    #[test]
    fn test_decay_expires_when_ttl_used_up() {
        let e = entry(answer_with_ttl(60));
        assert!(decay(&e, Duration::from_secs(60), Duration::from_secs(120)).is_none());
        assert!(decay(&e, Duration::from_secs(61), Duration::from_secs(120)).is_none());
    }

    #[test]
    fn test_decay_respects_entry_ceiling() {
        let e = entry(answer_with_ttl(600));
        // Age below the ceiling: fine
        assert!(decay(&e, Duration::from_secs(59), MINUTE).is_some());
        // Age above the ceiling: miss even though record TTLs survive
        assert!(decay(&e, Duration::from_secs(61), MINUTE).is_none());
    }

    #[test]
    fn test_decay_one_stale_record_expires_entry() {
        let mut answer = answer_with_ttl(600);
        answer.authorities.push(a_record(10));

        let e = entry(answer);
        assert!(decay(&e, Duration::from_secs(30), MINUTE).is_none());
    }

    #[test]
    fn test_decay_spans_all_sections() {
        let mut answer = answer_with_ttl(60);
        answer.authorities.push(a_record(90));
        answer.additionals.push(a_record(120));

        let e = entry(answer);
        let hit = decay(&e, Duration::from_secs(30), MINUTE).expect("fresh");
        assert_eq!(hit.answers[0].ttl(), 30);
        assert_eq!(hit.authorities[0].ttl(), 60);
        assert_eq!(hit.additionals[0].ttl(), 90);
    }

    #[test]
    fn test_decay_zero_elapsed_returns_full_ttl() {
        let e = entry(answer_with_ttl(60));
        let hit = decay(&e, Duration::ZERO, MINUTE).expect("fresh");
        assert_eq!(hit.answers[0].ttl(), 60);
    }

    #[test]
    fn test_decay_preserves_rcode_and_auth() {
        let mut answer = answer_with_ttl(60);
        answer.rcode = ResponseCode::NXDomain;
        answer.authoritative = true;

        let e = entry(answer);
        let hit = decay(&e, Duration::from_secs(1), MINUTE).expect("fresh");
        assert_eq!(hit.rcode, ResponseCode::NXDomain);
        assert!(hit.authoritative);
    }

    #[test]
    fn test_empty_answer_is_cacheable() {
        // NXDOMAIN answers have no records and never expire by TTL,
        // only by the entry ceiling
        let e = entry(Answer::with_rcode(ResponseCode::NXDomain));
        assert!(decay(&e, Duration::from_secs(59), MINUTE).is_some());
        assert!(decay(&e, Duration::from_secs(61), MINUTE).is_none());
    }
}
