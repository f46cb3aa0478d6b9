//! Subnet-keyed record sets
//!
//! Each name in a zone tree can carry different record sets for different
//! client networks (a poor man's split horizon). Records are grouped into
//! buckets by the *exact* CIDR they were loaded under; selection picks the
//! most general bucket that encloses the client without being more
//! specific than the client's own subnet.

use hickory_proto::rr::{Record, RecordType};
use ipnet::IpNet;
use tracing::info;

use crate::client_subnet::ClientSubnet;

/// Records stored under one CIDR
#[derive(Debug, Clone)]
struct Bucket {
    net: IpNet,
    records: Vec<Record>,
}

/// An unordered collection of records grouped by exact CIDR
///
/// # Invariant
///
/// A bucket holds either exactly one CNAME record or no CNAME at all:
/// inserting a CNAME wipes whatever the bucket held before (RFC 1034
/// §3.6.2: CNAME is exclusive).
///
/// # Example
///
/// ```
/// use std::str::FromStr;
/// use hickory_proto::rr::{rdata::A, Name, RData, Record, RecordType};
/// use chain_dns::client_subnet::ClientSubnet;
/// use chain_dns::source::SubnetRecordSet;
///
/// let mut set = SubnetRecordSet::new();
/// let rr = Record::from_rdata(
///     Name::from_str("foo.com.").unwrap(),
///     60,
///     RData::A(A("1.1.1.1".parse().unwrap())),
/// );
/// set.add(rr, "0.0.0.0/0".parse().unwrap());
///
/// let client = ClientSubnet::from_addr("10.0.0.1".parse().unwrap());
/// assert_eq!(set.get(RecordType::A, &client).len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SubnetRecordSet {
    buckets: Vec<Bucket>,
}

impl SubnetRecordSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no bucket holds any record
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.records.is_empty())
    }

    /// Total number of stored records across all buckets
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.records.len()).sum()
    }

    /// Add a record under the given CIDR
    ///
    /// The record lands in the bucket whose CIDR equals `net` exactly,
    /// creating it if needed. A CNAME record replaces the bucket's entire
    /// contents.
    pub fn add(&mut self, record: Record, net: IpNet) {
        let is_cname = record.record_type() == RecordType::CNAME;

        if let Some(bucket) = self.buckets.iter_mut().find(|b| b.net == net) {
            if is_cname {
                info!(
                    name = %record.name(),
                    "overwriting previous records with a CNAME record"
                );
                bucket.records = vec![record];
            } else {
                bucket.records.push(record);
            }
            return;
        }

        self.buckets.push(Bucket {
            net,
            records: vec![record],
        });
    }

    /// Select records of `qtype` for the given client subnet
    ///
    /// Among buckets whose CIDR contains the client address and whose
    /// prefix is not longer than the client's own prefix, the bucket with
    /// the smallest prefix length wins (the most general enclosing subnet
    /// that is not more specific than the client). Ties break by insertion
    /// order. `ANY` matches every record type.
    ///
    /// Returns owned copies; callers are free to rewrite names and TTLs.
    #[must_use]
    pub fn get(&self, qtype: RecordType, client: &ClientSubnet) -> Vec<Record> {
        let mut selected: Option<&Bucket> = None;

        for bucket in &self.buckets {
            if bucket.net.prefix_len() > client.prefix_len() {
                continue;
            }
            if !bucket.net.contains(&client.addr()) {
                continue;
            }

            match selected {
                None => selected = Some(bucket),
                Some(current) if bucket.net.prefix_len() < current.net.prefix_len() => {
                    selected = Some(bucket);
                }
                Some(_) => {}
            }
        }

        let Some(bucket) = selected else {
            return Vec::new();
        };

        bucket
            .records
            .iter()
            .filter(|rr| qtype == RecordType::ANY || rr.record_type() == qtype)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::{A, CNAME};
    use hickory_proto::rr::{Name, RData};
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    fn a_record(name: &str, addr: [u8; 4]) -> Record {
        Record::from_rdata(
            Name::from_str(name).unwrap(),
            60,
            RData::A(A(Ipv4Addr::from(addr))),
        )
    }

    fn cname_record(name: &str, target: &str) -> Record {
        Record::from_rdata(
            Name::from_str(name).unwrap(),
            60,
            RData::CNAME(CNAME(Name::from_str(target).unwrap())),
        )
    }

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn client(addr: &str) -> ClientSubnet {
        ClientSubnet::from_addr(addr.parse().unwrap())
    }

    // ========================================================================
    // Insertion Tests
    // ========================================================================

    #[test]
    fn test_add_groups_by_exact_cidr() {
        let mut set = SubnetRecordSet::new();
        set.add(a_record("foo.com.", [1, 1, 1, 1]), net("0.0.0.0/0"));
        set.add(a_record("foo.com.", [2, 2, 2, 2]), net("0.0.0.0/0"));
        set.add(a_record("foo.com.", [3, 3, 3, 3]), net("10.0.0.0/8"));

        assert_eq!(set.len(), 3);
        let records = set.get(RecordType::A, &client("192.0.2.1"));
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_cname_replaces_bucket_contents() {
        let mut set = SubnetRecordSet::new();
        set.add(a_record("foo.com.", [1, 1, 1, 1]), net("0.0.0.0/0"));
        set.add(a_record("foo.com.", [2, 2, 2, 2]), net("0.0.0.0/0"));
        set.add(cname_record("foo.com.", "bar.com."), net("0.0.0.0/0"));

        assert_eq!(set.len(), 1);
        let records = set.get(RecordType::CNAME, &client("192.0.2.1"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type(), RecordType::CNAME);
    }

    #[test]
    fn test_cname_exclusivity_is_per_bucket() {
        let mut set = SubnetRecordSet::new();
        set.add(a_record("foo.com.", [1, 1, 1, 1]), net("10.0.0.0/8"));
        set.add(cname_record("foo.com.", "bar.com."), net("0.0.0.0/0"));

        // The /8 bucket keeps its A record
        assert_eq!(set.len(), 2);
    }

    // ========================================================================
    // Selection Tests
    // ========================================================================

    #[test]
    fn test_get_filters_by_type() {
        let mut set = SubnetRecordSet::new();
        set.add(a_record("foo.com.", [1, 1, 1, 1]), net("0.0.0.0/0"));

        assert_eq!(set.get(RecordType::A, &client("192.0.2.1")).len(), 1);
        assert!(set.get(RecordType::AAAA, &client("192.0.2.1")).is_empty());
    }

    #[test]
    fn test_get_any_matches_all_types() {
        let mut set = SubnetRecordSet::new();
        set.add(a_record("foo.com.", [1, 1, 1, 1]), net("0.0.0.0/0"));
        set.add(a_record("foo.com.", [2, 2, 2, 2]), net("0.0.0.0/0"));

        assert_eq!(set.get(RecordType::ANY, &client("192.0.2.1")).len(), 2);
    }

    #[test]
    fn test_get_requires_containment() {
        let mut set = SubnetRecordSet::new();
        set.add(a_record("foo.com.", [1, 1, 1, 1]), net("10.0.0.0/8"));

        assert!(set.get(RecordType::A, &client("192.0.2.1")).is_empty());
        assert_eq!(set.get(RecordType::A, &client("10.1.2.3")).len(), 1);
    }

    #[test]
    fn test_get_prefers_most_general_enclosing_bucket() {
        let mut set = SubnetRecordSet::new();
        set.add(a_record("foo.com.", [8, 8, 8, 8]), net("10.0.0.0/8"));
        set.add(a_record("foo.com.", [0, 0, 0, 0]), net("0.0.0.0/0"));

        let records = set.get(RecordType::A, &client("10.1.2.3"));
        assert_eq!(records.len(), 1);
        // Both buckets contain the client; /0 is the more general one
        match records[0].data() {
            Some(RData::A(a)) => assert_eq!(a.0, Ipv4Addr::new(0, 0, 0, 0)),
            other => panic!("unexpected rdata: {other:?}"),
        }
    }

    #[test]
    fn test_get_skips_buckets_more_specific_than_client() {
        let mut set = SubnetRecordSet::new();
        set.add(a_record("foo.com.", [1, 1, 1, 1]), net("10.1.0.0/16"));

        // The client announces a /8: a /16 bucket is more specific than
        // the client's own subnet and must not match
        let wide_client = ClientSubnet::new("10.1.2.3".parse().unwrap(), 8);
        assert!(set.get(RecordType::A, &wide_client).is_empty());

        // A host client may use it
        assert_eq!(set.get(RecordType::A, &client("10.1.2.3")).len(), 1);
    }

    #[test]
    fn test_get_tie_breaks_by_insertion_order() {
        // Buckets keyed by distinct but equivalent CIDR spellings (host
        // bits differ) are equal-prefix ties; the first inserted wins
        let mut set = SubnetRecordSet::new();
        set.add(a_record("foo.com.", [1, 1, 1, 1]), net("10.0.1.0/16"));
        set.add(a_record("foo.com.", [2, 2, 2, 2]), net("10.0.2.0/16"));

        let records = set.get(RecordType::A, &client("10.0.5.5"));
        assert_eq!(records.len(), 1);
        match records[0].data() {
            Some(RData::A(a)) => assert_eq!(a.0, Ipv4Addr::new(1, 1, 1, 1)),
            other => panic!("unexpected rdata: {other:?}"),
        }
    }

    #[test]
    fn test_get_cross_family_never_matches() {
        let mut set = SubnetRecordSet::new();
        set.add(a_record("foo.com.", [1, 1, 1, 1]), net("10.0.0.0/8"));

        let v6_client = client("2001:db8::1");
        assert!(set.get(RecordType::A, &v6_client).is_empty());
    }

    #[test]
    fn test_empty_set() {
        let set = SubnetRecordSet::new();
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
        assert!(set.get(RecordType::ANY, &client("10.0.0.1")).is_empty());
    }
}
