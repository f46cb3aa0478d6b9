//! In-memory zone tree
//!
//! A trie keyed by single DNS labels, walked right to left: inserting
//! `a.b.example.` visits root → `example` → `b` → `a`. The root node
//! represents `.` and holds no records of its own. Trees are built once
//! per reload and read-only afterwards.

use std::collections::HashMap;

use hickory_proto::rr::{Name, Record, RecordType};
use ipnet::IpNet;

use super::records::SubnetRecordSet;
use crate::client_subnet::ClientSubnet;

/// Split a name into its lowercased labels, leftmost (most specific) first
///
/// # Example
///
/// ```
/// use std::str::FromStr;
/// use hickory_proto::rr::Name;
/// use chain_dns::source::tree::name_labels;
///
/// let name = Name::from_str("A.B.Example.").unwrap();
/// assert_eq!(name_labels(&name), vec!["a", "b", "example"]);
/// ```
#[must_use]
pub fn name_labels(name: &Name) -> Vec<String> {
    name.iter()
        .map(|label| String::from_utf8_lossy(label).to_lowercase())
        .collect()
}

/// A node of the zone tree
#[derive(Debug, Default)]
pub struct ZoneNode {
    records: SubnetRecordSet,
    children: HashMap<String, ZoneNode>,
}

impl ZoneNode {
    /// Create an empty node (used as the root of a new tree)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under its own name, keyed by the given CIDR
    ///
    /// Labels are walked right to left from this node, creating missing
    /// children on the way. The record's stored name keeps its original
    /// case; tree keys are lowercased.
    pub fn insert(&mut self, record: Record, net: IpNet) {
        let labels = name_labels(record.name());

        let mut node = self;
        for label in labels.iter().rev() {
            node = node.children.entry(label.clone()).or_default();
        }
        node.records.add(record, net);
    }

    /// Descend along `labels` and report how many were left unmatched
    ///
    /// `0` means the full name resolves to a node, `1` means only the
    /// parent matched, larger values mean only a more distant ancestor
    /// matched.
    #[must_use]
    pub fn find(&self, labels: &[String]) -> usize {
        let mut node = self;
        for (depth, label) in labels.iter().rev().enumerate() {
            match node.children.get(label) {
                Some(child) => node = child,
                None => return labels.len() - depth,
            }
        }
        0
    }

    /// The node at exactly `labels`, if present
    #[must_use]
    pub fn node_at(&self, labels: &[String]) -> Option<&ZoneNode> {
        let mut node = self;
        for label in labels.iter().rev() {
            node = node.children.get(label)?;
        }
        Some(node)
    }

    /// Records of `qtype` stored at exactly `labels`, subnet-selected
    #[must_use]
    pub fn records_at(
        &self,
        labels: &[String],
        qtype: RecordType,
        client: &ClientSubnet,
    ) -> Vec<Record> {
        match self.node_at(labels) {
            Some(node) => node.records.get(qtype, client),
            None => Vec::new(),
        }
    }

    /// Number of direct children
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Total records stored in this subtree
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
            + self
                .children
                .values()
                .map(ZoneNode::record_count)
                .sum::<usize>()
    }
}
