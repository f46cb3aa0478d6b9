//! Plain-file source
//!
//! Loads RFC 1035 master files from a directory tree into an in-memory
//! zone tree and answers queries through the shared authoritative lookup.
//!
//! The loader walks the configured path recursively. Directories are only
//! traversed, files whose basename starts with `.` are skipped, and every
//! other file is parsed as a zone file with origin `.`. A file's basename
//! doubles as its default CIDR using the `prefix.length` convention
//! (`10.0.0.0.8` → `10.0.0.0/8`); anything that does not parse falls back
//! to `0.0.0.0/0`.
//!
//! Reload builds a complete new tree and swaps it in atomically; queries
//! run against a snapshot and never see a half-built tree.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::rr::{Name, Record, RecordType};
use hickory_proto::serialize::txt::Parser;
use ipnet::IpNet;
use parking_lot::RwLock;
use tracing::debug;

use super::authority::{resolve, ZoneAuthority};
use super::tree::{name_labels, ZoneNode};
use super::{Answer, Source};
use crate::client_subnet::ClientSubnet;
use crate::error::SourceError;

/// Authoritative source backed by zone files on disk
pub struct PlainSource {
    state: RwLock<Option<Arc<PlainState>>>,
}

struct PlainState {
    path: PathBuf,
    root: ZoneNode,
}

impl PlainSource {
    /// Create a source with no loaded state
    ///
    /// The source must be reloaded before its first query.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }

    /// Number of records currently loaded
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state
            .read()
            .as_ref()
            .map_or(0, |state| state.root.record_count())
    }

    /// The zone path of the current state, if loaded
    #[must_use]
    pub fn zone_path(&self) -> Option<PathBuf> {
        self.state.read().as_ref().map(|state| state.path.clone())
    }

    fn snapshot(&self) -> Arc<PlainState> {
        self.state
            .read()
            .clone()
            .expect("plain source queried before reload")
    }
}

impl Default for PlainSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlainSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source.plain")
    }
}

#[async_trait]
impl Source for PlainSource {
    fn name(&self) -> &'static str {
        "plain"
    }

    async fn reload(&self, options: &HashMap<String, String>) -> Result<(), SourceError> {
        let path = options
            .get("path")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SourceError::option_missing("path"))?;

        let root = load_tree(Path::new(path))?;
        debug!(path = %path, records = root.record_count(), "zone tree built");

        *self.state.write() = Some(Arc::new(PlainState {
            path: PathBuf::from(path),
            root,
        }));
        Ok(())
    }

    async fn query(&self, qname: &Name, qtype: RecordType, client: &ClientSubnet) -> Answer {
        let state = self.snapshot();

        let mut answer = resolve(state.as_ref(), qname, qtype, client).await;
        answer.authoritative = true;
        answer
    }
}

#[async_trait]
impl ZoneAuthority for PlainState {
    async fn find_node(&self, qname: &Name) -> usize {
        self.root.find(&name_labels(qname))
    }

    async fn get_rr(&self, name: &Name, qtype: RecordType, client: &ClientSubnet) -> Vec<Record> {
        self.root.records_at(&name_labels(name), qtype, client)
    }
}

/// Walk `path` and build a zone tree from every visible file
fn load_tree(path: &Path) -> Result<ZoneNode, SourceError> {
    let mut root = ZoneNode::new();
    load_path(path, &mut root)?;
    Ok(root)
}

fn load_path(path: &Path, root: &mut ZoneNode) -> Result<(), SourceError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| SourceError::zone_load(path.display().to_string(), e.to_string()))?;

    if metadata.is_dir() {
        let entries = std::fs::read_dir(path)
            .map_err(|e| SourceError::zone_load(path.display().to_string(), e.to_string()))?;
        for entry in entries {
            let entry = entry
                .map_err(|e| SourceError::zone_load(path.display().to_string(), e.to_string()))?;
            load_path(&entry.path(), root)?;
        }
        return Ok(());
    }

    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    if hidden {
        debug!(file = %path.display(), "loading file (ignore)");
        return Ok(());
    }

    load_file(path, root)?;
    debug!(file = %path.display(), "loading file (success)");
    Ok(())
}

fn load_file(path: &Path, root: &mut ZoneNode) -> Result<(), SourceError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| SourceError::zone_load(path.display().to_string(), e.to_string()))?;

    let net = default_cidr(path);

    let (_, sets) = Parser::new(contents, Some(path.to_path_buf()), Some(Name::root()))
        .parse()
        .map_err(|e| SourceError::zone_load(path.display().to_string(), e.to_string()))?;

    for set in sets.into_values() {
        for record in set.records_without_rrsigs() {
            debug!(record = %record, net = %net, "add to tree");
            root.insert(record.clone(), net);
        }
    }
    Ok(())
}

/// Derive a file's default CIDR from its basename
///
/// `10.0.0.0.8` means `10.0.0.0/8`; anything else means the whole v4
/// space. The parsed network is truncated to its prefix so host bits in
/// sloppy file names do not matter.
fn default_cidr(path: &Path) -> IpNet {
    let fallback: IpNet = "0.0.0.0/0".parse().expect("fallback CIDR");

    let Some(base) = path.file_name().and_then(|n| n.to_str()) else {
        return fallback;
    };
    let Some((prefix, length)) = base.rsplit_once('.') else {
        return fallback;
    };

    format!("{prefix}/{length}")
        .parse::<IpNet>()
        .map(|net| net.trunc())
        .unwrap_or(fallback)
}
