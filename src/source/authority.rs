//! Shared authoritative lookup algorithm
//!
//! Both authoritative sources (zone files, key-value store) answer queries
//! with the same RFC 1034 §4.3.2-style case analysis; only tree descent
//! and record retrieval differ. [`ZoneAuthority`] captures those two
//! capabilities and [`resolve`] drives the algorithm over any
//! implementation:
//!
//! - **full match**: return the records of the queried type, falling back
//!   to a stored CNAME (single level; chasing the target is the client's
//!   job)
//! - **one label missing**: try wildcard synthesis (`*.<parent>`), then a
//!   delegation at the parent, then NXDOMAIN; a query that is already a
//!   wildcard never synthesizes again
//! - **more labels missing**: only a delegation at the deepest matching
//!   ancestor can save the query
//!
//! Every returned record carries the query name: records found under a
//! wildcard or delegation node are copied and renamed so stored names
//! never leak.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{Name, Record, RecordType};
use tracing::trace;

use super::tree::name_labels;
use super::Answer;
use crate::client_subnet::ClientSubnet;

/// The two capabilities a source must supply to get authoritative
/// query semantics
#[async_trait]
pub trait ZoneAuthority: Send + Sync {
    /// Walk the tree towards `qname` and report how many of its labels
    /// were left unmatched (`0` = the full name resolves to a node)
    async fn find_node(&self, qname: &Name) -> usize;

    /// Records of `qtype` stored at exactly `name`, subnet-selected;
    /// `ANY` matches every type
    async fn get_rr(&self, name: &Name, qtype: RecordType, client: &ClientSubnet) -> Vec<Record>;
}

/// Answer `qname`/`qtype` against an authority
///
/// Implements the case analysis described in the module docs and rewrites
/// every returned record's name to `qname` before handing the answer
/// back.
pub async fn resolve<A>(
    authority: &A,
    qname: &Name,
    qtype: RecordType,
    client: &ClientSubnet,
) -> Answer
where
    A: ZoneAuthority + ?Sized,
{
    let mut answer = lookup(authority, qname.clone(), qtype, client).await;

    answer.answers = rewrite_names(answer.answers, qname);
    answer.authorities = rewrite_names(answer.authorities, qname);
    answer.additionals = rewrite_names(answer.additionals, qname);
    answer
}

/// The recursive part of the lookup
///
/// Boxed because the wildcard arm re-enters with the synthesized name;
/// the recursion is at most one level deep (a wildcard query never
/// synthesizes another wildcard).
fn lookup<'a, A>(
    authority: &'a A,
    qname: Name,
    qtype: RecordType,
    client: &'a ClientSubnet,
) -> Pin<Box<dyn Future<Output = Answer> + Send + 'a>>
where
    A: ZoneAuthority + ?Sized,
{
    Box::pin(async move {
        let labels = name_labels(&qname);
        let remains = authority.find_node(&qname).await;
        trace!(qname = %qname, remains, "authoritative descent");

        match remains {
            // The full name resolves to a node
            0 => {
                let records = authority.get_rr(&qname, qtype, client).await;
                if !records.is_empty() {
                    return Answer {
                        answers: records,
                        ..Answer::empty()
                    };
                }

                if qtype == RecordType::CNAME {
                    // No CNAME stored: empty NOERROR
                    return Answer::empty();
                }

                // Fall back to a stored CNAME; the target is not chased
                let cname = authority.get_rr(&qname, RecordType::CNAME, client).await;
                Answer {
                    answers: cname,
                    ..Answer::empty()
                }
            }

            // Only the parent matched: wildcard, then delegation
            1 => {
                if qname.is_wildcard() {
                    return Answer::with_rcode(ResponseCode::NXDomain);
                }

                let wildcard = qname.clone().into_wildcard();
                let answer = lookup(authority, wildcard, qtype, client).await;
                if answer.rcode != ResponseCode::NXDomain {
                    return answer;
                }

                delegation_or_nxdomain(authority, &qname, labels.len() - 1, client).await
            }

            // Only a more distant ancestor matched: delegation only
            _ => {
                let matched = labels.len().saturating_sub(remains);
                delegation_or_nxdomain(authority, &qname, matched, client).await
            }
        }
    })
}

/// Look for an NS delegation at the deepest matching ancestor
async fn delegation_or_nxdomain<A>(
    authority: &A,
    qname: &Name,
    matched_labels: usize,
    client: &ClientSubnet,
) -> Answer
where
    A: ZoneAuthority + ?Sized,
{
    let suffix = qname.trim_to(matched_labels);
    let records = authority.get_rr(&suffix, RecordType::NS, client).await;

    if records.is_empty() {
        Answer::with_rcode(ResponseCode::NXDomain)
    } else {
        Answer {
            authorities: records,
            ..Answer::empty()
        }
    }
}

/// Rewrite every record's name to the query name
///
/// Records already carrying the query name pass through untouched; the
/// rest are copied with the name replaced so wildcard and delegation
/// nodes never leak their stored names.
fn rewrite_names(records: Vec<Record>, qname: &Name) -> Vec<Record> {
    records
        .into_iter()
        .map(|mut record| {
            if record.name() != qname {
                record.set_name(qname.clone());
            }
            record
        })
        .collect()
}
