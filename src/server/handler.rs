//! Query handler
//!
//! The pipeline behind every inbound datagram:
//!
//! ```text
//! Parse ──▶ Validate (exactly one question)
//!   │
//!   ▼
//! Client subnet (source address, EDNS Client-Subnet)
//!   │
//!   ▼
//! Cache ── hit ──▶ Reply (RA cleared)
//!   │ miss
//!   ▼
//! Sources, in configured order ── first non-empty answer wins
//!   │
//!   ▼
//! Compose flags ──▶ Cache put ──▶ Reply
//! ```
//!
//! Flag composition: the reply advertises recursion when *any* consulted
//! source does, and if any source answered authoritatively with NOERROR
//! the reply is authoritative and an NXDOMAIN from a later recursive
//! source is overridden back to NOERROR: the authority owns the cut and
//! must prevail.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use tracing::{debug, trace, warn};

use crate::cache::CacheKey;
use crate::client_subnet::ClientSubnet;
use crate::server::ServerContext;
use crate::source::Answer;

/// Minimum DNS header size; shorter datagrams are noise
const DNS_HEADER_SIZE: usize = 12;

/// Handler counters
#[derive(Debug, Default)]
pub struct HandlerStats {
    queries_received: AtomicU64,
    queries_answered: AtomicU64,
    parse_errors: AtomicU64,
    format_errors: AtomicU64,
    cache_hits: AtomicU64,
}

impl HandlerStats {
    /// Queries received
    #[must_use]
    pub fn queries_received(&self) -> u64 {
        self.queries_received.load(Ordering::Relaxed)
    }

    /// Queries answered (from cache or sources)
    #[must_use]
    pub fn queries_answered(&self) -> u64 {
        self.queries_answered.load(Ordering::Relaxed)
    }

    /// Datagrams that did not parse as DNS
    #[must_use]
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    /// Messages answered with FORMERR
    #[must_use]
    pub fn format_errors(&self) -> u64 {
        self.format_errors.load(Ordering::Relaxed)
    }

    /// Replies served from the cache
    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }
}

/// Turns one inbound datagram into at most one reply datagram
pub struct QueryHandler {
    context: Arc<ServerContext>,
    stats: HandlerStats,
}

impl QueryHandler {
    /// Create a handler over a server context
    #[must_use]
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self {
            context,
            stats: HandlerStats::default(),
        }
    }

    /// Handler counters
    #[must_use]
    pub fn stats(&self) -> &HandlerStats {
        &self.stats
    }

    /// Handle one datagram; `None` means drop silently
    pub async fn handle(&self, client_addr: SocketAddr, data: &[u8]) -> Option<Vec<u8>> {
        self.stats.queries_received.fetch_add(1, Ordering::Relaxed);

        if data.len() < DNS_HEADER_SIZE {
            self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let query = match Message::from_vec(data) {
            Ok(message) => message,
            Err(e) => {
                self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!(client = %client_addr, error = %e, "dropping unparseable datagram");
                return None;
            }
        };

        if query.queries().len() != 1 {
            self.stats.format_errors.fetch_add(1, Ordering::Relaxed);
            debug!(
                client = %client_addr,
                questions = query.queries().len(),
                "rejecting query with unexpected question count"
            );
            return serialize(&error_response(&query, ResponseCode::FormErr));
        }

        let response = self.answer_query(&query, client_addr).await;
        self.stats.queries_answered.fetch_add(1, Ordering::Relaxed);
        serialize(&response)
    }

    async fn answer_query(&self, query: &Message, client_addr: SocketAddr) -> Message {
        let question = &query.queries()[0];
        let qname = question.name().clone();
        let qtype = question.query_type();

        let client = ClientSubnet::from_query(query, client_addr);
        trace!(client = %client, qname = %qname, qtype = %qtype, "query from client");

        let key = CacheKey::new(qname.to_string(), question.query_class(), qtype);

        let mut response = reply_skeleton(query);

        if let Some(cached) = self.context.cache.get(&key) {
            debug!(key = %key, "get from cache");
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            fill_response(&mut response, &cached);
            response.set_recursion_available(false);
            return response;
        }

        let sources = &self.context.sources;
        if sources.is_empty() {
            warn!("no sources enabled; answering SERVFAIL");
            response.set_response_code(ResponseCode::ServFail);
            return response;
        }

        let mut delegation = false;
        let mut recursion = false;
        let mut answer = Answer::empty();

        for source in sources {
            debug!(source = %source, qname = %qname, "trying source");
            answer = source.query(&qname, qtype, &client).await;

            // One authoritative owner of the name colors the final reply
            if answer.rcode == ResponseCode::NoError && answer.authoritative {
                delegation = true;
            }
            if answer.recursion_available {
                recursion = true;
            }

            if answer.has_records() {
                break;
            }
        }

        fill_response(&mut response, &answer);
        response.set_recursion_available(recursion);

        if delegation {
            response.set_authoritative(true);
            if response.response_code() == ResponseCode::NXDomain {
                response.set_response_code(ResponseCode::NoError);
            }
        }

        // The winning answer is cached as the source produced it, before
        // the delegation postfix
        self.context.cache.put(key.clone(), answer);
        debug!(key = %key, "add to cache");

        response
    }
}

/// A response message echoing the query's id, question and RD flag
fn reply_skeleton(query: &Message) -> Message {
    let mut response = Message::new();
    response.set_id(query.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_recursion_desired(query.recursion_desired());
    for question in query.queries() {
        response.add_query(question.clone());
    }
    response
}

/// Copy an answer's sections and flags into a response
fn fill_response(response: &mut Message, answer: &Answer) {
    response.insert_answers(answer.answers.clone());
    response.insert_name_servers(answer.authorities.clone());
    response.insert_additionals(answer.additionals.clone());
    response.set_authoritative(answer.authoritative);
    response.set_response_code(answer.rcode);
}

/// An empty response with the given error code
fn error_response(query: &Message, rcode: ResponseCode) -> Message {
    let mut response = reply_skeleton(query);
    response.set_response_code(rcode);
    response
}

fn serialize(response: &Message) -> Option<Vec<u8>> {
    match response.to_vec() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(error = %e, "failed to serialize response");
            None
        }
    }
}
