//! Relay source
//!
//! A recursive-forwarding source that races one UDP query per configured
//! upstream and picks a winner. With `delay` at zero the first reply wins
//! outright. With a non-zero `delay` each worker keeps listening on its
//! socket for the delay window after the first reply; a socket that hears
//! *more than one* reply to the same question has been raced by a forging
//! middlebox, and the extra replies are run through [`relay_clean`] to
//! recover the genuine one.
//!
//! Selection across upstreams ([`relay_choose`]) prefers a cleaned
//! (`filtered`) result, then a result from an upstream *not* marked
//! trusted (`U` suffix), then whatever arrived first.
//!
//! # Upstream syntax
//!
//! `host[:port]` with an optional `U` suffix, e.g. `8.8.8.8:53U` for a
//! trusted resolver reached over a tunnel and `10.0.0.1` for the local
//! one. The default port is 53.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType};
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

use super::{Answer, Source};
use crate::client_subnet::ClientSubnet;
use crate::config::parse_duration;
use crate::error::SourceError;

/// Receive buffer size; large enough for EDNS0 replies
const RECV_BUFFER_SIZE: usize = 4096;

/// A forged reply is a lone answer record with an absurd TTL; anything
/// at or above a day is suspect
const FORGERY_TTL_CEILING: u32 = 86_400;

/// TTL threshold above which even the selected reply gets clamped
const SUSPECT_TTL: u32 = 1_800;

/// Replacement TTL for clamped replies
const CLAMPED_TTL: u32 = 300;

/// One configured upstream resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    /// Resolver address
    pub addr: SocketAddr,
    /// Trusted to be free of response forgery (`U` suffix)
    pub unpolluted: bool,
}

impl Upstream {
    /// Parse an upstream spec: `host[:port]` plus optional `U` suffix
    ///
    /// # Errors
    ///
    /// Returns `SourceError::OptionValue` when the address does not parse.
    pub fn parse(spec: &str) -> Result<Self, SourceError> {
        let spec = spec.trim();
        let (addr_part, unpolluted) = match spec.strip_suffix('U') {
            Some(rest) => (rest, true),
            None => (spec, false),
        };

        let addr = if let Ok(addr) = addr_part.parse::<SocketAddr>() {
            addr
        } else if let Ok(ip) = addr_part.parse::<IpAddr>() {
            SocketAddr::new(ip, 53)
        } else {
            return Err(SourceError::option_value(
                "upstream",
                format!("cannot parse '{spec}'"),
            ));
        };

        Ok(Self { addr, unpolluted })
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unpolluted {
            write!(f, "{}U", self.addr)
        } else {
            self.addr.fmt(f)
        }
    }
}

/// What one worker reports back to the collector
#[derive(Debug)]
struct RelayResult {
    upstream: Upstream,
    filtered: bool,
    response: Message,
}

struct RelayState {
    upstreams: Vec<Upstream>,
    timeout: Duration,
    delay: Duration,
}

/// Racing forwarder over UDP upstreams
pub struct RelaySource {
    state: RwLock<Option<Arc<RelayState>>>,
}

impl RelaySource {
    /// Create a source with no loaded state
    ///
    /// The source must be reloaded before its first query.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }

    /// The configured upstreams, if loaded
    #[must_use]
    pub fn upstreams(&self) -> Vec<Upstream> {
        self.state
            .read()
            .as_ref()
            .map_or_else(Vec::new, |state| state.upstreams.clone())
    }

    fn snapshot(&self) -> Arc<RelayState> {
        self.state
            .read()
            .clone()
            .expect("relay source queried before reload")
    }
}

impl Default for RelaySource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RelaySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source.relay")
    }
}

#[async_trait]
impl Source for RelaySource {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn reload(&self, options: &HashMap<String, String>) -> Result<(), SourceError> {
        let spec = options
            .get("upstream")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SourceError::option_missing("upstream"))?;

        let upstreams = spec
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Upstream::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if upstreams.is_empty() {
            return Err(SourceError::option_value("upstream", spec.clone()));
        }

        let timeout = options
            .get("timeout")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SourceError::option_missing("timeout"))?;
        let timeout = parse_duration(timeout)
            .map_err(|e| SourceError::option_value("timeout", e.to_string()))?;

        let delay = match options.get("delay").filter(|v| !v.is_empty()) {
            Some(value) => parse_duration(value)
                .map_err(|e| SourceError::option_value("delay", e.to_string()))?,
            None => Duration::ZERO,
        };

        if !delay.is_zero() && !upstreams.iter().any(|u| u.unpolluted) {
            info!("using polluted upstreams with a non-zero delay");
        }

        *self.state.write() = Some(Arc::new(RelayState {
            upstreams,
            timeout,
            delay,
        }));
        Ok(())
    }

    async fn query(&self, qname: &Name, qtype: RecordType, _client: &ClientSubnet) -> Answer {
        let state = self.snapshot();

        let mut query = Message::new();
        query.set_id(rand::random());
        query.set_recursion_desired(true);
        query.add_query(Query::query(qname.clone(), qtype));

        // Deliver-once channel: sized to the racer count so a worker's
        // try_send never blocks, even after the collector has moved on
        let (tx, mut rx) = mpsc::channel(state.upstreams.len());
        for upstream in state.upstreams.clone() {
            let tx = tx.clone();
            let query = query.clone();
            let delay = state.delay;
            let io_timeout = state.timeout;
            tokio::spawn(async move {
                if let Some(result) = resolve_upstream(upstream, delay, io_timeout, &query).await {
                    let _ = tx.try_send(result);
                }
            });
        }
        drop(tx);

        let results = collect_results(&mut rx, &state).await;

        let Some(chosen) = relay_choose(&results) else {
            let mut answer = Answer::empty();
            answer.recursion_available = true;
            return answer;
        };

        debug!(
            upstream = %chosen.upstream,
            filtered = chosen.filtered,
            qname = %qname,
            "relay answer selected"
        );

        let response = &chosen.response;
        Answer {
            answers: response.answers().to_vec(),
            authorities: response.name_servers().to_vec(),
            additionals: response.additionals().to_vec(),
            rcode: response.response_code(),
            authoritative: false,
            recursion_available: true,
        }
    }
}

/// Gather worker results according to the collection policy
///
/// With no delay the first result ends the wait; with a delay every
/// upstream gets until the overall timeout to report.
async fn collect_results(
    rx: &mut mpsc::Receiver<RelayResult>,
    state: &RelayState,
) -> Vec<RelayResult> {
    let mut results = Vec::new();
    let deadline = Instant::now() + state.timeout;

    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(result)) => {
                results.push(result);
                if state.delay.is_zero() || results.len() == state.upstreams.len() {
                    break;
                }
            }
            // All workers finished or the overall timeout elapsed
            Ok(None) | Err(_) => break,
        }
    }
    results
}

/// Query one upstream and report at most one result
///
/// With a non-zero delay the socket stays open for the delay window after
/// the first reply; extra replies mark the result as filtered and go
/// through [`relay_clean`].
async fn resolve_upstream(
    upstream: Upstream,
    delay: Duration,
    io_timeout: Duration,
    query: &Message,
) -> Option<RelayResult> {
    let query_bytes = match query.to_vec() {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "failed to serialize relay query");
            return None;
        }
    };

    let bind_addr = if upstream.addr.is_ipv6() {
        "[::]:0"
    } else {
        "0.0.0.0:0"
    };
    let socket = match UdpSocket::bind(bind_addr).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!(upstream = %upstream, error = %e, "failed to bind relay socket");
            return None;
        }
    };

    if let Err(e) = socket.send_to(&query_bytes, upstream.addr).await {
        debug!(upstream = %upstream, error = %e, "failed to send relay query");
        return None;
    }

    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    let first = match timeout(io_timeout, recv_reply(&socket, &mut buf, upstream.addr)).await {
        Ok(Some(message)) => message,
        Ok(None) => return None,
        Err(_) => {
            debug!(upstream = %upstream, "relay query timed out");
            return None;
        }
    };

    if delay.is_zero() {
        return Some(RelayResult {
            upstream,
            filtered: false,
            response: first,
        });
    }

    // Keep listening through the delay window; a second reply to the
    // same question means someone raced the real resolver
    let mut replies = vec![first];
    let window_end = Instant::now() + delay;
    loop {
        match tokio::time::timeout_at(window_end, recv_reply(&socket, &mut buf, upstream.addr))
            .await
        {
            Ok(Some(message)) => replies.push(message),
            // Socket error: stop collecting, keep what we have
            Ok(None) => break,
            Err(_) => break,
        }
    }

    let (response, filtered) = if replies.len() == 1 {
        (replies.pop().expect("one reply"), false)
    } else {
        debug!(
            upstream = %upstream,
            replies = replies.len(),
            "cleaning multiple replies to one question"
        );
        (relay_clean(replies), true)
    };

    Some(RelayResult {
        upstream,
        filtered,
        response,
    })
}

/// Receive and parse one reply from the expected peer
///
/// Datagrams from unexpected peers and unparseable packets are dropped.
async fn recv_reply(socket: &UdpSocket, buf: &mut [u8], expected: SocketAddr) -> Option<Message> {
    loop {
        let (len, src) = match socket.recv_from(buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!(error = %e, "relay receive failed");
                return None;
            }
        };
        if src != expected {
            debug!(src = %src, expected = %expected, "reply from unexpected source");
            continue;
        }
        match Message::from_vec(&buf[..len]) {
            Ok(message) => return Some(message),
            Err(e) => {
                debug!(error = %e, "failed to parse relay reply");
                continue;
            }
        }
    }
}

/// Pick the genuine reply out of several answers to the same question
///
/// A forging middlebox answers with exactly one address record carrying a
/// huge TTL. So: any reply that is *not* a lone answer record is returned
/// at once; otherwise the reply with the smallest TTL wins, and if even
/// that TTL looks inflated it is clamped down.
fn relay_clean(replies: Vec<Message>) -> Message {
    let mut lowest: Option<Message> = None;
    let mut min_ttl = FORGERY_TTL_CEILING;

    let mut replies = replies;
    for reply in replies.drain(..) {
        if reply.answers().len() != 1 {
            return reply;
        }

        let ttl = reply.answers()[0].ttl();
        if min_ttl >= ttl {
            min_ttl = ttl;
            lowest = Some(reply);
        } else if lowest.is_none() {
            // Every candidate so far exceeds the ceiling; keep one so
            // the caller still gets an answer
            lowest = Some(reply);
        }
    }

    let mut chosen = lowest.expect("relay_clean called with at least one reply");
    if chosen.answers()[0].ttl() > SUSPECT_TTL {
        // We may still have picked a forgery; limit the damage
        chosen.answers_mut()[0].set_ttl(CLAMPED_TTL);
    }
    chosen
}

/// Select the final result across upstreams
///
/// Filtered results (the race fired and was cleaned) win over everything;
/// otherwise a local (not `U`-marked) upstream's answer is preferred;
/// otherwise the first arrival stands.
fn relay_choose(results: &[RelayResult]) -> Option<&RelayResult> {
    if results.is_empty() {
        return None;
    }

    let mut filtered = None;
    let mut local = None;
    for result in results {
        if result.filtered {
            filtered = Some(result);
        }
        if !result.upstream.unpolluted {
            local = Some(result);
        }
    }

    if let Some(result) = filtered {
        debug!(upstream = %result.upstream, "using filtered answer");
        return Some(result);
    }
    if let Some(result) = local {
        debug!(upstream = %result.upstream, "using local answer");
        return Some(result);
    }
    debug!(upstream = %results[0].upstream, "no local answer, using first arrival");
    Some(&results[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, ResponseCode};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{RData, Record};
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    fn reply_with_answers(count: usize, ttl: u32) -> Message {
        let mut message = Message::new();
        message.set_message_type(MessageType::Response);
        message.set_response_code(ResponseCode::NoError);
        for i in 0..count {
            message.add_answer(Record::from_rdata(
                Name::from_str("foo.com.").unwrap(),
                ttl,
                RData::A(A(Ipv4Addr::new(1, 1, 1, u8::try_from(i + 1).unwrap()))),
            ));
        }
        message
    }

    fn result(upstream: &str, filtered: bool, response: Message) -> RelayResult {
        RelayResult {
            upstream: Upstream::parse(upstream).unwrap(),
            filtered,
            response,
        }
    }

    // ========================================================================
    // Upstream Parsing Tests
    // ========================================================================

    #[test]
    fn test_upstream_parse_with_port() {
        let upstream = Upstream::parse("8.8.8.8:5353").unwrap();
        assert_eq!(upstream.addr, "8.8.8.8:5353".parse().unwrap());
        assert!(!upstream.unpolluted);
    }

    #[test]
    fn test_upstream_parse_default_port() {
        let upstream = Upstream::parse("10.0.0.1").unwrap();
        assert_eq!(upstream.addr, "10.0.0.1:53".parse().unwrap());
    }

    #[test]
    fn test_upstream_parse_unpolluted_suffix() {
        let upstream = Upstream::parse("8.8.8.8:53U").unwrap();
        assert!(upstream.unpolluted);
        assert_eq!(upstream.addr, "8.8.8.8:53".parse().unwrap());

        let bare = Upstream::parse("8.8.4.4U").unwrap();
        assert!(bare.unpolluted);
        assert_eq!(bare.addr, "8.8.4.4:53".parse().unwrap());
    }

    #[test]
    fn test_upstream_parse_trims_whitespace() {
        let upstream = Upstream::parse("  1.1.1.1:53  ").unwrap();
        assert_eq!(upstream.addr, "1.1.1.1:53".parse().unwrap());
    }

    #[test]
    fn test_upstream_parse_rejects_garbage() {
        assert!(Upstream::parse("not-an-address").is_err());
        assert!(Upstream::parse("").is_err());
    }

    #[test]
    fn test_upstream_display_roundtrip() {
        let upstream = Upstream::parse("8.8.8.8:53U").unwrap();
        assert_eq!(upstream.to_string(), "8.8.8.8:53U");
    }

    // ========================================================================
    // Reload Tests
    // ========================================================================

    #[tokio::test]
    async fn test_reload_requires_upstream() {
        let source = RelaySource::new();
        let result = source.reload(&HashMap::new()).await;
        assert!(matches!(result, Err(SourceError::OptionMissing { .. })));
    }

    #[tokio::test]
    async fn test_reload_requires_timeout() {
        let source = RelaySource::new();
        let options = HashMap::from([("upstream".to_string(), "8.8.8.8:53".to_string())]);
        let result = source.reload(&options).await;
        assert!(matches!(result, Err(SourceError::OptionMissing { .. })));
    }

    #[tokio::test]
    async fn test_reload_parses_upstream_list() {
        let source = RelaySource::new();
        let options = HashMap::from([
            ("upstream".to_string(), "8.8.8.8:53U, 10.0.0.1".to_string()),
            ("timeout".to_string(), "2s".to_string()),
            ("delay".to_string(), "200ms".to_string()),
        ]);
        source.reload(&options).await.unwrap();

        let upstreams = source.upstreams();
        assert_eq!(upstreams.len(), 2);
        assert!(upstreams[0].unpolluted);
        assert!(!upstreams[1].unpolluted);
    }

    #[tokio::test]
    async fn test_reload_delay_is_optional() {
        let source = RelaySource::new();
        let options = HashMap::from([
            ("upstream".to_string(), "8.8.8.8:53".to_string()),
            ("timeout".to_string(), "2s".to_string()),
        ]);
        source.reload(&options).await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_rejects_bad_timeout() {
        let source = RelaySource::new();
        let options = HashMap::from([
            ("upstream".to_string(), "8.8.8.8:53".to_string()),
            ("timeout".to_string(), "whenever".to_string()),
        ]);
        let result = source.reload(&options).await;
        assert!(matches!(result, Err(SourceError::OptionValue { .. })));
    }

    // ========================================================================
    // relay_clean Tests
    // ========================================================================

    #[test]
    fn test_relay_clean_prefers_rich_reply() {
        // A forgery is a lone A record; the real resolver sent three
        let forged = reply_with_answers(1, 86_400);
        let genuine = reply_with_answers(3, 300);

        let cleaned = relay_clean(vec![forged, genuine]);
        assert_eq!(cleaned.answers().len(), 3);
    }

    #[test]
    fn test_relay_clean_picks_smallest_ttl() {
        let forged = reply_with_answers(1, 86_000);
        let genuine = reply_with_answers(1, 120);

        let cleaned = relay_clean(vec![forged, genuine]);
        assert_eq!(cleaned.answers()[0].ttl(), 120);
    }

    #[test]
    fn test_relay_clean_clamps_suspect_ttl() {
        let first = reply_with_answers(1, 80_000);
        let second = reply_with_answers(1, 50_000);

        let cleaned = relay_clean(vec![first, second]);
        assert_eq!(cleaned.answers()[0].ttl(), CLAMPED_TTL);
    }

    #[test]
    fn test_relay_clean_leaves_reasonable_ttl_alone() {
        let first = reply_with_answers(1, 600);
        let second = reply_with_answers(1, 900);

        let cleaned = relay_clean(vec![first, second]);
        assert_eq!(cleaned.answers()[0].ttl(), 600);
    }

    // ========================================================================
    // relay_choose Tests
    // ========================================================================

    #[test]
    fn test_relay_choose_empty_is_none() {
        assert!(relay_choose(&[]).is_none());
    }

    #[test]
    fn test_relay_choose_prefers_filtered() {
        let results = vec![
            result("10.0.0.1:53", false, reply_with_answers(1, 300)),
            result("8.8.8.8:53U", true, reply_with_answers(3, 300)),
        ];

        let chosen = relay_choose(&results).unwrap();
        assert!(chosen.filtered);
    }

    #[test]
    fn test_relay_choose_prefers_local_over_trusted() {
        let results = vec![
            result("8.8.8.8:53U", false, reply_with_answers(1, 300)),
            result("10.0.0.1:53", false, reply_with_answers(2, 300)),
        ];

        let chosen = relay_choose(&results).unwrap();
        assert!(!chosen.upstream.unpolluted);
        assert_eq!(chosen.response.answers().len(), 2);
    }

    #[test]
    fn test_relay_choose_falls_back_to_first_arrival() {
        let results = vec![
            result("8.8.8.8:53U", false, reply_with_answers(1, 300)),
            result("8.8.4.4:53U", false, reply_with_answers(2, 300)),
        ];

        let chosen = relay_choose(&results).unwrap();
        assert_eq!(chosen.response.answers().len(), 1);
    }

    // ========================================================================
    // End-to-End Tests (loopback upstream)
    // ========================================================================

    async fn spawn_mock_upstream(replies: Vec<(usize, u32)>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let query = Message::from_vec(&buf[..len]).unwrap();

            for (answers, ttl) in replies {
                let mut reply = reply_with_answers(answers, ttl);
                reply.set_id(query.id());
                for q in query.queries() {
                    reply.add_query(q.clone());
                }
                socket.send_to(&reply.to_vec().unwrap(), peer).await.unwrap();
            }
        });

        addr
    }

    async fn relay_for(upstreams: Vec<String>, delay: &str) -> RelaySource {
        let source = RelaySource::new();
        let options = HashMap::from([
            ("upstream".to_string(), upstreams.join(",")),
            ("timeout".to_string(), "1s".to_string()),
            ("delay".to_string(), delay.to_string()),
        ]);
        source.reload(&options).await.unwrap();
        source
    }

    #[tokio::test]
    async fn test_query_single_upstream() {
        let addr = spawn_mock_upstream(vec![(2, 300)]).await;
        let source = relay_for(vec![addr.to_string()], "0").await;

        let qname = Name::from_str("foo.com.").unwrap();
        let client = ClientSubnet::from_addr("127.0.0.1".parse().unwrap());
        let answer = source.query(&qname, RecordType::A, &client).await;

        assert_eq!(answer.rcode, ResponseCode::NoError);
        assert_eq!(answer.answers.len(), 2);
        assert!(!answer.authoritative);
        assert!(answer.recursion_available);
    }

    #[tokio::test]
    async fn test_query_forged_reply_is_cleaned() {
        // One socket hears two replies: the forgery (lone A, huge TTL)
        // and the genuine one; the cleaned result must win
        let addr = spawn_mock_upstream(vec![(1, 86_000), (3, 300)]).await;
        let source = relay_for(vec![format!("{addr}U")], "200ms").await;

        let qname = Name::from_str("foo.com.").unwrap();
        let client = ClientSubnet::from_addr("127.0.0.1".parse().unwrap());
        let answer = source.query(&qname, RecordType::A, &client).await;

        assert_eq!(answer.answers.len(), 3);
    }

    #[tokio::test]
    async fn test_query_unreachable_upstream_is_empty() {
        // Nothing listens here; the relay must come back empty, not hang
        let source = relay_for(vec!["127.0.0.1:1".to_string()], "0").await;

        let qname = Name::from_str("foo.com.").unwrap();
        let client = ClientSubnet::from_addr("127.0.0.1".parse().unwrap());
        let answer = source.query(&qname, RecordType::A, &client).await;

        assert!(!answer.has_records());
        assert!(answer.recursion_available);
    }

    #[tokio::test]
    #[should_panic(expected = "relay source queried before reload")]
    async fn test_query_before_reload_panics() {
        let source = RelaySource::new();
        let qname = Name::from_str("foo.com.").unwrap();
        let client = ClientSubnet::from_addr("127.0.0.1".parse().unwrap());
        let _ = source.query(&qname, RecordType::A, &client).await;
    }
}
