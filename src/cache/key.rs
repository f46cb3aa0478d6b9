//! Response cache keys
//!
//! A key is the question triple `(qname, qclass, qtype)` with the name
//! lowercased, rendered as `"<qname> <class> <qtype>"` for logs.

use std::fmt;

use hickory_proto::op::Message;
use hickory_proto::rr::{DNSClass, RecordType};

/// Cache key for one DNS question
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    qname: String,
    qclass: DNSClass,
    qtype: RecordType,
}

impl CacheKey {
    /// Create a key; the name is lowercased for case-insensitive lookup
    #[must_use]
    pub fn new(qname: impl Into<String>, qclass: DNSClass, qtype: RecordType) -> Self {
        let qname: String = qname.into();
        Self {
            qname: qname.to_lowercase(),
            qclass,
            qtype,
        }
    }

    /// Extract the key from a query message's first question
    ///
    /// Returns `None` if the message has no question.
    #[must_use]
    pub fn from_query(query: &Message) -> Option<Self> {
        let question = query.queries().first()?;
        Some(Self::new(
            question.name().to_string(),
            question.query_class(),
            question.query_type(),
        ))
    }

    /// The lowercased query name
    #[must_use]
    pub fn qname(&self) -> &str {
        &self.qname
    }

    /// The query class
    #[must_use]
    pub fn qclass(&self) -> DNSClass {
        self.qclass
    }

    /// The query type
    #[must_use]
    pub fn qtype(&self) -> RecordType {
        self.qtype
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.qname, self.qclass, self.qtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::Name;
    use std::str::FromStr;

    #[test]
    fn test_key_lowercases_name() {
        let key = CacheKey::new("FOO.Com.", DNSClass::IN, RecordType::A);
        assert_eq!(key.qname(), "foo.com.");
    }

    #[test]
    fn test_key_equality_is_case_insensitive() {
        let a = CacheKey::new("FOO.COM.", DNSClass::IN, RecordType::A);
        let b = CacheKey::new("foo.com.", DNSClass::IN, RecordType::A);
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_distinguishes_type_and_class() {
        let a = CacheKey::new("foo.com.", DNSClass::IN, RecordType::A);
        let aaaa = CacheKey::new("foo.com.", DNSClass::IN, RecordType::AAAA);
        let ch = CacheKey::new("foo.com.", DNSClass::CH, RecordType::A);

        assert_ne!(a, aaaa);
        assert_ne!(a, ch);
    }

    #[test]
    fn test_key_display_format() {
        let key = CacheKey::new("foo.com.", DNSClass::IN, RecordType::A);
        assert_eq!(key.to_string(), "foo.com. IN A");
    }

    #[test]
    fn test_key_from_query() {
        let mut query = Message::new();
        query.add_query(Query::query(
            Name::from_str("Example.COM.").unwrap(),
            RecordType::MX,
        ));

        let key = CacheKey::from_query(&query).unwrap();
        assert_eq!(key.qname(), "example.com.");
        assert_eq!(key.qtype(), RecordType::MX);
        assert_eq!(key.qclass(), DNSClass::IN);
    }

    #[test]
    fn test_key_from_query_without_question() {
        assert!(CacheKey::from_query(&Message::new()).is_none());
    }
}
