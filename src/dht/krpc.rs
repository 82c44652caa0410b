//! KRPC message shapes ([BEP-5]).
//!
//! Every message is a bencoded dictionary with a transaction id `t` and a
//! class `y`:
//!
//! | `y` | extra keys      | meaning  |
//! |-----|-----------------|----------|
//! | `q` | `q` name, `a` args dict | query |
//! | `r` | `r` result dict | response |
//! | `e` | `e` `[code, message]` | error |
//!
//! Fields are read through the `expect_*` helpers, which turn a missing or
//! mistyped key into a [`KrpcError`] carrying the error code to answer with.
//!
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use thiserror::Error;

use super::error::DhtError;
use crate::bencode::{decode, Value};

pub type TransactionId = Bytes;
pub type Dict = BTreeMap<Bytes, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Ping,
    FindNode,
    GetPeers,
    AnnouncePeer,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Ping => "ping",
            QueryType::FindNode => "find_node",
            QueryType::GetPeers => "get_peers",
            QueryType::AnnouncePeer => "announce_peer",
        }
    }

    pub fn parse(name: &[u8]) -> Option<Self> {
        match name {
            b"ping" => Some(QueryType::Ping),
            b"find_node" => Some(QueryType::FindNode),
            b"get_peers" => Some(QueryType::GetPeers),
            b"announce_peer" => Some(QueryType::AnnouncePeer),
            _ => None,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// KRPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Generic = 201,
    Server = 202,
    Protocol = 203,
    MethodUnknown = 204,
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        self as i64
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} ({})", .code.code())]
pub struct KrpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl KrpcError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Protocol,
            message: message.into(),
        }
    }

    pub fn method_unknown(name: &[u8]) -> Self {
        Self {
            code: ErrorCode::MethodUnknown,
            message: format!("unknown method {}", String::from_utf8_lossy(name)),
        }
    }
}

fn expect<'a>(dict: &'a Dict, key: &str) -> Result<&'a Value, KrpcError> {
    dict.get(key.as_bytes())
        .ok_or_else(|| KrpcError::protocol(format!("missing key {}", key)))
}

fn mistyped(key: &str, found: &Value, expected: &str) -> KrpcError {
    KrpcError::protocol(format!(
        "key {} is {}, expected {}",
        key,
        found.kind(),
        expected
    ))
}

pub fn expect_string<'a>(dict: &'a Dict, key: &str) -> Result<&'a Bytes, KrpcError> {
    let value = expect(dict, key)?;
    value
        .as_bytes()
        .ok_or_else(|| mistyped(key, value, "string"))
}

pub fn expect_int(dict: &Dict, key: &str) -> Result<i64, KrpcError> {
    let value = expect(dict, key)?;
    value
        .as_integer()
        .ok_or_else(|| mistyped(key, value, "integer"))
}

pub fn expect_map<'a>(dict: &'a Dict, key: &str) -> Result<&'a Dict, KrpcError> {
    let value = expect(dict, key)?;
    value.as_dict().ok_or_else(|| mistyped(key, value, "dict"))
}

pub fn expect_list<'a>(dict: &'a Dict, key: &str) -> Result<&'a [Value], KrpcError> {
    let value = expect(dict, key)?;
    value.as_list().ok_or_else(|| mistyped(key, value, "list"))
}

pub fn make_query(t: &TransactionId, q: QueryType, a: Dict) -> Value {
    Value::dict([
        ("t", Value::Bytes(t.clone())),
        ("y", Value::string("q")),
        ("q", Value::string(q.as_str())),
        ("a", Value::Dict(a)),
    ])
}

pub fn make_response(t: &TransactionId, r: Dict) -> Value {
    Value::dict([
        ("t", Value::Bytes(t.clone())),
        ("y", Value::string("r")),
        ("r", Value::Dict(r)),
    ])
}

pub fn make_error(t: &TransactionId, code: ErrorCode, message: &str) -> Value {
    Value::dict([
        ("t", Value::Bytes(t.clone())),
        ("y", Value::string("e")),
        (
            "e",
            Value::List(vec![Value::Integer(code.code()), Value::string(message)]),
        ),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Query,
    Response,
    Error,
}

/// A decoded message whose top-level `t` and `y` have been validated.
///
/// The per-class payload is left in `body` for the protocol handler to
/// validate with the `expect_*` helpers.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub transaction_id: TransactionId,
    pub kind: MessageKind,
    pub body: Dict,
}

impl Envelope {
    /// Decodes a datagram. Fails on undecodable bytes, a non-dict root,
    /// a missing `t`/`y` or an unknown `y`.
    pub fn parse(data: &[u8]) -> Result<Self, DhtError> {
        let body = decode(data)?
            .into_dict()
            .ok_or_else(|| DhtError::InvalidMessage("message is not a dict".into()))?;

        let transaction_id = expect_string(&body, "t")?.clone();
        let kind = match expect_string(&body, "y")?.as_ref() {
            b"q" => MessageKind::Query,
            b"r" => MessageKind::Response,
            b"e" => MessageKind::Error,
            other => {
                return Err(DhtError::InvalidMessage(format!(
                    "unknown message class {}",
                    String::from_utf8_lossy(other)
                )))
            }
        };

        Ok(Self {
            transaction_id,
            kind,
            body,
        })
    }
}

/// Builds an argument or result dictionary from `(key, value)` pairs.
pub fn dict<'a>(entries: impl IntoIterator<Item = (&'a str, Value)>) -> Dict {
    entries
        .into_iter()
        .map(|(k, v)| (Bytes::copy_from_slice(k.as_bytes()), v))
        .collect()
}
