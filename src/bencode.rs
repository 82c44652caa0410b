//! Bencode encoding and decoding ([BEP-3]).
//!
//! KRPC messages travel as bencoded dictionaries. This module is the
//! `encode(value) -> bytes` / `decode(bytes) -> value` pair the DHT layer
//! is built on; it knows nothing about KRPC itself.
//!
//! ```
//! use rdht::bencode::{decode, encode, Value};
//!
//! let ping = Value::dict([
//!     ("t", Value::bytes(&b"aa"[..])),
//!     ("y", Value::string("q")),
//! ]);
//! let wire = encode(&ping);
//! assert_eq!(&wire[..], b"d1:t2:aa1:y1:qe");
//! assert_eq!(decode(&wire).unwrap(), ping);
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::decode;
pub use encode::encode;
pub use error::BencodeError;
pub use value::Value;

#[cfg(test)]
mod tests;
