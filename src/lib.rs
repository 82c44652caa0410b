//! rdht - A BitTorrent Mainline DHT node
//!
//! This library implements the Kademlia-based DHT of the BitTorrent network
//! following [BEP-5](http://bittorrent.org/beps/bep_0005.html).
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`dht`] - BEP-5 routing table, KRPC transactions and the node engine
//! - [`nat`] - NAT-PMP port mapping for the DHT socket

pub mod bencode;
pub mod constants;
pub mod dht;
pub mod nat;

pub use bencode::{decode, encode, BencodeError, Value};
pub use dht::{
    Dht, DhtConfig, DhtError, Identity, KrpcHandler, Node, PacketHandler, RoutingMode,
    RoutingTable, ShutdownHandle,
};
pub use nat::{NatError, PortMapper};
