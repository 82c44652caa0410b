//! Distributed Hash Table (BEP-5)
//!
//! A Kademlia node speaking KRPC over UDP. The pieces, bottom-up:
//!
//! - [`Identity`] and [`Node`]: IDs, the XOR metric and compact node info
//! - [`RoutingTable`]: prefix buckets (or one crawl bucket) of known nodes
//! - [`TransactionManager`]: correlates replies with queries, retries and
//!   evicts peers that never answer
//! - [`Transport`]: the socket, query helpers and the packet reader
//! - [`KrpcHandler`]: validates inbound messages and follows lookups
//! - [`Dht`]: the event loop tying it together
//!
//! The same engine runs as a well-behaved routing node
//! ([`RoutingMode::Standard`]) or as a crawler ([`RoutingMode::Crawl`]) that
//! impersonates neighbors of every target and churns its table to sweep the
//! network.

mod config;
mod engine;
mod error;
mod handler;
mod id;
mod krpc;
mod lookup;
mod node;
mod routing;
mod transaction;
mod transport;

pub use config::{DhtConfig, Network, RoutingMode};
pub use engine::{Dht, ShutdownHandle};
pub use error::DhtError;
pub use handler::{KrpcHandler, PacketHandler};
pub use id::Identity;
pub use krpc::{
    expect_int, expect_list, expect_map, expect_string, make_error, make_query, make_response,
    Dict, Envelope, ErrorCode, KrpcError, MessageKind, QueryType, TransactionId,
};
pub use lookup::LookupTable;
pub use node::{decode_compact_nodes, encode_compact_nodes, Node};
pub use routing::{RefreshTask, RoutingTable};
pub use transaction::{Completion, Request, Transaction, TransactionManager};
pub use transport::{Packet, PacketDriver, Transport, UdpDriver};
