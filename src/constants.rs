//! Protocol constants and default tuning parameters.
//!
//! Defaults follow the mainline DHT as deployed by the common clients
//! (K = 8, 15 second query timeout) and the public bootstrap routers.

use std::time::Duration;

// ============================================================================
// Identifiers and wire formats
// ============================================================================

/// Node ID length in bytes (160 bits).
pub const ID_LEN: usize = 20;

/// Node ID length in bits.
pub const ID_BITS: usize = ID_LEN * 8;

/// Compact node record: 20-byte ID + 4-byte IPv4 + 2-byte port.
pub const COMPACT_NODE_LEN: usize = 26;

/// Compact IPv4 peer address: 4-byte IPv4 + 2-byte port.
pub const COMPACT_ADDR_LEN: usize = 6;

/// Receive buffer for a single datagram.
pub const RECV_BUFFER_SIZE: usize = 8192;

/// Pause after a failed socket read before trying again.
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Number of leading ID bytes borrowed from the target in crawl mode.
pub const NEIGHBOR_ID_PREFIX: usize = 15;

// ============================================================================
// Routing table
// ============================================================================

/// Nodes returned per lookup and per `find_node` answer.
pub const DEFAULT_K: usize = 8;

/// Bucket capacity in standard mode.
pub const DEFAULT_BUCKET_SIZE: usize = 8;

/// Total routing table cap.
pub const DEFAULT_MAX_NODES: usize = 5000;

/// A bucket untouched for this long is refreshed.
pub const DEFAULT_BUCKET_EXPIRED_AFTER: Duration = Duration::from_secs(15 * 60);

/// A node silent for this long may be replaced when its bucket is full.
pub const DEFAULT_NODE_EXPIRED_AFTER: Duration = Duration::from_secs(15 * 60);

/// Maintenance tick.
pub const DEFAULT_CHECK_BUCKET_PERIOD: Duration = Duration::from_secs(5);

/// Nodes refreshed per stale bucket in crawl mode.
pub const DEFAULT_REFRESH_NODE_NUM: usize = 256;

// ============================================================================
// Transactions
// ============================================================================

/// Transaction id space; ids wrap back to 1 after this.
pub const DEFAULT_MAX_TRANSACTION_CURSOR: u64 = u32::MAX as u64;

/// Per-attempt wait for a reply.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Attempts per query before the peer is considered dead.
pub const DEFAULT_RETRY_BUDGET: usize = 2;

/// Cap on recursive lookups tracked at once.
pub const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 256;

/// Capacity of the inbound packet channel between the reader task and the loop.
pub const PACKET_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// Network
// ============================================================================

/// Default DHT listen port.
pub const DEFAULT_PORT: u16 = 6881;

/// Public bootstrap routers.
pub const BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "router.utorrent.com:6881",
    "dht.transmissionbt.com:6881",
];

/// NAT-PMP gateway port.
pub const NATPMP_PORT: u16 = 5351;

/// Wait for a NAT-PMP gateway reply.
pub const NATPMP_TIMEOUT: Duration = Duration::from_secs(2);

/// Requested lifetime of a NAT-PMP mapping, in seconds.
pub const NATPMP_LIFETIME: u32 = 3600;
