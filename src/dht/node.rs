use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};

use super::error::DhtError;
use super::id::Identity;
use crate::constants::{COMPACT_ADDR_LEN, COMPACT_NODE_LEN, ID_LEN};

/// A known DHT peer.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: Identity,
    pub addr: SocketAddr,
    pub last_active: Instant,
}

impl Node {
    /// Builds a node from a wire ID; rejects IDs that are not 20 bytes.
    pub fn new(id: &[u8], addr: SocketAddr) -> Result<Self, DhtError> {
        Ok(Self::with_id(Identity::from_bytes(id)?, addr))
    }

    pub fn with_id(id: Identity, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_active: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Same ID and same address.
    pub fn same_contact(&self, other: &Node) -> bool {
        self.id == other.id && self.addr == other.addr
    }

    /// Decodes one 26-byte compact node record.
    pub fn from_compact(data: &[u8]) -> Result<Self, DhtError> {
        if data.len() != COMPACT_NODE_LEN {
            return Err(DhtError::InvalidCompactInfo(data.len()));
        }

        let addr = decode_compact_addr(&data[ID_LEN..])?;
        Node::new(&data[..ID_LEN], addr)
    }

    /// The 26-byte compact record. IPv6 nodes have no compact form.
    pub fn to_compact(&self) -> Result<[u8; COMPACT_NODE_LEN], DhtError> {
        let addr = encode_compact_addr(&self.addr)?;
        let mut compact = [0u8; COMPACT_NODE_LEN];
        compact[..ID_LEN].copy_from_slice(self.id.raw_bytes());
        compact[ID_LEN..].copy_from_slice(&addr);
        Ok(compact)
    }
}

/// Encodes an IPv4 socket address as 4 address bytes + big-endian port.
pub fn encode_compact_addr(addr: &SocketAddr) -> Result<[u8; COMPACT_ADDR_LEN], DhtError> {
    match addr {
        SocketAddr::V4(v4) => {
            let mut out = [0u8; COMPACT_ADDR_LEN];
            out[..4].copy_from_slice(&v4.ip().octets());
            out[4..].copy_from_slice(&v4.port().to_be_bytes());
            Ok(out)
        }
        SocketAddr::V6(_) => Err(DhtError::UnsupportedAddress(*addr)),
    }
}

pub fn decode_compact_addr(data: &[u8]) -> Result<SocketAddr, DhtError> {
    if data.len() != COMPACT_ADDR_LEN {
        return Err(DhtError::InvalidCompactInfo(data.len()));
    }
    let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
    let port = u16::from_be_bytes([data[4], data[5]]);
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Splits a `nodes` string into compact records.
///
/// The whole list is rejected unless its length is a multiple of 26;
/// individual records that fail to decode are skipped.
pub fn decode_compact_nodes(data: &[u8]) -> Result<Vec<Node>, DhtError> {
    if data.len() % COMPACT_NODE_LEN != 0 {
        return Err(DhtError::InvalidCompactInfo(data.len()));
    }
    Ok(data
        .chunks_exact(COMPACT_NODE_LEN)
        .filter_map(|chunk| Node::from_compact(chunk).ok())
        .collect())
}

/// Concatenates compact records, skipping nodes without a compact form.
pub fn encode_compact_nodes<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Bytes {
    let mut buf = BytesMut::new();
    for compact in nodes.into_iter().filter_map(|n| n.to_compact().ok()) {
        buf.put_slice(&compact);
    }
    buf.freeze()
}
