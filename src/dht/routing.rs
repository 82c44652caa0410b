use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::seq::IteratorRandom as _;
use tracing::trace;

use super::config::{DhtConfig, RoutingMode};
use super::id::Identity;
use super::node::Node;
use crate::constants::{COMPACT_NODE_LEN, ID_BITS};

/// A `find_node` the maintenance tick should send to keep a bucket alive.
#[derive(Debug, Clone)]
pub struct RefreshTask {
    pub node: Node,
    pub target: Identity,
}

#[derive(Debug)]
struct Entry {
    node: Node,
    seq: u64,
}

/// Nodes sharing `prefix_len` leading bits with the table owner, least
/// recently active first.
#[derive(Debug)]
struct Bucket {
    prefix_len: usize,
    entries: VecDeque<Entry>,
    last_changed: Instant,
}

impl Bucket {
    fn new(prefix_len: usize) -> Self {
        Self {
            prefix_len,
            entries: VecDeque::new(),
            last_changed: Instant::now(),
        }
    }

    fn position(&self, id: &Identity) -> Option<usize> {
        self.entries.iter().position(|e| &e.node.id == id)
    }

    fn touch_at(&mut self, pos: usize, addr: SocketAddr) {
        if let Some(mut entry) = self.entries.remove(pos) {
            entry.node.addr = addr;
            entry.node.touch();
            self.entries.push_back(entry);
        }
        self.last_changed = Instant::now();
    }

    fn is_stale(&self, expired_after: Duration) -> bool {
        !self.entries.is_empty() && self.last_changed.elapsed() >= expired_after
    }
}

struct Inner {
    buckets: Vec<Bucket>,
    len: usize,
    next_seq: u64,
}

impl Inner {
    fn push(&mut self, bucket_idx: usize, node: Node) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let bucket = &mut self.buckets[bucket_idx];
        bucket.entries.push_back(Entry { node, seq });
        bucket.last_changed = Instant::now();
    }
}

/// The Kademlia routing table.
///
/// In [`RoutingMode::Standard`] there is one bucket per shared-prefix length
/// with the owner's ID (160 buckets). In [`RoutingMode::Crawl`] every node
/// lands in a single bucket and only `max_nodes` bounds the table.
///
/// All methods take `&self`; the table synchronizes internally so it can be
/// shared between the event loop and query tasks.
pub struct RoutingTable {
    own_id: Identity,
    mode: RoutingMode,
    bucket_size: usize,
    max_nodes: usize,
    node_expired_after: Duration,
    bucket_expired_after: Duration,
    refresh_node_num: usize,
    inner: RwLock<Inner>,
}

impl RoutingTable {
    pub fn new(own_id: Identity, config: &DhtConfig) -> Self {
        let buckets = match config.mode {
            RoutingMode::Standard => (0..ID_BITS).map(Bucket::new).collect(),
            RoutingMode::Crawl => vec![Bucket::new(0)],
        };

        Self {
            own_id,
            mode: config.mode,
            bucket_size: config.bucket_size,
            max_nodes: config.max_nodes,
            node_expired_after: config.node_expired_after,
            bucket_expired_after: config.bucket_expired_after,
            refresh_node_num: config.refresh_node_num,
            inner: RwLock::new(Inner {
                buckets,
                len: 0,
                next_seq: 0,
            }),
        }
    }

    pub fn own_id(&self) -> &Identity {
        &self.own_id
    }

    fn bucket_index(&self, id: &Identity) -> usize {
        match self.mode {
            RoutingMode::Standard => self.own_id.common_prefix_len(id).min(ID_BITS - 1),
            RoutingMode::Crawl => 0,
        }
    }

    /// Adds `node` or refreshes the entry with its ID.
    ///
    /// Returns `true` only if the node was not in the table before. A full
    /// bucket accepts a newcomer only by evicting its least recently active
    /// node, and only if that node has been silent longer than
    /// `node_expired_after`.
    pub fn insert(&self, node: Node) -> bool {
        self.insert_with(node, true)
    }

    /// Adds a node learned from another node's `nodes` list.
    ///
    /// Unlike [`insert`](Self::insert), an entry already holding the ID is
    /// left untouched: only the node itself may move its address or prove it
    /// is still alive.
    pub fn insert_learned(&self, node: Node) -> bool {
        self.insert_with(node, false)
    }

    fn insert_with(&self, node: Node, refresh: bool) -> bool {
        if node.id == self.own_id || node.id.size() != self.own_id.size() {
            return false;
        }

        let idx = self.bucket_index(&node.id);
        let mut inner = self.inner.write();

        if let Some(pos) = inner.buckets[idx].position(&node.id) {
            if refresh {
                inner.buckets[idx].touch_at(pos, node.addr);
            }
            return false;
        }

        if inner.buckets[idx].entries.len() >= self.bucket_size {
            let stale = inner.buckets[idx]
                .entries
                .front()
                .is_some_and(|e| e.node.last_active.elapsed() > self.node_expired_after);
            if !stale {
                return false;
            }
            if let Some(evicted) = inner.buckets[idx].entries.pop_front() {
                trace!("evicting stale node {} for {}", evicted.node.addr, node.addr);
            }
            inner.push(idx, node);
            return true;
        }

        if inner.len >= self.max_nodes {
            return false;
        }

        inner.push(idx, node);
        inner.len += 1;
        true
    }

    pub fn get_node_by_address(&self, addr: &SocketAddr) -> Option<Node> {
        let inner = self.inner.read();
        inner
            .buckets
            .iter()
            .flat_map(|b| b.entries.iter())
            .find(|e| &e.node.addr == addr)
            .map(|e| e.node.clone())
    }

    /// Exact lookup by ID; returns the node and the index of its bucket.
    pub fn get_node_bucket_by_id(&self, id: &Identity) -> Option<(Node, usize)> {
        if id.size() != self.own_id.size() {
            return None;
        }
        let idx = self.bucket_index(id);
        let inner = self.inner.read();
        let bucket = &inner.buckets[idx];
        bucket
            .position(id)
            .map(|pos| (bucket.entries[pos].node.clone(), idx))
    }

    /// Removes every node registered under `addr`.
    pub fn remove_by_addr(&self, addr: &SocketAddr) -> Option<Node> {
        let mut inner = self.inner.write();
        let mut removed = None;
        let mut count = 0;

        for bucket in &mut inner.buckets {
            while let Some(pos) = bucket.entries.iter().position(|e| &e.node.addr == addr) {
                removed = bucket.entries.remove(pos).map(|e| e.node);
                count += 1;
            }
        }

        inner.len -= count;
        removed
    }

    /// Up to `count` nodes ordered by XOR distance to `target`.
    ///
    /// Equal distances (only possible for duplicate IDs) fall back to
    /// insertion order, so the result is reproducible for a given table.
    pub fn get_neighbors(&self, target: &Identity, count: usize) -> Vec<Node> {
        if target.size() != self.own_id.size() {
            return Vec::new();
        }

        let inner = self.inner.read();
        let mut candidates: Vec<(Identity, u64, &Node)> = inner
            .buckets
            .iter()
            .flat_map(|b| b.entries.iter())
            .map(|e| (e.node.id.xor(target), e.seq, &e.node))
            .collect();

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        candidates
            .into_iter()
            .take(count)
            .map(|(_, _, node)| node.clone())
            .collect()
    }

    /// [`get_neighbors`](Self::get_neighbors) pre-serialized as compact records.
    pub fn get_neighbor_compact_infos(
        &self,
        target: &Identity,
        count: usize,
    ) -> Vec<[u8; COMPACT_NODE_LEN]> {
        self.get_neighbors(target, count)
            .iter()
            .filter_map(|n| n.to_compact().ok())
            .collect()
    }

    /// Plans the `find_node` queries that keep stale buckets populated.
    ///
    /// Standard mode asks one random member of each stale bucket for a random
    /// ID inside that bucket's range. Crawl mode asks up to
    /// `refresh_node_num` of the oldest nodes for random targets and drops
    /// them from the table; their replies repopulate it.
    pub fn fresh(&self) -> Vec<RefreshTask> {
        let mut inner = self.inner.write();
        let mut tasks = Vec::new();
        let mut dropped = 0;

        for bucket in &mut inner.buckets {
            if !bucket.is_stale(self.bucket_expired_after) {
                continue;
            }

            match self.mode {
                RoutingMode::Standard => {
                    if let Some(entry) = bucket.entries.iter().choose(&mut rand::rng()) {
                        tasks.push(RefreshTask {
                            node: entry.node.clone(),
                            target: self.own_id.random_with_prefix(bucket.prefix_len),
                        });
                    }
                }
                RoutingMode::Crawl => {
                    let take = self.refresh_node_num.min(bucket.entries.len());
                    for entry in bucket.entries.drain(..take) {
                        tasks.push(RefreshTask {
                            node: entry.node,
                            target: Identity::generate(),
                        });
                    }
                    dropped += take;
                }
            }

            bucket.last_changed = Instant::now();
        }

        inner.len -= dropped;
        tasks
    }

    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        let inner = self.inner.read();
        inner
            .buckets
            .iter()
            .flat_map(|b| b.entries.iter().map(|e| e.node.clone()))
            .collect()
    }

    /// Number of nodes in each bucket, indexed by prefix length.
    pub fn bucket_occupancy(&self) -> Vec<usize> {
        let inner = self.inner.read();
        inner.buckets.iter().map(|b| b.entries.len()).collect()
    }
}
