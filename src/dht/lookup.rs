use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use parking_lot::Mutex;
use tracing::trace;

use super::id::Identity;
use super::krpc::QueryType;
use super::node::Node;

#[derive(Debug, Default)]
struct Lookup {
    queried: HashSet<SocketAddr>,
    pending: usize,
}

/// Progress of the iterative `find_node` / `get_peers` lookups.
///
/// A lookup starts the first time a response for its target brings in new
/// nodes, and ends once the target is found or its last outstanding hop
/// settles without anything new to ask.
pub struct LookupTable {
    lookups: Mutex<HashMap<(QueryType, Identity), Lookup>>,
    max_lookups: usize,
}

impl LookupTable {
    pub fn new(max_lookups: usize) -> Self {
        Self {
            lookups: Mutex::new(HashMap::new()),
            max_lookups,
        }
    }

    /// Picks the `candidates` not yet queried for `target` and marks them
    /// pending. Returns nothing when a new lookup would exceed the cap.
    pub fn next_hops(
        &self,
        kind: QueryType,
        target: &Identity,
        candidates: Vec<Node>,
    ) -> Vec<Node> {
        let mut lookups = self.lookups.lock();
        let key = (kind, target.clone());

        if !lookups.contains_key(&key) && lookups.len() >= self.max_lookups {
            trace!("Lookup limit reached, not following {} {}", kind, target);
            return Vec::new();
        }

        let lookup = lookups.entry(key.clone()).or_default();
        let hops: Vec<Node> = candidates
            .into_iter()
            .filter(|n| lookup.queried.insert(n.addr))
            .collect();
        lookup.pending += hops.len();

        if lookup.pending == 0 {
            lookups.remove(&key);
        }
        hops
    }

    /// Marks one hop of the lookup as answered or abandoned.
    pub fn settle(&self, kind: QueryType, target: &Identity) {
        let mut lookups = self.lookups.lock();
        let key = (kind, target.clone());
        if let Some(lookup) = lookups.get_mut(&key) {
            lookup.pending = lookup.pending.saturating_sub(1);
            if lookup.pending == 0 {
                lookups.remove(&key);
            }
        }
    }

    pub fn finish(&self, kind: QueryType, target: &Identity) {
        self.lookups.lock().remove(&(kind, target.clone()));
    }

    pub fn contains(&self, kind: QueryType, target: &Identity) -> bool {
        self.lookups.lock().contains_key(&(kind, target.clone()))
    }

    pub fn len(&self) -> usize {
        self.lookups.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
