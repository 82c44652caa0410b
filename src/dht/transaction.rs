use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::error::DhtError;
use super::id::Identity;
use super::krpc::{self, Dict, QueryType, TransactionId};
use super::routing::RoutingTable;
use super::transport::PacketDriver;
use crate::bencode::encode;

/// An outbound query before it is bound to a transaction id.
#[derive(Debug, Clone)]
pub struct Request {
    pub remote_addr: SocketAddr,
    pub query_type: QueryType,
    /// The full `a` dictionary, including our `id`.
    pub args: Dict,
    /// The ID the responder must report, when the peer is already known.
    pub expected_id: Option<Identity>,
}

impl Request {
    /// The lookup target carried by `find_node` / `get_peers` queries.
    pub fn target(&self) -> Option<Identity> {
        let key: &[u8] = match self.query_type {
            QueryType::FindNode => b"target",
            QueryType::GetPeers | QueryType::AnnouncePeer => b"info_hash",
            QueryType::Ping => return None,
        };
        self.args
            .get(key)
            .and_then(|v| v.as_bytes())
            .and_then(|b| Identity::from_bytes(b).ok())
    }
}

/// How a transaction ended, as reported by the protocol handler.
#[derive(Debug, Clone)]
pub enum Completion {
    Response { id: Identity, body: Dict },
    Error { code: i64, message: String },
}

/// An in-flight query awaiting its reply.
#[derive(Debug)]
pub struct Transaction {
    pub id: TransactionId,
    pub request: Request,
    completion: mpsc::Sender<Completion>,
}

struct State {
    cursor: u64,
    transactions: HashMap<TransactionId, Arc<Transaction>>,
    index: HashMap<(QueryType, SocketAddr), TransactionId>,
}

/// Correlates replies with outstanding queries.
///
/// Both indices live behind one mutex so a transaction is always visible in
/// both or in neither.
pub struct TransactionManager {
    state: Mutex<State>,
    max_cursor: u64,
}

/// Removes the transaction when the query future finishes or is dropped.
struct Registration<'a> {
    manager: &'a TransactionManager,
    id: TransactionId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.manager.delete(&self.id);
    }
}

/// Big-endian bytes of `value` without leading zero bytes (at least one byte).
fn cursor_bytes(value: u64) -> Bytes {
    let raw = value.to_be_bytes();
    let first = raw.iter().position(|&b| b != 0).unwrap_or(raw.len() - 1);
    Bytes::copy_from_slice(&raw[first..])
}

impl TransactionManager {
    pub fn new(max_cursor: u64) -> Self {
        Self {
            state: Mutex::new(State {
                cursor: 0,
                transactions: HashMap::new(),
                index: HashMap::new(),
            }),
            max_cursor: max_cursor.max(2),
        }
    }

    fn next_cursor(&self, state: &mut State) -> u64 {
        state.cursor = (state.cursor + 1) % self.max_cursor;
        state.cursor
    }

    /// Ids still held by a live transaction (possible only after the cursor
    /// wraps) are skipped.
    fn next_free_id(&self, state: &mut State) -> Result<TransactionId, DhtError> {
        let attempts = state.transactions.len() + 1;
        for _ in 0..attempts {
            let candidate = cursor_bytes(self.next_cursor(state));
            if !state.transactions.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(DhtError::TransactionIdsExhausted)
    }

    /// Advances the cursor and returns its shortest byte encoding.
    pub fn generate_transaction_id(&self) -> Result<TransactionId, DhtError> {
        let mut state = self.state.lock();
        self.next_free_id(&mut state)
    }

    /// Registers `request` under a fresh id in both indices.
    fn register(
        &self,
        request: Request,
        retry_budget: usize,
    ) -> Result<(Arc<Transaction>, mpsc::Receiver<Completion>), DhtError> {
        let mut state = self.state.lock();
        let id = self.next_free_id(&mut state)?;

        let (tx, rx) = mpsc::channel(retry_budget + 1);
        let transaction = Arc::new(Transaction {
            id: id.clone(),
            request,
            completion: tx,
        });

        state.index.insert(
            (
                transaction.request.query_type,
                transaction.request.remote_addr,
            ),
            id.clone(),
        );
        state.transactions.insert(id, transaction.clone());

        Ok((transaction, rx))
    }

    pub fn delete(&self, id: &TransactionId) {
        let mut state = self.state.lock();
        if let Some(transaction) = state.transactions.remove(id) {
            let key = (
                transaction.request.query_type,
                transaction.request.remote_addr,
            );
            if state.index.get(&key) == Some(id) {
                state.index.remove(&key);
            }
        }
    }

    /// Finds the transaction `id`, but only if it was sent to `addr`.
    pub fn lookup(&self, id: &[u8], addr: &SocketAddr) -> Option<Arc<Transaction>> {
        let state = self.state.lock();
        state
            .transactions
            .get(id)
            .filter(|t| &t.request.remote_addr == addr)
            .cloned()
    }

    pub fn lookup_by_index(
        &self,
        query_type: QueryType,
        addr: &SocketAddr,
    ) -> Option<Arc<Transaction>> {
        let state = self.state.lock();
        state
            .index
            .get(&(query_type, *addr))
            .and_then(|id| state.transactions.get(id))
            .cloned()
    }

    /// Wakes the query waiting on transaction `id`. Never blocks.
    pub fn complete(&self, id: &[u8], completion: Completion) -> bool {
        let transaction = self.state.lock().transactions.get(id).cloned();
        match transaction {
            Some(t) => t.completion.try_send(completion).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends `request` and waits for its completion, retrying on timeout.
    ///
    /// Each of the `retry_budget` attempts sends the query once and waits up
    /// to `per_attempt` for the handler to complete the transaction. When
    /// every attempt times out the peer is evicted from `table`. A send
    /// error ends the query immediately without eviction.
    pub async fn new_query(
        &self,
        driver: &dyn PacketDriver,
        table: &RoutingTable,
        request: Request,
        retry_budget: usize,
        per_attempt: Duration,
    ) -> Result<Completion, DhtError> {
        let addr = request.remote_addr;
        let (transaction, mut completions) = self.register(request, retry_budget)?;
        let _registration = Registration {
            manager: self,
            id: transaction.id.clone(),
        };

        let message = krpc::make_query(
            &transaction.id,
            transaction.request.query_type,
            transaction.request.args.clone(),
        );
        let data = encode(&message);

        for attempt in 1..=retry_budget {
            trace!(
                "{} to {} attempt {}/{}",
                transaction.request.query_type,
                addr,
                attempt,
                retry_budget
            );

            if let Err(source) = driver.send_to(&data, addr) {
                warn!("send to {} failed: {}", addr, source);
                return Err(DhtError::SendAborted { addr, source });
            }

            match timeout(per_attempt, completions.recv()).await {
                Ok(Some(completion)) => return Ok(completion),
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        debug!(
            "{} to {} unanswered after {} attempts, evicting",
            transaction.request.query_type, addr, retry_budget
        );
        table.remove_by_addr(&addr);

        Err(DhtError::Timeout {
            addr,
            attempts: retry_budget,
        })
    }
}
