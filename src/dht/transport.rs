use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::config::{DhtConfig, RoutingMode};
use super::error::DhtError;
use super::id::Identity;
use super::krpc::{self, Dict, ErrorCode, QueryType};
use super::routing::RoutingTable;
use super::transaction::{Completion, Request, TransactionManager};
use crate::bencode::{encode, Value};
use crate::constants::{NEIGHBOR_ID_PREFIX, RECV_BUFFER_SIZE, RECV_ERROR_BACKOFF};

/// A datagram as received from the network.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    pub remote_addr: SocketAddr,
}

/// The datagram socket underneath the DHT.
///
/// `send_to` must not block: it is called from the event loop as well as
/// from query tasks. Implemented by [`UdpDriver`] in production and by
/// in-memory fakes in tests.
pub trait PacketDriver: Send + Sync + 'static {
    fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize>;

    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

pub struct UdpDriver {
    socket: UdpSocket,
}

impl UdpDriver {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }
}

impl PacketDriver for UdpDriver {
    fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.try_send_to(data, addr)
    }

    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<(usize, SocketAddr)>> {
        Box::pin(self.socket.recv_from(buf))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Sends KRPC messages and runs queries through the transaction manager.
pub struct Transport {
    driver: Arc<dyn PacketDriver>,
    transactions: TransactionManager,
    table: Arc<RoutingTable>,
    mode: RoutingMode,
    query_timeout: Duration,
    retry_budget: usize,
}

impl Transport {
    pub fn new(driver: Arc<dyn PacketDriver>, table: Arc<RoutingTable>, config: &DhtConfig) -> Self {
        Self {
            driver,
            transactions: TransactionManager::new(config.max_transaction_cursor),
            table,
            mode: config.mode,
            query_timeout: config.query_timeout,
            retry_budget: config.retry_budget,
        }
    }

    pub fn own_id(&self) -> &Identity {
        self.table.own_id()
    }

    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.driver.local_addr()
    }

    /// The ID we present to a peer talking about `target`.
    ///
    /// A crawler claims to be a close neighbor of whatever the peer is
    /// interested in, so it keeps being handed nodes near that region.
    pub fn sender_id(&self, target: Option<&Identity>) -> Identity {
        match (self.mode, target) {
            (RoutingMode::Crawl, Some(target)) if target.size() == self.own_id().size() => {
                self.own_id().neighbor_of(target, NEIGHBOR_ID_PREFIX)
            }
            _ => self.own_id().clone(),
        }
    }

    pub fn send(&self, message: &Value, addr: SocketAddr) -> Result<(), DhtError> {
        let data = encode(message);
        self.driver.send_to(&data, addr)?;
        Ok(())
    }

    pub fn send_response(&self, addr: SocketAddr, t: &Bytes, r: Dict) {
        if let Err(e) = self.send(&krpc::make_response(t, r), addr) {
            debug!("Failed to send response to {}: {}", addr, e);
        }
    }

    pub fn send_error(&self, addr: SocketAddr, t: &Bytes, code: ErrorCode, message: &str) {
        if let Err(e) = self.send(&krpc::make_error(t, code, message), addr) {
            debug!("Failed to send error to {}: {}", addr, e);
        }
    }

    /// Runs `request` to completion with the configured timeout and retries.
    pub async fn query(&self, request: Request) -> Result<Completion, DhtError> {
        self.transactions
            .new_query(
                self.driver.as_ref(),
                &self.table,
                request,
                self.retry_budget,
                self.query_timeout,
            )
            .await
    }

    /// Runs `request` on its own task so the caller never waits on the network.
    pub fn request(self: &Arc<Self>, request: Request) -> JoinHandle<Result<Completion, DhtError>> {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            let addr = request.remote_addr;
            let query_type = request.query_type;
            let result = transport.query(request).await;
            if let Err(e) = &result {
                trace!("{} to {} failed: {}", query_type, addr, e);
            }
            result
        })
    }

    pub fn ping_request(&self, addr: SocketAddr, expected_id: Option<Identity>) -> Request {
        let id = self.sender_id(expected_id.as_ref());
        Request {
            remote_addr: addr,
            query_type: QueryType::Ping,
            args: krpc::dict([("id", Value::Bytes(id.to_bytes()))]),
            expected_id,
        }
    }

    pub fn find_node_request(
        &self,
        addr: SocketAddr,
        expected_id: Option<Identity>,
        target: &Identity,
    ) -> Request {
        let id = self.sender_id(Some(target));
        Request {
            remote_addr: addr,
            query_type: QueryType::FindNode,
            args: krpc::dict([
                ("id", Value::Bytes(id.to_bytes())),
                ("target", Value::Bytes(target.to_bytes())),
            ]),
            expected_id,
        }
    }

    pub fn get_peers_request(
        &self,
        addr: SocketAddr,
        expected_id: Option<Identity>,
        info_hash: &Identity,
    ) -> Request {
        let id = self.sender_id(Some(info_hash));
        Request {
            remote_addr: addr,
            query_type: QueryType::GetPeers,
            args: krpc::dict([
                ("id", Value::Bytes(id.to_bytes())),
                ("info_hash", Value::Bytes(info_hash.to_bytes())),
            ]),
            expected_id,
        }
    }

    pub fn announce_peer_request(
        &self,
        addr: SocketAddr,
        expected_id: Option<Identity>,
        info_hash: &Identity,
        port: u16,
        implied_port: bool,
        token: Bytes,
    ) -> Request {
        let id = self.sender_id(Some(info_hash));
        Request {
            remote_addr: addr,
            query_type: QueryType::AnnouncePeer,
            args: krpc::dict([
                ("id", Value::Bytes(id.to_bytes())),
                ("implied_port", Value::Integer(implied_port as i64)),
                ("info_hash", Value::Bytes(info_hash.to_bytes())),
                ("port", Value::Integer(port as i64)),
                ("token", Value::Bytes(token)),
            ]),
            expected_id,
        }
    }

    pub async fn ping(
        &self,
        addr: SocketAddr,
        expected_id: Option<Identity>,
    ) -> Result<Completion, DhtError> {
        self.query(self.ping_request(addr, expected_id)).await
    }

    pub async fn find_node(
        &self,
        addr: SocketAddr,
        expected_id: Option<Identity>,
        target: &Identity,
    ) -> Result<Completion, DhtError> {
        self.query(self.find_node_request(addr, expected_id, target))
            .await
    }

    pub async fn get_peers(
        &self,
        addr: SocketAddr,
        expected_id: Option<Identity>,
        info_hash: &Identity,
    ) -> Result<Completion, DhtError> {
        self.query(self.get_peers_request(addr, expected_id, info_hash))
            .await
    }

    pub async fn announce_peer(
        &self,
        addr: SocketAddr,
        expected_id: Option<Identity>,
        info_hash: &Identity,
        port: u16,
        implied_port: bool,
        token: Bytes,
    ) -> Result<Completion, DhtError> {
        let request =
            self.announce_peer_request(addr, expected_id, info_hash, port, implied_port, token);
        self.query(request).await
    }

    /// Reads datagrams into `packets` until the receiving side goes away.
    ///
    /// Read errors are dropped; a single bad datagram or a transient ICMP
    /// error must not stop the node.
    pub async fn receive(&self, packets: mpsc::Sender<Packet>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            match self.driver.recv_from(&mut buf).await {
                Ok((len, remote_addr)) => {
                    let packet = Packet {
                        data: Bytes::copy_from_slice(&buf[..len]),
                        remote_addr,
                    };
                    if packets.send(packet).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    trace!("Receive error: {}", e);
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
            }
        }

        debug!("Packet reader stopped");
    }
}
