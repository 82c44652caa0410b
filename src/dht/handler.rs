use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use super::config::DhtConfig;
use super::id::Identity;
use super::krpc::{self, Dict, Envelope, KrpcError, MessageKind, QueryType};
use super::lookup::LookupTable;
use super::node::{decode_compact_nodes, encode_compact_nodes, Node};
use super::transaction::Completion;
use super::transport::{Packet, Transport};
use crate::bencode::Value;
use crate::constants::{COMPACT_NODE_LEN, ID_LEN};

/// Consumes every inbound datagram on the event loop.
///
/// Implementations must not block; anything that waits on the network goes
/// through [`Transport::request`].
pub trait PacketHandler: Send + Sync {
    fn handle(&self, transport: &Arc<Transport>, packet: Packet);
}

/// The BEP-5 protocol handler: answers queries, completes transactions and
/// follows `find_node` / `get_peers` lookups.
pub struct KrpcHandler {
    k: usize,
    lookups: Arc<LookupTable>,
}

impl KrpcHandler {
    pub fn new(config: &DhtConfig) -> Self {
        Self {
            k: config.k,
            lookups: Arc::new(LookupTable::new(config.max_concurrent_lookups)),
        }
    }

    pub fn lookups(&self) -> &LookupTable {
        &self.lookups
    }

    /// Validates and answers a query. `Ok(None)` means drop silently.
    fn on_query(
        &self,
        transport: &Transport,
        addr: SocketAddr,
        body: &Dict,
    ) -> Result<Option<Dict>, KrpcError> {
        let name = krpc::expect_string(body, "q")?;
        let args = krpc::expect_map(body, "a")?;
        let id = krpc::expect_string(args, "id")?;

        if id.as_ref() == transport.own_id().raw_bytes() {
            return Ok(None);
        }
        if id.len() != ID_LEN {
            return Err(KrpcError::protocol("invalid id"));
        }

        let table = transport.routing_table();
        if let Some(known) = table.get_node_by_address(&addr) {
            if known.id.raw_bytes() != id.as_ref() {
                debug!("{} changed its id, evicting", addr);
                table.remove_by_addr(&addr);
                return Err(KrpcError::protocol("invalid id"));
            }
        }

        let query_type = QueryType::parse(name).ok_or_else(|| KrpcError::method_unknown(name))?;
        let sender = Identity::from_raw(id);

        let response = match query_type {
            QueryType::Ping => {
                krpc::dict([("id", id_value(&transport.sender_id(Some(&sender))))])
            }
            QueryType::FindNode => {
                let target = expect_id(args, "target")?;
                let nodes = match table.get_node_bucket_by_id(&target) {
                    Some((node, _)) => encode_compact_nodes([&node]),
                    None => concat_compact(table.get_neighbor_compact_infos(&target, self.k)),
                };
                krpc::dict([
                    ("id", id_value(&transport.sender_id(Some(&target)))),
                    ("nodes", Value::Bytes(nodes)),
                ])
            }
            QueryType::GetPeers => {
                let info_hash = expect_id(args, "info_hash")?;
                debug!("get_peers for {} from {}", info_hash, addr);
                krpc::dict([("id", id_value(&transport.sender_id(Some(&info_hash))))])
            }
            QueryType::AnnouncePeer => {
                let info_hash = expect_id(args, "info_hash")?;
                let port = announced_port(args, addr)?;
                info!("announce_peer {} from {} port {}", info_hash, addr, port);
                krpc::dict([("id", id_value(&transport.sender_id(Some(&info_hash))))])
            }
        };

        table.insert(Node::with_id(sender, addr));
        Ok(Some(response))
    }

    fn on_response(&self, transport: &Arc<Transport>, addr: SocketAddr, t: &Bytes, body: &Dict) {
        let transactions = transport.transactions();
        let Some(transaction) = transactions.lookup(t, &addr) else {
            trace!("Unmatched response from {}", addr);
            return;
        };

        let Ok(result) = krpc::expect_map(body, "r") else {
            return;
        };
        let Ok(id) = krpc::expect_string(result, "id") else {
            return;
        };

        let table = transport.routing_table();
        if let Some(expected) = &transaction.request.expected_id {
            if expected.raw_bytes() != id.as_ref() {
                warn!("Response from {} carries an unexpected id, evicting", addr);
                table.remove_by_addr(&addr);
                return;
            }
        }

        let Ok(node) = Node::new(id, addr) else {
            return;
        };

        let query_type = transaction.request.query_type;
        if matches!(query_type, QueryType::FindNode | QueryType::GetPeers) {
            let Some(target) = transaction.request.target() else {
                return;
            };
            let required = query_type == QueryType::FindNode;
            if let Err(e) = self.follow(transport, query_type, &target, result, required) {
                debug!("Dropping {} response from {}: {}", query_type, addr, e);
                return;
            }
        }

        transactions.complete(
            t,
            Completion::Response {
                id: node.id.clone(),
                body: result.clone(),
            },
        );
        table.insert(node);
    }

    /// Merges the `nodes` of a lookup response into the table and queries the
    /// next round of closest nodes.
    fn follow(
        &self,
        transport: &Arc<Transport>,
        kind: QueryType,
        target: &Identity,
        result: &Dict,
        required: bool,
    ) -> Result<(), KrpcError> {
        let nodes = match krpc::expect_string(result, "nodes") {
            Ok(nodes) => nodes,
            Err(_) if !required => return Ok(()),
            Err(e) => return Err(e),
        };
        let nodes = decode_compact_nodes(nodes)
            .map_err(|_| KrpcError::protocol("invalid nodes length"))?;

        let table = transport.routing_table();
        let mut found = false;
        let mut has_new = false;

        for node in nodes {
            found |= &node.id == target;
            has_new |= table.insert_learned(node);
        }

        if found {
            self.lookups.finish(kind, target);
            return Ok(());
        }
        if !has_new {
            return Ok(());
        }

        let candidates = table.get_neighbors(target, self.k);
        for hop in self.lookups.next_hops(kind, target, candidates) {
            let request = match kind {
                QueryType::GetPeers => {
                    transport.get_peers_request(hop.addr, Some(hop.id.clone()), target)
                }
                _ => transport.find_node_request(hop.addr, Some(hop.id.clone()), target),
            };

            let transport = Arc::clone(transport);
            let lookups = Arc::clone(&self.lookups);
            let target = target.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.query(request).await {
                    trace!("Lookup hop {} failed: {}", hop.addr, e);
                }
                lookups.settle(kind, &target);
            });
        }

        Ok(())
    }

    fn on_error(&self, transport: &Transport, addr: SocketAddr, t: &Bytes, body: &Dict) {
        let Ok(fields) = krpc::expect_list(body, "e") else {
            return;
        };
        let [code, message] = fields else {
            return;
        };
        let (Some(code), Some(message)) = (code.as_integer(), message.as_bytes()) else {
            return;
        };
        let message = String::from_utf8_lossy(message).into_owned();

        if transport.transactions().lookup(t, &addr).is_none() {
            debug!("Unmatched error {} from {}: {}", code, addr, message);
            return;
        }

        debug!("Error {} from {}: {}", code, addr, message);
        transport
            .transactions()
            .complete(t, Completion::Error { code, message });
    }
}

impl PacketHandler for KrpcHandler {
    fn handle(&self, transport: &Arc<Transport>, packet: Packet) {
        let addr = packet.remote_addr;
        let envelope = match Envelope::parse(&packet.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                trace!("Malformed packet from {}: {}", addr, e);
                return;
            }
        };

        let t = &envelope.transaction_id;
        match envelope.kind {
            MessageKind::Query => match self.on_query(transport, addr, &envelope.body) {
                Ok(Some(response)) => transport.send_response(addr, t, response),
                Ok(None) => {}
                Err(e) => {
                    debug!("Rejecting query from {}: {}", addr, e);
                    transport.send_error(addr, t, e.code, &e.message);
                }
            },
            MessageKind::Response => self.on_response(transport, addr, t, &envelope.body),
            MessageKind::Error => self.on_error(transport, addr, t, &envelope.body),
        }
    }
}

fn id_value(id: &Identity) -> Value {
    Value::Bytes(id.to_bytes())
}

/// Reads a 20-byte ID argument.
fn expect_id(args: &Dict, key: &str) -> Result<Identity, KrpcError> {
    let raw = krpc::expect_string(args, key)?;
    if raw.len() != ID_LEN {
        return Err(KrpcError::protocol(format!("invalid {}", key)));
    }
    Ok(Identity::from_raw(raw))
}

fn announced_port(args: &Dict, addr: SocketAddr) -> Result<u16, KrpcError> {
    let implied = args
        .get(b"implied_port".as_slice())
        .and_then(Value::as_integer)
        .is_some_and(|v| v != 0);
    if implied {
        return Ok(addr.port());
    }
    let port = krpc::expect_int(args, "port")?;
    u16::try_from(port).map_err(|_| KrpcError::protocol("invalid port"))
}

fn concat_compact(records: Vec<[u8; COMPACT_NODE_LEN]>) -> Bytes {
    let mut buf = BytesMut::with_capacity(records.len() * COMPACT_NODE_LEN);
    for record in &records {
        buf.put_slice(record);
    }
    buf.freeze()
}
