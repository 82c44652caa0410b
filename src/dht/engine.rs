use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::lookup_host;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::config::DhtConfig;
use super::error::DhtError;
use super::handler::{KrpcHandler, PacketHandler};
use super::id::Identity;
use super::routing::RoutingTable;
use super::transport::{PacketDriver, Transport, UdpDriver};
use crate::constants::{ID_BITS, NATPMP_LIFETIME, PACKET_CHANNEL_CAPACITY};
use crate::nat::PortMapper;

/// Stops a running [`Dht`] from another task.
///
/// A shutdown requested before [`Dht::run`] starts is remembered.
#[derive(Clone)]
pub struct ShutdownHandle {
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.notify.notify_one();
    }
}

/// A DHT node: one socket, one routing table, one event loop.
///
/// # Examples
///
/// ```no_run
/// use rdht::dht::{Dht, DhtConfig};
///
/// # async fn example() -> Result<(), rdht::dht::DhtError> {
/// let dht = Dht::bind(DhtConfig::default()).await?;
/// let shutdown = dht.shutdown_handle();
///
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     shutdown.shutdown();
/// });
///
/// dht.run().await
/// # }
/// ```
pub struct Dht {
    config: DhtConfig,
    transport: Arc<Transport>,
    handler: Arc<dyn PacketHandler>,
    shutdown: Arc<Notify>,
}

impl Dht {
    /// Binds the UDP socket from `config.local_addr`.
    pub async fn bind(config: DhtConfig) -> Result<Self, DhtError> {
        config.validate()?;
        let driver = UdpDriver::bind(config.local_addr).await?;
        Self::with_driver(config, Arc::new(driver))
    }

    /// Builds an engine over any packet driver, with a fresh random ID.
    pub fn with_driver(config: DhtConfig, driver: Arc<dyn PacketDriver>) -> Result<Self, DhtError> {
        Self::with_identity(config, driver, Identity::generate())
    }

    pub fn with_identity(
        config: DhtConfig,
        driver: Arc<dyn PacketDriver>,
        own_id: Identity,
    ) -> Result<Self, DhtError> {
        config.validate()?;
        if own_id.size() != ID_BITS {
            return Err(DhtError::InvalidNodeId(own_id.raw_bytes().len()));
        }

        let table = Arc::new(RoutingTable::new(own_id, &config));
        let transport = Arc::new(Transport::new(driver, table, &config));
        let handler = Arc::new(KrpcHandler::new(&config));

        info!(
            "DHT node {} on {} ({:?} mode)",
            transport.own_id(),
            transport
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unbound".into()),
            config.mode
        );

        Ok(Self {
            config,
            transport,
            handler,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Replaces the protocol handler; every inbound packet goes to it.
    pub fn with_handler(mut self, handler: Arc<dyn PacketHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn own_id(&self) -> &Identity {
        self.transport.own_id()
    }

    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        self.transport.routing_table()
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DhtError> {
        Ok(self.transport.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            notify: Arc::clone(&self.shutdown),
        }
    }

    /// Runs the node until shut down.
    ///
    /// Starts the packet reader, maps the port if enabled, sends the initial
    /// `find_node` to the seeds, then serializes every packet and maintenance
    /// tick on this task.
    pub async fn run(self) -> Result<(), DhtError> {
        let (packet_tx, mut packet_rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);

        let transport = Arc::clone(&self.transport);
        let reader = tokio::spawn(async move { transport.receive(packet_tx).await });

        if self.config.enable_nat {
            self.map_port();
        }

        self.join();

        let mut tick = interval(self.config.check_bucket_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                packet = packet_rx.recv() => match packet {
                    Some(packet) => self.handler.handle(&self.transport, packet),
                    None => {
                        warn!("Packet reader exited");
                        break;
                    }
                },
                _ = tick.tick() => self.maintain(),
                _ = self.shutdown.notified() => {
                    info!("Shutting down DHT node");
                    break;
                }
            }
        }

        reader.abort();
        Ok(())
    }

    /// One maintenance step: re-join an empty table, otherwise refresh stale
    /// buckets while no queries are outstanding.
    fn maintain(&self) {
        let table = self.transport.routing_table();
        if table.is_empty() {
            self.join();
            return;
        }
        if !self.transport.transactions().is_empty() {
            return;
        }

        let tasks = table.fresh();
        if !tasks.is_empty() {
            debug!("Refreshing via {} nodes, table size {}", tasks.len(), table.len());
        }
        for task in tasks {
            let request =
                self.transport
                    .find_node_request(task.node.addr, Some(task.node.id), &task.target);
            self.transport.request(request);
        }
    }

    /// Sends `find_node(own id)` to every seed, resolving names off the loop.
    fn join(&self) {
        let transport = Arc::clone(&self.transport);
        let seeds = self.config.seed_nodes.clone();
        let network = self.config.network;

        tokio::spawn(async move {
            let target = transport.own_id().clone();
            for seed in seeds {
                let addrs = match lookup_host(seed.as_str()).await {
                    Ok(addrs) => addrs,
                    Err(e) => {
                        warn!("Failed to resolve seed node {}: {}", seed, e);
                        continue;
                    }
                };
                let Some(addr) = addrs.into_iter().find(|a| network.matches(a)) else {
                    debug!("Seed node {} has no {:?} address", seed, network);
                    continue;
                };
                debug!("Joining via {} ({})", seed, addr);
                transport.request(transport.find_node_request(addr, None, &target));
            }
        });
    }

    fn map_port(&self) {
        let Ok(local) = self.transport.local_addr() else {
            return;
        };
        if local.ip().is_loopback() || local.is_ipv6() {
            return;
        }

        tokio::spawn(async move {
            let ip = (!local.ip().is_unspecified()).then(|| local.ip());
            let mapper = match PortMapper::discover(ip).await {
                Ok(mapper) => mapper,
                Err(e) => {
                    debug!("NAT-PMP unavailable: {}", e);
                    return;
                }
            };
            match mapper.map_udp(local.port(), NATPMP_LIFETIME).await {
                Ok(external) => info!(
                    "Mapped UDP port {} to external port {} via {}",
                    local.port(),
                    external,
                    mapper.gateway()
                ),
                Err(e) => debug!("NAT-PMP mapping failed: {}", e),
            }
        });
    }
}
