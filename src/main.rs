//! rdht - run a BitTorrent DHT node or crawler

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rdht::dht::{Dht, DhtConfig, RoutingMode};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "rdht")]
#[command(about = "BitTorrent Mainline DHT node", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local UDP address (overrides config)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Seed node as host:port, repeatable (replaces configured seeds)
    #[arg(short, long)]
    seed: Vec<String>,

    /// Run as a crawler
    #[arg(long)]
    crawl: bool,

    /// Skip NAT-PMP port mapping
    #[arg(long)]
    no_nat: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<DhtConfig> {
        let mut config = match &self.config {
            Some(path) => DhtConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None if self.crawl => DhtConfig::crawler(),
            None => DhtConfig::default(),
        };

        if self.crawl && config.mode != RoutingMode::Crawl {
            config = DhtConfig {
                local_addr: config.local_addr,
                seed_nodes: config.seed_nodes,
                network: config.network,
                enable_nat: config.enable_nat,
                ..DhtConfig::crawler()
            };
        }
        if let Some(bind) = self.bind {
            config.local_addr = bind;
        }
        if !self.seed.is_empty() {
            config.seed_nodes = self.seed;
        }
        if self.no_nat {
            config.enable_nat = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = cli.into_config()?;
    let dht = Dht::bind(config)
        .await
        .context("failed to start DHT node")?;

    let shutdown = dht.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.shutdown();
        }
    });

    let transport = dht.transport().clone();
    let stats = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            info!(
                "{} nodes in routing table, {} queries in flight",
                transport.routing_table().len(),
                transport.transactions().len()
            );
        }
    });

    dht.run().await?;
    stats.abort();
    Ok(())
}
