//! Convoy peer connection manager binary.
//!
//! Drives the outbound connector against an in-memory transport and a
//! synthetic address book, so the admission machinery can be observed
//! without a live network.

mod cli;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use convoy_net_addrbook::{AddressBook, MemoryAddressBook};
use convoy_net_connector::{ConnectorConfig, MemoryTransport, OutboundConnector};
use convoy_net_peers::{ConnectionRegistry, PeerEvent};
use convoy_primitives::{AddrInfo, NetAddr, PeerAddr, ServiceFlags};
use eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{ConvoyCli, ConvoyCommand, RunArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ConvoyCli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log)?)
        .init();

    match cli.command {
        ConvoyCommand::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let registry = Arc::new(ConnectionRegistry::new());
    let book = Arc::new(MemoryAddressBook::new());
    seed_book(&book, args.peers);

    let config = ConnectorConfig {
        max_full_relay_outbound: args.max_full_relay,
        max_block_relay_outbound: args.max_block_relay,
        max_quorum_outbound: args.max_quorum,
        cycle_interval: Duration::from_millis(args.cycle_interval_ms),
        ..ConnectorConfig::default()
    };

    let connector = Arc::new(OutboundConnector::new(
        Arc::clone(&registry),
        Arc::clone(&book),
        Arc::new(MemoryTransport::new()),
        config,
    ));
    let interrupt = connector.interrupt_handle();

    // Surface lifecycle events and complete handshakes immediately; the
    // in-memory transport has no wire to negotiate over.
    let mut events = registry.subscribe();
    let event_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PeerEvent::Connected { id, addr, conn_type } => {
                    info!(peer = %id, %addr, r#type = %conn_type, "connected");
                    event_registry.mark_handshake_complete(id);
                }
                PeerEvent::Disconnected { id, addr, .. } => {
                    info!(peer = %id, %addr, "disconnected");
                }
                PeerEvent::Evicted { id, addr } => {
                    info!(peer = %id, %addr, "evicted");
                }
                PeerEvent::HandshakeCompleted { .. } | PeerEvent::InboundRejected { .. } => {}
            }
        }
    });

    let runner = {
        let connector = Arc::clone(&connector);
        tokio::spawn(async move { connector.run().await })
    };

    match args.duration_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }
    info!("shutting down");
    interrupt.interrupt();
    runner.await?;

    let counts = registry.outbound_counts();
    info!(
        full_relay = counts.full_relay,
        block_relay = counts.block_relay,
        quorum = counts.quorum,
        known_addresses = book.len(),
        extra_outbound = connector.extra_full_outbound_count(),
        "final connection census"
    );
    Ok(())
}

/// Seeds the book with synthetic public addresses spread over distinct
/// /16 groups; every fourth entry advertises quorum participation.
fn seed_book(book: &MemoryAddressBook, peers: usize) {
    let mut addrs = Vec::with_capacity(peers);
    for i in 0..peers {
        let services = if i % 4 == 0 {
            ServiceFlags::NETWORK | ServiceFlags::QUORUM
        } else {
            ServiceFlags::NETWORK
        };
        let hi = u8::try_from(i / 200).unwrap_or(u8::MAX);
        let lo = u8::try_from(i % 200).unwrap_or(u8::MAX);
        let net = NetAddr::from(Ipv4Addr::new(11u8.wrapping_add(hi), lo.wrapping_add(1), 0, 1));
        addrs.push(AddrInfo::new(PeerAddr::new(net, 8333), services));
    }
    let seeded = book.add(addrs, NetAddr::internal("bootstrap"));
    info!(seeded, "seeded address book");
}
