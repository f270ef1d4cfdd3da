//! Automatic outbound connection management.
//!
//! One [`OutboundConnector`] task keeps the node's outbound slots filled:
//! quorum peers first, then full-relay, then block-relay-only, topped up
//! with operator-requested extras, feeler probes, and one-shot address
//! fetches. Candidates come from an [`AddressBook`], are filtered for
//! validity, duplication, services, and network-group diversity, and are
//! dialed through a [`Transport`] before landing in the
//! [`ConnectionRegistry`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use convoy_net_addrbook::AddressBook;
use convoy_net_peers::{ConnectionRegistry, PeerConnection, PeerId, RegisterError};
use convoy_primitives::{AddrInfo, ConnType, NetGroup, PeerAddr, ServiceFlags};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::ConnectorConfig;
use crate::interrupt::Interrupt;
use crate::transport::{DialError, Transport};

/// Opens and maintains automatic outbound connections.
///
/// The connector never holds the registry lock across a dial; it works
/// from a per-cycle snapshot of counts and occupied network groups and
/// keeps that snapshot current as it admits.
#[derive(Debug)]
pub struct OutboundConnector<A, T> {
    registry: Arc<ConnectionRegistry>,
    book: A,
    transport: T,
    config: ConnectorConfig,
    interrupt: Arc<Interrupt>,
    try_new_outbound: AtomicBool,
    extra_block_relay: AtomicBool,
    addr_fetches: Mutex<VecDeque<PeerAddr>>,
    next_feeler: Mutex<Option<Instant>>,
    next_extra_block_relay: Mutex<Option<Instant>>,
}

/// Per-cycle view of the automatic outbound population.
#[derive(Debug, Default)]
struct OutboundSnapshot {
    full_relay: usize,
    block_relay: usize,
    quorum: usize,
    /// Groups of every registered connection that occupies a slot.
    groups: HashSet<NetGroup>,
    /// Quorum connections per group, for the optional per-group cap.
    quorum_groups: HashMap<NetGroup, usize>,
}

impl<A: AddressBook, T: Transport> OutboundConnector<A, T> {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        book: A,
        transport: T,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            registry,
            book,
            transport,
            config,
            interrupt: Arc::new(Interrupt::new()),
            try_new_outbound: AtomicBool::new(false),
            extra_block_relay: AtomicBool::new(false),
            addr_fetches: Mutex::new(VecDeque::new()),
            next_feeler: Mutex::new(None),
            next_extra_block_relay: Mutex::new(None),
        }
    }

    /// Shutdown handle for this connector.
    pub fn interrupt_handle(&self) -> Arc<Interrupt> {
        Arc::clone(&self.interrupt)
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Requests one extra full-relay connection per cycle, regardless of
    /// quota, until cleared. Used to probe for better peers when the
    /// current ones look stale.
    pub fn set_try_new_outbound_peer(&self, flag: bool) {
        self.try_new_outbound.store(flag, Ordering::Relaxed);
    }

    pub fn try_new_outbound_peer(&self) -> bool {
        self.try_new_outbound.load(Ordering::Relaxed)
    }

    /// Enables the periodic extra block-relay-only connection.
    pub fn set_extra_block_relay_peers(&self, flag: bool) {
        self.extra_block_relay.store(flag, Ordering::Relaxed);
    }

    /// Queues a one-shot connection opened solely to harvest addresses.
    pub fn add_addr_fetch(&self, addr: PeerAddr) {
        self.addr_fetches.lock().push_back(addr);
    }

    /// Runs admission cycles until interrupted.
    pub async fn run(&self) {
        debug!(
            full_relay = self.config.max_full_relay_outbound,
            block_relay = self.config.max_block_relay_outbound,
            quorum = self.config.max_quorum_outbound,
            "starting outbound connection management"
        );
        while self.interrupt.sleep_for(self.config.cycle_interval).await {
            self.process_addr_fetch().await;
            self.open_needed_connections().await;
            self.maybe_open_feeler().await;
        }
        debug!("outbound connection management interrupted");
    }

    /// One admission pass: draws candidates until every deficit is filled,
    /// the pool runs dry, or the per-cycle try budget is spent. Returns
    /// how many connections were opened.
    pub async fn open_needed_connections(&self) -> usize {
        let cfg = &self.config;
        let mut snap = self.snapshot();
        let mut opened = 0;
        let mut tries = 0;
        let mut extra_full_opened = false;
        let mut extra_block_opened = false;

        while tries < cfg.max_tries_per_cycle && !self.interrupt.interrupted() {
            let (mut conn_type, extra) = if snap.quorum < cfg.max_quorum_outbound {
                (ConnType::OutboundQuorum, false)
            } else if snap.full_relay < cfg.max_full_relay_outbound {
                (ConnType::OutboundFullRelay, false)
            } else if snap.block_relay < cfg.max_block_relay_outbound {
                (ConnType::BlockRelayOnly, false)
            } else if self.try_new_outbound.load(Ordering::Relaxed) && !extra_full_opened {
                (ConnType::OutboundFullRelay, true)
            } else if self.extra_block_relay.load(Ordering::Relaxed)
                && !extra_block_opened
                && self.extra_block_relay_due()
            {
                (ConnType::BlockRelayOnly, true)
            } else {
                break;
            };
            tries += 1;

            let Some(candidate) = self.book.select(false) else {
                trace!("address pool exhausted");
                break;
            };
            if !candidate.addr.is_valid() || !candidate.addr.is_routable() {
                continue;
            }
            if self.registry.is_connected_to(&candidate.addr) {
                self.book.attempt(&candidate.addr, false);
                continue;
            }
            if conn_type.expects_desirable_services() && !candidate.services.has_desirable() {
                continue;
            }

            let group = cfg.group_keyer.group(&candidate.addr.net);
            if conn_type.is_quorum() && !candidate.services.has(ServiceFlags::QUORUM) {
                // Hunting a quorum peer. An ordinary candidate is only
                // worth taking once the hunt has dragged on and it fits
                // the full-relay budget.
                if tries >= cfg.quorum_fallback_tries
                    && snap.full_relay < cfg.max_full_relay_outbound
                    && !snap.groups.contains(&group)
                {
                    conn_type = ConnType::OutboundFullRelay;
                } else {
                    continue;
                }
            }

            if conn_type.is_quorum() {
                if let Some(cap) = cfg.max_quorum_per_group
                    && snap.quorum_groups.get(&group).copied().unwrap_or(0) >= cap.get()
                {
                    self.book.attempt(&candidate.addr, false);
                    continue;
                }
            } else if snap.groups.contains(&group) {
                self.book.attempt(&candidate.addr, false);
                continue;
            }

            if self.dial_and_register(&candidate, conn_type).await.is_err() {
                continue;
            }
            opened += 1;
            match conn_type {
                ConnType::OutboundQuorum => {
                    snap.quorum += 1;
                    *snap.quorum_groups.entry(group.clone()).or_default() += 1;
                }
                ConnType::BlockRelayOnly => snap.block_relay += 1,
                _ => snap.full_relay += 1,
            }
            snap.groups.insert(group);
            if extra {
                if conn_type.is_block_only() {
                    extra_block_opened = true;
                    self.reset_extra_block_relay_timer();
                } else {
                    extra_full_opened = true;
                }
            }
        }
        opened
    }

    /// Opens the next queued address-fetch connection, if any.
    pub async fn process_addr_fetch(&self) {
        let next = self.addr_fetches.lock().pop_front();
        let Some(addr) = next else {
            return;
        };
        if self.registry.is_connected_to(&addr) {
            self.book.attempt(&addr, false);
            return;
        }
        let candidate = AddrInfo::new(addr, ServiceFlags::NONE);
        let _ = self.dial_and_register(&candidate, ConnType::AddrFetch).await;
    }

    /// Opens one feeler probe when the exponential timer has expired.
    ///
    /// Feelers validate never-tried address book entries; they are exempt
    /// from quotas and diversity, though their group occupies a slot while
    /// the probe is registered.
    pub async fn maybe_open_feeler(&self) {
        let now = Instant::now();
        {
            let mut next = self.next_feeler.lock();
            match *next {
                Some(due) if due <= now => {
                    *next = Some(next_exponential(now, self.config.feeler_interval));
                }
                Some(_) => return,
                None => {
                    *next = Some(next_exponential(now, self.config.feeler_interval));
                    return;
                }
            }
        }

        // Random dial offset, so probe timing does not disclose the timer
        // schedule to a watching peer.
        let presleep = self.config.feeler_sleep_window.mul_f64(rand::random::<f64>());
        if !self.interrupt.sleep_for(presleep).await {
            return;
        }

        let Some(candidate) = self.book.select(true) else {
            return;
        };
        if !candidate.addr.is_valid() || !candidate.addr.is_routable() {
            return;
        }
        if self.registry.is_connected_to(&candidate.addr) {
            self.book.attempt(&candidate.addr, false);
            return;
        }
        if !candidate.services.may_have_useful_addrs() {
            return;
        }
        if self
            .dial_and_register(&candidate, ConnType::Feeler)
            .await
            .is_ok()
        {
            metrics::counter!("connector.feelers").increment(1);
        }
    }

    /// Dials `addr` as an operator-requested connection. Exempt from
    /// quotas and diversity; only exact-endpoint duplication is refused.
    pub async fn open_manual_connection(&self, addr: PeerAddr) -> Result<PeerId, DialError> {
        if self.registry.is_connected_to(&addr) {
            return Err(DialError::AlreadyConnected);
        }
        let candidate = AddrInfo::new(addr, ServiceFlags::NONE);
        self.dial_and_register(&candidate, ConnType::Manual).await
    }

    /// Established automatic connections beyond quota, for the peer logic
    /// to wind down. Only handshake-complete peers not already leaving
    /// count.
    pub fn extra_full_outbound_count(&self) -> usize {
        let mut full = 0;
        let mut quorum = 0;
        self.registry.for_each(|conn| {
            if !conn.is_handshake_complete() || conn.is_disconnecting() {
                return;
            }
            if conn.conn_type().is_full_relay() {
                full += 1;
            } else if conn.conn_type().is_quorum() {
                quorum += 1;
            }
        });
        extra_outbound_count(
            full,
            quorum,
            self.config.max_full_relay_outbound,
            self.config.max_quorum_outbound,
        )
    }

    fn snapshot(&self) -> OutboundSnapshot {
        let mut snap = OutboundSnapshot::default();
        let keyer = &self.config.group_keyer;
        self.registry.for_each(|conn| {
            if conn.is_disconnecting() {
                return;
            }
            let ty = conn.conn_type();
            if ty.is_full_relay() {
                snap.full_relay += 1;
            } else if ty.is_block_only() {
                snap.block_relay += 1;
            } else if ty.is_quorum() {
                snap.quorum += 1;
            }
            if ty.uses_group_slot() {
                let group = keyer.group(&conn.addr().net);
                if ty.is_quorum() {
                    *snap.quorum_groups.entry(group.clone()).or_default() += 1;
                }
                snap.groups.insert(group);
            }
        });
        snap
    }

    async fn dial_and_register(
        &self,
        candidate: &AddrInfo,
        conn_type: ConnType,
    ) -> Result<PeerId, DialError> {
        let dialed = match self.transport.connect(&candidate.addr, conn_type).await {
            Ok(dialed) => dialed,
            Err(error) => {
                debug!(addr = %candidate.addr, %error, "dial failed");
                metrics::counter!("connector.dial_failures").increment(1);
                self.book.attempt(&candidate.addr, true);
                return Err(error);
            }
        };

        let keyed_group = self.config.group_keyer.keyed_group(&candidate.addr.net);
        let mut conn = PeerConnection::new(
            dialed.id,
            candidate.addr.clone(),
            candidate.services,
            conn_type,
            keyed_group,
        );
        if let Some(local) = dialed.local_addr {
            conn = conn.with_addr_bind(local);
        }
        match self.registry.try_register(conn) {
            Ok(id) => {
                self.book.connected(&candidate.addr);
                metrics::counter!("connector.opened").increment(1);
                Ok(id)
            }
            Err(RegisterError::AlreadyConnected { addr }) => {
                // Lost a race with another admission path.
                debug!(%addr, "endpoint registered while dialing");
                self.book.attempt(&candidate.addr, false);
                Err(DialError::AlreadyConnected)
            }
        }
    }

    fn extra_block_relay_due(&self) -> bool {
        let now = Instant::now();
        let mut next = self.next_extra_block_relay.lock();
        match *next {
            Some(due) => due <= now,
            None => {
                *next = Some(next_exponential(now, self.config.extra_block_relay_interval));
                false
            }
        }
    }

    fn reset_extra_block_relay_timer(&self) {
        let now = Instant::now();
        *self.next_extra_block_relay.lock() =
            Some(next_exponential(now, self.config.extra_block_relay_interval));
    }
}

/// Next firing of a Poisson-ish timer with the given mean.
fn next_exponential(now: Instant, mean: Duration) -> Instant {
    let draw: f64 = rand::random_range(f64::MIN_POSITIVE..1.0);
    now + mean.mul_f64(-draw.ln())
}

fn extra_outbound_count(full: usize, quorum: usize, max_full: usize, max_quorum: usize) -> usize {
    full.saturating_sub(max_full) + quorum.saturating_sub(max_quorum)
}
