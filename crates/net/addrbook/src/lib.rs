//! Candidate address book.
//!
//! The connector treats address management as a black box behind
//! [`AddressBook`]: add gossiped candidates, record connection attempts
//! and successes, and hand out selections. [`MemoryAddressBook`] is the
//! in-process implementation used by tests and the demo binary;
//! deployments with persistence or smarter selection provide their own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use convoy_primitives::{AddrInfo, NetAddr, PeerAddr};
use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use tracing::trace;

/// Source of candidate peer addresses.
///
/// Implementations do their own locking; every method is safe to call
/// concurrently from the connector task and readers elsewhere.
pub trait AddressBook: Send + Sync {
    /// Stores candidates learned from `source`. Returns how many were new.
    fn add(&self, addrs: Vec<AddrInfo>, source: NetAddr) -> usize;

    /// Records a connection attempt to `addr`. `count_failure` marks the
    /// attempt as a reachability failure rather than a policy skip.
    fn attempt(&self, addr: &PeerAddr, count_failure: bool);

    /// Records a successful connection to `addr`.
    fn connected(&self, addr: &PeerAddr);

    /// Number of known candidates.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Picks a candidate. With `new_only`, only addresses never
    /// successfully connected to qualify. Returns `None` when the pool
    /// offers nothing.
    fn select(&self, new_only: bool) -> Option<AddrInfo>;
}

impl<T: AddressBook + ?Sized> AddressBook for Arc<T> {
    fn add(&self, addrs: Vec<AddrInfo>, source: NetAddr) -> usize {
        (**self).add(addrs, source)
    }

    fn attempt(&self, addr: &PeerAddr, count_failure: bool) {
        (**self).attempt(addr, count_failure)
    }

    fn connected(&self, addr: &PeerAddr) {
        (**self).connected(addr)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn select(&self, new_only: bool) -> Option<AddrInfo> {
        (**self).select(new_only)
    }
}

#[derive(Debug)]
struct BookEntry {
    info: AddrInfo,
    #[allow(dead_code)]
    source: NetAddr,
    attempts: u32,
    failures: u32,
    last_attempt: Option<Instant>,
    /// Set once a connection to this address succeeded.
    tried: bool,
}

/// Mutex-protected in-memory [`AddressBook`] with uniform random
/// selection.
#[derive(Debug, Default)]
pub struct MemoryAddressBook {
    entries: Mutex<HashMap<PeerAddr, BookEntry>>,
}

impl MemoryAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt bookkeeping for one address: (attempts, failures).
    pub fn attempt_counts(&self, addr: &PeerAddr) -> Option<(u32, u32)> {
        self.entries
            .lock()
            .get(addr)
            .map(|e| (e.attempts, e.failures))
    }

    /// Whether a connection to this address ever succeeded.
    pub fn is_tried(&self, addr: &PeerAddr) -> bool {
        self.entries.lock().get(addr).is_some_and(|e| e.tried)
    }
}

impl AddressBook for MemoryAddressBook {
    fn add(&self, addrs: Vec<AddrInfo>, source: NetAddr) -> usize {
        let mut entries = self.entries.lock();
        let mut added = 0;
        for info in addrs {
            if !info.addr.is_valid() {
                continue;
            }
            entries.entry(info.addr.clone()).or_insert_with(|| {
                added += 1;
                BookEntry {
                    info,
                    source: source.clone(),
                    attempts: 0,
                    failures: 0,
                    last_attempt: None,
                    tried: false,
                }
            });
        }
        if added > 0 {
            trace!(added, source = %source, "added address candidates");
        }
        added
    }

    fn attempt(&self, addr: &PeerAddr, count_failure: bool) {
        if let Some(entry) = self.entries.lock().get_mut(addr) {
            entry.attempts += 1;
            if count_failure {
                entry.failures += 1;
            }
            entry.last_attempt = Some(Instant::now());
        }
    }

    fn connected(&self, addr: &PeerAddr) {
        if let Some(entry) = self.entries.lock().get_mut(addr) {
            entry.tried = true;
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn select(&self, new_only: bool) -> Option<AddrInfo> {
        let entries = self.entries.lock();
        entries
            .values()
            .filter(|e| !new_only || !e.tried)
            .choose(&mut rand::rng())
            .map(|e| e.info.clone())
    }
}
