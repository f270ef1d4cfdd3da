//! Inbound eviction selection.
//!
//! When the node is at its inbound capacity it must free a slot without
//! handing an attacker an easy partitioning tool. The strategy protects a
//! small number of peers along several axes that are hard to fake all at
//! once (topology spread, latency, recent useful traffic, availability,
//! uptime) and then evicts from the network group that hogs the most
//! remaining slots.

use crate::conn::PeerId;

/// Snapshot of the eviction-relevant state of one connection.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub id: PeerId,
    /// Unix timestamp of connection setup; larger means younger.
    pub connected_at_unix: u64,
    pub min_ping_micros: u64,
    pub last_block_time: u64,
    pub last_proof_time: u64,
    pub last_tx_time: u64,
    pub has_desirable_services: bool,
    pub relays_txs: bool,
    pub bloom_filter_loaded: bool,
    pub keyed_net_group: u64,
    pub prefer_evict: bool,
    pub is_local: bool,
    /// `-inf` for peers that never negotiated polling, so they gain no
    /// protection from this axis.
    pub availability_score: f64,
}

/// Sorts by `cmp` and removes up to `k` elements satisfying `protect`
/// from the back. Removal protects: whoever leaves the vector can no
/// longer be selected.
fn erase_last_k_if<F, K>(candidates: &mut Vec<EvictionCandidate>, cmp: F, k: usize, protect: K)
where
    F: FnMut(&EvictionCandidate, &EvictionCandidate) -> std::cmp::Ordering,
    K: Fn(&EvictionCandidate) -> bool,
{
    candidates.sort_by(cmp);
    let start = candidates.len().saturating_sub(k);
    let mut index = candidates.len();
    while index > start {
        index -= 1;
        let protected = candidates.get(index).is_some_and(&protect);
        if protected {
            candidates.remove(index);
        }
    }
}

fn erase_last_k<F>(candidates: &mut Vec<EvictionCandidate>, cmp: F, k: usize)
where
    F: FnMut(&EvictionCandidate, &EvictionCandidate) -> std::cmp::Ordering,
{
    erase_last_k_if(candidates, cmp, k, |_| true);
}

/// Picks the connection to drop, or `None` when every candidate earned
/// protection.
///
/// Protection rounds, in order: 4 peers by highest keyed net group, 8 by
/// lowest ping, 4 by most recent transaction, 4 by most recent proof, up
/// to 8 non-tx-relay peers with desirable services by most recent block,
/// 4 more by most recent block, up to 128 with a positive availability
/// score, then half of the remainder by longest uptime with up to a
/// quarter of those slots reserved for local peers. Among the survivors,
/// prefer-evict peers are taken first; otherwise the youngest member of
/// the network group holding the most remaining slots goes.
pub fn select_peer_to_evict(mut candidates: Vec<EvictionCandidate>) -> Option<PeerId> {
    // Deterministic ties: fall back to id so equal keys do not make the
    // outcome depend on sort internals.
    erase_last_k(
        &mut candidates,
        |a, b| {
            a.keyed_net_group
                .cmp(&b.keyed_net_group)
                .then(b.id.cmp(&a.id))
        },
        4,
    );
    erase_last_k(
        &mut candidates,
        |a, b| {
            b.min_ping_micros
                .cmp(&a.min_ping_micros)
                .then(b.id.cmp(&a.id))
        },
        8,
    );
    erase_last_k(
        &mut candidates,
        |a, b| a.last_tx_time.cmp(&b.last_tx_time).then(b.id.cmp(&a.id)),
        4,
    );
    erase_last_k(
        &mut candidates,
        |a, b| {
            a.last_proof_time
                .cmp(&b.last_proof_time)
                .then(b.id.cmp(&a.id))
        },
        4,
    );
    erase_last_k_if(
        &mut candidates,
        |a, b| {
            a.last_block_time
                .cmp(&b.last_block_time)
                .then(b.id.cmp(&a.id))
        },
        8,
        |c: &EvictionCandidate| !c.relays_txs && c.has_desirable_services,
    );
    erase_last_k(
        &mut candidates,
        |a, b| {
            a.last_block_time
                .cmp(&b.last_block_time)
                .then(b.id.cmp(&a.id))
        },
        4,
    );
    erase_last_k_if(
        &mut candidates,
        |a, b| {
            a.availability_score
                .total_cmp(&b.availability_score)
                .then(b.id.cmp(&a.id))
        },
        128,
        |c| c.availability_score > 0.0,
    );

    // Protect half of what remains by longest uptime, reserving up to a
    // quarter of those slots for local peers.
    let initial_size = candidates.len();
    let total_protect = initial_size / 2;
    let local_slots = total_protect / 4;
    erase_last_k_if(
        &mut candidates,
        |a, b| {
            a.connected_at_unix
                .cmp(&b.connected_at_unix)
                .reverse()
                .then(b.id.cmp(&a.id))
        },
        local_slots,
        |c| c.is_local,
    );
    let remaining_protect = total_protect.saturating_sub(initial_size - candidates.len());
    erase_last_k(
        &mut candidates,
        |a, b| {
            a.connected_at_unix
                .cmp(&b.connected_at_unix)
                .reverse()
                .then(b.id.cmp(&a.id))
        },
        remaining_protect,
    );

    if candidates.is_empty() {
        return None;
    }

    // If any remaining peers are preferred for eviction, consider only them.
    if candidates.iter().any(|c| c.prefer_evict) {
        candidates.retain(|c| c.prefer_evict);
    }

    // Youngest first, so the head of each group is its youngest member.
    candidates.sort_by(|a, b| {
        b.connected_at_unix
            .cmp(&a.connected_at_unix)
            .then(a.id.cmp(&b.id))
    });

    // Identify the network group with the most connections, breaking ties
    // toward the group with the youngest newest member, and evict that
    // group's youngest peer.
    let mut groups: std::collections::HashMap<u64, Vec<&EvictionCandidate>> =
        std::collections::HashMap::new();
    let mut best: Option<(usize, u64, u64)> = None;
    for candidate in &candidates {
        let group = groups.entry(candidate.keyed_net_group).or_default();
        group.push(candidate);
        let youngest = group
            .first()
            .map(|c| c.connected_at_unix)
            .unwrap_or_default();
        let key = (group.len(), youngest, candidate.keyed_net_group);
        if best.is_none_or(|(size, time, _)| key.0 > size || (key.0 == size && key.1 > time)) {
            best = Some(key);
        }
    }

    let (_, _, group) = best?;
    groups
        .get(&group)
        .and_then(|members| members.first())
        .map(|victim| victim.id)
}
