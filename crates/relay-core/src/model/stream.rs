//! Packet stream. The ingress and egress state each get their own small
//! struct behind their own lock rather than per-field locks, so "under
//! `in_lock`" / "under `out_lock`" in the pipeline reads as an actual guard
//! acquisition, and the handler cache is race-free by construction.

use std::net::SocketAddr;
use std::time::Instant;

use parking_lot::Mutex;
use slotmap::new_key_type;

use crate::crypto::CryptoContext;
use crate::matrix::Cell;

use super::call::CallId;
use super::media::MediaId;
use super::stats::StatsTable;
use super::status::StatusFlags;
use super::stream_fd::StreamFdId;

new_key_type! { pub struct StreamId; }

/// Ring of the last `N` packet prefixes, for loop detection.
pub struct LoopRing {
    prefixes: Vec<Option<Vec<u8>>>,
    next: usize,
    duplicate_run: u32,
}

impl LoopRing {
    pub fn new(capacity: usize) -> Self {
        LoopRing {
            prefixes: vec![None; capacity.max(1)],
            next: 0,
            duplicate_run: 0,
        }
    }

    /// Returns `true` if `prefix` matches any ring entry (a loop). On a
    /// miss, records `prefix` at the rolling index and resets the run
    /// counter; on a hit, bumps it.
    pub fn observe(&mut self, prefix: &[u8], max_run: u32) -> bool {
        if self.prefixes.iter().flatten().any(|p| p.as_slice() == prefix) {
            self.duplicate_run += 1;
            return self.duplicate_run > max_run;
        }

        self.duplicate_run = 0;
        let len = self.prefixes.len();
        self.prefixes[self.next % len] = Some(prefix.to_vec());
        self.next = self.next.wrapping_add(1);
        false
    }
}

/// Fields guarded by `stream.in_lock`: ingress state, the cached handler
/// cell, and the loop-detect ring.
pub struct InLockState {
    pub cached_handlers: Option<Cell>,
    pub loop_ring: LoopRing,
}

impl InLockState {
    pub fn new(loop_ring_capacity: usize) -> Self {
        InLockState {
            cached_handlers: None,
            loop_ring: LoopRing::new(loop_ring_capacity),
        }
    }
}

/// Fields guarded by `stream.out_lock`: egress endpoint, selected FD, and
/// the egress crypto index.
pub struct OutLockState {
    pub known_peer: Option<SocketAddr>,
    pub selected_fd: Option<StreamFdId>,
    pub egress_crypto: CryptoContext,
}

impl OutLockState {
    pub fn new(egress_crypto: CryptoContext) -> Self {
        OutLockState {
            known_peer: None,
            selected_fd: None,
            egress_crypto,
        }
    }
}

pub struct PacketStream {
    pub call: CallId,
    pub media: MediaId,

    pub advertised_peer: Mutex<Option<SocketAddr>>,
    pub rtp_sink: Mutex<Option<StreamId>>,
    pub rtcp_sink: Mutex<Option<StreamId>>,
    pub rtcp_sibling: Mutex<Option<StreamId>>,

    pub stats: StatsTable,
    pub status: StatusFlags,
    pub last_packet: Mutex<Instant>,

    pub in_lock: Mutex<InLockState>,
    pub out_lock: Mutex<OutLockState>,
}

impl PacketStream {
    pub fn new(call: CallId, media: MediaId, loop_ring_capacity: usize) -> Self {
        PacketStream {
            call,
            media,
            advertised_peer: Mutex::new(None),
            rtp_sink: Mutex::new(None),
            rtcp_sink: Mutex::new(None),
            rtcp_sibling: Mutex::new(None),
            stats: StatsTable::new(),
            status: StatusFlags::default(),
            last_packet: Mutex::new(Instant::now()),
            in_lock: Mutex::new(InLockState::new(loop_ring_capacity)),
            out_lock: Mutex::new(OutLockState::new(CryptoContext::plain())),
        }
    }

    pub fn touch_last_packet(&self) {
        *self.last_packet.lock() = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_ring_flags_after_max_run_exceeded() {
        let mut ring = LoopRing::new(4);
        let prefix = b"abcd".to_vec();

        assert!(!ring.observe(&prefix, 2));
        for _ in 0..2 {
            assert!(!ring.observe(&prefix, 2));
        }
        // One more identical packet than the configured run length drops it.
        assert!(ring.observe(&prefix, 2));
    }

    #[test]
    fn loop_ring_resets_run_on_distinct_prefix() {
        let mut ring = LoopRing::new(4);
        assert!(!ring.observe(b"aaaa", 1));
        assert!(!ring.observe(b"bbbb", 1));
        assert!(!ring.observe(b"aaaa", 1));
    }
}
