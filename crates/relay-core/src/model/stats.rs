//! Per-stream and per-payload-type counters. Plain atomics behind a
//! `parking_lot::Mutex` for the per-PT map, since its key set grows as new
//! payload types are negotiated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct PayloadTypeStats {
    pub packets: AtomicU64,
    pub bytes: AtomicU64,
}

#[derive(Debug, Default)]
pub struct StatsTable {
    per_pt: Mutex<HashMap<u8, PayloadTypeStats>>,
    packets: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

impl StatsTable {
    pub fn new() -> Self {
        StatsTable::default()
    }

    /// Negotiated payload types get a row up front (signaling's job); an
    /// RTP packet whose PT has no row is "unknown".
    pub fn register_payload_type(&self, pt: u8) {
        self.per_pt.lock().entry(pt).or_default();
    }

    /// Records one RTP packet's stats. Known PT increments its row and the
    /// stream totals; unknown PT increments the stream error counter
    /// instead of a row.
    pub fn record_rtp(&self, pt: u8, len: usize) {
        let mut per_pt = self.per_pt.lock();
        match per_pt.get(&pt) {
            Some(row) => {
                row.packets.fetch_add(1, Ordering::Relaxed);
                row.bytes.fetch_add(len as u64, Ordering::Relaxed);
                self.packets.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(len as u64, Ordering::Relaxed);
            }
            None => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_rtcp(&self, len: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn payload_type_packets(&self, pt: u8) -> u64 {
        self.per_pt
            .lock()
            .get(&pt)
            .map(|row| row.packets.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// The negotiated payload types registered so far, for handing to the
    /// kernel offload descriptor.
    pub fn registered_payload_types(&self) -> Vec<u8> {
        self.per_pt.lock().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_payload_type_increments_its_row_and_totals() {
        let stats = StatsTable::new();
        stats.register_payload_type(0);

        stats.record_rtp(0, 172);

        assert_eq!(stats.payload_type_packets(0), 1);
        assert_eq!(stats.packets(), 1);
        assert_eq!(stats.errors(), 0);
    }

    #[test]
    fn unknown_payload_type_increments_errors_not_a_row() {
        let stats = StatsTable::new();
        stats.register_payload_type(0);

        stats.record_rtp(96, 172);

        assert_eq!(stats.payload_type_packets(96), 0);
        assert_eq!(stats.errors(), 1);
        assert_eq!(stats.packets(), 0);
    }
}
