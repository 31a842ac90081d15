//! Call: owns the master R/W lock that gates the whole datapath (always
//! acquired first) plus the fields that need to mutate *while* that lock is
//! only held for reading — those get their own interior synchronization,
//! an explicit carve-out for the SSRC hash.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use slotmap::new_key_type;

use super::ssrc::SsrcEntry;

new_key_type! { pub struct CallId; }

/// Gated by `Call::master`: held read while a packet flows through the
/// pipeline, write during signaling and teardown.
pub struct Call {
    pub master: RwLock<()>,
    pub recording_enabled: std::sync::atomic::AtomicBool,
    ssrc_hash: Mutex<HashMap<u32, SsrcEntry>>,
    last_signal: Mutex<Instant>,
}

impl Call {
    pub fn new() -> Self {
        Call {
            master: RwLock::new(()),
            recording_enabled: std::sync::atomic::AtomicBool::new(false),
            ssrc_hash: Mutex::new(HashMap::new()),
            last_signal: Mutex::new(Instant::now()),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording_enabled.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Looks up (and, if absent, creates) the SSRC entry for `ssrc`.
    pub fn ssrc_entry(&self, ssrc: u32, f: impl FnOnce(&SsrcEntry)) {
        let mut hash = self.ssrc_hash.lock();
        let entry = hash.entry(ssrc).or_insert_with(|| SsrcEntry::new(ssrc));
        f(entry);
    }

    pub fn last_signal(&self) -> Instant {
        *self.last_signal.lock()
    }

    pub fn touch_last_signal(&self) {
        *self.last_signal.lock() = Instant::now();
    }

    pub fn seconds_since_last_signal(&self) -> f64 {
        self.last_signal().elapsed().as_secs_f64()
    }
}

impl Default for Call {
    fn default() -> Self {
        Self::new()
    }
}
