//! SSRC bookkeeping. One [`SsrcEntry`] per 32-bit SSRC seen on a call,
//! shared by its ingress and egress [`SsrcContext`] halves; looked up
//! through `Call::ssrc_hash`, which uses its own internal synchronization
//! rather than living under `Call::master`.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

#[derive(Debug, Default)]
pub struct SsrcContext {
    payload_type: AtomicU8,
    /// SRTP rollover counter / packet index (low 16 bits are the sequence
    /// number); must survive kernel/userspace handoff (GLOSSARY).
    srtp_index: AtomicU64,
    /// Translated outgoing SSRC for transcoding; 0 means "no remap".
    ssrc_map_out: AtomicU32,
}

impl SsrcContext {
    pub fn payload_type(&self) -> u8 {
        self.payload_type.load(Ordering::Relaxed)
    }

    pub fn set_payload_type(&self, pt: u8) {
        self.payload_type.store(pt, Ordering::Relaxed);
    }

    pub fn srtp_index(&self) -> u64 {
        self.srtp_index.load(Ordering::Relaxed)
    }

    pub fn set_srtp_index(&self, index: u64) {
        self.srtp_index.store(index, Ordering::Relaxed);
    }

    pub fn mapped_ssrc(&self) -> Option<u32> {
        match self.ssrc_map_out.load(Ordering::Relaxed) {
            0 => None,
            mapped => Some(mapped),
        }
    }

    pub fn set_mapped_ssrc(&self, ssrc: u32) {
        self.ssrc_map_out.store(ssrc, Ordering::Relaxed);
    }
}

/// The parent entry shared by one SSRC's ingress and egress contexts.
#[derive(Debug, Default)]
pub struct SsrcEntry {
    pub ssrc: u32,
    pub inbound: SsrcContext,
    pub outbound: SsrcContext,
}

impl SsrcEntry {
    pub fn new(ssrc: u32) -> Self {
        SsrcEntry {
            ssrc,
            inbound: SsrcContext::default(),
            outbound: SsrcContext::default(),
        }
    }
}
