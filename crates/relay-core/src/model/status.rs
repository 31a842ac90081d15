//! Stream status bits, kept as a plain `AtomicU32` rather than a bitflags
//! type so set/clear/test each map onto a single atomic read-modify-write.

use std::sync::atomic::{AtomicU32, Ordering};

pub const FILLED: u32 = 1 << 0;
pub const CONFIRMED: u32 = 1 << 1;
pub const KERNELIZED: u32 = 1 << 2;
pub const NO_KERNEL_SUPPORT: u32 = 1 << 3;
pub const STRICT_SOURCE: u32 = 1 << 4;
pub const MEDIA_HANDOVER: u32 = 1 << 5;
pub const RTP: u32 = 1 << 6;
pub const RTCP: u32 = 1 << 7;

#[derive(Debug, Default)]
pub struct StatusFlags(AtomicU32);

impl StatusFlags {
    pub fn new(initial: u32) -> Self {
        StatusFlags(AtomicU32::new(initial))
    }

    pub fn test(&self, bit: u32) -> bool {
        self.0.load(Ordering::Acquire) & bit != 0
    }

    pub fn set(&self, bit: u32) {
        self.0.fetch_or(bit, Ordering::AcqRel);
    }

    pub fn clear(&self, bit: u32) {
        self.0.fetch_and(!bit, Ordering::AcqRel);
    }

    pub fn bits(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_round_trip() {
        let flags = StatusFlags::default();
        assert!(!flags.test(CONFIRMED));
        flags.set(CONFIRMED);
        assert!(flags.test(CONFIRMED));
        flags.set(KERNELIZED);
        assert!(flags.test(CONFIRMED) && flags.test(KERNELIZED));
        flags.clear(CONFIRMED);
        assert!(!flags.test(CONFIRMED));
        assert!(flags.test(KERNELIZED));
    }
}
