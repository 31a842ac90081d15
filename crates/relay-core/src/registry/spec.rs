//! Interface spec: the bind-address + port-pool state shared by every local
//! interface on the same address. The port pool is an atomic bitmap rather
//! than a mutex-guarded bit vector: `used` bit test-and-set plus
//! `free_count`/`last_used` atomic add/set need no lock.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// One bit per port in `[min, max]`, packed into 64-bit words.
pub struct PortPool {
    pub min: u16,
    pub max: u16,
    used: Vec<AtomicU64>,
    free_count: AtomicU32,
    last_used: AtomicU32,
}

impl PortPool {
    pub fn new(min: u16, max: u16) -> Self {
        assert!(min <= max);
        let total = (max - min) as usize + 1;
        let words = total.div_ceil(64);

        PortPool {
            min,
            max,
            used: (0..words).map(|_| AtomicU64::new(0)).collect(),
            free_count: AtomicU32::new(total as u32),
            last_used: AtomicU32::new(min as u32),
        }
    }

    pub fn total(&self) -> u32 {
        (self.max - self.min) as u32 + 1
    }

    pub fn free_count(&self) -> u32 {
        self.free_count.load(Ordering::Acquire)
    }

    pub fn last_used(&self) -> u16 {
        self.last_used.load(Ordering::Acquire) as u16
    }

    pub fn set_last_used(&self, port: u16) {
        self.last_used.store(port as u32, Ordering::Release);
    }

    fn bit(&self, port: u16) -> (usize, u64) {
        let offset = (port - self.min) as usize;
        (offset / 64, 1u64 << (offset % 64))
    }

    /// Atomically claims `port` if free. Returns `true` if this call won the
    /// claim (so the caller, and only the caller, owns the port).
    pub fn try_claim(&self, port: u16) -> bool {
        if port < self.min || port > self.max {
            return false;
        }

        let (word, mask) = self.bit(port);
        let prev = self.used[word].fetch_or(mask, Ordering::AcqRel);
        if prev & mask != 0 {
            return false;
        }

        self.free_count.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Releases a previously claimed port. Releasing an already-free port is
    /// a no-op (idempotent, matches `release_port`'s best-effort cleanup on
    /// partial-allocation rollback).
    pub fn release(&self, port: u16) {
        if port < self.min || port > self.max {
            return;
        }

        let (word, mask) = self.bit(port);
        let prev = self.used[word].fetch_and(!mask, Ordering::AcqRel);
        if prev & mask != 0 {
            self.free_count.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn is_used(&self, port: u16) -> bool {
        if port < self.min || port > self.max {
            return false;
        }
        let (word, mask) = self.bit(port);
        self.used[word].load(Ordering::Acquire) & mask != 0
    }
}

/// Shared by every [`LocalInterface`](super::LocalInterface) bound to the
/// same address + family.
pub struct InterfaceSpec {
    pub local_address: IpAddr,
    pub port_pool: PortPool,
}

impl InterfaceSpec {
    pub fn new(local_address: IpAddr, port_min: u16, port_max: u16) -> Self {
        InterfaceSpec {
            local_address,
            port_pool: PortPool::new(port_min, port_max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_count_invariant_holds_after_claim_and_release() {
        let pool = PortPool::new(10000, 10099);
        assert_eq!(pool.free_count(), 100);

        assert!(pool.try_claim(10000));
        assert!(pool.try_claim(10001));
        assert_eq!(pool.free_count(), 98);

        assert!(!pool.try_claim(10000), "double claim must fail");
        assert_eq!(pool.free_count(), 98);

        pool.release(10000);
        assert_eq!(pool.free_count(), 99);
        assert!(!pool.is_used(10000));
        assert!(pool.is_used(10001));
    }

    #[test]
    fn release_of_free_port_is_noop() {
        let pool = PortPool::new(100, 200);
        pool.release(150);
        assert_eq!(pool.free_count(), 101);
    }
}
