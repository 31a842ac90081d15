//! External-system contracts. Each is a narrow trait this crate calls into
//! at a well-defined seam; none of their real implementations (DTLS stack,
//! ICE/STUN agent, RTCP rewriter, transcoder, kernel netlink socket, call
//! recorder, persistence store, firewall controller) live in this crate.
//! The reference implementations below are in-memory/no-op stand-ins so the
//! pipeline and registry are usable and testable without those systems
//! wired in.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::crypto::KernelSrtpBlock;
use crate::matrix::Profile;

/// Negotiates DTLS-SRTP keys out of band; by the time a stream reaches this
/// crate's pipeline the keys are already resolved into a
/// [`crate::crypto::CryptoParams`]. This trait only answers `handled?` for
/// a candidate DTLS packet on a stream.
pub trait DtlsLayer: Send + Sync {
    fn handle(&self, stream: u64, bytes: &[u8], src: SocketAddr) -> bool;
}

pub struct NoopDtlsLayer;

impl DtlsLayer for NoopDtlsLayer {
    fn handle(&self, _stream: u64, _bytes: &[u8], _src: SocketAddr) -> bool {
        false
    }
}

/// A sum type rather than a bool, since "not STUN", "handled", and "handled
/// but still needs a kernel-offload check" are three genuinely distinct
/// outcomes that a bool would overload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunOutcome {
    Handled,
    HandledNeedsKernelCheck,
    NotStun,
}

/// ICE/STUN connectivity checks and candidate learning. Address-learning in
/// this crate operates purely on observed source addresses, independent of
/// ICE state.
pub trait StunLayer: Send + Sync {
    fn handle(&self, bytes: &[u8], src: SocketAddr) -> StunOutcome;
}

pub struct NoopStunLayer;

impl StunLayer for NoopStunLayer {
    fn handle(&self, _bytes: &[u8], _src: SocketAddr) -> StunOutcome {
        StunOutcome::NotStun
    }
}

/// Full RTCP compound-packet parsing and AVPF-to-AVP feedback rewriting
/// live outside this crate; it only reads an RTCP packet's SSRC
/// (`relay_rtp::rtcp_packet`) and asks this trait whether a packet should
/// be stripped.
pub trait RtcpRewriter: Send + Sync {
    /// Rewrites an AVPF compound packet into its AVP-compatible form in
    /// place. Returning `false` means the whole packet should be dropped.
    fn rewrite_avpf_to_avp(&self, packet: &mut Vec<u8>) -> bool;
}

pub struct PassthroughRtcpRewriter;

impl RtcpRewriter for PassthroughRtcpRewriter {
    fn rewrite_avpf_to_avp(&self, _packet: &mut Vec<u8>) -> bool {
        true
    }
}

/// Transcoding between codecs lives outside this crate; this trait is the
/// seam the pipeline's transcode hook calls into between decrypt and
/// encrypt.
pub trait CodecRegistry: Send + Sync {
    fn transcode(&self, payload_type: u8, payload: &[u8]) -> Option<Vec<u8>>;
}

pub struct NoopCodecRegistry;

impl CodecRegistry for NoopCodecRegistry {
    fn transcode(&self, _payload_type: u8, _payload: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// Whether a mismatched source endpoint should drop the packet or be
/// adopted, mirrored into the kernel descriptor so the offloaded fast path
/// enforces the same policy as the userspace slow path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrcMismatchPolicy {
    Drop,
    Propagate,
}

/// Per-stream kernel descriptor handed to the (out-of-scope) kernel module
/// once a stream is eligible for offload.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub local: SocketAddr,
    pub egress_local: SocketAddr,
    pub remote: SocketAddr,
    pub tos: u8,
    pub rtcp_mux: bool,
    pub dtls: bool,
    pub stun: bool,
    pub ingress_ssrc: u32,
    pub ingress: KernelSrtpBlock,
    pub egress: KernelSrtpBlock,
    pub expected_source: Option<SocketAddr>,
    pub src_mismatch: Option<SrcMismatchPolicy>,
    pub payload_types: Vec<u8>,
    pub profile: Profile,
    pub recorder_extension: Option<Vec<u8>>,
}

/// The kernel netlink/ioctl offload plane. Real kernel offload support is a
/// Linux-specific out-of-tree module; this crate only needs to know whether
/// a target was accepted and be able to tear it down.
pub trait KernelInterface: Send + Sync {
    fn add_target(&self, info: &TargetInfo) -> bool;
    fn remove_target(&self, local: SocketAddr);
    fn supports_offload(&self) -> bool;
}

/// No kernel module present: every stream stays userspace-only, which is
/// always a correct (if slower) fallback.
pub struct NoKernelInterface;

impl KernelInterface for NoKernelInterface {
    fn add_target(&self, _info: &TargetInfo) -> bool {
        false
    }

    fn remove_target(&self, _local: SocketAddr) {}

    fn supports_offload(&self) -> bool {
        false
    }
}

/// Call recording sink; the pipeline's record hook hands it decrypted RTP
/// only, never raw wire bytes.
pub trait Recorder: Send + Sync {
    fn record(&self, stream: u64, payload_type: u8, payload: &[u8]);
}

pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn record(&self, _stream: u64, _payload_type: u8, _payload: &[u8]) {}
}

/// Redis-backed (or similar) call-state persistence, out of scope for this
/// crate. Kept as a trait so call setup/teardown can fire persistence hooks
/// without this crate depending on a concrete store.
pub trait Persistence: Send + Sync {
    fn save_call(&self, call_id: &str, blob: &[u8]);
    fn delete_call(&self, call_id: &str);
}

pub struct InMemoryPersistence {
    writes: AtomicU64,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        InMemoryPersistence {
            writes: AtomicU64::new(0),
        }
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_call(&self, _call_id: &str, _blob: &[u8]) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn delete_call(&self, _call_id: &str) {}
}

/// iptables/nftables rule management for allocated media ports.
pub trait Firewall: Send + Sync {
    fn add_rule(&self, addr: SocketAddr, label: &str);
    fn remove_rule(&self, addr: SocketAddr);
}

pub struct NoopFirewall;

impl Firewall for NoopFirewall {
    fn add_rule(&self, _addr: SocketAddr, _label: &str) {}
    fn remove_rule(&self, _addr: SocketAddr) {}
}
