//! Kernel offload controller. The real netlink/ioctl plane is the
//! [`KernelInterface`](crate::collaborators::KernelInterface) collaborator;
//! this module only decides eligibility and builds the descriptor.

use std::net::SocketAddr;

use crate::collaborators::{KernelInterface, SrcMismatchPolicy, TargetInfo};
use crate::crypto::KernelSrtpBlock;
use crate::matrix::Profile;
use crate::model::status;
use crate::model::stream::PacketStream;

pub struct KernelizeContext<'a> {
    pub stream: &'a PacketStream,
    pub sink: &'a PacketStream,
    pub recording_active: bool,
    pub recording_supports_kernel: bool,
    pub transcode: bool,
    pub stream_is_rtp: bool,
    pub local_addr: Option<SocketAddr>,
    pub sink_local_addr: Option<SocketAddr>,
    pub tos: u8,
    pub dtls: bool,
    pub stun: bool,
    pub rtcp_mux: bool,
    pub ingress_ssrc: u32,
    pub ingress_block: KernelSrtpBlock,
    pub egress_block: KernelSrtpBlock,
    pub payload_types: Vec<u8>,
    pub profile: Profile,
    pub recorder_extension: Option<Vec<u8>>,
}

/// Rejects offload for this stream: rejection still sets `KERNELIZED`
/// (alongside `NO_KERNEL_SUPPORT`) so the slow path is not retried on every
/// packet until the stream is re-confirmed.
fn reject(stream: &PacketStream) -> bool {
    stream.status.set(status::KERNELIZED);
    stream.status.set(status::NO_KERNEL_SUPPORT);
    false
}

/// Idempotent; runs under the stream's in-lock.
pub fn kernelize(ctx: &KernelizeContext, kernel: &dyn KernelInterface) -> bool {
    let in_guard = ctx.stream.in_lock.lock();

    if ctx.stream.status.test(status::KERNELIZED) {
        return !ctx.stream.status.test(status::NO_KERNEL_SUPPORT);
    }

    if ctx.recording_active && !ctx.recording_supports_kernel {
        return reject(ctx.stream);
    }
    if ctx.transcode {
        return reject(ctx.stream);
    }
    if !kernel.supports_offload() {
        return reject(ctx.stream);
    }
    if !ctx.stream_is_rtp {
        return reject(ctx.stream);
    }

    let (Some(local), Some(egress_local)) = (ctx.local_addr, ctx.sink_local_addr) else {
        return reject(ctx.stream);
    };

    let sink_endpoint = match ctx.sink.out_lock.lock().known_peer {
        Some(addr) if addr.port() != 0 => addr,
        _ => return reject(ctx.stream),
    };

    let Some(cell) = in_guard.cached_handlers else {
        return reject(ctx.stream);
    };
    if !cell.in_ops.supports_kernel() || !cell.out_ops.supports_kernel() {
        return reject(ctx.stream);
    }
    drop(in_guard);

    if !ctx.ingress_block.is_supported() || !ctx.egress_block.is_supported() {
        return reject(ctx.stream);
    }

    let (expected_source, src_mismatch) = if ctx.stream.status.test(status::STRICT_SOURCE) {
        (ctx.stream.out_lock.lock().known_peer, Some(SrcMismatchPolicy::Drop))
    } else if ctx.stream.status.test(status::MEDIA_HANDOVER) {
        (
            ctx.stream.out_lock.lock().known_peer,
            Some(SrcMismatchPolicy::Propagate),
        )
    } else {
        (None, None)
    };

    let mut payload_types = ctx.payload_types.clone();
    payload_types.sort_unstable();

    let target = TargetInfo {
        local,
        egress_local,
        remote: sink_endpoint,
        tos: ctx.tos,
        rtcp_mux: ctx.rtcp_mux,
        dtls: ctx.dtls,
        stun: ctx.stun,
        ingress_ssrc: ctx.ingress_ssrc,
        ingress: ctx.ingress_block.clone(),
        egress: ctx.egress_block.clone(),
        expected_source,
        src_mismatch,
        payload_types,
        profile: ctx.profile,
        recorder_extension: ctx.recorder_extension.clone(),
    };

    if kernel.add_target(&target) {
        ctx.stream.status.set(status::KERNELIZED);
        ctx.stream.status.clear(status::NO_KERNEL_SUPPORT);
        true
    } else {
        reject(ctx.stream)
    }
}

/// Removes the kernel target (if one was installed) and clears
/// `KERNELIZED`.
pub fn unkernelize(stream: &PacketStream, local_addr: Option<SocketAddr>, kernel: &dyn KernelInterface) {
    if let Some(addr) = local_addr {
        kernel.remove_target(addr);
    }
    stream.status.clear(status::KERNELIZED);
}

/// Un-confirms a stream: additionally clears `CONFIRMED` and the cached
/// handler pair, so the next packet re-resolves the matrix cell.
pub fn stream_unconfirm(stream: &PacketStream, local_addr: Option<SocketAddr>, kernel: &dyn KernelInterface) {
    unkernelize(stream, local_addr, kernel);
    stream.status.clear(status::CONFIRMED);
    stream.in_lock.lock().cached_handlers = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NoKernelInterface;
    use crate::crypto::{Cipher, Hmac};
    use crate::matrix::{Cell, HandlerOps, RtcpOp, RtpOp};
    use crate::model::{CallId, MediaId, PacketStream};

    struct AcceptingKernelInterface;

    impl KernelInterface for AcceptingKernelInterface {
        fn add_target(&self, _info: &TargetInfo) -> bool {
            true
        }
        fn remove_target(&self, _local: SocketAddr) {}
        fn supports_offload(&self) -> bool {
            true
        }
    }

    fn real_srtp_block() -> KernelSrtpBlock {
        KernelSrtpBlock {
            cipher: Cipher::AesCm128,
            hmac: Hmac::Sha1_80,
            mki: 0,
            mki_len: 0,
            master_key: vec![0u8; 16],
            master_salt: vec![0u8; 14],
            session_key_len: 16,
            auth_tag_len: 10,
            last_index: 0,
        }
    }

    /// Sets up a stream/sink pair that clears every other eligibility gate,
    /// so only the crypto-block check under test can still reject.
    fn eligible_ctx<'a>(
        stream: &'a PacketStream,
        sink: &'a PacketStream,
        ingress_block: KernelSrtpBlock,
        egress_block: KernelSrtpBlock,
    ) -> KernelizeContext<'a> {
        sink.out_lock.lock().known_peer = Some("127.0.0.1:20000".parse().unwrap());
        stream.in_lock.lock().cached_handlers = Some(Cell {
            in_ops: HandlerOps {
                rtp: RtpOp::Pass,
                rtcp: RtcpOp::Pass,
            },
            out_ops: HandlerOps {
                rtp: RtpOp::Pass,
                rtcp: RtcpOp::Pass,
            },
        });

        let mut context = ctx(stream, sink);
        context.ingress_block = ingress_block;
        context.egress_block = egress_block;
        context
    }

    fn ctx<'a>(stream: &'a PacketStream, sink: &'a PacketStream) -> KernelizeContext<'a> {
        KernelizeContext {
            stream,
            sink,
            recording_active: false,
            recording_supports_kernel: false,
            transcode: false,
            stream_is_rtp: true,
            local_addr: Some("127.0.0.1:10000".parse().unwrap()),
            sink_local_addr: Some("127.0.0.1:10002".parse().unwrap()),
            tos: 0,
            dtls: false,
            stun: false,
            rtcp_mux: false,
            ingress_ssrc: 0,
            ingress_block: KernelSrtpBlock::null(),
            egress_block: KernelSrtpBlock::null(),
            payload_types: vec![0, 8],
            profile: Profile::Avp,
            recorder_extension: None,
        }
    }

    #[test]
    fn no_kernel_interface_always_rejects_and_sets_no_support() {
        let stream = PacketStream::new(CallId::default(), MediaId::default(), 10);
        let sink = PacketStream::new(CallId::default(), MediaId::default(), 10);

        let accepted = kernelize(&ctx(&stream, &sink), &NoKernelInterface);
        assert!(!accepted);
        assert!(stream.status.test(status::KERNELIZED));
        assert!(stream.status.test(status::NO_KERNEL_SUPPORT));
    }

    #[test]
    fn accepts_when_both_blocks_are_supported() {
        let stream = PacketStream::new(CallId::default(), MediaId::default(), 10);
        let sink = PacketStream::new(CallId::default(), MediaId::default(), 10);
        let ctx = eligible_ctx(&stream, &sink, real_srtp_block(), real_srtp_block());

        let accepted = kernelize(&ctx, &AcceptingKernelInterface);

        assert!(accepted);
        assert!(stream.status.test(status::KERNELIZED));
        assert!(!stream.status.test(status::NO_KERNEL_SUPPORT));
    }

    #[test]
    fn rejects_when_either_block_is_unsupported() {
        let stream = PacketStream::new(CallId::default(), MediaId::default(), 10);
        let sink = PacketStream::new(CallId::default(), MediaId::default(), 10);
        let ctx = eligible_ctx(&stream, &sink, KernelSrtpBlock::null(), real_srtp_block());

        let accepted = kernelize(&ctx, &AcceptingKernelInterface);

        assert!(!accepted);
        assert!(stream.status.test(status::KERNELIZED));
        assert!(stream.status.test(status::NO_KERNEL_SUPPORT));
    }

    #[test]
    fn stream_unconfirm_clears_confirmed_and_cache() {
        let stream = PacketStream::new(CallId::default(), MediaId::default(), 10);
        stream.status.set(status::CONFIRMED);
        stream.status.set(status::KERNELIZED);

        stream_unconfirm(&stream, None, &NoKernelInterface);

        assert!(!stream.status.test(status::CONFIRMED));
        assert!(!stream.status.test(status::KERNELIZED));
        assert!(stream.in_lock.lock().cached_handlers.is_none());
    }
}
