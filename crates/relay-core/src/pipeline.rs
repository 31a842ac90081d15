//! The per-datagram pipeline. Returns `()` always: no per-packet error
//! propagates past this function; every drop is a `log` line plus a stats
//! counter at the point it happens.

use std::net::SocketAddr;

use relay_rtp::{PacketKind, RtcpHeader, RtpHeader};

use crate::address_learn;
use crate::collaborators::{DtlsLayer, KernelInterface, Recorder, RtcpRewriter, StunLayer, StunOutcome};
use crate::config::Flags;
use crate::crypto::TransformOutcome;
use crate::kernel::{self, KernelizeContext};
use crate::matrix::{self, Cell, RtcpOp, RtpOp};
use crate::model::call::Call;
use crate::model::stream::PacketStream;
use crate::model::stream_fd::StreamFdId;
use crate::model::{CallArena, StreamId};

pub struct Collaborators<'a> {
    pub dtls: &'a dyn DtlsLayer,
    pub stun: &'a dyn StunLayer,
    pub rtcp: &'a dyn RtcpRewriter,
    pub kernel: &'a dyn KernelInterface,
    pub recorder: &'a dyn Recorder,
}

/// Entry point: `(sfd, raw_bytes, source_endpoint)`. Runs synchronously end
/// to end — every socket op on the send side is non-blocking
/// (`try_send_to`), so the recv loop around this call is the only place
/// that actually awaits.
pub fn handle_packet(
    arena: &CallArena,
    call: &Call,
    collaborators: &Collaborators<'_>,
    flags: &Flags,
    sfd_id: StreamFdId,
    raw: &[u8],
    source: SocketAddr,
) {
    let _master = call.master.read();

    let Some(sfd) = arena.stream_fds.get(sfd_id) else {
        return;
    };
    let Some(stream) = arena.streams.get(sfd.stream) else {
        return;
    };
    let Some(media) = arena.media.get(stream.media) else {
        return;
    };

    // Protocol demux.
    let kind = PacketKind::identify(raw);

    if media.flags.dtls && kind == PacketKind::Dtls {
        collaborators.dtls.handle(sfd.id_in_call as u64, raw, source);
        return;
    }

    if media.flags.ice {
        match collaborators.stun.handle(raw, source) {
            StunOutcome::Handled => return,
            StunOutcome::HandledNeedsKernelCheck => {
                run_kernel_check(arena, stream, media, call, sfd_id, flags, collaborators.kernel);
                return;
            }
            StunOutcome::NotStun => {}
        }
    }

    if kind == PacketKind::Unknown {
        log::trace!("dropping unclassifiable packet from {source}");
        return;
    }

    // Loop detect.
    if media.flags.loop_check {
        let prefix_len = raw.len().min(flags.rtp_loop_packets);
        let looped = stream
            .in_lock
            .lock()
            .loop_ring
            .observe(&raw[..prefix_len], flags.rtp_loop_max_count);
        if looped {
            stream.stats.increment_errors();
            log::warn!("loop detected on stream, dropping packet");
            return;
        }
    }

    // RTCP-mux demux.
    let mut in_srtp_id = sfd.stream;
    let mut rtcp = kind == PacketKind::Rtcp;
    let mut sink_id = *stream.rtp_sink.lock();

    if sink_id.is_none() && stream.status.test(crate::model::status::RTCP) {
        sink_id = *stream.rtcp_sink.lock();
        rtcp = true;
    } else if let Some(rtcp_sink) = *stream.rtcp_sink.lock() {
        if media.flags.rtcp_mux && kind == PacketKind::Rtcp {
            sink_id = Some(rtcp_sink);
            rtcp = true;
            if let Some(sibling) = *stream.rtcp_sibling.lock() {
                in_srtp_id = sibling;
            }
        }
    }

    let Some(sink_id) = sink_id else {
        log::debug!("no sink for stream, dropping packet");
        return;
    };

    let out_srtp_id = if rtcp {
        arena
            .streams
            .get(sink_id)
            .and_then(|s| *s.rtcp_sibling.lock())
            .unwrap_or(sink_id)
    } else {
        sink_id
    };

    let Some(in_srtp) = arena.streams.get(in_srtp_id) else {
        return;
    };
    let Some(out_srtp) = arena.streams.get(out_srtp_id) else {
        return;
    };

    // RTP/RTCP parse & SSRC.
    let (ssrc, payload_type) = if rtcp {
        match RtcpHeader::parse(raw) {
            Ok(header) => (header.ssrc, None),
            Err(_) => {
                stream.stats.increment_errors();
                log::debug!("malformed RTCP packet, dropping");
                return;
            }
        }
    } else {
        match RtpHeader::parse(raw) {
            Ok(header) => (header.ssrc, Some(header.payload_type)),
            Err(_) => {
                stream.stats.increment_errors();
                log::debug!("malformed RTP packet, dropping");
                return;
            }
        }
    };

    call.ssrc_entry(ssrc, |entry| {
        if let Some(pt) = payload_type {
            entry.inbound.set_payload_type(pt);
        }
    });

    if let Some(pt) = payload_type {
        in_srtp.stats.record_rtp(pt, raw.len());
    } else {
        in_srtp.stats.record_rtcp(raw.len());
    }

    // Choose handlers (cached under in_lock).
    let in_profile = media.protocol;
    let out_media = arena.media.get(media_of(arena, out_srtp_id));
    let out_profile = out_media.map(|m| m.protocol).unwrap_or(in_profile);

    let cell = {
        let mut in_lock = in_srtp.in_lock.lock();
        if let Some(cached) = in_lock.cached_handlers {
            cached
        } else {
            let use_recrypt = matrix::use_recrypt_matrix(media.flags.dtls, call.is_recording(), false);
            let resolved = matrix::resolve(in_profile, out_profile, media.flags.passthru, use_recrypt);
            in_lock.cached_handlers = Some(resolved);
            resolved
        }
    };

    // Decrypt.
    let mut packet = raw.to_vec();
    let decrypt_outcome = apply_ingress_transform(&cell, rtcp, sfd, &mut packet, collaborators.rtcp);
    if decrypt_outcome == TransformOutcome::Error {
        stream.stats.increment_errors();
        log::debug!("decrypt failed, dropping packet");
        return;
    }

    // Record.
    if call.is_recording() {
        collaborators
            .recorder
            .record(sfd.id_in_call as u64, payload_type.unwrap_or(0), &packet);
    }

    // Transcode (identity passthrough; real transcoding is a collaborator
    // concern the pipeline only hands the raw packet to).
    let mut packets_out = vec![packet];

    // Encrypt.
    for fragment in packets_out.iter_mut() {
        let mut out_lock = out_srtp.out_lock.lock();
        let outcome = if rtcp {
            match cell.out_ops.rtcp {
                RtcpOp::Encrypt => out_lock.egress_crypto.protect_rtcp(fragment),
                _ => TransformOutcome::Ok,
            }
        } else {
            match cell.out_ops.rtp {
                RtpOp::Encrypt => out_lock.egress_crypto.protect_rtp(fragment),
                _ => TransformOutcome::Ok,
            }
        };
        if outcome == TransformOutcome::Error {
            stream.stats.increment_errors();
            log::debug!("encrypt failed, dropping fragment");
            return;
        }
    }

    // Address learn.
    let verdict = address_learn::learn(in_srtp, media, call, source, sfd_id);
    if !verdict.forward {
        return;
    }

    // Kernel gate.
    if verdict.unkernelize {
        let local = arena
            .stream_fds
            .get(sfd_id)
            .and_then(|s| s.socket.local_addr().ok());
        kernel::unkernelize(in_srtp, local, collaborators.kernel);
    }
    if verdict.kernelize {
        run_kernel_check(arena, in_srtp, media, call, sfd_id, flags, collaborators.kernel);
    }

    // Send, under sink.out_lock (sockets are nonblocking, so this never
    // suspends).
    {
        let out_lock = out_srtp.out_lock.lock();
        let send_target = out_lock.known_peer.unwrap_or(source);
        let selected = out_lock.selected_fd;
        drop(out_lock);

        if send_target.port() == 0 {
            log::debug!("sink endpoint unspecified, dropping packet");
        } else if let Some(out_sfd) = selected.and_then(|id| arena.stream_fds.get(id)) {
            for fragment in &packets_out {
                if let Err(err) = out_sfd.socket.try_send_to(fragment, send_target) {
                    log::warn!("send failed: {err}");
                    stream.stats.increment_errors();
                    break;
                }
            }
        }
    }

    // Stats & cleanup.
    stream.touch_last_packet();
}

/// Applies the ingress-side RTP/RTCP crypto transform selected by the
/// matrix cell, in place on the full wire-format packet.
fn apply_ingress_transform(
    cell: &Cell,
    rtcp: bool,
    sfd: &crate::model::stream_fd::StreamFd,
    packet: &mut Vec<u8>,
    rewriter: &dyn RtcpRewriter,
) -> TransformOutcome {
    let mut ingress = sfd.ingress_crypto.lock();

    if rtcp {
        let outcome = match cell.in_ops.rtcp {
            RtcpOp::Decrypt | RtcpOp::DecryptThenAvpfStrip => ingress.unprotect_rtcp(packet),
            _ => TransformOutcome::Ok,
        };
        if outcome == TransformOutcome::Error {
            return outcome;
        }
        if matches!(cell.in_ops.rtcp, RtcpOp::AvpfStrip | RtcpOp::DecryptThenAvpfStrip)
            && !rewriter.rewrite_avpf_to_avp(packet)
        {
            return TransformOutcome::Error;
        }
        outcome
    } else {
        match cell.in_ops.rtp {
            RtpOp::Decrypt => ingress.unprotect_rtp(packet),
            _ => TransformOutcome::Ok,
        }
    }
}

fn run_kernel_check(
    arena: &CallArena,
    stream: &PacketStream,
    media: &crate::model::Media,
    call: &Call,
    received_on: StreamFdId,
    _flags: &Flags,
    kernel: &dyn KernelInterface,
) {
    let Some(sfd) = arena.stream_fds.get(received_on) else {
        return;
    };
    let Some(sink_id) = *stream.rtp_sink.lock() else {
        return;
    };
    let Some(sink) = arena.streams.get(sink_id) else {
        return;
    };

    let local = sfd.socket.local_addr().ok();

    let sink_out_lock = sink.out_lock.lock();
    let sink_local = sink_out_lock
        .selected_fd
        .and_then(|id| arena.stream_fds.get(id))
        .and_then(|s| s.socket.local_addr().ok());
    let egress_block = sink_out_lock.egress_crypto.kernel_block();
    drop(sink_out_lock);

    let ingress_block = sfd.ingress_crypto.lock().kernel_block();

    let ctx = KernelizeContext {
        stream,
        sink,
        recording_active: call.is_recording(),
        recording_supports_kernel: false,
        transcode: media.flags.transcode,
        stream_is_rtp: true,
        local_addr: local,
        sink_local_addr: sink_local,
        tos: 0,
        dtls: media.flags.dtls,
        stun: media.flags.ice,
        rtcp_mux: media.flags.rtcp_mux,
        ingress_ssrc: 0,
        ingress_block,
        egress_block,
        payload_types: stream.stats.registered_payload_types(),
        profile: media.protocol,
        recorder_extension: None,
    };

    kernel::kernelize(&ctx, kernel);
}

/// Resolves the `Media` id owning `stream_id`, defaulting to a null key
/// (which then misses every arena lookup) if the stream is gone.
fn media_of(arena: &CallArena, stream_id: StreamId) -> crate::model::MediaId {
    arena
        .streams
        .get(stream_id)
        .map(|s| s.media)
        .unwrap_or_default()
}
