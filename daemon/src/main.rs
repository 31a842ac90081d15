//! Demonstration binary wiring `relay-core`'s datapath to real sockets.
//! Stands in for the out-of-scope SIP/SDP signaling plane only far enough
//! to exercise two RTP/RTCP legs relaying to each other; it does no SDP
//! parsing of its own.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use relay_core::collaborators::{
    NoKernelInterface, NoopDtlsLayer, NoopFirewall, NoopRecorder, NoopStunLayer,
    PassthroughRtcpRewriter,
};
use relay_core::config::{Flags, InterfaceEntry};
use relay_core::crypto::CryptoContext;
use relay_core::matrix::Profile;
use relay_core::model::{Call, CallArena, Media, MediaFlags, PacketStream, StreamFd};
use relay_core::pipeline::{self, Collaborators};
use relay_core::registry::{get_consecutive_ports_on_lif, Family, Registry};
use tokio::net::UdpSocket;

const LOOP_RING_CAPACITY: usize = 10;

/// Owns every out-of-scope collaborator's no-op stand-in so a `Collaborators`
/// borrow can be handed to the pipeline from inside each recv task.
struct Collabs {
    dtls: NoopDtlsLayer,
    stun: NoopStunLayer,
    rtcp: PassthroughRtcpRewriter,
    kernel: NoKernelInterface,
    recorder: NoopRecorder,
}

impl Collabs {
    fn as_refs(&self) -> Collaborators<'_> {
        Collaborators {
            dtls: &self.dtls,
            stun: &self.stun,
            rtcp: &self.rtcp,
            kernel: &self.kernel,
            recorder: &self.recorder,
        }
    }
}

/// One relay leg: an RTP stream and its RTCP stream, each with its own
/// bound `StreamFd`.
struct Leg {
    rtp_stream: relay_core::model::StreamId,
    rtcp_stream: relay_core::model::StreamId,
    rtp_fd: relay_core::model::StreamFdId,
    rtcp_fd: relay_core::model::StreamFdId,
}

async fn open_leg(
    registry: &Registry,
    arena: &mut CallArena,
    call_id: relay_core::model::CallId,
    media_id: relay_core::model::MediaId,
    flags: &Flags,
    label: &str,
) -> Leg {
    let lif = registry
        .get_logical_interface(None, Some(Family::V4), 2)
        .expect("at least one interface configured");
    let local_interface = registry.local_interfaces_of(lif)[0];

    let mut allocated = get_consecutive_ports_on_lif(registry, lif, 2, label, flags, &NoopFirewall)
        .await
        .expect("demo interface has enough free ports for two legs");
    let (_addr, sockets) = allocated.remove(0);
    let mut sockets = sockets.into_iter();
    let rtp_socket = Arc::new(sockets.next().expect("rtp socket"));
    let rtcp_socket = Arc::new(sockets.next().expect("rtcp socket"));

    let rtp_stream = arena.streams.insert(PacketStream::new(call_id, media_id, LOOP_RING_CAPACITY));
    let rtcp_stream = arena.streams.insert(PacketStream::new(call_id, media_id, LOOP_RING_CAPACITY));
    arena.streams[rtp_stream].status.set(relay_core::model::status::FILLED);
    arena.streams[rtp_stream].status.set(relay_core::model::status::RTP);
    arena.streams[rtcp_stream].status.set(relay_core::model::status::FILLED);
    arena.streams[rtcp_stream].status.set(relay_core::model::status::RTCP);
    *arena.streams[rtp_stream].rtcp_sibling.lock() = Some(rtcp_stream);
    *arena.streams[rtcp_stream].rtcp_sibling.lock() = Some(rtp_stream);

    let rtp_fd = arena.stream_fds.insert(StreamFd::new(
        rtp_socket,
        call_id,
        rtp_stream,
        local_interface,
        CryptoContext::plain(),
        0,
    ));
    let rtcp_fd = arena.stream_fds.insert(StreamFd::new(
        rtcp_socket,
        call_id,
        rtcp_stream,
        local_interface,
        CryptoContext::plain(),
        1,
    ));

    Leg {
        rtp_stream,
        rtcp_stream,
        rtp_fd,
        rtcp_fd,
    }
}

/// Spawns the recv task for one `StreamFd`: up to `Flags::max_recv_iters`
/// datagrams per wakeup.
fn spawn_recv_task(
    arena: Arc<CallArena>,
    call: Arc<Call>,
    collabs: Arc<Collabs>,
    flags: Flags,
    sfd_id: relay_core::model::StreamFdId,
) {
    let socket = arena.stream_fds[sfd_id].socket.clone();

    tokio::spawn(async move {
        let mut buf = vec![0u8; flags.max_rtp_packet_size];
        loop {
            if let Err(err) = socket.readable().await {
                log::error!("socket no longer readable: {err}");
                return;
            }

            for _ in 0..flags.max_recv_iters {
                match socket.try_recv_from(&mut buf) {
                    Ok((n, source)) => {
                        let collaborators = collabs.as_refs();
                        pipeline::handle_packet(&arena, &call, &collaborators, &flags, sfd_id, &buf[..n], source);
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        log::warn!("recv error on stream fd: {err}");
                        break;
                    }
                }
            }
        }
    });
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let flags = Flags::default();
    let entry = InterfaceEntry {
        name: "default".into(),
        name_base: "default".into(),
        advertised_address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        local_address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        port_min: flags.port_random_min,
        port_max: flags.port_random_max,
    };
    let registry = Registry::new(&[entry]);

    let call = Arc::new(Call::new());
    let mut arena = CallArena::new();

    let media_a = arena.media.insert(Media::new(
        Profile::Avp,
        MediaFlags {
            loop_check: flags.rtp_loop_protect,
            ..MediaFlags::default()
        },
    ));
    let media_b = arena.media.insert(Media::new(
        Profile::Avp,
        MediaFlags {
            loop_check: flags.rtp_loop_protect,
            ..MediaFlags::default()
        },
    ));

    let leg_a = open_leg(&registry, &mut arena, relay_core::model::CallId::default(), media_a, &flags, "leg-a").await;
    let leg_b = open_leg(&registry, &mut arena, relay_core::model::CallId::default(), media_b, &flags, "leg-b").await;

    // Wire the two legs to relay into each other: each stream's sink is
    // the stream its packets are forwarded to.
    *arena.streams[leg_a.rtp_stream].rtp_sink.lock() = Some(leg_b.rtp_stream);
    *arena.streams[leg_a.rtcp_stream].rtp_sink.lock() = Some(leg_b.rtcp_stream);
    *arena.streams[leg_b.rtp_stream].rtp_sink.lock() = Some(leg_a.rtp_stream);
    *arena.streams[leg_b.rtcp_stream].rtp_sink.lock() = Some(leg_a.rtcp_stream);

    log::info!(
        "relay-daemon listening: leg-a rtp fd {:?}, leg-b rtp fd {:?}",
        leg_a.rtp_fd,
        leg_b.rtp_fd
    );

    let arena = Arc::new(arena);
    let collabs = Arc::new(Collabs {
        dtls: NoopDtlsLayer,
        stun: NoopStunLayer,
        rtcp: PassthroughRtcpRewriter,
        kernel: NoKernelInterface,
        recorder: NoopRecorder,
    });

    for sfd_id in [leg_a.rtp_fd, leg_a.rtcp_fd, leg_b.rtp_fd, leg_b.rtcp_fd] {
        spawn_recv_task(arena.clone(), call.clone(), collabs.clone(), flags, sfd_id);
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("failed to wait for ctrl-c: {err}");
    }
}
