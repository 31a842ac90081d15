//! Address-learning & confirmation. Runs under `stream.in_lock`; the one
//! nested acquire in this crate (`stream.in` then `stream.out`, never
//! reversed) happens here when the learned endpoint needs updating.

use std::net::SocketAddr;
use std::time::Duration;

use crate::model::call::Call;
use crate::model::media::Media;
use crate::model::status;
use crate::model::stream::PacketStream;
use crate::model::stream_fd::StreamFdId;

const CONFIRM_AFTER: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressLearnVerdict {
    pub forward: bool,
    pub update: bool,
    pub kernelize: bool,
    pub unkernelize: bool,
}

impl AddressLearnVerdict {
    fn forward_only() -> Self {
        AddressLearnVerdict {
            forward: true,
            ..Default::default()
        }
    }

    fn policy_drop() -> Self {
        AddressLearnVerdict::default()
    }
}

/// The full address-learning decision tree, evaluated for one inbound
/// packet.
/// `received_on` is the stream FD the packet actually arrived on, used for
/// the local-interface migration check at the end of the "not yet
/// confirmed" branch.
pub fn learn(
    stream: &PacketStream,
    media: &Media,
    call: &Call,
    source: SocketAddr,
    received_on: StreamFdId,
) -> AddressLearnVerdict {
    let _in_guard = stream.in_lock.lock();

    if !stream.status.test(status::FILLED) {
        return AddressLearnVerdict::forward_only();
    }

    if media.flags.asymmetric {
        stream.status.set(status::CONFIRMED);
        return AddressLearnVerdict::forward_only();
    }

    if media.flags.unidirectional {
        // "the sink is CONFIRMED (for offload setup only)" — the sink is a
        // different stream; the caller applies this to the sink stream,
        // this stream itself still just forwards.
        return AddressLearnVerdict::forward_only();
    }

    let mut out = stream.out_lock.lock();

    if stream.status.test(status::CONFIRMED) {
        let known = out.known_peer;
        let source_changed = known != Some(source);

        if source_changed
            && (stream.status.test(status::STRICT_SOURCE) || stream.status.test(status::MEDIA_HANDOVER))
        {
            if stream.status.test(status::MEDIA_HANDOVER) {
                out.known_peer = Some(source);
                return AddressLearnVerdict {
                    forward: true,
                    update: true,
                    kernelize: false,
                    unkernelize: true,
                };
            }
            stream.stats.increment_errors();
            return AddressLearnVerdict::policy_drop();
        }

        return AddressLearnVerdict {
            forward: true,
            kernelize: true,
            ..Default::default()
        };
    }

    // Not yet confirmed.
    let mut update = false;
    let mut confirm_now = false;

    if call.seconds_since_last_signal() > CONFIRM_AFTER.as_secs_f64() {
        stream.status.set(status::CONFIRMED);
        confirm_now = true;
        update = true;
    }

    if out.known_peer != Some(source) {
        out.known_peer = Some(source);
        update = true;
    }

    if out.selected_fd != Some(received_on) {
        out.selected_fd = Some(received_on);
        update = true;
    }

    AddressLearnVerdict {
        forward: true,
        update,
        kernelize: confirm_now,
        unkernelize: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::media::MediaFlags;
    use slotmap::SlotMap;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), port)
    }

    fn stream_fd_id() -> StreamFdId {
        let mut keys: SlotMap<StreamFdId, ()> = SlotMap::with_key();
        keys.insert(())
    }

    #[test]
    fn strict_source_mismatch_after_confirmed_drops_and_counts_error() {
        let call = crate::model::call::Call::new();
        let media = Media {
            protocol: crate::matrix::Profile::Avp,
            flags: MediaFlags::default(),
        };
        let stream = PacketStream::new(
            crate::model::call::CallId::default(),
            crate::model::media::MediaId::default(),
            10,
        );
        stream.status.set(status::FILLED);
        stream.status.set(status::CONFIRMED);
        stream.status.set(status::STRICT_SOURCE);
        stream.out_lock.lock().known_peer = Some(addr(5000));

        let verdict = learn(&stream, &media, &call, addr(5001), stream_fd_id());

        assert!(!verdict.forward);
        assert_eq!(stream.stats.errors(), 1);
        assert_eq!(stream.out_lock.lock().known_peer, Some(addr(5000)));
    }

    #[test]
    fn media_handover_mismatch_adopts_new_source_and_unkernelizes() {
        let call = crate::model::call::Call::new();
        let media = Media {
            protocol: crate::matrix::Profile::Avp,
            flags: MediaFlags::default(),
        };
        let stream = PacketStream::new(
            crate::model::call::CallId::default(),
            crate::model::media::MediaId::default(),
            10,
        );
        stream.status.set(status::FILLED);
        stream.status.set(status::CONFIRMED);
        stream.status.set(status::MEDIA_HANDOVER);
        stream.out_lock.lock().known_peer = Some(addr(5000));

        let verdict = learn(&stream, &media, &call, addr(5001), stream_fd_id());

        assert!(verdict.forward);
        assert!(verdict.update);
        assert!(verdict.unkernelize);
        assert_eq!(stream.out_lock.lock().known_peer, Some(addr(5001)));
    }

    #[test]
    fn unfilled_stream_just_forwards() {
        let call = crate::model::call::Call::new();
        let media = Media {
            protocol: crate::matrix::Profile::Avp,
            flags: MediaFlags::default(),
        };
        let stream = PacketStream::new(
            crate::model::call::CallId::default(),
            crate::model::media::MediaId::default(),
            10,
        );

        let verdict = learn(&stream, &media, &call, addr(5000), stream_fd_id());
        assert_eq!(verdict, AddressLearnVerdict::forward_only());
    }
}
