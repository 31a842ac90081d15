//! The call/media/stream/stream-fd/SSRC data model. Arena-owned with stable
//! `slotmap` identifiers rather than a web of `Rc`/`Weak` back references —
//! the datapath only ever traverses downward (stream -> sink ->
//! sink.selected_fd), so no ownership cycle is actually required.

pub mod call;
pub mod media;
pub mod ssrc;
pub mod stats;
pub mod status;
pub mod stream;
pub mod stream_fd;

pub use call::{Call, CallId};
pub use media::{Media, MediaFlags, MediaId};
pub use ssrc::{SsrcContext, SsrcEntry};
pub use stream::{InLockState, LoopRing, OutLockState, PacketStream, StreamId};
pub use stream_fd::{StreamFd, StreamFdId};

use slotmap::SlotMap;

/// The per-call arena: every `Call` owns one of these, built by signaling
/// and torn down on call teardown.
#[derive(Default)]
pub struct CallArena {
    pub media: SlotMap<MediaId, Media>,
    pub streams: SlotMap<StreamId, PacketStream>,
    pub stream_fds: SlotMap<StreamFdId, StreamFd>,
}

impl CallArena {
    pub fn new() -> Self {
        CallArena::default()
    }
}
