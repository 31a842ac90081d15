//! Stream FD: one UDP socket bound to one call/stream/local interface
//! triple.

use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::new_key_type;
use tokio::net::UdpSocket;

use crate::crypto::CryptoContext;
use crate::registry::LocalInterfaceId;

use super::call::CallId;
use super::stream::StreamId;

new_key_type! { pub struct StreamFdId; }

pub struct StreamFd {
    pub socket: Arc<UdpSocket>,
    pub call: CallId,
    pub stream: StreamId,
    pub local_interface: LocalInterfaceId,
    /// Per-socket crypto for ingress; the stream's egress crypto lives in
    /// `PacketStream::out_lock` instead.
    pub ingress_crypto: Mutex<CryptoContext>,
    /// Unique id within the call.
    pub id_in_call: u32,
}

impl StreamFd {
    pub fn new(
        socket: Arc<UdpSocket>,
        call: CallId,
        stream: StreamId,
        local_interface: LocalInterfaceId,
        ingress_crypto: CryptoContext,
        id_in_call: u32,
    ) -> Self {
        StreamFd {
            socket,
            call,
            stream,
            local_interface,
            ingress_crypto: Mutex::new(ingress_crypto),
            id_in_call,
        }
    }
}
