//! Wire-level packet classification and RTP/RTCP header access.
//!
//! This crate covers only the datapath-visible slice of RTP/RTCP: telling
//! DTLS, STUN, RTCP and RTP apart on the wire, and pulling the handful of
//! header fields (SSRC, payload type, sequence number) the relay core needs
//! to do SSRC bookkeeping and payload-type stats. Full RTCP semantics
//! (compound packet rewriting, AVPF->AVP translation) stay behind the
//! `RtcpRewriter` contract in `relay-core` — this crate only parses enough
//! to find the SSRC and packet type.

mod classify;
mod rtcp_packet;
mod rtp_packet;

pub use classify::{is_rtcp_packet_type, PacketKind};
pub use rtcp_packet::{RtcpHeader, RtcpParseError};
pub use rtp_packet::{RtpHeader, RtpParseError};

pub use rtcp_types;
pub use rtp_types;
