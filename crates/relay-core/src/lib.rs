//! Media packet-forwarding core for a SIP/WebRTC back-to-back RTP/RTCP
//! relay.
//!
//! This crate owns the per-packet datapath: interface/port allocation
//! (`registry`), the call/media/stream/SSRC data model (`model`), SRTP/SRTCP
//! protect & unprotect (`crypto`), the profile-pair handler matrix
//! (`matrix`), address learning and kernel offload (`address_learn`,
//! `kernel`), and the pipeline tying all of it together for one inbound
//! datagram (`pipeline`). Everything this crate does not own — DTLS-SRTP
//! key exchange, ICE/STUN, full RTCP rewriting, transcoding, the kernel
//! netlink plane, recording, persistence, firewalling — is named as a
//! narrow trait in `collaborators`, handed off to the embedder instead of
//! owned by this crate.

pub mod address_learn;
pub mod collaborators;
pub mod config;
pub mod crypto;
pub mod error;
pub mod kernel;
pub mod matrix;
pub mod model;
pub mod pipeline;
pub mod registry;

pub use config::{Config, Flags, InterfaceEntry};
pub use error::{DropReason, Error, ErrorKind, Result};
pub use pipeline::{handle_packet, Collaborators};
pub use registry::Registry;
