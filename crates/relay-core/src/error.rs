//! Typed errors for setup-time/call-scope failures. Per-packet drops are
//! *not* represented here: they never escape `pipeline::handle_packet`,
//! which returns `()` and logs instead.

use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The setup-time / call-scope error taxonomy. Per-packet outcomes
/// (`policy-drop`, `no-sink`, `send-failed`, ...) are handled inline in the
/// pipeline via `log` + stat counters, not via this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no free ports available on interface spec ({requested} requested, {free} free)")]
    PortsExhausted { requested: u16, free: u32 },

    #[error("failed to bind socket: {0}")]
    Bind(#[source] io::Error),

    #[error("logical interface {0:?} not found")]
    InterfaceNotFound(String),

    #[error("kernel offload unsupported for this stream: {0}")]
    ConfigUnsupported(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PortsExhausted { .. } => ErrorKind::PortsExhausted,
            Error::Bind(_) => ErrorKind::FatalIo,
            Error::InterfaceNotFound(_) => ErrorKind::ConfigUnsupported,
            Error::ConfigUnsupported(_) => ErrorKind::ConfigUnsupported,
            Error::Io(_) => ErrorKind::FatalIo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PortsExhausted,
    FatalIo,
    ConfigUnsupported,
}

/// Per-packet verdict taxonomy. Not an `Error` — these never propagate,
/// they're recorded as stats/log lines at the drop site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    PacketMalformed,
    PolicyDrop,
    NoSink,
    SendFailed,
}
