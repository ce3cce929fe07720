//! Out-of-scope transport collaborators (§1 Non-goals): the session, connector, and acceptor in
//! this crate are specified in terms of TLS-over-TCP only. These modules exist to mark the seam
//! a future transport would plug into, not to implement one.

pub mod file;
pub mod serial;
pub mod udp;

use crate::error::TransportError;

/// Marker trait for an alternative carrier a [`crate::session::Session`] could in principle run
/// over. No transport in this module implements it yet.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
}

pub(crate) fn unsupported(name: &'static str) -> TransportError {
    TransportError::SocketFatal(std::sync::Arc::new(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("{} transport is not implemented", name),
    )))
}
