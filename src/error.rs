//! The error taxonomy shared by every component of the transport core.
//!
//! Every fallible entry point in this crate returns [`TransportError`] (or a type convertible
//! from it). Recoverable kinds (`QueueOverflow`, transient receive errors) are reported as
//! events without tearing down the session; everything else terminates it.

use std::io;
use std::sync::Arc;

use crate::framing::FramingError;

/// The classified failure kinds a [`crate::session::Session`] can encounter, as laid out in the
/// error handling design.
///
/// `Clone` so a single failure can be both reported as an event (which carries `Arc<TransportError>`,
/// see [`crate::events::Event`]) and returned by value from a fallible entry point.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The peer was not listening; retried under the connector's retry rules.
    #[error("connection refused by {address}")]
    SocketRefused { address: String },

    /// Any socket-layer error other than connection-refused.
    #[error("socket error: {0}")]
    SocketFatal(#[source] Arc<io::Error>),

    /// The 15-second authentication timer expired during the TLS or credential phase.
    #[error("authentication timed out during {phase}")]
    AuthTimeout { phase: AuthPhase },

    /// The TLS handshake completed but the connection is not authenticated as required.
    #[error("TLS handshake did not authenticate the peer")]
    TlsNotAuthenticated,

    /// The TLS handshake completed but the connection is not encrypted as required.
    #[error("TLS handshake did not establish encryption")]
    TlsNotEncrypted,

    /// The integrated-credential sub-handshake rejected the presented credential.
    #[error("credential authentication rejected")]
    BadCredentials,

    /// An invalid marker or an impossible decoded length was encountered while framing.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The send queue exceeded `MaxSendQueueSize` and was dumped.
    #[error("send queue overflowed and was dumped ({dropped} payloads)")]
    QueueOverflow { dropped: usize },

    /// A zero-byte read, or a read against a socket that is no longer connected.
    #[error("peer disconnected")]
    PeerGone,

    /// An operation was attempted against an already-destroyed session.
    #[error("operation attempted on a disposed session")]
    Disposed,
}

/// Which authentication phase a handshake timeout fired during.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Tls,
    Credential,
}

impl std::fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthPhase::Tls => write!(f, "TLS"),
            AuthPhase::Credential => write!(f, "credential"),
        }
    }
}

impl TransportError {
    /// Whether this error kind is recoverable: the loop that produced it may continue serving
    /// the session rather than terminating it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::QueueOverflow { .. })
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::ConnectionRefused {
            TransportError::SocketRefused {
                address: String::new(),
            }
        } else {
            TransportError::SocketFatal(Arc::new(err))
        }
    }
}

/// Sink for errors classified as [`TransportError::Disposed`]: operations against an
/// already-destroyed session are suppressed rather than propagated, but still observable.
pub trait SuppressedErrorSink: Send + Sync {
    fn suppressed(&self, error: &TransportError);
}

/// Default sink: logs at `warn` and drops the error.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSuppressedErrors;

impl SuppressedErrorSink for LogSuppressedErrors {
    fn suppressed(&self, error: &TransportError) {
        tracing::warn!(%error, "suppressed error on disposed session");
    }
}
