//! An event-driven TLS-over-TCP transport core: a client connector, a server acceptor, and the
//! per-connection session state that ties framing, a bounded send queue, and an observable event
//! stream together.
//!
//! Certificate sourcing, wire-format choice above the framing layer, and connection-string
//! parsing are deliberately out of scope; see [`config`] for what is configurable and
//! [`validator`] / [`credential`] for the two pluggable trust hooks.

pub mod acceptor;
pub mod config;
pub mod connector;
pub mod credential;
pub mod error;
pub mod events;
pub mod framing;
mod io_stream;
pub mod pem;
mod queue;
pub mod session;
pub mod stats;
pub mod token;
pub mod transports;
mod loops;
pub mod validator;

pub use acceptor::Acceptor;
pub use config::{ClientConfig, ServerConfig, SessionOptions, TlsProtocolVersion, TrustSource};
pub use connector::{connect, connect_blocking};
pub use credential::{Credential, ClientCredentialSource, Principal, ServerCredentialVerifier};
pub use error::TransportError;
pub use events::{Event, Observer, ChannelObserver};
pub use framing::{Endian, FrameMode};
pub use session::Session;
pub use stats::Stats;
pub use token::CancellationToken;
pub use validator::{CertificateValidator, ClientAuthPolicy, DirectoryValidator};
