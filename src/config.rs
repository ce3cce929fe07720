//! Session-level configuration (§6), built with fluent setters on owned builder structs rather
//! than a file format — connection-string parsing and config-file loading are the explicitly
//! out-of-scope factory layer (§1).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_rustls::rustls::ProtocolVersion;

use crate::credential::{ClientCredentialSource, ServerCredentialVerifier};
use crate::framing::{Endian, FrameMode};
use crate::validator::{CertificateValidator, ClientAuthPolicy};

/// A TLS protocol version a session may negotiate, corresponding to `EnabledTlsProtocols`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsProtocolVersion {
    Tls12,
    Tls13,
}

impl From<TlsProtocolVersion> for ProtocolVersion {
    fn from(version: TlsProtocolVersion) -> Self {
        match version {
            TlsProtocolVersion::Tls12 => ProtocolVersion::TLSv1_2,
            TlsProtocolVersion::Tls13 => ProtocolVersion::TLSv1_3,
        }
    }
}

/// The default marker used when `PayloadMarker` is not set: an implementation-chosen, non-empty
/// marker.
pub const DEFAULT_MARKER: [u8; 2] = [0xAA, 0x55];

/// The fixed 15-second authentication timeout for both the TLS and credential handshake phases.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(15);

/// Options shared by both client and server sessions: framing mode and send-queue policy.
#[derive(Clone)]
pub struct SessionOptions {
    pub(crate) frame_mode: FrameMode,
    pub(crate) max_send_queue_size: Option<usize>,
    pub(crate) no_delay: bool,
    pub(crate) enabled_tls_protocols: Vec<TlsProtocolVersion>,
    pub(crate) check_certificate_revocation: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            frame_mode: FrameMode::aware(Bytes::copy_from_slice(&DEFAULT_MARKER), Endian::Little),
            max_send_queue_size: Some(1024),
            no_delay: true,
            enabled_tls_protocols: vec![TlsProtocolVersion::Tls12, TlsProtocolVersion::Tls13],
            check_certificate_revocation: false,
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable payload-aware framing. Disabling it switches to the unframed mode.
    pub fn payload_aware(mut self, aware: bool) -> Self {
        if aware {
            if !self.frame_mode.is_aware() {
                self.frame_mode = FrameMode::aware(Bytes::copy_from_slice(&DEFAULT_MARKER), Endian::Little);
            }
        } else {
            self.frame_mode = FrameMode::Unaware;
        }
        self
    }

    /// Set the payload marker. An empty marker degenerates to a pure length prefix.
    pub fn payload_marker(mut self, marker: impl Into<Bytes>) -> Self {
        let endian = match &self.frame_mode {
            FrameMode::Aware { endian, .. } => *endian,
            FrameMode::Unaware => Endian::Little,
        };
        self.frame_mode = FrameMode::aware(marker.into(), endian);
        self
    }

    /// Set the endianness of the length field.
    pub fn payload_endian(mut self, endian: Endian) -> Self {
        let marker = match &self.frame_mode {
            FrameMode::Aware { marker, .. } => marker.clone(),
            FrameMode::Unaware => Bytes::copy_from_slice(&DEFAULT_MARKER),
        };
        self.frame_mode = FrameMode::aware(marker, endian);
        self
    }

    /// Bound the send queue at `size` entries before the drop policy dumps it. `None` disables
    /// the drop policy entirely (corresponds to `MaxSendQueueSize == -1`).
    pub fn max_send_queue_size(mut self, size: Option<usize>) -> Self {
        self.max_send_queue_size = size;
        self
    }

    /// Disable Nagle's algorithm (`TCP_NODELAY`) on the underlying socket.
    pub fn no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    /// Restrict the TLS versions the handshake may negotiate. Defaults to both TLS 1.2 and 1.3.
    pub fn enabled_tls_protocols(mut self, protocols: Vec<TlsProtocolVersion>) -> Self {
        self.enabled_tls_protocols = protocols;
        self
    }

    /// Forward the peer's stapled OCSP response to the certificate validation hook, so a
    /// validator that understands revocation can reject a revoked certificate. Has no effect
    /// beyond what the configured validator does with the response.
    pub fn check_certificate_revocation(mut self, check: bool) -> Self {
        self.check_certificate_revocation = check;
        self
    }

    pub fn frame_mode(&self) -> &FrameMode {
        &self.frame_mode
    }
}

/// Where the client obtains trust for the server's certificate.
pub enum TrustSource {
    /// Trust exactly the certificates found in this directory.
    Directory(PathBuf),
    /// Trust the platform's default web root store.
    WebPkiRoots,
    /// A caller-supplied validator, for fully custom trust policy.
    Custom(Arc<dyn CertificateValidator>),
}

/// Configuration for a client connecting to one or more candidate servers.
pub struct ClientConfig {
    pub(crate) options: SessionOptions,
    pub(crate) servers: Vec<(String, u16)>,
    pub(crate) trust: TrustSource,
    pub(crate) max_connection_attempts: Option<usize>,
    pub(crate) integrated_security: Option<Arc<dyn ClientCredentialSource>>,
    pub(crate) ignore_invalid_credentials: bool,
}

impl ClientConfig {
    /// Create a config that will connect, in round-robin order on failure, to `servers`.
    pub fn new(servers: Vec<(String, u16)>) -> Self {
        ClientConfig {
            options: SessionOptions::default(),
            servers,
            trust: TrustSource::WebPkiRoots,
            max_connection_attempts: Some(4),
            integrated_security: None,
            ignore_invalid_credentials: false,
        }
    }

    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn trust(mut self, trust: TrustSource) -> Self {
        self.trust = trust;
        self
    }

    /// Bound the number of connection attempts across the whole server list.
    /// `None` means unbounded (`MaxConnectionAttempts == -1`); `Some(0)` disables retry
    /// entirely, so the first refusal terminates.
    pub fn max_connection_attempts(mut self, attempts: Option<usize>) -> Self {
        self.max_connection_attempts = attempts;
        self
    }

    /// Enable the post-TLS credential sub-handshake, presenting credentials from `source`.
    pub fn integrated_security(mut self, source: Arc<dyn ClientCredentialSource>) -> Self {
        self.integrated_security = Some(source);
        self
    }

    /// Tolerate a rejected credential rather than terminating the connection.
    pub fn ignore_invalid_credentials(mut self, ignore: bool) -> Self {
        self.ignore_invalid_credentials = ignore;
        self
    }
}

/// Configuration for a server accepting client sessions.
pub struct ServerConfig {
    pub(crate) options: SessionOptions,
    pub(crate) certificate_chain: PathBuf,
    pub(crate) private_key: PathBuf,
    pub(crate) max_client_connections: Option<usize>,
    pub(crate) client_auth: ClientAuthPolicy,
    pub(crate) client_trust: Option<TrustSource>,
    pub(crate) integrated_security: Option<Arc<dyn ServerCredentialVerifier>>,
    pub(crate) ignore_invalid_credentials: bool,
    pub(crate) allow_dual_stack_socket: bool,
}

impl ServerConfig {
    pub fn new(certificate_chain: PathBuf, private_key: PathBuf) -> Self {
        ServerConfig {
            options: SessionOptions::default(),
            certificate_chain,
            private_key,
            max_client_connections: None,
            client_auth: ClientAuthPolicy::None,
            client_trust: None,
            integrated_security: None,
            ignore_invalid_credentials: false,
            allow_dual_stack_socket: false,
        }
    }

    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Cap the number of simultaneously connected clients. `None` is unlimited
    /// (`MaxClientConnections == -1`).
    pub fn max_client_connections(mut self, max: Option<usize>) -> Self {
        self.max_client_connections = max;
        self
    }

    pub fn require_client_certificate(mut self, required: bool) -> Self {
        self.client_auth = if required {
            ClientAuthPolicy::Required
        } else {
            ClientAuthPolicy::None
        };
        self
    }

    /// The trust anchors used to validate a client's presented certificate when
    /// `require_client_certificate(true)` is set. Required in that case; ignored otherwise.
    /// Only `TrustSource::Directory`/`TrustSource::WebPkiRoots` are supported here — a custom
    /// validator is a server-cert-only seam.
    pub fn client_certificate_trust(mut self, trust: TrustSource) -> Self {
        self.client_trust = Some(trust);
        self
    }

    /// Enable the post-TLS credential sub-handshake, verifying presented credentials with
    /// `verifier`.
    pub fn integrated_security(mut self, verifier: Arc<dyn ServerCredentialVerifier>) -> Self {
        self.integrated_security = Some(verifier);
        self
    }

    pub fn ignore_invalid_credentials(mut self, ignore: bool) -> Self {
        self.ignore_invalid_credentials = ignore;
        self
    }

    pub fn allow_dual_stack_socket(mut self, allow: bool) -> Self {
        self.allow_dual_stack_socket = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_payload_aware_with_default_marker() {
        let options = SessionOptions::default();
        match options.frame_mode() {
            FrameMode::Aware { marker, endian } => {
                assert_eq!(marker.as_ref(), &DEFAULT_MARKER);
                assert_eq!(*endian, Endian::Little);
            }
            FrameMode::Unaware => panic!("default should be payload-aware"),
        }
    }

    #[test]
    fn payload_aware_false_switches_to_unaware() {
        let options = SessionOptions::default().payload_aware(false);
        assert!(!options.frame_mode().is_aware());
    }

    #[test]
    fn max_connection_attempts_zero_disables_retry() {
        let config = ClientConfig::new(vec![("localhost".into(), 9000)])
            .max_connection_attempts(Some(0));
        assert_eq!(config.max_connection_attempts, Some(0));
    }
}
