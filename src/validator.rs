//! The remote-certificate validation hook (§9: "Global/static trusted-cert cache → explicit
//! injected validator"). The session takes a validator object; the default validator reads a
//! trust directory once at handshake-config time rather than consulting any process-wide
//! mutable state.
//!
//! Certificate sourcing and the fine-grained details of validation policy are out of scope per
//! §1 — this module specifies and implements only the hook contract and a reference directory-
//! backed default.

use std::sync::Arc;

use tokio_rustls::rustls::{
    Certificate, RootCertStore, ServerCertVerified, ServerCertVerifier, TLSError,
};
use tokio_rustls::webpki::DNSNameRef;

use crate::config::TrustSource;
use crate::error::TransportError;

/// The validation hook a client plugs into its TLS configuration to decide whether a presented
/// server certificate chain should be trusted. `ocsp_response` is the peer's stapled OCSP
/// response, or empty if none was presented or `CheckCertificateRevocation` is disabled.
pub trait CertificateValidator: Send + Sync {
    fn validate(
        &self,
        presented_chain: &[Certificate],
        dns_name: DNSNameRef<'_>,
        ocsp_response: &[u8],
    ) -> Result<(), ValidationError>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("certificate validation failed: {reason}")]
pub struct ValidationError {
    pub reason: String,
}

/// A validator backed by a fixed set of trust anchors, loaded once from a trusted-cert
/// directory (see [`crate::pem::read_trusted_directory`]) or from `webpki-roots`.
pub struct DirectoryValidator {
    roots: RootCertStore,
}

impl DirectoryValidator {
    /// Build a validator trusting exactly the certificates found in `directory`.
    pub fn from_directory(directory: impl AsRef<std::path::Path>) -> Result<Self, std::io::Error> {
        let mut roots = RootCertStore::empty();
        for cert in crate::pem::read_trusted_directory(directory)? {
            roots
                .add(&cert)
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid certificate"))?;
        }
        Ok(DirectoryValidator { roots })
    }

    /// Build a validator trusting the platform's default web trust anchors, for clients that
    /// connect to publicly-trusted servers rather than a private deployment.
    pub fn from_webpki_roots() -> Self {
        let mut roots = RootCertStore::empty();
        roots.add_server_trust_anchors(&webpki_roots::TLS_SERVER_ROOTS);
        DirectoryValidator { roots }
    }

    /// Unwrap into the underlying trust anchors, for callers (the acceptor's mutual-TLS setup)
    /// that need a bare `RootCertStore` rather than the `CertificateValidator` hook.
    pub(crate) fn into_root_store(self) -> RootCertStore {
        self.roots
    }
}

impl CertificateValidator for DirectoryValidator {
    fn validate(
        &self,
        presented_chain: &[Certificate],
        dns_name: DNSNameRef<'_>,
        ocsp_response: &[u8],
    ) -> Result<(), ValidationError> {
        let verifier = tokio_rustls::rustls::WebPKIVerifier::new();
        verifier
            .verify_server_cert(&self.roots, presented_chain, dns_name, ocsp_response)
            .map(|_| ())
            .map_err(|err| ValidationError {
                reason: err.to_string(),
            })
    }
}

/// Adapts any [`CertificateValidator`] into the `rustls` verifier trait object the TLS
/// connector actually consults. Kept as a thin bridge so the public seam
/// (`CertificateValidator`) stays free of `rustls` wire types in its error path. The `bool`
/// is `CheckCertificateRevocation`: when false, the peer's stapled OCSP response (if any) is
/// withheld from the validator rather than forwarded.
pub(crate) struct RustlsBridge(pub Arc<dyn CertificateValidator>, pub bool);

impl ServerCertVerifier for RustlsBridge {
    fn verify_server_cert(
        &self,
        _roots: &RootCertStore,
        presented_certs: &[Certificate],
        dns_name: DNSNameRef<'_>,
        ocsp_response: &[u8],
    ) -> Result<ServerCertVerified, TLSError> {
        let ocsp_response = if self.1 { ocsp_response } else { &[] };
        self.0
            .validate(presented_certs, dns_name, ocsp_response)
            .map(|()| ServerCertVerified::assertion())
            .map_err(|err| TLSError::General(err.reason))
    }
}

/// Build the [`CertificateValidator`] a `TrustSource` describes, for the client's server-cert
/// validation seam.
pub(crate) fn build_validator(trust: &TrustSource) -> Result<Arc<dyn CertificateValidator>, TransportError> {
    match trust {
        TrustSource::Directory(path) => Ok(Arc::new(
            DirectoryValidator::from_directory(path).map_err(TransportError::from)?,
        )),
        TrustSource::WebPkiRoots => Ok(Arc::new(DirectoryValidator::from_webpki_roots())),
        TrustSource::Custom(validator) => Ok(validator.clone()),
    }
}

/// The trust anchors used to validate a client's presented certificate under
/// `RequireClientCertificate`. Unlike the server-cert seam, this has no custom-validator escape
/// hatch: mutual TLS here is always a plain root-of-trust check.
pub(crate) fn client_trust_roots(trust: &TrustSource) -> Result<RootCertStore, TransportError> {
    match trust {
        TrustSource::Directory(path) => Ok(DirectoryValidator::from_directory(path)
            .map_err(TransportError::from)?
            .into_root_store()),
        TrustSource::WebPkiRoots => Ok(DirectoryValidator::from_webpki_roots().into_root_store()),
        TrustSource::Custom(_) => Err(TransportError::SocketFatal(Arc::new(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "client certificate trust must be a directory or the webpki root store, not a custom validator",
        )))),
    }
}

/// Server-side policy for requiring (or not) a client certificate, corresponding to the
/// `RequireClientCertificate` configuration option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthPolicy {
    None,
    Required,
}
