//! The optional post-TLS credential sub-handshake ("integrated security"): a client sends a
//! [`Credential`], the server verifies it and binds the resulting [`Principal`] to the session.
//! The exchange is length-delimited `bincode` over the already-established TLS stream, using the
//! same framing primitives the rest of the session uses.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::TransportError;
use crate::io_stream::IoStream;

/// An opaque, serializable identifier bound to a session once the credential sub-handshake
/// succeeds. Never re-checked per call — see Open Question #2 in DESIGN.md.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal(pub String);

/// The credential a client presents during the sub-handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub principal: String,
    pub secret: Vec<u8>,
}

/// Client-side source of the credential to present.
pub trait ClientCredentialSource: Send + Sync {
    fn credential(&self) -> Credential;
}

/// Server-side verifier: accept or reject a presented credential, producing a [`Principal`] on
/// success.
#[async_trait::async_trait]
pub trait ServerCredentialVerifier: Send + Sync {
    async fn verify(&self, credential: Credential) -> Option<Principal>;
}

/// A verifier that accepts every credential, binding the presented principal name unchanged.
/// Useful for tests and for deployments that rely on TLS client certificates rather than
/// application-level credentials.
pub struct AllowAny;

#[async_trait::async_trait]
impl ServerCredentialVerifier for AllowAny {
    async fn verify(&self, credential: Credential) -> Option<Principal> {
        Some(Principal(credential.principal))
    }
}

/// A fixed credential source, for clients with one static identity.
pub struct StaticCredential(pub Credential);

impl ClientCredentialSource for StaticCredential {
    fn credential(&self) -> Credential {
        self.0.clone()
    }
}

const MAX_CREDENTIAL_FRAME: u32 = 1 << 16;

async fn write_frame(io: &mut IoStream, bytes: &[u8]) -> Result<(), TransportError> {
    io.write_u32(bytes.len() as u32)
        .await
        .map_err(TransportError::from)?;
    io.write_all(bytes).await.map_err(TransportError::from)?;
    io.flush().await.map_err(TransportError::from)?;
    Ok(())
}

async fn read_frame(io: &mut IoStream) -> Result<Vec<u8>, TransportError> {
    let length = io.read_u32().await.map_err(TransportError::from)?;
    if length >= MAX_CREDENTIAL_FRAME {
        return Err(TransportError::Framing(crate::framing::FramingError::LengthTooLarge {
            length,
            max: MAX_CREDENTIAL_FRAME,
        }));
    }
    let mut buf = vec![0u8; length as usize];
    io.read_exact(&mut buf).await.map_err(TransportError::from)?;
    Ok(buf)
}

/// Client side of the sub-handshake: send the credential, await either an empty "ok" frame or
/// nothing at all (the server simply drops the connection on rejection unless
/// `IgnoreInvalidCredentials` tells it otherwise, which is a local server-side decision the
/// client cannot observe directly).
pub async fn client_present(
    io: &mut IoStream,
    source: &dyn ClientCredentialSource,
) -> Result<(), TransportError> {
    let credential = source.credential();
    let encoded = bincode::serialize(&credential)
        .expect("Credential serialization is infallible for well-formed values");
    write_frame(io, &encoded).await
}

/// Server side of the sub-handshake: read the presented credential, verify it, and reply with a
/// single success/failure byte so the client's connector can observe `BadCredentials` directly
/// rather than inferring it from a dropped connection.
pub async fn server_authenticate(
    io: &mut IoStream,
    verifier: &dyn ServerCredentialVerifier,
    ignore_invalid: bool,
) -> Result<Option<Principal>, TransportError> {
    let encoded = read_frame(io).await?;
    let credential: Credential =
        bincode::deserialize(&encoded).map_err(|_| TransportError::BadCredentials)?;
    let principal = verifier.verify(credential).await;
    let ok = principal.is_some();
    io.write_u8(ok as u8).await.map_err(TransportError::from)?;
    io.flush().await.map_err(TransportError::from)?;
    match (principal, ignore_invalid) {
        (Some(principal), _) => Ok(Some(principal)),
        (None, true) => Ok(None),
        (None, false) => Err(TransportError::BadCredentials),
    }
}

/// After presenting a credential, the client reads back the server's single-byte verdict.
pub async fn client_await_verdict(io: &mut IoStream) -> Result<bool, TransportError> {
    let ok = io.read_u8().await.map_err(TransportError::from)?;
    Ok(ok != 0)
}

/// A globally-unique session identifier, minted fresh for every accepted or connected session.
pub fn new_session_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_any_binds_presented_principal_name() {
        let verifier = AllowAny;
        let credential = Credential {
            principal: "alice".to_string(),
            secret: vec![],
        };
        let principal = tokio_test_block_on(verifier.verify(credential));
        assert_eq!(principal, Some(Principal("alice".to_string())));
    }

    // Minimal single-future executor so this module's tests don't need the `#[tokio::test]`
    // macro just to await a trivially-ready future.
    fn tokio_test_block_on<F: std::future::Future>(fut: F) -> F::Output {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(fut)
    }
}
