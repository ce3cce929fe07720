//! The server accept loop (component E): bind a listener, wrap each accepted socket in TLS (and,
//! optionally, the credential sub-handshake), and track the resulting sessions in a live table
//! keyed by session id.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_rustls::rustls::{AllowAnyAuthenticatedClient, NoClientAuth, ServerConfig as RustlsServerConfig};
use tokio_rustls::TlsAcceptor;
use uuid::Uuid;

use crate::config::{ServerConfig, AUTH_TIMEOUT};
use crate::credential;
use crate::error::{AuthPhase, TransportError};
use crate::events::{Event, Observer};
use crate::framing::Framing;
use crate::io_stream::IoStream;
use crate::pem;
use crate::session::Session;
use crate::token::CancellationToken;
use crate::validator::{client_trust_roots, ClientAuthPolicy};

/// A running server: a bound TCP listener plus the table of sessions it has accepted and not
/// yet terminated. The listener sits behind a lock so a restart (see [`Acceptor::serve`]) can
/// rebind it in place without requiring callers to hold a fresh `Acceptor`.
pub struct Acceptor {
    listener: RwLock<TcpListener>,
    bound_addr: SocketAddr,
    config: ServerConfig,
    observer: Option<Arc<dyn Observer>>,
    sessions: Arc<RwLock<HashMap<Uuid, Arc<Session>>>>,
    token: CancellationToken,
}

impl Acceptor {
    pub async fn bind(
        address: impl Into<SocketAddr>,
        config: ServerConfig,
        observer: Option<Arc<dyn Observer>>,
    ) -> Result<Self, TransportError> {
        let address = address.into();
        let listener = bind_listener(address, config.allow_dual_stack_socket).await?;
        let bound_addr = listener.local_addr().map_err(TransportError::from)?;
        Ok(Acceptor {
            listener: RwLock::new(listener),
            bound_addr,
            config,
            observer,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            token: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.bound_addr)
    }

    /// Stop the accept loop. Idempotent, and the sole disposal mechanism this acceptor has: a
    /// second call, or a call after the loop already exited on its own, is a harmless no-op.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// A snapshot of the currently-live sessions.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Look up one live session by id, e.g. to act on the session a `receive-complete` event
    /// named via its `peer` field.
    pub async fn get_session(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Accept connections until explicit `stop()`, disposal, or an unrecoverable listener-socket
    /// error. A single failed `accept()` call (e.g. a transient `EMFILE`) is logged as a
    /// `connection-exception` and the loop keeps running on the same listener; an error that
    /// indicates the listener socket itself is broken instead triggers a restart — rebinding at
    /// the original local address — and if the restart itself fails, that failure is surfaced
    /// here (§4.E).
    pub async fn serve(self: Arc<Self>) -> Result<(), TransportError> {
        let tls_acceptor = self.build_tls_acceptor()?;

        loop {
            let accepted = {
                let listener = self.listener.read().await;
                tokio::select! {
                    _ = self.token.cancelled_async() => return Ok(()),
                    accepted = listener.accept() => accepted,
                }
            };

            let (tcp_stream, addr) = match accepted {
                Ok(accepted) => accepted,
                Err(err) if is_listener_fatal(&err) => {
                    self.report_handshake_failure(TransportError::from(err));
                    self.restart_listener().await?;
                    continue;
                }
                Err(err) => {
                    self.report_handshake_failure(TransportError::from(err));
                    continue;
                }
            };

            if let Some(max) = self.config.max_client_connections {
                if self.sessions.read().await.len() >= max {
                    drop(tcp_stream);
                    continue;
                }
            }

            let this = self.clone();
            let tls_acceptor = tls_acceptor.clone();
            tokio::spawn(async move {
                this.handle_connection(tls_acceptor, tcp_stream, addr).await;
            });
        }
    }

    /// Rebind a fresh listener at the same local address, replacing the broken one in place.
    async fn restart_listener(&self) -> Result<(), TransportError> {
        let fresh = bind_listener(self.bound_addr, self.config.allow_dual_stack_socket).await?;
        *self.listener.write().await = fresh;
        Ok(())
    }

    fn build_tls_acceptor(&self) -> Result<TlsAcceptor, TransportError> {
        let certificate_chain =
            pem::read_certificates(&self.config.certificate_chain).map_err(TransportError::from)?;
        let private_key =
            pem::read_private_key(&self.config.private_key).map_err(TransportError::from)?;

        let client_cert_verifier = match self.config.client_auth {
            ClientAuthPolicy::None => NoClientAuth::new(),
            ClientAuthPolicy::Required => {
                let trust = self.config.client_trust.as_ref().ok_or_else(|| {
                    TransportError::SocketFatal(Arc::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "require_client_certificate(true) needs client_certificate_trust set",
                    )))
                })?;
                AllowAnyAuthenticatedClient::new(client_trust_roots(trust)?)
            }
        };

        let mut server_config = RustlsServerConfig::new(client_cert_verifier);
        server_config.versions = self
            .config
            .options
            .enabled_tls_protocols
            .iter()
            .map(|&version| version.into())
            .collect();
        server_config
            .set_single_cert(certificate_chain, private_key)
            .map_err(|_| {
                TransportError::SocketFatal(Arc::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "invalid server certificate chain or private key",
                )))
            })?;
        Ok(TlsAcceptor::from(Arc::new(server_config)))
    }

    async fn handle_connection(
        self: Arc<Self>,
        tls_acceptor: TlsAcceptor,
        tcp_stream: TcpStream,
        _addr: SocketAddr,
    ) {
        if let Err(err) = tcp_stream.set_nodelay(self.config.options.no_delay) {
            self.report_handshake_failure(TransportError::from(err));
            return;
        }

        let tls_stream = match timeout(AUTH_TIMEOUT, tls_acceptor.accept(tcp_stream)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return self.report_handshake_failure(TransportError::from(err)),
            Err(_) => {
                return self.report_handshake_failure(TransportError::AuthTimeout {
                    phase: AuthPhase::Tls,
                })
            }
        };

        let mut io = IoStream::from(tls_stream);

        let principal = if let Some(verifier) = self.config.integrated_security.clone() {
            let outcome = timeout(
                AUTH_TIMEOUT,
                credential::server_authenticate(
                    &mut io,
                    verifier.as_ref(),
                    self.config.ignore_invalid_credentials,
                ),
            )
            .await;
            match outcome {
                Ok(Ok(principal)) => principal,
                Ok(Err(err)) => return self.report_handshake_failure(err),
                Err(_) => {
                    return self.report_handshake_failure(TransportError::AuthTimeout {
                        phase: AuthPhase::Credential,
                    })
                }
            }
        } else {
            None
        };

        let id = credential::new_session_id();
        let session = Session::new(
            id,
            io,
            Framing::new(self.config.options.frame_mode.clone()),
            self.config.options.max_send_queue_size,
            self.observer.clone(),
            true,
        );
        if let Some(principal) = principal {
            session.set_principal(principal);
        }
        session.mark_connected();

        self.sessions.write().await.insert(id, session.clone());
        session.emit(Event::ConnectionEstablished { peer: Some(id) });

        crate::loops::spawn_receive_loop(session.clone());

        let sessions = self.sessions.clone();
        let token = session.token().clone();
        tokio::spawn(async move {
            token.cancelled_async().await;
            sessions.write().await.remove(&id);
        });
    }

    fn report_handshake_failure(&self, error: TransportError) {
        Event::ConnectionException {
            peer: None,
            error: Arc::new(error),
        }
        .emit(self.observer.as_deref());
    }
}

/// Whether a failed `accept()` indicates the listener socket itself is no longer usable, as
/// opposed to a transient per-connection condition (a dropped peer, a momentary fd exhaustion)
/// that leaves the listener otherwise healthy.
fn is_listener_fatal(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::NotConnected | ErrorKind::BrokenPipe | ErrorKind::Other
    )
}

/// Bind a `TcpListener` at `address`. When `dual_stack` is set and `address` is IPv6, the
/// underlying socket is created with `IPV6_V6ONLY` cleared via `socket2` so the same listener
/// also accepts IPv4 connections on a dual-stack host; `AllowDualStackSocket` is ignored for an
/// IPv4 bind address.
async fn bind_listener(address: SocketAddr, dual_stack: bool) -> Result<TcpListener, TransportError> {
    if dual_stack && address.is_ipv6() {
        let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))
            .map_err(TransportError::from)?;
        socket.set_only_v6(false).map_err(TransportError::from)?;
        socket.bind(&address.into()).map_err(TransportError::from)?;
        socket.listen(1024).map_err(TransportError::from)?;
        socket.set_nonblocking(true).map_err(TransportError::from)?;
        let std_listener: std::net::TcpListener = socket.into();
        TcpListener::from_std(std_listener).map_err(TransportError::from)
    } else {
        TcpListener::bind(address).await.map_err(TransportError::from)
    }
}
