//! The client handshake state machine (component D): resolve/connect over TCP (retrying across
//! the configured server list on refusal), wrap in TLS, optionally present a credential, and
//! hand back a running [`Session`].

use std::io;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::ClientConfig as RustlsClientConfig;
use tokio_rustls::webpki::DNSNameRef;
use tokio_rustls::TlsConnector;

use crate::config::{ClientConfig, AUTH_TIMEOUT};
use crate::credential;
use crate::error::{AuthPhase, TransportError};
use crate::events::{Event, Observer};
use crate::framing::Framing;
use crate::io_stream::IoStream;
use crate::session::Session;
use crate::validator::{build_validator, RustlsBridge};

/// Connect to the first reachable server in `config.servers`, retrying round-robin across the
/// list on `ConnectionRefused` up to `config.max_connection_attempts` total attempts, then
/// perform the TLS (and optional credential) handshake and start the session's receive loop.
pub async fn connect(
    config: &ClientConfig,
    observer: Option<Arc<dyn Observer>>,
) -> Result<Arc<Session>, TransportError> {
    Event::ConnectionAttempt { peer: None }.emit(observer.as_deref());

    match connect_until_established(config, observer.clone()).await {
        Ok(session) => Ok(session),
        Err(error) => {
            // No session was ever created on this path, so there is nothing for `terminate()`
            // to tear down; still report the attempt as conclusively over, matching the
            // connection-exception-then-connection-terminated shape a session-level failure
            // would produce.
            Event::ConnectionException {
                peer: None,
                error: Arc::new(error.clone()),
            }
            .emit(observer.as_deref());
            Event::ConnectionTerminated { peer: None }.emit(observer.as_deref());
            Err(error)
        }
    }
}

async fn connect_until_established(
    config: &ClientConfig,
    observer: Option<Arc<dyn Observer>>,
) -> Result<Arc<Session>, TransportError> {
    let (tcp_stream, host) = connect_tcp(config, observer.as_deref()).await?;

    let validator = build_validator(&config.trust)?;
    let mut tls_config = RustlsClientConfig::new();
    tls_config.dangerous().set_certificate_verifier(Arc::new(RustlsBridge(
        validator,
        config.options.check_certificate_revocation,
    )));
    tls_config.versions = config
        .options
        .enabled_tls_protocols
        .iter()
        .map(|&version| version.into())
        .collect();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let dns_name = DNSNameRef::try_from_ascii_str(&host).map_err(|_| {
        TransportError::SocketFatal(Arc::new(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a valid DNS name: {}", host),
        )))
    })?;

    let tls_stream = timeout(AUTH_TIMEOUT, connector.connect(dns_name, tcp_stream))
        .await
        .map_err(|_| TransportError::AuthTimeout { phase: AuthPhase::Tls })?
        .map_err(TransportError::from)?;

    let mut io = IoStream::from(tls_stream);

    if let Some(source) = &config.integrated_security {
        present_credential(&mut io, source.as_ref(), config.ignore_invalid_credentials).await?;
    }

    let id = credential::new_session_id();
    let session = Session::new(
        id,
        io,
        Framing::new(config.options.frame_mode.clone()),
        config.options.max_send_queue_size,
        observer.clone(),
        false,
    );
    session.mark_connected();
    session.emit(Event::ConnectionEstablished { peer: None });

    crate::loops::spawn_receive_loop(session.clone());

    Ok(session)
}

/// Blocking wrapper over [`connect`], for callers outside an async context.
pub fn connect_blocking(
    config: &ClientConfig,
    observer: Option<Arc<dyn Observer>>,
) -> Result<Arc<Session>, TransportError> {
    tokio::task::block_in_place(|| {
        tokio::runtime::Handle::current().block_on(connect(config, observer))
    })
}

async fn connect_tcp(
    config: &ClientConfig,
    observer: Option<&dyn Observer>,
) -> Result<(TcpStream, String), TransportError> {
    if config.servers.is_empty() {
        return Err(TransportError::SocketRefused {
            address: "<no servers configured>".to_string(),
        });
    }

    let mut attempt = 0usize;
    let mut last_error = None;
    loop {
        let (host, port) = &config.servers[attempt % config.servers.len()];
        match TcpStream::connect((host.as_str(), *port)).await {
            Ok(stream) => {
                stream.set_nodelay(config.options.no_delay).map_err(TransportError::from)?;
                return Ok((stream, host.clone()));
            }
            Err(err) => {
                let error = TransportError::from(err);
                Event::ConnectionException {
                    peer: None,
                    error: Arc::new(error.clone()),
                }
                .emit(observer);

                // The retry rule is narrow: only a refusal is worth another attempt. Every other
                // socket error (DNS failure, permission denied, network unreachable, ...)
                // terminates immediately rather than cycling through the rest of the server list.
                if !matches!(error, TransportError::SocketRefused { .. }) {
                    return Err(error);
                }

                last_error = Some(host.clone());
                attempt += 1;
                let exhausted = match config.max_connection_attempts {
                    Some(max) => attempt > max,
                    None => false,
                };
                if exhausted {
                    return Err(TransportError::SocketRefused {
                        address: last_error.unwrap_or_default(),
                    });
                }
            }
        }
    }
}

async fn present_credential(
    io: &mut IoStream,
    source: &dyn crate::credential::ClientCredentialSource,
    ignore_invalid: bool,
) -> Result<(), TransportError> {
    let outcome = timeout(AUTH_TIMEOUT, async {
        credential::client_present(io, source).await?;
        credential::client_await_verdict(io).await
    })
    .await
    .map_err(|_| TransportError::AuthTimeout {
        phase: AuthPhase::Credential,
    })?;

    match outcome? {
        true => Ok(()),
        false if ignore_invalid => Ok(()),
        false => Err(TransportError::BadCredentials),
    }
}
