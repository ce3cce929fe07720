//! Shared test scaffolding: a throwaway self-signed certificate plus helpers for standing up an
//! `Acceptor` and a matching `ClientConfig` that trusts it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use transport::events::{ChannelObserver, Event};
use transport::{Acceptor, ClientConfig, ServerConfig, TrustSource};

/// A self-signed certificate/key pair, valid for "localhost", written to a scratch directory for
/// the lifetime of the test.
pub struct TestCertificate {
    dir: PathBuf,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl TestCertificate {
    pub fn generate() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("failed to generate self-signed test certificate");
        let cert_pem = certified
            .serialize_pem()
            .expect("failed to serialize test certificate");
        let key_pem = certified.serialize_private_key_pem();

        let mut dir = std::env::temp_dir();
        let suffix: u64 = rand::thread_rng().gen();
        dir.push(format!("transport-test-certs-{}", suffix));
        std::fs::create_dir_all(&dir).expect("failed to create scratch cert directory");

        let cert_path = dir.join("localhost.crt");
        let key_path = dir.join("localhost.key");
        std::fs::write(&cert_path, &cert_pem).expect("failed to write test certificate");
        std::fs::write(&key_path, &key_pem).expect("failed to write test private key");

        TestCertificate {
            dir,
            cert_path,
            key_path,
        }
    }

    pub fn cert_path(&self) -> PathBuf {
        self.cert_path.clone()
    }

    pub fn key_path(&self) -> PathBuf {
        self.key_path.clone()
    }

    /// A directory containing only certificates this test trusts, suitable for
    /// `TrustSource::Directory`.
    pub fn trust_dir(&self) -> PathBuf {
        self.dir.clone()
    }
}

impl Drop for TestCertificate {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Bind an `Acceptor` on an ephemeral loopback port using `cert`, with `configure` applied to
/// the default `ServerConfig`. Spawns the accept loop in the background and returns the bound
/// address alongside the acceptor and its observer channel.
pub async fn start_acceptor(
    cert: &TestCertificate,
    configure: impl FnOnce(ServerConfig) -> ServerConfig,
) -> (
    Arc<Acceptor>,
    SocketAddr,
    tokio::sync::mpsc::UnboundedReceiver<Event>,
) {
    let (observer, events) = ChannelObserver::new();
    let config = configure(ServerConfig::new(cert.cert_path(), cert.key_path()));
    let acceptor = Acceptor::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap(), config, Some(Arc::new(observer)))
        .await
        .expect("failed to bind test acceptor");
    let addr = acceptor.local_addr().expect("bound acceptor has a local address");
    let acceptor = Arc::new(acceptor);
    tokio::spawn(acceptor.clone().serve());
    (acceptor, addr, events)
}

/// A `ClientConfig` pointed at `addr` on `localhost`, trusting `cert` as its sole root, with
/// `configure` applied afterwards.
pub fn client_config(
    addr: SocketAddr,
    cert: &TestCertificate,
    configure: impl FnOnce(ClientConfig) -> ClientConfig,
) -> ClientConfig {
    let config = ClientConfig::new(vec![("localhost".to_string(), addr.port())])
        .trust(TrustSource::Directory(cert.trust_dir()));
    configure(config)
}
