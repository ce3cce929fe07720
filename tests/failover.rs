//! The connector retries across the configured server list on refusal and succeeds once it
//! reaches a reachable one (§8 scenario 5).

mod common;

use std::sync::Arc;

use common::TestCertificate;
use transport::events::{ChannelObserver, Event};
use transport::{connect, ClientConfig, TrustSource};

async fn unreachable_port() -> u16 {
    // Bind, read back the assigned port, then drop: nothing is listening there afterwards, so a
    // connect attempt reliably observes `ConnectionRefused`.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test(flavor = "multi_thread")]
async fn failover_to_second_server_after_first_refuses() {
    let cert = TestCertificate::generate();
    let (_acceptor, addr, _server_events) = common::start_acceptor(&cert, |config| config).await;
    let dead_port = unreachable_port().await;

    let config = ClientConfig::new(vec![
        ("localhost".to_string(), dead_port),
        ("localhost".to_string(), addr.port()),
    ])
    .trust(TrustSource::Directory(cert.trust_dir()));

    let (observer, mut events) = ChannelObserver::new();
    let session = connect(&config, Some(Arc::new(observer)))
        .await
        .expect("client should fail over to the second, reachable server");

    let mut established_count = 0;
    let mut saw_refused_exception = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::ConnectionEstablished { .. } => established_count += 1,
            Event::ConnectionException { .. } => saw_refused_exception = true,
            _ => {}
        }
    }

    assert_eq!(established_count, 1, "connection-established should fire exactly once");
    assert!(
        saw_refused_exception,
        "the refused first attempt should still be reported"
    );

    session.disconnect().await;
}
