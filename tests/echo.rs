//! End-to-end echo scenarios: a happy exchange and a zero-length body (§8 scenarios 1 and 2).

mod common;

use bytes::Bytes;
use common::TestCertificate;
use transport::events::Event;
use transport::{connect, Endian};
use tokio::time::{timeout, Duration};

#[tokio::test(flavor = "multi_thread")]
async fn happy_echo_round_trips_exact_bytes() {
    let cert = TestCertificate::generate();
    let (acceptor, addr, mut server_events) = common::start_acceptor(&cert, |config| config).await;

    // Echo every payload a server session receives straight back on the same session.
    let echo_acceptor = acceptor.clone();
    tokio::spawn(async move {
        while let Some(event) = server_events.recv().await {
            if let Event::ReceiveComplete {
                peer: Some(id),
                body,
            } = event
            {
                if let Some(session) = echo_acceptor.get_session(id).await {
                    let _ = session.send(body);
                }
            }
        }
    });

    let config = common::client_config(addr, &cert, |config| config);
    let (observer, mut client_events) = transport::events::ChannelObserver::new();
    let session = connect(&config, Some(std::sync::Arc::new(observer)))
        .await
        .expect("client should connect");

    session.send(Bytes::from_static(&[0x01, 0x02, 0x03]));

    let echoed = timeout(Duration::from_secs(5), async {
        while let Some(event) = client_events.recv().await {
            if let Event::ReceiveComplete { body, .. } = event {
                return body;
            }
        }
        panic!("client event stream ended before an echo arrived");
    })
    .await
    .expect("echo should arrive within the timeout");

    assert_eq!(echoed.as_ref(), &[0x01, 0x02, 0x03]);
    assert_eq!(echoed.len(), 3);

    session.disconnect().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_frame_yields_a_single_zero_size_receive() {
    let cert = TestCertificate::generate();
    let (_acceptor, addr, mut server_events) = common::start_acceptor(&cert, |config| {
        config.options(
            transport::SessionOptions::new()
                .payload_aware(true)
                .payload_marker(Bytes::from_static(&[0xAA, 0x55]))
                .payload_endian(Endian::Little),
        )
    })
    .await;

    let config = common::client_config(addr, &cert, |config| {
        config.options(
            transport::SessionOptions::new()
                .payload_aware(true)
                .payload_marker(Bytes::from_static(&[0xAA, 0x55]))
                .payload_endian(Endian::Little),
        )
    });
    let session = connect(&config, None).await.expect("client should connect");

    session.send(Bytes::new());

    let size = timeout(Duration::from_secs(5), async {
        while let Some(event) = server_events.recv().await {
            if let Event::ReceiveComplete { body, .. } = event {
                return body.len();
            }
        }
        panic!("server event stream ended before the empty frame arrived");
    })
    .await
    .expect("the empty frame should arrive within the timeout");

    assert_eq!(size, 0);

    session.disconnect().await;
}
