//! Send-queue overflow under a small `MaxSendQueueSize` (§8 scenario 3).

mod common;

use bytes::Bytes;
use common::TestCertificate;
use transport::connect;
use transport::events::Event;
use transport::SessionOptions;

#[tokio::test(flavor = "multi_thread")]
async fn overflow_drops_oldest_and_eventually_signals_every_latch() {
    let cert = TestCertificate::generate();
    let (_acceptor, addr, _server_events) = common::start_acceptor(&cert, |config| config).await;

    let config = common::client_config(addr, &cert, |config| {
        config.options(SessionOptions::new().max_send_queue_size(Some(2)))
    });
    let (observer, mut client_events) = transport::events::ChannelObserver::new();
    let session = connect(&config, Some(std::sync::Arc::new(observer)))
        .await
        .expect("client should connect");

    // Enqueue five payloads back-to-back, with no `.await` between them, so the drop policy
    // evaluates a queue that several of them have already joined rather than one drained by an
    // already-running send loop.
    let mut receivers = Vec::new();
    for i in 0..5u8 {
        receivers.push(session.send(Bytes::from(vec![i])));
    }

    // The queue never holds more than its configured bound once the burst has settled.
    assert!(session.send_queue().len() <= 2);

    let mut overflow_count = 0;
    let drained = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while let Some(event) = client_events.recv().await {
            if let Event::SendException { .. } = event {
                overflow_count += 1;
            }
        }
    })
    .await;
    // The event stream only ends once the session (and its sender) is dropped; here we just give
    // the background send loop a window to emit whatever overflow exceptions it's going to emit.
    let _ = drained;

    for receiver in receivers {
        receiver
            .await
            .expect("every payload's completion latch must resolve exactly once");
    }

    assert!(
        overflow_count >= 1,
        "expected at least one queue-overflow send-exception"
    );

    session.disconnect().await;
}
