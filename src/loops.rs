//! The send and receive loops (component F): two independent tasks per session, one draining
//! the send queue under the in-flight gate, one pulling frames (or raw reads, in unframed mode)
//! off the socket and delivering them as events.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::TransportError;
use crate::events::Event;
use crate::framing::{FrameMode, HeaderOutcome};
use crate::queue::{Payload, SendOutcome};
use crate::session::Session;

/// Spawn the receive loop for a freshly-established session. Called exactly once per session by
/// [`crate::connector`] and [`crate::acceptor`] once the handshake (and optional credential
/// sub-handshake) has completed.
pub fn spawn_receive_loop(session: Arc<Session>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        receive_loop(session).await;
    })
}

/// Drain the send queue until it is empty, then release the in-flight gate. Launched fresh by
/// [`Session::send`] every time the gate transitions from free to held — see
/// [`crate::queue::SendQueue`] for why this avoids both busy-waiting and lost wake-ups.
pub async fn send_loop(session: Arc<Session>) {
    loop {
        if session.token().cancelled() {
            return;
        }
        let payload = match session.send_queue().dequeue() {
            Some(payload) => payload,
            None => {
                if session.send_queue().release_or_continue().await {
                    continue;
                }
                return;
            }
        };
        run_send(&session, payload).await;
        if session.token().cancelled() {
            return;
        }
    }
}

async fn run_send(session: &Arc<Session>, mut payload: Payload) {
    let peer = session.event_peer();
    session.emit(Event::SendStart { peer });
    let len = payload.body.len();

    let result = {
        let mut guard = session.write_half().lock().await;
        match guard.write_all(&payload.body).await {
            Ok(()) => guard.flush().await,
            Err(err) => Err(err),
        }
    };

    match result {
        Ok(()) => {
            payload.complete(SendOutcome::Sent);
            session.stats().add_bytes_sent(len as u64);
            session.emit(Event::SendComplete { peer });
        }
        Err(err) => {
            payload.complete(SendOutcome::Dropped);
            session.emit(Event::SendException {
                peer,
                error: Arc::new(TransportError::from(err)),
            });
            // The socket is broken; nothing downstream of this write can succeed either. The
            // loop is exiting without draining the rest of the queue itself, so free the gate
            // before tearing down, or a `send()` racing the terminate would enqueue a payload
            // with nothing left to ever dequeue it.
            session.send_queue().release_gate();
            session.terminate();
        }
    }
}

/// Pull frames (or raw reads) off the socket until the session is terminated. Resumes in the
/// same mode after a non-fatal receive exception rather than switching modes mid-session: this
/// crate has only one receive mode per session, chosen once at handshake time and never revised.
pub async fn receive_loop(session: Arc<Session>) {
    loop {
        if session.token().cancelled() {
            return;
        }
        let continue_loop = match session.framing().mode() {
            FrameMode::Aware { .. } => receive_framed(&session).await,
            FrameMode::Unaware => receive_unframed(&session).await,
        };
        if !continue_loop {
            return;
        }
    }
}

async fn receive_framed(session: &Arc<Session>) -> bool {
    let header_len = session
        .framing()
        .header_len()
        .expect("payload-aware framing always has a header length");
    let mut header = vec![0u8; header_len];
    {
        let mut guard = session.read_half().lock().await;
        if let Err(err) = guard.read_exact(&mut header).await {
            return handle_read_error(session, err);
        }
    }

    let length = match session.framing().extract_length(&header) {
        HeaderOutcome::Length(length) => length as usize,
        HeaderOutcome::Invalid(framing_error) => {
            session.emit(Event::ReceiveException {
                peer: session.event_peer(),
                error: Arc::new(TransportError::from(framing_error)),
            });
            // Not a socket failure: report it and resume in the same (framed) mode rather than
            // tearing the session down. If the resumed attempt itself hits a socket error,
            // `handle_read_error` terminates on the next iteration.
            return true;
        }
        HeaderOutcome::NeedMore => unreachable!("read_exact fills the entire header in one call"),
    };

    session.reset_recv_buffer(length);
    if length > 0 {
        let mut body = vec![0u8; length];
        let read_result = {
            let mut guard = session.read_half().lock().await;
            guard.read_exact(&mut body).await
        };
        if let Err(err) = read_result {
            return handle_read_error(session, err);
        }
        session.write_recv_buffer(0, &body);
    }

    session.stats().add_bytes_received(length as u64);
    deliver(session, length).await;
    true
}

/// Largest single read attempted in unframed mode. Not user-configurable; a fixed implementation
/// constant.
const UNFRAMED_READ_SIZE: usize = 64 * 1024;

async fn receive_unframed(session: &Arc<Session>) -> bool {
    let mut buf = vec![0u8; UNFRAMED_READ_SIZE];
    let n = {
        let mut guard = session.read_half().lock().await;
        match guard.read(&mut buf).await {
            Ok(n) => n,
            Err(err) => return handle_read_error(session, err),
        }
    };
    if n == 0 {
        // A zero-byte read means the peer closed its write half: graceful disconnect, not an
        // exception.
        session.terminate();
        return false;
    }

    session.reset_recv_buffer(n);
    session.write_recv_buffer(0, &buf[..n]);
    session.stats().add_bytes_received(n as u64);
    deliver(session, n).await;
    true
}

async fn deliver(session: &Arc<Session>, size: usize) {
    let peer = session.event_peer();
    session.emit(Event::ReceiveReady { peer, size });
    let body = session.take_recv_body();
    session.emit(Event::ReceiveComplete { peer, body });
}

/// The I/O error kinds that mean the peer is simply gone rather than that something went wrong:
/// treated the same as a zero-byte read (graceful disconnect, no `receive-exception`).
fn is_disconnect(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
    )
}

/// A zero-byte read or a socket that is no longer connected terminates silently, matching the
/// zero-byte case in [`receive_unframed`]. Every other I/O error is a socket exception: reported
/// as a `receive-exception` before the session terminates.
fn handle_read_error(session: &Arc<Session>, err: std::io::Error) -> bool {
    if !is_disconnect(err.kind()) {
        session.emit(Event::ReceiveException {
            peer: session.event_peer(),
            error: Arc::new(TransportError::from(err)),
        });
    }
    session.terminate();
    false
}
