//! The per-connection session state (component C, §3): the single owner of a connection's
//! socket halves, send queue, receive buffer, in-flight gate (via [`crate::queue::SendQueue`]),
//! and cancellation token. Both [`crate::connector`] and [`crate::acceptor`] produce a
//! `Arc<Session>` once their handshake succeeds; [`crate::loops`] then drives its send and
//! receive loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::credential::Principal;
use crate::error::TransportError;
use crate::events::{Event, Observer, Peer};
use crate::framing::Framing;
use crate::io_stream::IoStream;
use crate::queue::{enqueue_payload, Payload, SendOutcome, SendQueue};
use crate::stats::Stats;
use crate::token::CancellationToken;

/// The session's current receive buffer, exposed to callers only inside a `receive-ready` event
/// handler via [`Session::read`]. Reset at each payload boundary (§3 invariant).
#[derive(Default)]
struct RecvBuffer {
    buffer: Vec<u8>,
    bytes_received: usize,
    read_index: usize,
}

/// One logical, authenticated, encrypted connection between two endpoints (§3).
pub struct Session {
    pub id: Uuid,
    framing: Framing,
    send_queue: Arc<SendQueue>,
    write_half: AsyncMutex<WriteHalf<IoStream>>,
    read_half: AsyncMutex<ReadHalf<IoStream>>,
    recv_buffer: StdMutex<RecvBuffer>,
    token: CancellationToken,
    stats: Arc<Stats>,
    principal: StdMutex<Option<Principal>>,
    observer: Option<Arc<dyn Observer>>,
    /// The identifier carried in this session's events: `Some(id)` on the server (one listener,
    /// many peers), `None` on the client (exactly one session, per §6).
    event_peer: Peer,
    connected: AtomicBool,
}

impl Session {
    pub fn new(
        id: Uuid,
        io: IoStream,
        framing: Framing,
        max_send_queue_size: Option<usize>,
        observer: Option<Arc<dyn Observer>>,
        is_server: bool,
    ) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(io);
        Arc::new(Session {
            id,
            framing,
            send_queue: Arc::new(SendQueue::new(max_send_queue_size)),
            write_half: AsyncMutex::new(write_half),
            read_half: AsyncMutex::new(read_half),
            recv_buffer: StdMutex::new(RecvBuffer::default()),
            token: CancellationToken::new(),
            stats: Arc::new(Stats::new()),
            principal: StdMutex::new(None),
            observer,
            event_peer: if is_server { Some(id) } else { None },
            connected: AtomicBool::new(false),
        })
    }

    pub fn framing(&self) -> &Framing {
        &self.framing
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn send_queue(&self) -> &Arc<SendQueue> {
        &self.send_queue
    }

    pub(crate) fn write_half(&self) -> &AsyncMutex<WriteHalf<IoStream>> {
        &self.write_half
    }

    pub(crate) fn read_half(&self) -> &AsyncMutex<ReadHalf<IoStream>> {
        &self.read_half
    }

    pub fn principal(&self) -> Option<Principal> {
        self.principal.lock().unwrap().clone()
    }

    pub(crate) fn set_principal(&self, principal: Principal) {
        *self.principal.lock().unwrap() = Some(principal);
    }

    pub(crate) fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.token.cancelled()
    }

    pub(crate) fn emit(&self, event: Event) {
        event.emit(self.observer.as_deref());
    }

    /// Queue `body` for sending; returns a latch that resolves once the payload has been
    /// written or dropped. The caller (this function) is responsible for launching a fresh
    /// send-loop task whenever the in-flight gate was free, per §4.C.
    ///
    /// A session that has already terminated drops the payload immediately rather than queueing
    /// it: once cancelled, no send-loop iteration will ever run again to dequeue it.
    pub fn send(self: &Arc<Self>, body: Bytes) -> oneshot::Receiver<SendOutcome> {
        let framed = self.framing.add_header(&body);
        if self.token.cancelled() {
            let (mut payload, receiver) = Payload::new(framed);
            payload.complete(SendOutcome::Dropped);
            return receiver;
        }
        let (receiver, launch_send_loop, overflow) = enqueue_payload(&self.send_queue, framed);
        if let Some(error) = overflow {
            self.emit(Event::SendException {
                peer: self.event_peer,
                error: Arc::new(error),
            });
        }
        if launch_send_loop {
            let session = self.clone();
            tokio::spawn(async move {
                crate::loops::send_loop(session).await;
            });
        }
        receiver
    }

    /// Synchronous wrapper over [`Session::send`], blocking on the completion latch (§5).
    pub fn send_blocking(self: &Arc<Self>, body: Bytes) -> Result<SendOutcome, TransportError> {
        let receiver = self.send(body);
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current()
                .block_on(receiver)
                .map_err(|_| TransportError::Disposed)
        })
    }

    /// Replace the receive buffer with a freshly-sized one, ready to accumulate `len` bytes of
    /// a newly-started payload (framed mode) or up to `len` bytes of an unframed read.
    pub(crate) fn reset_recv_buffer(&self, len: usize) {
        let mut recv = self.recv_buffer.lock().unwrap();
        recv.buffer = vec![0u8; len];
        recv.bytes_received = 0;
        recv.read_index = 0;
    }

    pub(crate) fn write_recv_buffer(&self, at: usize, data: &[u8]) {
        let mut recv = self.recv_buffer.lock().unwrap();
        recv.buffer[at..at + data.len()].copy_from_slice(data);
        recv.bytes_received = recv.bytes_received.max(at + data.len());
    }

    /// Copy the currently-delivered payload out as an owned buffer (§4.F: "a copy of the body so
    /// consumers may retain it").
    pub(crate) fn take_recv_body(&self) -> Bytes {
        let recv = self.recv_buffer.lock().unwrap();
        Bytes::copy_from_slice(&recv.buffer[..recv.bytes_received])
    }

    /// Pull-style read, valid only from inside a `receive-ready` event handler (§4.F). Copies up
    /// to `out.len()` bytes from the session's current receive buffer at the session's read
    /// index, advancing (and wrapping) that index.
    pub fn read(&self, out: &mut [u8]) -> Result<usize, TransportError> {
        let mut recv = self.recv_buffer.lock().unwrap();
        if recv.buffer.is_empty() {
            return Err(TransportError::Disposed);
        }
        let available = recv.bytes_received.saturating_sub(recv.read_index);
        let n = out.len().min(available);
        let start = recv.read_index;
        out[..n].copy_from_slice(&recv.buffer[start..start + n]);
        recv.read_index += n;
        if recv.read_index >= recv.bytes_received {
            recv.read_index = 0;
        }
        Ok(n)
    }

    /// Flip the cancellation token and, if this call is the first to do so, perform teardown:
    /// drain the send queue (signaling every remaining latch as dropped) and emit
    /// `connection-terminated` exactly once.
    pub fn terminate(self: &Arc<Self>) {
        if self.token.cancel() {
            self.send_queue.drain_as_dropped();
            self.emit(Event::ConnectionTerminated {
                peer: self.event_peer,
            });
        }
    }

    pub fn event_peer(&self) -> Peer {
        self.event_peer
    }

    /// Caller-initiated disconnect: shuts down the write half (so the peer observes a clean
    /// close) and then runs the same teardown as [`Session::terminate`]. Idempotent, and safe to
    /// call from any task.
    pub async fn disconnect(self: &Arc<Self>) {
        if self.token.cancelled() {
            return;
        }
        {
            let mut guard = self.write_half.lock().await;
            let _ = tokio::io::AsyncWriteExt::shutdown(&mut *guard).await;
        }
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{Endian, FrameMode};

    fn test_io_pair() -> (tokio::io::DuplexStream, tokio::io::DuplexStream) {
        tokio::io::duplex(4096)
    }

    fn make_session(stream: tokio::io::DuplexStream) -> Arc<Session> {
        let io = IoStream::from(stream);
        Session::new(
            Uuid::new_v4(),
            io,
            Framing::new(FrameMode::aware(Bytes::from_static(&[0xAA, 0x55]), Endian::Little)),
            Some(2),
            None,
            false,
        )
    }

    #[tokio::test]
    async fn read_never_copies_past_bytes_received() {
        let (a, _b) = test_io_pair();
        let session = make_session(a);
        session.reset_recv_buffer(8);
        session.write_recv_buffer(0, &[1, 2, 3]);
        let mut out = [0u8; 100];
        let n = session.read(&mut out).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn read_index_wraps_to_zero_after_full_drain() {
        let (a, _b) = test_io_pair();
        let session = make_session(a);
        session.reset_recv_buffer(4);
        session.write_recv_buffer(0, &[9, 9, 9, 9]);
        let mut out = [0u8; 4];
        session.read(&mut out).unwrap();
        // A second read should see an empty window (index wrapped, nothing new written).
        let mut out2 = [0u8; 4];
        let n = session.read(&mut out2).unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn terminate_emits_connection_terminated_at_most_once() {
        let (observer, mut rx) = crate::events::ChannelObserver::new();
        let (a, _b) = test_io_pair();
        let io = IoStream::from(a);
        let session = Session::new(
            Uuid::new_v4(),
            io,
            Framing::new(FrameMode::Unaware),
            None,
            Some(Arc::new(observer)),
            false,
        );
        session.terminate();
        session.terminate();
        let mut terminated_count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::ConnectionTerminated { .. }) {
                terminated_count += 1;
            }
        }
        assert_eq!(terminated_count, 1);
    }

    #[tokio::test]
    async fn send_after_terminate_drops_without_enqueueing() {
        let (a, _b) = test_io_pair();
        let session = make_session(a);
        session.terminate();
        let receiver = session.send(Bytes::from_static(b"hello"));
        assert_eq!(session.send_queue().len(), 0);
        assert_eq!(receiver.await.unwrap(), SendOutcome::Dropped);
    }
}
