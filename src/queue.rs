//! The per-session send queue (§4.C): a lock-free FIFO of outbound [`Payload`]s, an in-flight
//! gate ensuring a single send-loop iteration runs at a time, and the opportunistic drop policy
//! that bounds memory under a slow consumer by discarding pending data rather than blocking
//! producers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_queue::SegQueue;
use tokio::sync::{oneshot, Mutex};

use crate::error::TransportError;

/// The outcome of a send, delivered once through a payload's completion latch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The payload was written to the wire.
    Sent,
    /// The payload was discarded by the queue-overflow drop policy before being written.
    Dropped,
}

/// One outbound queue entry. Invariant: `completion` is signaled exactly once, whether by a
/// successful write, a send failure, or a drop.
pub struct Payload {
    pub body: Bytes,
    completion: Option<oneshot::Sender<SendOutcome>>,
}

impl Payload {
    pub fn new(body: Bytes) -> (Self, oneshot::Receiver<SendOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Payload {
                body,
                completion: Some(tx),
            },
            rx,
        )
    }

    /// Signal the completion latch. A no-op if already signaled (defends against accidental
    /// double-dequeue, which should not happen given the in-flight gate, but costs nothing to
    /// guard against).
    pub fn complete(&mut self, outcome: SendOutcome) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// The FIFO of outbound payloads plus the in-flight gate that serializes send-loop iterations.
pub struct SendQueue {
    entries: SegQueue<Payload>,
    len: AtomicUsize,
    in_flight: AtomicBool,
    /// Short critical section used only to close the producer/consumer race when the queue
    /// drains to empty (§5: "recheck-on-empty uses a short critical section per session").
    recheck: Mutex<()>,
    max_size: Option<usize>,
}

/// What happened when a payload was enqueued.
pub enum EnqueueOutcome {
    /// The payload was queued; the caller is responsible for launching the send loop if
    /// `launch_send_loop` is true (the in-flight gate was free).
    Enqueued { launch_send_loop: bool },
    /// The queue was at or over `max_size`; it was dumped (dropping up to `max_size` entries,
    /// all of whose latches are now signaled) and the new payload was enqueued into the now-
    /// empty queue.
    Overflowed { dropped: usize },
}

impl SendQueue {
    pub fn new(max_size: Option<usize>) -> Self {
        SendQueue {
            entries: SegQueue::new(),
            len: AtomicUsize::new(0),
            in_flight: AtomicBool::new(false),
            recheck: Mutex::new(()),
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue `payload`, first running the opportunistic drop policy if the queue has reached
    /// `max_size`.
    pub fn enqueue(&self, payload: Payload) -> EnqueueOutcome {
        let dropped = if let Some(max_size) = self.max_size {
            if self.len() >= max_size {
                self.drop_up_to(max_size)
            } else {
                0
            }
        } else {
            0
        };

        self.entries.push(payload);
        self.len.fetch_add(1, Ordering::SeqCst);

        let launch_send_loop = self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if dropped > 0 {
            EnqueueOutcome::Overflowed { dropped }
        } else {
            EnqueueOutcome::Enqueued { launch_send_loop }
        }
    }

    /// Drain and signal up to `max_size` entries as dropped. Called only from `enqueue` while
    /// the queue is already at capacity.
    fn drop_up_to(&self, max_size: usize) -> usize {
        let mut dropped = 0;
        while dropped < max_size {
            match self.entries.pop() {
                Some(mut payload) => {
                    payload.complete(SendOutcome::Dropped);
                    self.len.fetch_sub(1, Ordering::SeqCst);
                    dropped += 1;
                }
                None => break,
            }
        }
        dropped
    }

    /// Dequeue the next payload, if any.
    pub fn dequeue(&self) -> Option<Payload> {
        let popped = self.entries.pop();
        if popped.is_some() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        popped
    }

    /// Release the in-flight gate, but first recheck the queue under the short critical section
    /// to avoid a lost wake-up: if an entry arrived between the last `dequeue` returning `None`
    /// and the gate being released, keep the gate held and report that the loop should continue.
    pub async fn release_or_continue(&self) -> bool {
        let _guard = self.recheck.lock().await;
        if !self.is_empty() {
            return true;
        }
        self.in_flight.store(false, Ordering::SeqCst);
        false
    }

    /// Unconditionally release the in-flight gate, regardless of whether the queue is empty.
    /// Used by the send loop when a write fails: the loop is about to exit without draining the
    /// queue itself, so the gate must be freed here or a later `send()` on the same (doomed)
    /// session would enqueue a payload with nothing left to dequeue it.
    pub fn release_gate(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Drain every remaining entry, signaling each as dropped. Used by session teardown so that
    /// every queued payload's latch is eventually signaled even if the session never sends
    /// again.
    pub fn drain_as_dropped(&self) -> usize {
        let mut dropped = 0;
        while let Some(mut payload) = self.dequeue() {
            payload.complete(SendOutcome::Dropped);
            dropped += 1;
        }
        dropped
    }
}

/// Enqueue `body` onto `queue`, returning the receiver half of its completion latch and whether
/// the caller must launch the send loop. Translates an [`EnqueueOutcome::Overflowed`] into the
/// `QueueOverflow` error the session reports as a `send-exception`.
pub fn enqueue_payload(
    queue: &Arc<SendQueue>,
    body: Bytes,
) -> (oneshot::Receiver<SendOutcome>, bool, Option<TransportError>) {
    let (payload, receiver) = Payload::new(body);
    match queue.enqueue(payload) {
        EnqueueOutcome::Enqueued { launch_send_loop } => (receiver, launch_send_loop, None),
        EnqueueOutcome::Overflowed { dropped } => {
            // The gate state is unaffected by an overflow on its own; determine whether this
            // enqueue is the one that must (re)launch the loop.
            let launch_send_loop = queue
                .in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            (
                receiver,
                launch_send_loop,
                Some(TransportError::QueueOverflow { dropped }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(byte: u8) -> (Payload, oneshot::Receiver<SendOutcome>) {
        Payload::new(Bytes::from(vec![byte]))
    }

    #[test]
    fn first_enqueue_requests_send_loop_launch() {
        let queue = SendQueue::new(Some(4));
        let (p, _rx) = payload(1);
        match queue.enqueue(p) {
            EnqueueOutcome::Enqueued { launch_send_loop } => assert!(launch_send_loop),
            _ => panic!("expected Enqueued"),
        }
    }

    #[test]
    fn second_enqueue_does_not_relaunch_while_in_flight() {
        let queue = SendQueue::new(Some(4));
        let (p1, _rx1) = payload(1);
        queue.enqueue(p1);
        let (p2, _rx2) = payload(2);
        match queue.enqueue(p2) {
            EnqueueOutcome::Enqueued { launch_send_loop } => assert!(!launch_send_loop),
            _ => panic!("expected Enqueued"),
        }
    }

    #[tokio::test]
    async fn max_size_one_drops_oldest_on_second_enqueue() {
        let queue = SendQueue::new(Some(1));
        let (p1, rx1) = payload(1);
        queue.enqueue(p1);
        assert_eq!(queue.len(), 1);

        let (p2, rx2) = payload(2);
        let outcome = queue.enqueue(p2);
        match outcome {
            EnqueueOutcome::Overflowed { dropped } => assert_eq!(dropped, 1),
            _ => panic!("expected Overflowed"),
        }
        assert_eq!(queue.len(), 1);

        assert_eq!(rx1.await.unwrap(), SendOutcome::Dropped);
        // The second payload is still queued, not yet completed.
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn queue_overflow_signals_all_five_eventually() {
        let queue = Arc::new(SendQueue::new(Some(2)));
        let mut receivers = Vec::new();
        let mut overflow_count = 0;
        for i in 0..5u8 {
            let (receiver, _launch, error) = enqueue_payload(&queue, Bytes::from(vec![i]));
            if error.is_some() {
                overflow_count += 1;
            }
            receivers.push(receiver);
        }
        // Drain whatever remains in the queue as dropped so every latch resolves.
        queue.drain_as_dropped();
        for receiver in receivers {
            receiver.await.expect("latch should be signaled exactly once");
        }
        assert!(overflow_count >= 1);
    }

    #[tokio::test]
    async fn release_or_continue_frees_gate_when_empty() {
        let queue = SendQueue::new(None);
        let (p, _rx) = payload(1);
        queue.enqueue(p);
        queue.dequeue();
        assert!(!queue.release_or_continue().await);
        assert!(!queue.in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn release_or_continue_detects_late_arrival() {
        let queue = SendQueue::new(None);
        let (p, _rx) = payload(1);
        queue.enqueue(p);
        queue.dequeue();
        let (p2, _rx2) = payload(2);
        queue.enqueue(p2);
        assert!(queue.release_or_continue().await);
    }
}
