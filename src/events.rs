//! Observable events (§6) and the explicit-observer design that replaces the source's raw
//! event-callback surface (§9: "Event-based callbacks → explicit observers").
//!
//! Delivery is synchronous with respect to the emitting task: [`Observer::on_event`] is called
//! inline from the loop that raised the event, so observers must not block. Every event is also
//! logged via `tracing` independent of whether an observer is registered (§6 expansion).

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::error::TransportError;

/// A peer identifier for server-side events: the id of the [`crate::session::Session`] the
/// event pertains to. Client-side events carry `None`, since a client has exactly one session.
pub type Peer = Option<Uuid>;

/// The full set of events a session or listener can raise.
#[derive(Debug, Clone)]
pub enum Event {
    ConnectionAttempt { peer: Peer },
    ConnectionEstablished { peer: Peer },
    ConnectionTerminated { peer: Peer },
    ConnectionException { peer: Peer, error: Arc<TransportError> },
    SendStart { peer: Peer },
    SendComplete { peer: Peer },
    SendException { peer: Peer, error: Arc<TransportError> },
    ReceiveReady { peer: Peer, size: usize },
    ReceiveComplete { peer: Peer, body: Bytes },
    ReceiveException { peer: Peer, error: Arc<TransportError> },
}

impl Event {
    /// Emit this event to `observer` (if any) and unconditionally to the `tracing` log, at a
    /// level proportionate to severity.
    pub fn emit(self, observer: Option<&(dyn Observer)>) {
        match &self {
            Event::ConnectionAttempt { peer } => tracing::info!(?peer, "connection attempt"),
            Event::ConnectionEstablished { peer } => {
                tracing::info!(?peer, "connection established")
            }
            Event::ConnectionTerminated { peer } => {
                tracing::info!(?peer, "connection terminated")
            }
            Event::ConnectionException { peer, error } => {
                tracing::error!(?peer, %error, "connection exception")
            }
            Event::SendStart { peer } => tracing::trace!(?peer, "send start"),
            Event::SendComplete { peer } => tracing::trace!(?peer, "send complete"),
            Event::SendException { peer, error } => {
                let level_warn = error.is_recoverable();
                if level_warn {
                    tracing::warn!(?peer, %error, "send exception");
                } else {
                    tracing::error!(?peer, %error, "send exception");
                }
            }
            Event::ReceiveReady { peer, size } => tracing::trace!(?peer, size, "receive ready"),
            Event::ReceiveComplete { peer, body } => {
                tracing::trace!(?peer, size = body.len(), "receive complete")
            }
            Event::ReceiveException { peer, error } => {
                tracing::warn!(?peer, %error, "receive exception")
            }
        }
        if let Some(observer) = observer {
            observer.on_event(self);
        }
    }
}

/// A registered observer for a session's or listener's events. Implementations must not block:
/// event delivery is synchronous with the emitting task.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: Event);
}

/// An [`Observer`] that forwards every event onto an unbounded channel, for callers who would
/// rather `.recv()` events from async code than implement a callback trait.
pub struct ChannelObserver {
    sender: tokio::sync::mpsc::UnboundedSender<Event>,
}

impl ChannelObserver {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (ChannelObserver { sender }, receiver)
    }
}

impl Observer for ChannelObserver {
    fn on_event(&self, event: Event) {
        // A dropped receiver means nobody is listening anymore; that's not this loop's problem.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_observer_forwards_events() {
        let (observer, mut rx) = ChannelObserver::new();
        Event::ConnectionEstablished { peer: None }.emit(Some(&observer));
        let received = rx.try_recv().expect("event should have been forwarded");
        assert!(matches!(received, Event::ConnectionEstablished { peer: None }));
    }

    #[test]
    fn emit_without_observer_does_not_panic() {
        Event::ConnectionTerminated { peer: None }.emit(None);
    }
}
