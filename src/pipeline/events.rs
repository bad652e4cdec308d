//! State-change completion events.
//!
//! Structural operations report errors synchronously, but the deferred
//! pause/stop path has no caller left to return to. Completion (or
//! failure) of every state transition is therefore broadcast here, and
//! any number of receivers can observe it asynchronously.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::broadcast;

use crate::engine::GraphState;

/// Notification of a completed or failed state transition.
#[derive(Debug, Clone)]
pub enum StateEvent {
    /// The pipeline reached a new state.
    StateChanged {
        /// State before the transition.
        from: GraphState,
        /// State after the transition.
        to: GraphState,
    },

    /// A requested transition did not happen.
    ///
    /// Emitted on the deferred pause/stop path, where the failure has no
    /// synchronous caller to return to.
    StateChangeFailed {
        /// State the transition aimed for.
        target: GraphState,
        /// Why the transition failed.
        reason: String,
    },
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateEvent::StateChanged { from, to } => {
                write!(f, "state changed: {} -> {}", from, to)
            }
            StateEvent::StateChangeFailed { target, reason } => {
                write!(f, "state change to {} failed: {}", target, reason)
            }
        }
    }
}

/// Sender side of the state-event channel.
///
/// Held by the pipeline; cloning shares the same channel.
#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<StateEvent>,
}

impl EventSender {
    /// Create a sender with room for `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event.
    ///
    /// Returns the number of receivers that got it; zero receivers is
    /// fine.
    pub fn send(&self, event: StateEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Send a completed-transition event.
    pub fn send_state_changed(&self, from: GraphState, to: GraphState) {
        self.send(StateEvent::StateChanged { from, to });
    }

    /// Send a failed-transition event.
    pub fn send_state_change_failed(&self, target: GraphState, reason: impl Into<String>) {
        self.send(StateEvent::StateChangeFailed {
            target,
            reason: reason.into(),
        });
    }

    /// Create a receiver for events sent from now on.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Create a stream of events sent from now on.
    pub fn stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Receiver side of the state-event channel.
pub struct EventReceiver {
    receiver: broadcast::Receiver<StateEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the sender is gone. Events missed while
    /// lagging are skipped.
    pub async fn recv(&mut self) -> Option<StateEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive an already-delivered event without blocking.
    pub fn try_recv(&mut self) -> Option<StateEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// `futures::Stream` adapter over an [`EventReceiver`].
///
/// The in-flight receive future is stored across polls. Rebuilding it on
/// every poll would drop the broadcast waiter registration, and a task
/// waiting before any event is sent would never be woken.
pub struct EventStream {
    inflight: RecvFuture,
}

type RecvFuture = Pin<Box<dyn Future<Output = (Option<StateEvent>, EventReceiver)> + Send>>;

fn recv_owned(mut receiver: EventReceiver) -> RecvFuture {
    Box::pin(async move {
        let event = receiver.recv().await;
        (event, receiver)
    })
}

impl EventStream {
    /// Wrap a receiver for async iteration.
    pub fn new(receiver: EventReceiver) -> Self {
        Self {
            inflight: recv_owned(receiver),
        }
    }
}

impl futures::Stream for EventStream {
    type Item = StateEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let (event, receiver) = futures::ready!(self.inflight.as_mut().poll(cx));
        self.inflight = recv_owned(receiver);
        std::task::Poll::Ready(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_and_recv() {
        let sender = EventSender::new(16);
        let mut receiver = sender.subscribe();

        sender.send_state_changed(GraphState::Null, GraphState::Playing);
        let event = receiver.recv().await.unwrap();
        assert!(matches!(
            event,
            StateEvent::StateChanged {
                from: GraphState::Null,
                to: GraphState::Playing,
            }
        ));
    }

    #[tokio::test]
    async fn test_every_receiver_sees_the_event() {
        let sender = EventSender::new(16);
        let mut r1 = sender.subscribe();
        let mut r2 = sender.subscribe();

        sender.send_state_change_failed(GraphState::Paused, "engine refused");
        for receiver in [&mut r1, &mut r2] {
            let event = receiver.recv().await.unwrap();
            assert!(matches!(event, StateEvent::StateChangeFailed { .. }));
        }
    }

    #[tokio::test]
    async fn test_recv_ends_when_sender_drops() {
        let sender = EventSender::new(16);
        let mut receiver = sender.subscribe();
        drop(sender);
        assert!(receiver.recv().await.is_none());
    }

    #[test]
    fn test_try_recv_without_events() {
        let sender = EventSender::new(16);
        let mut receiver = sender.subscribe();
        assert!(receiver.try_recv().is_none());

        sender.send_state_changed(GraphState::Playing, GraphState::Paused);
        assert!(receiver.try_recv().is_some());
        assert!(receiver.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_stream_adapter() {
        let sender = EventSender::new(16);
        let mut stream = sender.stream();

        sender.send_state_changed(GraphState::Null, GraphState::Ready);
        let event = stream.next().await.unwrap();
        assert!(matches!(event, StateEvent::StateChanged { .. }));
    }

    #[tokio::test]
    async fn test_stream_wakes_when_event_arrives_after_poll() {
        let sender = EventSender::new(16);
        let mut stream = sender.stream();

        // The waiter polls the stream before anything has been sent; a
        // later send must wake it.
        let waiter = tokio::spawn(async move { stream.next().await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        sender.send_state_changed(GraphState::Paused, GraphState::Playing);

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), waiter)
            .await
            .expect("stream never woke up")
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            StateEvent::StateChanged {
                to: GraphState::Playing,
                ..
            }
        ));
    }

    #[test]
    fn test_display() {
        let event = StateEvent::StateChanged {
            from: GraphState::Paused,
            to: GraphState::Playing,
        };
        assert_eq!(event.to_string(), "state changed: PAUSED -> PLAYING");

        let event = StateEvent::StateChangeFailed {
            target: GraphState::Paused,
            reason: "no".to_string(),
        };
        assert_eq!(event.to_string(), "state change to PAUSED failed: no");
    }
}
