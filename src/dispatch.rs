use crate::error::SpeechError;
use crate::session::SessionState;
use speech_protocol::ServerMessage;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One observable session occurrence, delivered in receive order.
#[derive(Debug)]
pub enum SessionEvent {
    /// The session moved to a new lifecycle state
    State(SessionState),
    /// A decoded message arrived from the service
    Message(ServerMessage),
    /// A failure surfaced outside any caller-initiated operation
    Error(SpeechError),
}

/// FIFO queue funnelling background completions to the foreground loop.
///
/// Producers are the socket reader and the renewal timer; the single
/// consumer is whichever context drains it. Events are observed strictly
/// in enqueue order and never concurrently.
#[derive(Debug, Default)]
pub struct EventQueue {
    inner: Mutex<VecDeque<SessionEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: SessionEvent) {
        self.inner.lock().unwrap().push_back(event);
    }

    /// Take the oldest pending event, if any.
    pub fn pop(&self) -> Option<SessionEvent> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Take every pending event at once, preserving order.
    pub fn drain(&self) -> Vec<SessionEvent> {
        self.inner.lock().unwrap().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_events_pop_in_fifo_order() {
        let queue = EventQueue::new();
        queue.push(SessionEvent::State(SessionState::Authenticating));
        queue.push(SessionEvent::State(SessionState::Authenticated));
        queue.push(SessionEvent::Message(ServerMessage::TurnStart));

        assert!(matches!(
            queue.pop(),
            Some(SessionEvent::State(SessionState::Authenticating))
        ));
        assert!(matches!(
            queue.pop(),
            Some(SessionEvent::State(SessionState::Authenticated))
        ));
        assert!(matches!(
            queue.pop(),
            Some(SessionEvent::Message(ServerMessage::TurnStart))
        ));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_drain_empties_the_queue() {
        let queue = EventQueue::new();
        queue.push(SessionEvent::Message(ServerMessage::TurnStart));
        queue.push(SessionEvent::Message(ServerMessage::TurnEnd));

        let events = queue.drain();
        assert_eq!(events.len(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.drain().len(), 0);
    }

    #[test]
    fn test_no_events_lost_across_producer_threads() {
        let queue = Arc::new(EventQueue::new());
        let mut handles = Vec::new();

        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    queue.push(SessionEvent::Message(ServerMessage::TurnStart));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 400);
    }
}
