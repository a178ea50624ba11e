use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use signalforge_wire::Envelope;

/// Default inbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Result of a bounded-wait pop.
#[derive(Debug)]
pub enum Pop {
    /// An envelope was dequeued.
    Item(Envelope),
    /// Nothing arrived within the wait bound.
    Empty,
    /// The queue is closed and fully drained.
    Closed,
}

/// Bounded FIFO queue of decoded inbound envelopes.
///
/// Single synchronization point between the read loop (producer) and
/// the session owner (consumer). The bound applies backpressure on a
/// slow consumer: `push` blocks until space frees up or the queue is
/// closed. Closing is idempotent and wakes every blocked party, so
/// consumers observe termination instead of deadlocking. Items queued
/// before close are still drained in order.
pub struct InboundQueue {
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

struct State {
    items: VecDeque<Envelope>,
    closed: bool,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue one envelope, blocking while the queue is full.
    /// Returns false if the queue is (or becomes) closed; the
    /// envelope is dropped in that case.
    pub fn push(&self, envelope: Envelope) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !state.closed && state.items.len() >= self.capacity {
            state = self
                .writable
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return false;
        }
        state.items.push_back(envelope);
        self.readable.notify_one();
        true
    }

    /// Dequeue, blocking until an item arrives or the queue closes.
    /// `None` means closed and drained.
    pub fn pop(&self) -> Option<Envelope> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(envelope) = state.items.pop_front() {
                self.writable.notify_one();
                return Some(envelope);
            }
            if state.closed {
                return None;
            }
            state = self
                .readable
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Dequeue with a wait bound, so the consumer can re-check its
    /// cancellation signal between attempts.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(envelope) = state.items.pop_front() {
                self.writable.notify_one();
                return Pop::Item(envelope);
            }
            if state.closed {
                return Pop::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return Pop::Empty;
            }
            let (guard, _timed_out) = self
                .readable
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Close the queue and wake all blocked producers and consumers.
    /// Safe to call more than once.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use signalforge_wire::{Payload, ServerHello};

    use super::*;

    fn envelope(tag: &str) -> Envelope {
        Envelope::new(
            "sess-q",
            "test",
            Payload::Handshake(ServerHello {
                public_key: tag.to_string(),
            }),
        )
    }

    fn tag(envelope: &Envelope) -> String {
        match &envelope.payload {
            Payload::Handshake(hello) => hello.public_key.clone(),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn fifo_order() {
        let queue = InboundQueue::with_capacity(4);
        assert!(queue.push(envelope("a")));
        assert!(queue.push(envelope("b")));
        assert_eq!(tag(&queue.pop().unwrap()), "a");
        assert_eq!(tag(&queue.pop().unwrap()), "b");
    }

    #[test]
    fn push_blocks_until_consumer_frees_space() {
        let queue = Arc::new(InboundQueue::with_capacity(1));
        assert!(queue.push(envelope("first")));

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.push(envelope("second")))
        };

        // The producer is blocked on the full queue until we pop.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.len(), 1);
        assert_eq!(tag(&queue.pop().unwrap()), "first");

        assert!(producer.join().unwrap());
        assert_eq!(tag(&queue.pop().unwrap()), "second");
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(InboundQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop())
        };

        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn close_wakes_blocked_producer() {
        let queue = Arc::new(InboundQueue::with_capacity(1));
        assert!(queue.push(envelope("fill")));

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.push(envelope("blocked")))
        };

        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(!producer.join().unwrap());
    }

    #[test]
    fn queued_items_drain_after_close() {
        let queue = InboundQueue::with_capacity(4);
        assert!(queue.push(envelope("kept")));
        queue.close();

        assert!(!queue.push(envelope("rejected")));
        assert_eq!(tag(&queue.pop().unwrap()), "kept");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn pop_timeout_reports_empty_then_item_then_closed() {
        let queue = InboundQueue::new();
        assert!(matches!(
            queue.pop_timeout(Duration::from_millis(10)),
            Pop::Empty
        ));

        assert!(queue.push(envelope("x")));
        assert!(matches!(
            queue.pop_timeout(Duration::from_millis(10)),
            Pop::Item(_)
        ));

        queue.close();
        assert!(matches!(
            queue.pop_timeout(Duration::from_millis(10)),
            Pop::Closed
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let queue = InboundQueue::new();
        queue.close();
        queue.close();
        assert!(queue.is_closed());
    }
}
