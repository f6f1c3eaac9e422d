//! Circular overflow buffer for high-priority events.
//!
//! When the main channel is saturated, high-priority events land here
//! instead of being dropped. The buffer has fixed capacity and overwrites
//! the oldest entry when full; a drain task moves entries back into the
//! main channel as space frees up.

use crate::bridge::event::AgentEvent;
use std::sync::Mutex;

pub struct OverflowBuffer {
    inner: Mutex<Ring>,
}

struct Ring {
    slots: Vec<Option<AgentEvent>>,
    head: usize,
    tail: usize,
    size: usize,
    full: bool,
    overwritten: u64,
}

impl OverflowBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "overflow buffer capacity must be positive");
        Self {
            inner: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                size: 0,
                full: false,
                overwritten: 0,
            }),
        }
    }

    /// Append an event, overwriting the oldest entry when full.
    ///
    /// Returns `true` if an older entry was overwritten.
    pub fn push(&self, event: AgentEvent) -> bool {
        let mut ring = self.inner.lock().unwrap();
        let capacity = ring.slots.len();
        let overwrote = ring.full;

        let tail = ring.tail;
        ring.slots[tail] = Some(event);
        ring.tail = (tail + 1) % capacity;

        if overwrote {
            ring.head = (ring.head + 1) % capacity;
            ring.overwritten += 1;
        } else {
            ring.size += 1;
            ring.full = ring.size == capacity;
        }
        overwrote
    }

    /// Remove and return the oldest event.
    pub fn pop(&self) -> Option<AgentEvent> {
        let mut ring = self.inner.lock().unwrap();
        if ring.size == 0 {
            return None;
        }
        let head = ring.head;
        let event = ring.slots[head].take();
        ring.head = (head + 1) % ring.slots.len();
        ring.size -= 1;
        ring.full = false;
        event
    }

    /// Put an event back at the front, undoing a `pop` whose send was
    /// refused. No-op when the buffer refilled in between.
    pub fn push_front(&self, event: AgentEvent) {
        let mut ring = self.inner.lock().unwrap();
        let capacity = ring.slots.len();
        if ring.full {
            return;
        }
        ring.head = (ring.head + capacity - 1) % capacity;
        let head = ring.head;
        ring.slots[head] = Some(event);
        ring.size += 1;
        ring.full = ring.size == capacity;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entries lost to overwrites since creation.
    pub fn overwritten(&self) -> u64 {
        self.inner.lock().unwrap().overwritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::event::types;
    use chrono::Utc;
    use serde_json::json;

    fn event(n: u64) -> AgentEvent {
        AgentEvent::new(types::SYNC_ERROR, Utc::now(), json!({ "n": n }))
    }

    fn n_of(event: &AgentEvent) -> u64 {
        event.data["n"].as_u64().unwrap()
    }

    #[test]
    fn test_push_pop_fifo() {
        let buffer = OverflowBuffer::new(4);
        for n in 0..3 {
            buffer.push(event(n));
        }
        assert_eq!(buffer.len(), 3);
        for n in 0..3 {
            assert_eq!(n_of(&buffer.pop().unwrap()), n);
        }
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn test_overwrites_oldest_when_full() {
        let buffer = OverflowBuffer::new(3);
        for n in 0..5 {
            buffer.push(event(n));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.overwritten(), 2);
        // Oldest two (0, 1) were overwritten.
        assert_eq!(n_of(&buffer.pop().unwrap()), 2);
        assert_eq!(n_of(&buffer.pop().unwrap()), 3);
        assert_eq!(n_of(&buffer.pop().unwrap()), 4);
    }

    #[test]
    fn test_push_front_restores_order() {
        let buffer = OverflowBuffer::new(4);
        for n in 0..3 {
            buffer.push(event(n));
        }
        let first = buffer.pop().unwrap();
        buffer.push_front(first);
        for n in 0..3 {
            assert_eq!(n_of(&buffer.pop().unwrap()), n);
        }
    }

    #[test]
    fn test_wraparound() {
        let buffer = OverflowBuffer::new(2);
        buffer.push(event(0));
        buffer.push(event(1));
        assert_eq!(n_of(&buffer.pop().unwrap()), 0);
        buffer.push(event(2));
        assert_eq!(n_of(&buffer.pop().unwrap()), 1);
        assert_eq!(n_of(&buffer.pop().unwrap()), 2);
        assert!(buffer.is_empty());
    }
}
