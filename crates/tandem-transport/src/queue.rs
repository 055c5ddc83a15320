//! Outbound message queue.
//!
//! Payloads sent while no connection is open wait here and are replayed in
//! submission order as soon as a connection opens.

use std::collections::VecDeque;

use crate::traits::Payload;

/// Bounded FIFO of outbound payloads.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    queue: VecDeque<Payload>,
    max_size: Option<usize>,
}

impl MessageQueue {
    /// Create a queue holding at most `max_size` payloads (`None` = unbounded).
    #[must_use]
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            queue: VecDeque::new(),
            max_size,
        }
    }

    /// Queue a payload.
    ///
    /// Returns `false` and drops the payload if the queue is full.
    pub fn enqueue(&mut self, payload: Payload) -> bool {
        if self.is_full() {
            return false;
        }
        self.queue.push_back(payload);
        true
    }

    /// Put payloads back at the front, keeping their order.
    ///
    /// Used when a flush is interrupted; ignores the size limit.
    pub fn requeue_front(&mut self, payloads: Vec<Payload>) {
        for payload in payloads.into_iter().rev() {
            self.queue.push_front(payload);
        }
    }

    /// Remove and return every queued payload, oldest first.
    pub fn drain(&mut self) -> Vec<Payload> {
        self.queue.drain(..).collect()
    }

    /// Whether another payload would be dropped.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.max_size
            .is_some_and(|max_size| self.queue.len() >= max_size)
    }

    /// Number of queued payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total size of the queued payloads.
    #[must_use]
    pub fn buffered_amount(&self) -> usize {
        self.queue.iter().map(Payload::size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = MessageQueue::new(None);
        queue.enqueue("a".into());
        queue.enqueue("b".into());
        queue.enqueue("c".into());

        let drained = queue.drain();
        assert_eq!(
            drained,
            vec![Payload::from("a"), Payload::from("b"), Payload::from("c")]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_limit_drops_newest() {
        let mut queue = MessageQueue::new(Some(2));
        assert!(queue.enqueue("a".into()));
        assert!(queue.enqueue("b".into()));
        assert!(!queue.enqueue("c".into()));

        assert_eq!(queue.drain(), vec![Payload::from("a"), Payload::from("b")]);
    }

    #[test]
    fn test_zero_limit_keeps_nothing() {
        let mut queue = MessageQueue::new(Some(0));
        assert!(!queue.enqueue("a".into()));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_front() {
        let mut queue = MessageQueue::new(Some(1));
        queue.enqueue("c".into());
        queue.requeue_front(vec!["a".into(), "b".into()]);

        assert_eq!(queue.len(), 3);
        assert_eq!(
            queue.drain(),
            vec![Payload::from("a"), Payload::from("b"), Payload::from("c")]
        );
    }

    #[test]
    fn test_buffered_amount() {
        let mut queue = MessageQueue::new(None);
        queue.enqueue("abc".into());
        queue.enqueue(vec![0u8; 10].into());
        assert_eq!(queue.buffered_amount(), 13);
    }
}
