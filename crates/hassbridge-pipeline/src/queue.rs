//! Bounded FIFO that never blocks the producer

use std::collections::VecDeque;
use std::sync::Arc;

use hassbridge_core::{EventSubscription, HubEvent};

/// One matched (event, rule) pair awaiting processing
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub event: Arc<HubEvent>,
    pub rule: EventSubscription,
}

impl QueuedTask {
    pub fn new(event: Arc<HubEvent>, rule: EventSubscription) -> Self {
        Self { event, rule }
    }
}

/// FIFO holding at most `capacity` items; pushing into a full queue
/// evicts the oldest item
#[derive(Debug)]
pub struct EventQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> EventQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append `item`, returning the evicted oldest item if the queue was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let dropped = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        dropped
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}
