//! Bounded FIFO of outbound user messages.
//!
//! [`OutboundQueue`] is a pure synchronous data structure. It never sends
//! anything itself; the [`crate::controller::Controller`] dequeues from it on
//! a busy→idle edge and hands the message to the sender.
//!
//! Invariants:
//! - `len() <= capacity()` at all times; an enqueue past the bound is
//!   rejected with [`QueueError::CapacityExceeded`] and changes nothing.
//! - Delivery order is insertion order.
//! - `paused` only clears through [`OutboundQueue::resume`].

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A queued user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Stable insertion index, unique for the lifetime of the queue.
    pub index: u64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Errors produced by [`OutboundQueue`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue already holds `capacity` messages.
    #[error("outbound queue is full ({capacity} messages); remove or edit a queued message first")]
    CapacityExceeded {
        /// The configured bound.
        capacity: usize,
    },
    /// A positional operation referenced a slot that does not exist.
    #[error("queue position {index} is out of range (queue holds {len})")]
    IndexOutOfRange {
        /// The requested position.
        index: usize,
        /// Queue length at the time of the call.
        len: usize,
    },
}

/// Bounded FIFO with pause/resume.
///
/// # Examples
///
/// ```
/// use turnkeeper_core::queue::{OutboundQueue, QueueError};
///
/// let mut q = OutboundQueue::new(2);
/// q.enqueue("a".to_string()).unwrap();
/// q.enqueue("b".to_string()).unwrap();
/// assert_eq!(
///     q.enqueue("c".to_string()),
///     Err(QueueError::CapacityExceeded { capacity: 2 })
/// );
/// assert_eq!(q.dequeue_next().unwrap().text, "a");
/// ```
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<Message>,
    capacity: usize,
    paused: bool,
    next_index: u64,
}

impl OutboundQueue {
    /// Create an empty, unpaused queue. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            paused: false,
            next_index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Queued messages in delivery order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.items.iter()
    }

    /// Append a message.
    ///
    /// Returns the zero-based position the message landed at.
    pub fn enqueue(&mut self, text: String) -> Result<usize, QueueError> {
        if self.is_full() {
            return Err(QueueError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let message = Message {
            index: self.next_index,
            text,
            created_at: Utc::now(),
        };
        self.next_index += 1;
        self.items.push_back(message);
        Ok(self.items.len() - 1)
    }

    /// Remove and return the head. `None` while paused or empty.
    pub fn dequeue_next(&mut self) -> Option<Message> {
        if self.paused {
            return None;
        }
        self.items.pop_front()
    }

    /// Remove the message at `position`.
    pub fn remove(&mut self, position: usize) -> Result<Message, QueueError> {
        let len = self.items.len();
        self.items.remove(position).ok_or(QueueError::IndexOutOfRange {
            index: position,
            len,
        })
    }

    /// Replace the text of the message at `position`.
    ///
    /// The message keeps its insertion index and timestamp.
    pub fn edit(&mut self, position: usize, text: String) -> Result<(), QueueError> {
        let len = self.items.len();
        match self.items.get_mut(position) {
            Some(message) => {
                message.text = text;
                Ok(())
            }
            None => Err(QueueError::IndexOutOfRange {
                index: position,
                len,
            }),
        }
    }

    /// Suspend draining. Contents are kept.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Allow draining again.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Empty and unpause, as on conversation view teardown.
    pub fn reset(&mut self) {
        self.items.clear();
        self.paused = false;
    }
}
