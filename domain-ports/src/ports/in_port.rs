//! Built-in receivers collecting event payloads.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

/// A bounded buffer shared by [`QueuePort`] and [`StackPort`].
///
/// When the capacity is exceeded the oldest item is dropped.
struct Buffer<T> {
    capacity: Option<usize>,
    items: Mutex<VecDeque<T>>,
}

impl<T> Buffer<T> {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, item: T) {
        let mut items = self.items.lock().unwrap();
        if self.capacity.is_some_and(|capacity| items.len() >= capacity) {
            items.pop_front();
        }

        items.push_back(item);
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

/// An IN port that collects payloads in first-in-first-out order.
///
/// Connect it to an event with [`Event::connect_queue`].
///
/// [`Event::connect_queue`]: crate::ports::Event::connect_queue
pub struct QueuePort<T> {
    buffer: Buffer<T>,
}

impl<T> QueuePort<T> {
    /// Creates an unbounded queue.
    pub fn new() -> Self {
        Self {
            buffer: Buffer::new(None),
        }
    }

    /// Creates a queue holding at most `capacity` payloads.
    ///
    /// When full, the oldest payload is dropped to make room for a new one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Buffer::new(Some(capacity.max(1))),
        }
    }

    /// Appends a payload.
    pub fn push(&self, item: T) {
        self.buffer.push(item);
    }

    /// Removes the oldest payload.
    pub fn pop(&self) -> Option<T> {
        self.buffer.items.lock().unwrap().pop_front()
    }

    /// Removes all payloads, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.buffer.items.lock().unwrap().drain(..).collect()
    }

    /// Number of buffered payloads.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if no payload is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for QueuePort<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for QueuePort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuePort")
            .field("capacity", &self.buffer.capacity)
            .finish_non_exhaustive()
    }
}

/// An IN port that collects payloads in last-in-first-out order.
///
/// Connect it to an event with [`Event::connect_stack`].
///
/// [`Event::connect_stack`]: crate::ports::Event::connect_stack
pub struct StackPort<T> {
    buffer: Buffer<T>,
}

impl<T> StackPort<T> {
    /// Creates an unbounded stack.
    pub fn new() -> Self {
        Self {
            buffer: Buffer::new(None),
        }
    }

    /// Creates a stack holding at most `capacity` payloads.
    ///
    /// When full, the oldest payload is dropped to make room for a new one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Buffer::new(Some(capacity.max(1))),
        }
    }

    /// Pushes a payload.
    pub fn push(&self, item: T) {
        self.buffer.push(item);
    }

    /// Removes the most recent payload.
    pub fn pop(&self) -> Option<T> {
        self.buffer.items.lock().unwrap().pop_back()
    }

    /// Removes all payloads, most recent first.
    pub fn drain(&self) -> Vec<T> {
        self.buffer.items.lock().unwrap().drain(..).rev().collect()
    }

    /// Number of buffered payloads.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if no payload is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for StackPort<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for StackPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackPort")
            .field("capacity", &self.buffer.capacity)
            .finish_non_exhaustive()
    }
}
