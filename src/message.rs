//! Application message contract and connection-scoped message reuse.

use crate::id::ReqId;

/// A message that can take part in request/reply correlation.
///
/// Requests are stamped with a fresh [`ReqId`] before they are sent; a reply
/// carries the id of the request it answers. Messages that are neither use
/// `0`.
pub trait NetworkMessage {
    /// Correlation id carried by this message.
    fn req_id(&self) -> ReqId;

    /// Stamp this message with `req_id`.
    fn set_req_id(&mut self, req_id: ReqId);
}

/// Default number of idle messages an arena keeps.
pub const DEFAULT_ARENA_CAPACITY: usize = 16;

/// Bounded free list of message instances owned by one session.
///
/// Inbound messages are decoded into instances fetched from the arena, and
/// handlers may hand consumed messages back with [`recycle`](Self::recycle).
/// The arena is cleared when its session is disposed.
///
/// # Examples
///
/// ```
/// use wirelink::message::MessageArena;
///
/// let mut arena: MessageArena<Vec<u8>> = MessageArena::with_capacity(1);
/// arena.recycle(vec![1, 2, 3]);
/// arena.recycle(vec![4]);
/// assert_eq!(arena.len(), 1);
/// assert_eq!(arena.fetch(), vec![1, 2, 3]);
/// assert!(arena.fetch().is_empty());
/// ```
#[derive(Debug)]
pub struct MessageArena<M> {
    free: Vec<M>,
    capacity: usize,
}

impl<M> Default for MessageArena<M> {
    fn default() -> Self { Self::with_capacity(DEFAULT_ARENA_CAPACITY) }
}

impl<M> MessageArena<M> {
    /// Create an arena that keeps at most `capacity` idle messages.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            free: Vec::new(),
            capacity,
        }
    }

    /// Number of idle messages held.
    #[must_use]
    pub fn len(&self) -> usize { self.free.len() }

    /// Returns true if no idle messages are held.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.free.is_empty() }

    /// Return `message` to the arena. Dropped if the arena is full.
    pub fn recycle(&mut self, message: M) {
        if self.free.len() < self.capacity {
            self.free.push(message);
        }
    }

    /// Drop every idle message.
    pub fn clear(&mut self) { self.free.clear(); }
}

impl<M: Default> MessageArena<M> {
    /// Take an idle message, or a default one if none is held.
    pub fn fetch(&mut self) -> M { self.free.pop().unwrap_or_default() }
}
