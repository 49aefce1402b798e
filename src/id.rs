//! Identifiers for channels, sessions and requests.
//!
//! Identifiers come from explicitly owned [`IdAllocator`]s rather than a
//! process-wide counter, so allocation is deterministic per owner.

use std::fmt;

/// Identifier assigned to a channel when it is constructed.
///
/// Identifiers from one allocator are strictly increasing and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u64);

/// A session shares the identifier of the channel it wraps.
pub type SessionId = ChannelId;

/// Correlation identifier carried by request and reply messages.
///
/// `0` marks a message that is not part of a call.
pub type ReqId = u32;

impl From<u64> for ChannelId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ChannelId {
    /// Create a [`ChannelId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(self) -> u64 { self.0 }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

/// Monotonic source of channel identifiers.
///
/// # Examples
///
/// ```
/// use wirelink::id::IdAllocator;
///
/// let mut ids = IdAllocator::default();
/// let first = ids.next_id();
/// assert!(ids.next_id() > first);
/// ```
#[derive(Debug)]
pub struct IdAllocator {
    next: u64,
}

impl Default for IdAllocator {
    fn default() -> Self { Self::starting_at(1) }
}

impl IdAllocator {
    /// Allocator whose first identifier is `first`.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self { Self { next: first } }

    /// Allocate the next channel identifier.
    pub fn next_id(&mut self) -> ChannelId {
        let id = self.next;
        self.next += 1;
        ChannelId(id)
    }
}

/// Monotonic source of request identifiers, skipping the reserved `0`.
#[derive(Debug, Default)]
pub struct ReqIdAllocator {
    last: ReqId,
}

impl ReqIdAllocator {
    /// Allocate the next request identifier.
    ///
    /// After `u32::MAX` the sequence wraps to `1`.
    pub fn next_id(&mut self) -> ReqId {
        self.last = self.last.checked_add(1).unwrap_or(1);
        self.last
    }

    /// Identifier most recently handed out, `0` if none.
    #[must_use]
    pub fn last(&self) -> ReqId { self.last }
}
