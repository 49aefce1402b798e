//! The single-consumer event funnel.
//!
//! I/O tasks run on arbitrary runtime workers but never touch channel state.
//! They post [`Event`]s through an [`EventSender`]; whoever owns the
//! [`EventLoop`] applies them one at a time, so buffers, registries and
//! per-channel flags need no locks. Applying events produces [`Notice`]s for
//! the layer above.

use std::{fmt, net::SocketAddr};

use bytes::Bytes;
use tokio::{net::TcpStream, sync::mpsc};

use crate::{
    channel::{TcpEvent, WsEvent, WsStream},
    error::ChannelError,
    id::ChannelId,
};

/// A completion posted by an I/O task.
pub struct Event(pub(crate) EventKind);

pub(crate) enum EventKind {
    Tcp { channel: ChannelId, event: TcpEvent },
    Ws { channel: ChannelId, event: WsEvent },
    AcceptedTcp { stream: TcpStream, peer: SocketAddr },
    AcceptedWs { stream: Box<WsStream>, peer: SocketAddr },
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            EventKind::Tcp { channel, event } => f
                .debug_struct("Tcp")
                .field("channel", channel)
                .field("event", event)
                .finish(),
            EventKind::Ws { channel, event } => f
                .debug_struct("Ws")
                .field("channel", channel)
                .field("event", event)
                .finish(),
            EventKind::AcceptedTcp { peer, .. } => {
                f.debug_struct("AcceptedTcp").field("peer", peer).finish()
            }
            EventKind::AcceptedWs { peer, .. } => {
                f.debug_struct("AcceptedWs").field("peer", peer).finish()
            }
        }
    }
}

/// Outcome of applying events, consumed by the owner of the channels.
#[derive(Debug)]
pub enum Notice {
    /// An inbound connection was registered and awaits `start`.
    Accepted(ChannelId),
    /// One complete packet arrived, prefix stripped.
    Read(ChannelId, Bytes),
    /// The channel failed and is now closed. Raised at most once per channel.
    Error(ChannelId, ChannelError),
}

/// Cloneable handle I/O tasks use to post completions.
#[derive(Clone, Debug)]
pub struct EventSender(mpsc::UnboundedSender<Event>);

impl EventSender {
    /// Post an event; returns `false` once the loop has been dropped.
    pub(crate) fn post(&self, kind: EventKind) -> bool { self.0.send(Event(kind)).is_ok() }

    pub(crate) fn tcp(&self, channel: ChannelId, event: TcpEvent) -> bool {
        self.post(EventKind::Tcp { channel, event })
    }

    pub(crate) fn ws(&self, channel: ChannelId, event: WsEvent) -> bool {
        self.post(EventKind::Ws { channel, event })
    }
}

/// Ordered queue of completions with exactly one consumer.
///
/// Construct one per network and pass it in explicitly; there is no ambient
/// global loop.
///
/// # Examples
///
/// ```
/// use wirelink::event::EventLoop;
///
/// let mut events = EventLoop::new();
/// let _sender = events.sender();
/// assert!(events.try_next().is_none());
/// ```
#[derive(Debug)]
pub struct EventLoop {
    tx: EventSender,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Default for EventLoop {
    fn default() -> Self { Self::new() }
}

impl EventLoop {
    /// Create an empty loop.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: EventSender(tx),
            rx,
        }
    }

    /// Handle for posting events into this loop.
    #[must_use]
    pub fn sender(&self) -> EventSender { self.tx.clone() }

    /// Pop the next queued event without waiting.
    pub fn try_next(&mut self) -> Option<Event> { self.rx.try_recv().ok() }

    /// Wait for the next event.
    ///
    /// The loop holds a sender of its own, so this only returns `None` if
    /// the receiver has been closed.
    pub async fn next(&mut self) -> Option<Event> { self.rx.recv().await }
}
