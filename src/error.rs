//! Error taxonomy for framing, channels and the session registry.
//!
//! Errors on an established connection are fatal to that connection and are
//! reported once through its error notification as a [`ChannelError`].
//! Errors from construction-time and registry operations are returned
//! synchronously as [`NetError`].
//!
//! # Error Categories
//!
//! - [`FramingError`]: an inbound length prefix outside the configured bounds.
//! - [`SizeError`]: a payload or buffer exceeding a size limit.
//! - [`ChannelError`]: any terminal channel failure, with a stable numeric
//!   [`code`](ChannelError::code).
//! - [`NetError`]: synchronous failures returned to callers.

use std::{io, sync::Arc};

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::{frame::PrefixWidth, id::ChannelId, packer::PackError};

/// Packet parser rejected the stream or a packet could not be decoded.
pub const ERR_PACKET_PARSER: u32 = 100_005;
/// Outbound payload could not be queued for sending.
pub const ERR_SOCKET_CANT_SEND: u32 = 102_009;
/// Peer closed the connection in an orderly way.
pub const ERR_PEER_DISCONNECT: u32 = 102_008;
/// Socket-level failure without a more specific OS code.
pub const ERR_SOCKET_ERROR: u32 = 102_010;
/// Peer sent a WebSocket close frame.
pub const ERR_WEBSOCKET_PEER_RESET: u32 = 103_001;
/// Inbound WebSocket message exceeded the maximum size.
pub const ERR_WEBSOCKET_MESSAGE_TOO_BIG: u32 = 103_002;
/// WebSocket stream ended without a close frame.
pub const ERR_WEBSOCKET_ERROR: u32 = 103_003;
/// WebSocket dial or handshake failed.
pub const ERR_WEBSOCKET_CONNECT: u32 = 103_004;
/// WebSocket send failed.
pub const ERR_WEBSOCKET_SEND: u32 = 103_005;
/// WebSocket receive failed.
pub const ERR_WEBSOCKET_RECV: u32 = 103_006;

/// Wire-level framing violations.
///
/// Framing errors are never recovered from: once a prefix is out of bounds
/// the position of the next frame boundary cannot be trusted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// Length prefix declares a body outside the bounds of its width.
    #[error("invalid {width} length prefix: body size {size}")]
    InvalidSize {
        /// Declared body size.
        size: usize,
        /// Prefix width in use.
        width: PrefixWidth,
    },
}

/// Size limit violations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SizeError {
    /// Outbound body exceeds the maximum for the prefix width.
    #[error("outbound packet too large: {size} > {max}")]
    Outbound {
        /// Body size.
        size: usize,
        /// Maximum permitted body size.
        max: usize,
    },

    /// Outbound body is smaller than any peer would accept.
    #[error("outbound packet too small: {size} < {min}")]
    Undersized {
        /// Body size.
        size: usize,
        /// Minimum permitted body size.
        min: usize,
    },

    /// Send buffer would grow beyond the configured limit.
    #[error("send buffer full: {buffered} bytes buffered, limit {limit}")]
    SendBufferFull {
        /// Bytes that would be buffered after the write.
        buffered: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Inbound WebSocket message exceeds the maximum size.
    #[error("inbound message too large: {size} > {max}")]
    InboundMessage {
        /// Message size.
        size: usize,
        /// Maximum permitted message size.
        max: usize,
    },
}

/// Terminal failure of a channel.
///
/// Cloneable so the channel can keep its last error while the same value is
/// delivered through the error notification.
#[derive(Clone, Debug, Error)]
pub enum ChannelError {
    /// Socket-level I/O failure.
    #[error("transport error: {0}")]
    Transport(Arc<io::Error>),

    /// Peer closed the stream (zero-byte read).
    #[error("peer closed the connection")]
    PeerClosed,

    /// Inbound framing violation.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Inbound packet could not be deserialized.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Outbound TCP connect failed.
    #[error("connect failed: {0}")]
    Connect(Arc<io::Error>),

    /// Outbound WebSocket dial or handshake failed.
    #[error("websocket connect failed: {0}")]
    WebSocketConnect(Arc<tungstenite::Error>),

    /// Size limit exceeded.
    #[error("size error: {0}")]
    Size(#[from] SizeError),

    /// Peer sent a WebSocket close frame.
    #[error("websocket peer reset")]
    PeerReset,

    /// WebSocket stream ended without a close frame.
    #[error("websocket stream ended unexpectedly")]
    WebSocketEnded,

    /// Writing a WebSocket message failed.
    #[error("websocket send failed: {0}")]
    WebSocketSend(Arc<tungstenite::Error>),

    /// Reading a WebSocket message failed.
    #[error("websocket receive failed: {0}")]
    WebSocketReceive(Arc<tungstenite::Error>),
}

impl ChannelError {
    /// Stable numeric code identifying the failure.
    ///
    /// Socket failures carrying an OS error number report that number, which
    /// always lies below the library's own codes.
    ///
    /// # Examples
    ///
    /// ```
    /// use wirelink::error::{ChannelError, ERR_PEER_DISCONNECT};
    ///
    /// assert_eq!(ChannelError::PeerClosed.code(), ERR_PEER_DISCONNECT);
    /// ```
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::Transport(error) | Self::Connect(error) => os_code(error),
            Self::PeerClosed => ERR_PEER_DISCONNECT,
            Self::Framing(_) | Self::Protocol(_) => ERR_PACKET_PARSER,
            Self::WebSocketConnect(_) => ERR_WEBSOCKET_CONNECT,
            Self::Size(SizeError::InboundMessage { .. }) => ERR_WEBSOCKET_MESSAGE_TOO_BIG,
            Self::Size(_) => ERR_SOCKET_CANT_SEND,
            Self::PeerReset => ERR_WEBSOCKET_PEER_RESET,
            Self::WebSocketEnded => ERR_WEBSOCKET_ERROR,
            Self::WebSocketSend(_) => ERR_WEBSOCKET_SEND,
            Self::WebSocketReceive(_) => ERR_WEBSOCKET_RECV,
        }
    }

    /// Returns true if the peer ended the connection rather than it failing.
    #[must_use]
    pub fn is_peer_close(&self) -> bool { matches!(self, Self::PeerClosed | Self::PeerReset) }

    pub(crate) fn transport(error: io::Error) -> Self { Self::Transport(Arc::new(error)) }

    pub(crate) fn connect(error: io::Error) -> Self { Self::Connect(Arc::new(error)) }
}

fn os_code(error: &io::Error) -> u32 {
    error
        .raw_os_error()
        .and_then(|code| u32::try_from(code).ok())
        .filter(|&code| code != 0)
        .unwrap_or(ERR_SOCKET_ERROR)
}

/// Errors returned synchronously by services, sessions and the network.
#[derive(Debug, Error)]
pub enum NetError {
    /// A listener could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address that was requested.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An address or URL could not be interpreted.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        /// Address as supplied.
        address: String,
        /// What was wrong with it.
        reason: String,
    },

    /// No channel is registered under the identifier.
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    /// The channel has already failed or been closed.
    #[error("channel {0} is closed")]
    ChannelClosed(ChannelId),

    /// The channel rejected the operation and has failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A message could not be serialized.
    #[error("failed to serialize message: {0}")]
    Pack(#[source] PackError),
}

/// Result alias used by registry and construction APIs.
pub type Result<T, E = NetError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::peer_closed(ChannelError::PeerClosed, ERR_PEER_DISCONNECT)]
    #[case::peer_reset(ChannelError::PeerReset, ERR_WEBSOCKET_PEER_RESET)]
    #[case::framing(
        ChannelError::Framing(FramingError::InvalidSize { size: 1, width: PrefixWidth::Four }),
        ERR_PACKET_PARSER
    )]
    #[case::too_big(
        ChannelError::Size(SizeError::InboundMessage { size: 70_000, max: 65_535 }),
        ERR_WEBSOCKET_MESSAGE_TOO_BIG
    )]
    #[case::outbound(
        ChannelError::Size(SizeError::Outbound { size: 70_000, max: 65_535 }),
        ERR_SOCKET_CANT_SEND
    )]
    #[case::plain_io(ChannelError::transport(io::Error::other("boom")), ERR_SOCKET_ERROR)]
    fn error_codes(#[case] error: ChannelError, #[case] code: u32) {
        assert_eq!(error.code(), code);
    }

    #[test]
    fn os_errors_keep_their_number() {
        let error = ChannelError::connect(io::Error::from_raw_os_error(111));
        assert_eq!(error.code(), 111);
    }
}
