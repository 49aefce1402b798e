//! Per-connection channels over a closed set of transports.
//!
//! A [`Channel`] owns its buffering and transport state machine and exposes
//! one contract regardless of transport: `start`, `send`, dispose, and
//! [`Notice`]s for complete packets and terminal errors. Channels are created
//! and owned by a [`Service`](crate::service::Service).

mod io;
mod tcp;
mod ws;

use std::fmt;

use bytes::Bytes;
use log::{info, warn};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
pub(crate) use self::{tcp::TcpIo, ws::WsWrite};
pub(crate) use self::{
    io::IoContext,
    tcp::{TcpChannel, TcpEvent},
    ws::{WsChannel, WsEvent, transport_config},
};
pub use self::ws::{MAX_MESSAGE_SIZE, WsStream};
use crate::{
    error::{ChannelError, NetError},
    event::Notice,
    frame::PrefixWidth,
    id::ChannelId,
    metrics::{self, Direction},
};

/// Which side opened the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelRole {
    /// Dialled by this process.
    Outbound,
    /// Accepted from a listener.
    Inbound,
}

/// Lifecycle of a channel. `Closed` is terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelState {
    /// Constructed; I/O not started.
    #[default]
    Idle,
    /// Outbound dial or handshake in progress.
    Connecting,
    /// Sending and receiving.
    Connected,
    /// Failed or disposed.
    Closed,
}

/// Transport realization of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Length-prefixed frames over TCP.
    Tcp(PrefixWidth),
    /// One binary WebSocket message per packet.
    WebSocket,
}

/// Settings applied to every channel of a service.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ChannelOptions {
    pub chunk_size: usize,
    pub max_send_buffered: Option<usize>,
}

#[derive(Debug)]
enum Transport {
    Tcp(TcpChannel),
    Ws(WsChannel),
}

/// One connection endpoint.
pub struct Channel {
    id: ChannelId,
    role: ChannelRole,
    remote: String,
    state: ChannelState,
    error: Option<ChannelError>,
    transport: Transport,
    options: ChannelOptions,
    io: IoContext,
    shutdown: CancellationToken,
    packets: Vec<Bytes>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("remote", &self.remote)
            .field("state", &self.state)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Channel {
    fn new(
        id: ChannelId,
        role: ChannelRole,
        remote: String,
        transport: Transport,
        options: ChannelOptions,
        io: IoContext,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            role,
            remote,
            state: ChannelState::Idle,
            error: None,
            transport,
            options,
            io,
            shutdown,
            packets: Vec::new(),
        }
    }

    pub(crate) fn outbound(
        id: ChannelId,
        kind: TransportKind,
        address: String,
        options: ChannelOptions,
        io: IoContext,
        shutdown: CancellationToken,
    ) -> Self {
        let transport = match kind {
            TransportKind::Tcp(width) => Transport::Tcp(TcpChannel::outbound(
                address.clone(),
                width,
                options.chunk_size,
            )),
            TransportKind::WebSocket => Transport::Ws(WsChannel::outbound(address.clone())),
        };
        Self::new(id, ChannelRole::Outbound, address, transport, options, io, shutdown)
    }

    pub(crate) fn inbound_tcp(
        id: ChannelId,
        stream: TcpStream,
        remote: String,
        width: PrefixWidth,
        options: ChannelOptions,
        io: IoContext,
        shutdown: CancellationToken,
    ) -> Self {
        let transport = Transport::Tcp(TcpChannel::inbound(stream, width, options.chunk_size));
        Self::new(id, ChannelRole::Inbound, remote, transport, options, io, shutdown)
    }

    pub(crate) fn inbound_ws(
        id: ChannelId,
        stream: WsStream,
        remote: String,
        options: ChannelOptions,
        io: IoContext,
        shutdown: CancellationToken,
    ) -> Self {
        let transport = Transport::Ws(WsChannel::inbound(stream));
        Self::new(id, ChannelRole::Inbound, remote, transport, options, io, shutdown)
    }

    /// Identifier assigned at construction.
    #[must_use]
    pub fn id(&self) -> ChannelId { self.id }

    /// Whether this side dialled or accepted the connection.
    #[must_use]
    pub fn role(&self) -> ChannelRole { self.role }

    /// Peer address, or the dialled address or URL for outbound channels.
    #[must_use]
    pub fn remote(&self) -> &str { &self.remote }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState { self.state }

    /// The error that closed the channel, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ChannelError> { self.error.as_ref() }

    /// Transport realization in use.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match &self.transport {
            Transport::Tcp(tcp) => TransportKind::Tcp(tcp.width()),
            Transport::Ws(_) => TransportKind::WebSocket,
        }
    }

    /// Returns true while a send operation is in flight.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        match &self.transport {
            Transport::Tcp(tcp) => tcp.is_sending(),
            Transport::Ws(ws) => ws.is_sending(),
        }
    }

    /// Returns true once the transport is connected and until it closes.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        match &self.transport {
            Transport::Tcp(tcp) => tcp.is_connected(),
            Transport::Ws(ws) => ws.is_connected(),
        }
    }

    /// Bytes queued locally and not yet handed to the transport.
    #[must_use]
    pub fn buffered(&self) -> usize {
        match &self.transport {
            Transport::Tcp(tcp) => tcp.buffered(),
            Transport::Ws(ws) => ws.buffered(),
        }
    }

    /// Begin I/O: the receive loop, preceded by the dial for outbound
    /// channels. Has no effect unless the channel is idle.
    pub(crate) fn start(&mut self) {
        if self.state != ChannelState::Idle {
            return;
        }
        let connected = match &mut self.transport {
            Transport::Tcp(tcp) => tcp.start(self.id, &self.io, &self.shutdown),
            Transport::Ws(ws) => ws.start(self.id, &self.io, &self.shutdown),
        };
        self.state = if connected {
            ChannelState::Connected
        } else {
            ChannelState::Connecting
        };
    }

    /// Queue one packet for sending.
    ///
    /// Raw-socket channels only buffer the frame; the owning service starts
    /// the write on its next pass. WebSocket channels pump immediately.
    ///
    /// # Errors
    /// Returns [`NetError::ChannelClosed`] if the channel is closed. A size
    /// violation fails the channel, raising its error notice, and is also
    /// returned as [`NetError::Channel`].
    pub(crate) fn send(&mut self, data: &[u8], notices: &mut Vec<Notice>) -> Result<(), NetError> {
        if self.state == ChannelState::Closed {
            return Err(NetError::ChannelClosed(self.id));
        }
        let limit = self.options.max_send_buffered;
        let result = match &mut self.transport {
            Transport::Tcp(tcp) => tcp.send(data, limit),
            Transport::Ws(ws) => ws.send(data, limit),
        };
        match result {
            Ok(()) => {
                metrics::inc_packets(Direction::Outbound);
                Ok(())
            }
            Err(e) => {
                let error = ChannelError::from(e);
                self.fail(error.clone(), notices);
                Err(error.into())
            }
        }
    }

    /// Start a raw-socket write if data is buffered and none is in flight.
    pub(crate) fn start_send(&mut self) {
        if let Transport::Tcp(tcp) = &mut self.transport {
            tcp.start_send();
        }
    }

    pub(crate) fn handle_tcp(&mut self, event: TcpEvent, notices: &mut Vec<Notice>) {
        if self.state == ChannelState::Closed {
            return;
        }
        let Transport::Tcp(tcp) = &mut self.transport else { return };
        let connected = matches!(event, TcpEvent::Connected(_));
        let result = tcp.handle(event, self.id, &self.io, &self.shutdown, &mut self.packets);
        self.settle(connected, result, notices);
    }

    pub(crate) fn handle_ws(&mut self, event: WsEvent, notices: &mut Vec<Notice>) {
        if self.state == ChannelState::Closed {
            return;
        }
        let Transport::Ws(ws) = &mut self.transport else { return };
        let connected = matches!(event, WsEvent::Connected(_));
        let result = ws.handle(event, self.id, &self.io, &self.shutdown, &mut self.packets);
        self.settle(connected, result, notices);
    }

    /// Deliver packets completed by the last event, then any failure.
    fn settle(
        &mut self,
        connected: bool,
        result: Result<(), ChannelError>,
        notices: &mut Vec<Notice>,
    ) {
        if connected && result.is_ok() {
            self.state = ChannelState::Connected;
            info!("channel connected: channel={}, remote={}", self.id, self.remote);
        }
        for packet in self.packets.drain(..) {
            metrics::inc_packets(Direction::Inbound);
            notices.push(Notice::Read(self.id, packet));
        }
        if let Err(error) = result {
            self.fail(error, notices);
        }
    }

    /// Close the channel because of `error`, raising its single error notice.
    pub(crate) fn fail(&mut self, error: ChannelError, notices: &mut Vec<Notice>) {
        if self.state == ChannelState::Closed {
            return;
        }
        match &error {
            ChannelError::Framing(e) => tracing::error!(
                channel = %self.id,
                remote = %self.remote,
                error = %e,
                "framing violation, closing channel"
            ),
            e if e.is_peer_close() => {
                info!("peer closed channel: channel={}, remote={}", self.id, self.remote);
            }
            e => warn!(
                "channel failed: channel={}, remote={}, code={}, error={e}",
                self.id,
                self.remote,
                e.code()
            ),
        }
        metrics::inc_errors();
        self.close();
        self.error = Some(error.clone());
        notices.push(Notice::Error(self.id, error));
    }

    /// Release the transport without raising a notice. Idempotent.
    pub(crate) fn dispose(&mut self) { self.close(); }

    fn close(&mut self) {
        self.state = ChannelState::Closed;
        self.shutdown.cancel();
        match &mut self.transport {
            Transport::Tcp(tcp) => tcp.close(),
            Transport::Ws(ws) => ws.close(),
        }
    }

    #[cfg(test)]
    pub(crate) fn attach_tcp_io(&mut self, io: TcpIo) {
        if let Transport::Tcp(tcp) = &mut self.transport {
            self.state = ChannelState::Connected;
            tcp.attach_io(io);
        }
    }

    #[cfg(test)]
    pub(crate) fn attach_ws_writes(
        &mut self,
        writes: tokio::sync::mpsc::UnboundedSender<WsWrite>,
    ) {
        if let Transport::Ws(ws) = &mut self.transport {
            self.state = ChannelState::Connected;
            ws.attach_writes(writes);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) { self.shutdown.cancel(); }
}

#[cfg(test)]
mod tests;
