//! WebSocket channel: one binary message per packet.

use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use futures::{
    SinkExt,
    StreamExt,
    stream::{SplitSink, SplitStream},
};
use log::debug;
use tokio::{net::TcpStream, select, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream,
    WebSocketStream,
    connect_async_with_config,
    tungstenite::{
        self,
        Message,
        error::CapacityError,
        protocol::{CloseFrame, WebSocketConfig, frame::coding::CloseCode},
    },
};
use tokio_util::sync::CancellationToken;

use super::io::IoContext;
use crate::{
    error::{ChannelError, SizeError},
    event::EventSender,
    id::ChannelId,
};

/// Largest WebSocket message accepted or sent as a single packet.
pub const MAX_MESSAGE_SIZE: usize = 65_535;

/// WebSocket stream type used for both dialled and accepted connections.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Protocol settings for dialled and accepted connections.
///
/// Frames and messages are capped at [`MAX_MESSAGE_SIZE`], so an oversized
/// message is rejected from its frame header instead of being buffered.
pub(crate) fn transport_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_MESSAGE_SIZE);
    config
}

/// Completion posted by a WebSocket I/O task.
#[derive(Debug)]
pub(crate) enum WsEvent {
    Connected(Box<WsStream>),
    ConnectFailed(tungstenite::Error),
    Received(Bytes),
    TooLarge(usize),
    PeerReset,
    Ended,
    ReceiveFailed(tungstenite::Error),
    SendComplete,
    SendFailed(tungstenite::Error),
}

/// Request to the writer task.
#[derive(Debug)]
pub(crate) enum WsWrite {
    Binary(Bytes),
    Close(CloseFrame<'static>),
}

#[derive(Debug)]
pub(crate) struct WsChannel {
    url: Option<String>,
    pending: Option<WsStream>,
    queue: VecDeque<Bytes>,
    queued: usize,
    is_sending: bool,
    connected: bool,
    writes: Option<mpsc::UnboundedSender<WsWrite>>,
}

impl WsChannel {
    fn with_parts(url: Option<String>, pending: Option<WsStream>) -> Self {
        Self {
            url,
            pending,
            queue: VecDeque::new(),
            queued: 0,
            is_sending: false,
            connected: false,
            writes: None,
        }
    }

    pub fn outbound(url: String) -> Self { Self::with_parts(Some(url), None) }

    pub fn inbound(stream: WsStream) -> Self { Self::with_parts(None, Some(stream)) }

    pub fn is_sending(&self) -> bool { self.is_sending }

    pub fn is_connected(&self) -> bool { self.connected }

    pub fn buffered(&self) -> usize { self.queued }

    /// Begin I/O, returning `true` if the channel is connected on return.
    pub fn start(&mut self, id: ChannelId, io: &IoContext, shutdown: &CancellationToken) -> bool {
        if let Some(stream) = self.pending.take() {
            self.attach(stream, id, io, shutdown);
            return true;
        }
        if let Some(url) = self.url.take() {
            io.spawn(connect(id, url, io.events.clone(), shutdown.clone()));
        }
        false
    }

    fn attach(
        &mut self,
        stream: WsStream,
        id: ChannelId,
        io: &IoContext,
        shutdown: &CancellationToken,
    ) {
        let (sink, stream) = stream.split();
        let (writes, write_rx) = mpsc::unbounded_channel();
        io.spawn(read_loop(id, stream, io.events.clone(), shutdown.clone()));
        io.spawn(write_loop(id, sink, write_rx, io.events.clone()));
        self.attach_writes(writes);
    }

    /// Connect to a running writer and flush anything queued before the
    /// connection came up.
    pub fn attach_writes(&mut self, writes: mpsc::UnboundedSender<WsWrite>) {
        self.writes = Some(writes);
        self.connected = true;
        self.start_send();
    }

    /// Queue one message and pump the send loop.
    pub fn send(&mut self, data: &[u8], limit: Option<usize>) -> Result<(), SizeError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(SizeError::Outbound {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        if let Some(limit) = limit {
            let buffered = self.queued + data.len();
            if buffered > limit {
                return Err(SizeError::SendBufferFull { buffered, limit });
            }
        }
        self.queued += data.len();
        self.queue.push_back(Bytes::copy_from_slice(data));
        self.start_send();
        Ok(())
    }

    fn start_send(&mut self) {
        if !self.connected || self.is_sending {
            return;
        }
        let Some(writes) = &self.writes else { return };
        let Some(message) = self.queue.pop_front() else { return };
        self.queued -= message.len();
        self.is_sending = writes.send(WsWrite::Binary(message)).is_ok();
    }

    pub fn handle(
        &mut self,
        event: WsEvent,
        id: ChannelId,
        io: &IoContext,
        shutdown: &CancellationToken,
        packets: &mut Vec<Bytes>,
    ) -> Result<(), ChannelError> {
        match event {
            WsEvent::Connected(stream) => {
                self.attach(*stream, id, io, shutdown);
                Ok(())
            }
            WsEvent::ConnectFailed(e) => Err(ChannelError::WebSocketConnect(Arc::new(e))),
            WsEvent::Received(data) => {
                packets.push(data);
                Ok(())
            }
            WsEvent::TooLarge(size) => {
                self.close_with(CloseCode::Policy, "message too big");
                Err(SizeError::InboundMessage {
                    size,
                    max: MAX_MESSAGE_SIZE,
                }
                .into())
            }
            WsEvent::PeerReset => Err(ChannelError::PeerReset),
            WsEvent::Ended => Err(ChannelError::WebSocketEnded),
            WsEvent::ReceiveFailed(e) => Err(ChannelError::WebSocketReceive(Arc::new(e))),
            WsEvent::SendComplete => {
                self.is_sending = false;
                self.start_send();
                Ok(())
            }
            WsEvent::SendFailed(e) => Err(ChannelError::WebSocketSend(Arc::new(e))),
        }
    }

    /// Ask the writer to send a close frame, then release it.
    fn close_with(&mut self, code: CloseCode, reason: &'static str) {
        if let Some(writes) = self.writes.take() {
            let _ = writes.send(WsWrite::Close(CloseFrame {
                code,
                reason: reason.into(),
            }));
        }
    }

    pub fn close(&mut self) {
        self.writes = None;
        self.pending = None;
        self.queue.clear();
        self.queued = 0;
        self.connected = false;
        self.is_sending = false;
    }
}

async fn connect(id: ChannelId, url: String, events: EventSender, shutdown: CancellationToken) {
    let config = Some(transport_config());
    let event = select! {
        biased;

        () = shutdown.cancelled() => return,
        res = connect_async_with_config(url.as_str(), config, true) => match res {
            Ok((stream, _response)) => WsEvent::Connected(Box::new(stream)),
            Err(e) => WsEvent::ConnectFailed(e),
        },
    };
    events.ws(id, event);
}

fn inbound_payload(data: Vec<u8>) -> WsEvent {
    if data.len() > MAX_MESSAGE_SIZE {
        WsEvent::TooLarge(data.len())
    } else {
        WsEvent::Received(Bytes::from(data))
    }
}

/// Map one item of the read stream to a completion. Control frames the
/// protocol answers by itself yield `None`.
fn inbound_event(next: Option<Result<Message, tungstenite::Error>>) -> Option<WsEvent> {
    let event = match next {
        Some(Ok(Message::Binary(data))) => inbound_payload(data),
        Some(Ok(Message::Text(text))) => inbound_payload(text.into_bytes()),
        Some(Ok(Message::Close(_))) => WsEvent::PeerReset,
        Some(Ok(_)) => return None,
        Some(Err(tungstenite::Error::Capacity(CapacityError::MessageTooLong { size, .. }))) => {
            WsEvent::TooLarge(size)
        }
        Some(Err(e)) => WsEvent::ReceiveFailed(e),
        None => WsEvent::Ended,
    };
    Some(event)
}

async fn read_loop(
    id: ChannelId,
    mut stream: SplitStream<WsStream>,
    events: EventSender,
    shutdown: CancellationToken,
) {
    loop {
        let next = select! {
            biased;

            () = shutdown.cancelled() => break,
            next = stream.next() => next,
        };
        let Some(event) = inbound_event(next) else { continue };
        let more = matches!(event, WsEvent::Received(_));
        if !events.ws(id, event) || !more {
            break;
        }
    }
}

/// Writes one message per request. Ends once the request queue is dropped,
/// after a close frame, or on the first failure.
async fn write_loop(
    id: ChannelId,
    mut sink: SplitSink<WsStream, Message>,
    mut writes: mpsc::UnboundedReceiver<WsWrite>,
    events: EventSender,
) {
    while let Some(write) = writes.recv().await {
        match write {
            WsWrite::Binary(data) => {
                let event = match sink.send(Message::Binary(data.to_vec())).await {
                    Ok(()) => WsEvent::SendComplete,
                    Err(e) => WsEvent::SendFailed(e),
                };
                let failed = matches!(event, WsEvent::SendFailed(_));
                if !events.ws(id, event) || failed {
                    break;
                }
            }
            WsWrite::Close(frame) => {
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!("failed to send close frame: channel={id}, error={e}");
                }
                break;
            }
        }
    }
}
