//! Raw-socket channel: length-prefixed frames over a TCP stream.
//!
//! Reads and writes are performed by two tasks owning the socket halves.
//! Each task performs exactly one operation per request and posts the
//! completion back through the event loop, so the ring buffers and the
//! `is_sending` flag are only ever touched by the loop's consumer.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::debug;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use super::io::IoContext;
use crate::{
    error::{ChannelError, SizeError},
    event::EventSender,
    frame::{PacketParser, PrefixWidth},
    id::ChannelId,
    ring_buffer::RingBuffer,
};

/// Completion posted by a raw-socket I/O task.
#[derive(Debug)]
pub(crate) enum TcpEvent {
    Connected(TcpStream),
    ConnectFailed(io::Error),
    /// Bytes from one read; empty when the peer closed the stream.
    Received(Bytes),
    ReceiveFailed(io::Error),
    SendComplete(usize),
    SendFailed(io::Error),
}

/// Request queues feeding the reader and writer tasks.
#[derive(Debug)]
pub(crate) struct TcpIo {
    pub writes: mpsc::UnboundedSender<Bytes>,
    pub reads: mpsc::UnboundedSender<usize>,
}

#[derive(Debug)]
pub(crate) struct TcpChannel {
    target: Option<String>,
    pending: Option<TcpStream>,
    width: PrefixWidth,
    recv: RingBuffer,
    send: RingBuffer,
    parser: PacketParser,
    is_sending: bool,
    connected: bool,
    io: Option<TcpIo>,
}

impl TcpChannel {
    fn with_parts(
        target: Option<String>,
        pending: Option<TcpStream>,
        width: PrefixWidth,
        chunk_size: usize,
    ) -> Self {
        Self {
            target,
            pending,
            width,
            recv: RingBuffer::with_chunk_size(chunk_size),
            send: RingBuffer::with_chunk_size(chunk_size),
            parser: PacketParser::new(width),
            is_sending: false,
            connected: false,
            io: None,
        }
    }

    pub fn outbound(target: String, width: PrefixWidth, chunk_size: usize) -> Self {
        Self::with_parts(Some(target), None, width, chunk_size)
    }

    pub fn inbound(stream: TcpStream, width: PrefixWidth, chunk_size: usize) -> Self {
        Self::with_parts(None, Some(stream), width, chunk_size)
    }

    pub fn width(&self) -> PrefixWidth { self.width }

    pub fn is_sending(&self) -> bool { self.is_sending }

    pub fn is_connected(&self) -> bool { self.connected }

    pub fn buffered(&self) -> usize { self.send.len() }

    /// Begin I/O. Outbound channels dial first; inbound ones attach at once.
    ///
    /// Returns `true` if the channel is connected on return.
    pub fn start(&mut self, id: ChannelId, io: &IoContext, shutdown: &CancellationToken) -> bool {
        if let Some(stream) = self.pending.take() {
            self.attach(stream, id, io, shutdown);
            return true;
        }
        if let Some(target) = self.target.take() {
            io.spawn(connect(id, target, io.events.clone(), shutdown.clone()));
        }
        false
    }

    fn attach(
        &mut self,
        stream: TcpStream,
        id: ChannelId,
        io: &IoContext,
        shutdown: &CancellationToken,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("failed to disable Nagle: channel={id}, error={e}");
        }
        let (reader, writer) = stream.into_split();
        let (writes, write_rx) = mpsc::unbounded_channel();
        let (reads, read_rx) = mpsc::unbounded_channel();
        io.spawn(read_loop(id, reader, read_rx, io.events.clone(), shutdown.clone()));
        io.spawn(write_loop(id, writer, write_rx, io.events.clone(), shutdown.clone()));
        self.attach_io(TcpIo { writes, reads });
    }

    /// Connect to already running I/O tasks, arm the first receive and flush
    /// anything queued before the connection came up.
    pub fn attach_io(&mut self, io: TcpIo) {
        self.io = Some(io);
        self.connected = true;
        self.arm_receive();
        self.start_send();
    }

    /// Append one frame to the send buffer.
    ///
    /// Nothing is buffered if the body or the resulting buffer size is out of
    /// bounds.
    pub fn send(&mut self, data: &[u8], limit: Option<usize>) -> Result<(), SizeError> {
        let mut prefix = [0u8; 4];
        let mut dst = &mut prefix[..];
        self.width.write_len(data.len(), &mut dst)?;
        let prefix = &prefix[..self.width.bytes()];
        if let Some(limit) = limit {
            let buffered = self.send.len() + prefix.len() + data.len();
            if buffered > limit {
                return Err(SizeError::SendBufferFull { buffered, limit });
            }
        }
        self.send.write(prefix);
        self.send.write(data);
        Ok(())
    }

    /// Hand the head chunk of the send buffer to the writer, unless a write
    /// is already in flight or nothing is buffered.
    pub fn start_send(&mut self) {
        if !self.connected || self.is_sending {
            return;
        }
        let Some(io) = &self.io else { return };
        if self.send.is_empty() {
            return;
        }
        let chunk = Bytes::copy_from_slice(self.send.chunk());
        self.is_sending = io.writes.send(chunk).is_ok();
    }

    fn arm_receive(&self) {
        if let Some(io) = &self.io {
            // A closed queue means the reader has stopped and posted why.
            let _ = io.reads.send(self.recv.tail_remaining());
        }
    }

    /// Apply a completion, appending every packet it completes to `packets`.
    pub fn handle(
        &mut self,
        event: TcpEvent,
        id: ChannelId,
        io: &IoContext,
        shutdown: &CancellationToken,
        packets: &mut Vec<Bytes>,
    ) -> Result<(), ChannelError> {
        match event {
            TcpEvent::Connected(stream) => {
                self.attach(stream, id, io, shutdown);
                Ok(())
            }
            TcpEvent::ConnectFailed(e) => Err(ChannelError::connect(e)),
            TcpEvent::Received(data) if data.is_empty() => Err(ChannelError::PeerClosed),
            TcpEvent::Received(data) => {
                self.recv.write(&data);
                while self.parser.parse(&mut self.recv)? {
                    if let Some(packet) = self.parser.take_packet() {
                        packets.push(packet);
                    }
                }
                self.arm_receive();
                Ok(())
            }
            TcpEvent::ReceiveFailed(e) | TcpEvent::SendFailed(e) => Err(ChannelError::transport(e)),
            TcpEvent::SendComplete(n) => {
                self.send.advance(n.min(self.send.remaining()));
                self.is_sending = false;
                self.start_send();
                Ok(())
            }
        }
    }

    /// Drop the request queues so both I/O tasks wind down.
    pub fn close(&mut self) {
        self.io = None;
        self.pending = None;
        self.connected = false;
        self.is_sending = false;
    }
}

async fn connect(id: ChannelId, target: String, events: EventSender, shutdown: CancellationToken) {
    let event = select! {
        biased;

        () = shutdown.cancelled() => return,
        res = TcpStream::connect(target.as_str()) => match res {
            Ok(stream) => TcpEvent::Connected(stream),
            Err(e) => TcpEvent::ConnectFailed(e),
        },
    };
    events.tcp(id, event);
}

/// Reads at most the requested byte count per arm into one buffer owned by
/// the task. Each read is split off and frozen; its allocation is reclaimed
/// by the next `reserve` once the loop's consumer has copied it into the
/// receive ring.
async fn read_loop(
    id: ChannelId,
    mut reader: OwnedReadHalf,
    mut arms: mpsc::UnboundedReceiver<usize>,
    events: EventSender,
    shutdown: CancellationToken,
) {
    let mut buf = BytesMut::new();
    loop {
        let want = select! {
            biased;

            () = shutdown.cancelled() => break,
            want = arms.recv() => match want {
                Some(want) => want.max(1),
                None => break,
            },
        };
        buf.reserve(want);
        let mut space = (&mut buf).limit(want);
        let event = select! {
            biased;

            () = shutdown.cancelled() => break,
            res = reader.read_buf(&mut space) => match res {
                Ok(_) => TcpEvent::Received(buf.split().freeze()),
                Err(e) => TcpEvent::ReceiveFailed(e),
            },
        };
        let more = matches!(&event, TcpEvent::Received(data) if !data.is_empty());
        if !events.tcp(id, event) || !more {
            break;
        }
    }
}

async fn write_loop(
    id: ChannelId,
    mut writer: OwnedWriteHalf,
    mut writes: mpsc::UnboundedReceiver<Bytes>,
    events: EventSender,
    shutdown: CancellationToken,
) {
    loop {
        let data = select! {
            biased;

            () = shutdown.cancelled() => break,
            data = writes.recv() => match data {
                Some(data) => data,
                None => break,
            },
        };
        let event = select! {
            biased;

            () = shutdown.cancelled() => break,
            res = writer.write(&data) => match res {
                Ok(0) => TcpEvent::SendFailed(io::ErrorKind::WriteZero.into()),
                Ok(n) => TcpEvent::SendComplete(n),
                Err(e) => TcpEvent::SendFailed(e),
            },
        };
        let failed = matches!(event, TcpEvent::SendFailed(_));
        if !events.tcp(id, event) || failed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::AsyncWriteExt,
        net::TcpListener,
        time::{Duration, timeout},
    };

    use super::*;
    use crate::event::{Event, EventKind, EventLoop};

    async fn next_read(events: &mut EventLoop) -> Bytes {
        let event = timeout(Duration::from_secs(5), events.next())
            .await
            .expect("read completion")
            .expect("loop open");
        match event {
            Event(EventKind::Tcp {
                event: TcpEvent::Received(data),
                ..
            }) => data,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn reader_honours_the_armed_size_and_reuses_its_buffer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let mut peer = TcpStream::connect(listener.local_addr().expect("addr"))
            .await
            .expect("connect");
        let (stream, _) = listener.accept().await.expect("accept");
        let (reader, _writer) = stream.into_split();

        let mut events = EventLoop::new();
        let (arms, arm_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(read_loop(
            ChannelId::new(1),
            reader,
            arm_rx,
            events.sender(),
            shutdown.clone(),
        ));

        peer.write_all(b"abcdefgh").await.expect("write");
        arms.send(5).expect("arm");
        let first = next_read(&mut events).await;
        assert_eq!(&first[..], b"abcde");
        let first_ptr = first.as_ptr();
        drop(first);

        arms.send(5).expect("arm");
        let second = next_read(&mut events).await;
        assert_eq!(&second[..], b"fgh");
        assert_eq!(second.as_ptr(), first_ptr, "allocation reclaimed");

        shutdown.cancel();
        task.await.expect("reader task");
    }
}
