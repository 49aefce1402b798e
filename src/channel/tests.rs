//! Channel state machine tests driven with injected I/O queues.

use bytes::Bytes;
use rstest::{fixture, rstest};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_test::traced_test;

use super::*;
use crate::{
    error::{ERR_WEBSOCKET_MESSAGE_TOO_BIG, FramingError, SizeError},
    event::EventLoop,
    frame::encode_frame,
};

struct Harness {
    channel: Channel,
    writes: mpsc::UnboundedReceiver<Bytes>,
    arms: mpsc::UnboundedReceiver<usize>,
    notices: Vec<Notice>,
}

fn harness(width: PrefixWidth, max_send_buffered: Option<usize>) -> Harness {
    let events = EventLoop::new();
    let io = IoContext::new(events.sender(), TaskTracker::new());
    let mut channel = Channel::outbound(
        ChannelId::new(7),
        TransportKind::Tcp(width),
        "127.0.0.1:10002".to_owned(),
        ChannelOptions {
            chunk_size: 64,
            max_send_buffered,
        },
        io,
        CancellationToken::new(),
    );
    let (writes, write_rx) = mpsc::unbounded_channel();
    let (reads, read_rx) = mpsc::unbounded_channel();
    channel.attach_tcp_io(TcpIo { writes, reads });
    Harness {
        channel,
        writes: write_rx,
        arms: read_rx,
        notices: Vec::new(),
    }
}

#[fixture]
fn connected() -> Harness { harness(PrefixWidth::Two, None) }

fn frame(body: &[u8], width: PrefixWidth) -> Vec<u8> {
    let mut wire = Vec::new();
    encode_frame(body, width, &mut wire).expect("valid body");
    wire
}

#[rstest]
fn sends_are_coalesced_behind_one_write(mut connected: Harness) {
    let h = &mut connected;
    h.channel.send(b"first", &mut h.notices).expect("send");
    h.channel.start_send();
    let first = h.writes.try_recv().expect("one write in flight");
    assert_eq!(&first[..], frame(b"first", PrefixWidth::Two));
    assert!(h.channel.is_sending());

    for body in [&b"two"[..], b"three", b"four"] {
        h.channel.send(body, &mut h.notices).expect("send");
        h.channel.start_send();
    }
    assert!(h.writes.try_recv().is_err(), "no second write while one is in flight");

    h.channel
        .handle_tcp(TcpEvent::SendComplete(first.len()), &mut h.notices);
    let second = h.writes.try_recv().expect("chained write");
    let expected: Vec<u8> = [&b"two"[..], b"three", b"four"]
        .iter()
        .flat_map(|body| frame(body, PrefixWidth::Two))
        .collect();
    assert_eq!(&second[..], expected.as_slice());
    assert!(h.writes.try_recv().is_err());

    h.channel
        .handle_tcp(TcpEvent::SendComplete(second.len()), &mut h.notices);
    assert!(!h.channel.is_sending());
    assert_eq!(h.channel.buffered(), 0);
    assert!(h.writes.try_recv().is_err());
    assert!(h.notices.is_empty());
}

#[rstest]
fn partial_write_resumes_at_transferred_offset(mut connected: Harness) {
    let h = &mut connected;
    h.channel.send(b"abcdef", &mut h.notices).expect("send");
    h.channel.start_send();
    let first = h.writes.try_recv().expect("write");
    h.channel.handle_tcp(TcpEvent::SendComplete(3), &mut h.notices);
    let rest = h.writes.try_recv().expect("remaining bytes");
    assert_eq!(&rest[..], &first[3..]);
}

#[rstest]
fn packet_is_delivered_only_when_complete() {
    let mut h = harness(PrefixWidth::Four, None);
    assert_eq!(h.arms.try_recv().expect("receive armed on attach"), 64);

    let body: Vec<u8> = (10u8..20).collect();
    let wire = frame(&body, PrefixWidth::Four);
    let (prefix, rest) = wire.split_at(4);
    h.channel
        .handle_tcp(TcpEvent::Received(Bytes::copy_from_slice(prefix)), &mut h.notices);
    for piece in [&rest[..3], &rest[3..7], &rest[7..]] {
        assert!(h.notices.is_empty(), "no notice before the frame completes");
        h.channel
            .handle_tcp(TcpEvent::Received(Bytes::copy_from_slice(piece)), &mut h.notices);
        assert!(h.arms.try_recv().is_ok(), "receive re-armed after each read");
    }

    assert_eq!(h.notices.len(), 1);
    assert!(matches!(
        &h.notices[0],
        Notice::Read(id, packet) if *id == ChannelId::new(7) && packet[..] == body[..]
    ));
}

#[rstest]
fn coalesced_receive_yields_packets_in_order(mut connected: Harness) {
    let h = &mut connected;
    let mut wire = frame(b"one", PrefixWidth::Two);
    wire.extend(frame(b"two", PrefixWidth::Two));
    wire.extend(frame(b"three", PrefixWidth::Two));
    h.channel
        .handle_tcp(TcpEvent::Received(Bytes::from(wire)), &mut h.notices);
    let packets: Vec<_> = h
        .notices
        .iter()
        .map(|notice| match notice {
            Notice::Read(_, packet) => packet.clone(),
            other => panic!("unexpected notice {other:?}"),
        })
        .collect();
    assert_eq!(packets, [&b"one"[..], b"two", b"three"]);
}

#[rstest]
fn framing_violation_fails_channel_once() {
    let mut h = harness(PrefixWidth::Four, None);
    h.channel.handle_tcp(
        TcpEvent::Received(Bytes::from_static(&[1, 0, 0, 0, 0xAA, 0xBB])),
        &mut h.notices,
    );
    assert_eq!(h.channel.state(), ChannelState::Closed);
    assert!(matches!(
        h.notices.as_slice(),
        [Notice::Error(_, ChannelError::Framing(FramingError::InvalidSize { size: 1, .. }))]
    ));

    h.channel
        .handle_tcp(TcpEvent::Received(Bytes::from_static(b"more")), &mut h.notices);
    h.channel.handle_tcp(
        TcpEvent::ReceiveFailed(std::io::Error::other("late")),
        &mut h.notices,
    );
    assert_eq!(h.notices.len(), 1, "errors after close are ignored");
}

#[test]
#[traced_test]
fn framing_violation_is_logged_with_remote() {
    let mut h = harness(PrefixWidth::Two, None);
    h.channel.handle_tcp(
        TcpEvent::Received(Bytes::from_static(&[0, 0])),
        &mut h.notices,
    );
    assert!(logs_contain("framing violation"));
    assert!(logs_contain("127.0.0.1:10002"));
}

#[rstest]
fn zero_byte_receive_is_peer_close(mut connected: Harness) {
    let h = &mut connected;
    h.channel
        .handle_tcp(TcpEvent::Received(Bytes::new()), &mut h.notices);
    assert!(matches!(h.notices.as_slice(), [Notice::Error(_, ChannelError::PeerClosed)]));
    assert!(matches!(h.channel.error(), Some(ChannelError::PeerClosed)));
}

#[rstest]
fn oversized_send_is_fatal_before_buffering(mut connected: Harness) {
    let h = &mut connected;
    let body = vec![0u8; 65_536];
    let err = h
        .channel
        .send(&body, &mut h.notices)
        .expect_err("body exceeds 2-byte maximum");
    assert!(matches!(
        err,
        NetError::Channel(ChannelError::Size(SizeError::Outbound { size: 65_536, max: 65_535 }))
    ));
    assert_eq!(h.channel.buffered(), 0);
    assert_eq!(h.channel.state(), ChannelState::Closed);
    assert_eq!(h.notices.len(), 1);

    let err = h
        .channel
        .send(b"ok", &mut h.notices)
        .expect_err("closed channel");
    assert!(matches!(err, NetError::ChannelClosed(id) if id == ChannelId::new(7)));
}

#[rstest]
fn send_buffer_limit_is_enforced() {
    let mut h = harness(PrefixWidth::Two, Some(10));
    h.channel.send(b"abcd", &mut h.notices).expect("6 bytes fit");
    let err = h
        .channel
        .send(b"abcd", &mut h.notices)
        .expect_err("12 bytes exceed the limit");
    assert!(matches!(
        err,
        NetError::Channel(ChannelError::Size(SizeError::SendBufferFull {
            buffered: 12,
            limit: 10
        }))
    ));
}

#[rstest]
fn dispose_is_silent_and_idempotent(mut connected: Harness) {
    let h = &mut connected;
    h.channel.dispose();
    h.channel.dispose();
    assert_eq!(h.channel.state(), ChannelState::Closed);
    assert!(h.notices.is_empty());
    assert!(h.channel.error().is_none());
}

struct WsHarness {
    channel: Channel,
    writes: mpsc::UnboundedReceiver<WsWrite>,
    notices: Vec<Notice>,
}

#[fixture]
fn ws_connected() -> WsHarness {
    let events = EventLoop::new();
    let io = IoContext::new(events.sender(), TaskTracker::new());
    let mut channel = Channel::outbound(
        ChannelId::new(8),
        TransportKind::WebSocket,
        "ws://127.0.0.1:10002/".to_owned(),
        ChannelOptions {
            chunk_size: 64,
            max_send_buffered: None,
        },
        io,
        CancellationToken::new(),
    );
    let (writes, write_rx) = mpsc::unbounded_channel();
    channel.attach_ws_writes(writes);
    WsHarness {
        channel,
        writes: write_rx,
        notices: Vec::new(),
    }
}

fn next_binary(writes: &mut mpsc::UnboundedReceiver<WsWrite>) -> Bytes {
    match writes.try_recv() {
        Ok(WsWrite::Binary(data)) => data,
        other => panic!("expected a binary write, got {other:?}"),
    }
}

#[rstest]
fn websocket_sends_go_out_one_at_a_time_in_order(mut ws_connected: WsHarness) {
    let h = &mut ws_connected;
    for body in [&b"one"[..], b"two", b"three"] {
        h.channel.send(body, &mut h.notices).expect("send");
    }
    let mut sent = vec![next_binary(&mut h.writes)];
    assert!(h.channel.is_sending());
    assert!(h.writes.try_recv().is_err(), "one message in flight");
    assert_eq!(h.channel.buffered(), 8);

    for _ in 0..2 {
        h.channel.handle_ws(WsEvent::SendComplete, &mut h.notices);
        sent.push(next_binary(&mut h.writes));
        assert!(h.writes.try_recv().is_err(), "one message in flight");
    }
    h.channel.handle_ws(WsEvent::SendComplete, &mut h.notices);

    assert_eq!(sent, [&b"one"[..], b"two", b"three"]);
    assert!(!h.channel.is_sending());
    assert_eq!(h.channel.buffered(), 0);
    assert!(h.notices.is_empty());
}

#[rstest]
fn oversized_websocket_message_closes_with_policy(mut ws_connected: WsHarness) {
    let h = &mut ws_connected;
    h.channel
        .handle_ws(WsEvent::TooLarge(17 * 1024 * 1024), &mut h.notices);

    assert!(matches!(
        h.writes.try_recv(),
        Ok(WsWrite::Close(frame)) if frame.code == CloseCode::Policy
    ));
    assert_eq!(h.channel.state(), ChannelState::Closed);
    assert!(matches!(
        h.notices.as_slice(),
        [Notice::Error(_, error)] if error.code() == ERR_WEBSOCKET_MESSAGE_TOO_BIG
    ));
}
