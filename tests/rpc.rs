//! Request/reply correlation between two networks over loopback TCP.

mod common;

use common::{STEP, TestMessage, TestNetwork, bind, dialer, drive, spawn_driver};
use rstest::rstest;
use tokio::{sync::mpsc, time::timeout};
use wirelink::{NetworkConfig, PrefixWidth, ReqId, SessionId};

const ECHO: u8 = 1;
const HOLD: u8 = 2;
const PUSH: u8 = 3;

/// Server that echoes `ECHO`, holds `HOLD` requests and answers them in
/// reverse once two are held, and answers `PUSH` with a message that matches
/// no pending call.
async fn server() -> (TestNetwork, mpsc::UnboundedReceiver<ReqId>) {
    let config = NetworkConfig::tcp(PrefixWidth::Four)
        .bind("127.0.0.1:0".parse().expect("valid address"));
    let mut network = bind(&config).await;
    let (req_ids, seen) = mpsc::unbounded_channel();
    let mut held: Vec<TestMessage> = Vec::new();
    network.dispatch_with(move |ctx, message: TestMessage| {
        let _ = req_ids.send(message.req_id);
        match message.kind {
            ECHO => {
                let req_id = message.req_id;
                ctx.reply(req_id, message).expect("reply");
            }
            HOLD => {
                held.push(message);
                if held.len() == 2 {
                    for request in held.drain(..).rev() {
                        ctx.reply(request.req_id, request).expect("reply");
                    }
                }
            }
            PUSH => {
                let mut push = TestMessage::new(PUSH, b"unsolicited".to_vec());
                push.req_id = ReqId::MAX;
                ctx.send(&push).expect("push");
            }
            other => panic!("unexpected kind {other}"),
        }
    });
    (network, seen)
}

async fn connected_client() -> (
    TestNetwork,
    SessionId,
    mpsc::UnboundedReceiver<ReqId>,
    tokio::task::JoinHandle<()>,
) {
    let (server, seen) = server().await;
    let addr = server.local_addrs()[0];
    let driver = spawn_driver(server);
    let mut client = dialer(&NetworkConfig::tcp(PrefixWidth::Four));
    let session = client.create_session(&addr.to_string()).expect("address");
    (client, session, seen, driver)
}

#[tokio::test]
async fn calls_carry_increasing_req_ids_and_resolve_with_their_reply() {
    let (mut client, session, mut seen, driver) = connected_client().await;

    for payload in [b"one".as_slice(), b"two", b"three"] {
        let reply = client.call(session, TestMessage::new(ECHO, payload.to_vec()));
        let reply = drive(&mut client, reply).await.expect("reply");
        assert_eq!(reply.payload, payload);
    }

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(timeout(STEP, seen.recv()).await.expect("seen").expect("open"));
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "req ids {ids:?}");
    assert_eq!(client.session(session).map(|s| s.pending_calls()), Some(0));

    driver.abort();
}

#[tokio::test]
async fn out_of_order_replies_resolve_the_matching_call() {
    let (mut client, session, _seen, driver) = connected_client().await;

    let first = client.call(session, TestMessage::new(HOLD, b"first".to_vec()));
    let second = client.call(session, TestMessage::new(HOLD, b"second".to_vec()));
    let (first, second) = drive(&mut client, async { tokio::join!(first, second) }).await;

    assert_eq!(first.expect("first reply").payload, b"first");
    assert_eq!(second.expect("second reply").payload, b"second");

    driver.abort();
}

#[tokio::test]
async fn unmatched_replies_reach_the_dispatcher() {
    let (mut client, session, _seen, driver) = connected_client().await;
    let (unsolicited_tx, mut unsolicited) = mpsc::unbounded_channel();
    client.dispatch_with(move |ctx, message: TestMessage| {
        let _ = unsolicited_tx.send((ctx.id(), message));
    });

    client.send(session, &TestMessage::new(PUSH, Vec::new()));
    let (on, message) = drive(&mut client, unsolicited.recv()).await.expect("dispatched");
    assert_eq!(on, session);
    assert_eq!(message.req_id, ReqId::MAX);
    assert_eq!(message.payload, b"unsolicited");

    driver.abort();
}

#[rstest]
#[case::once(1)]
#[case::twice(2)]
#[tokio::test]
async fn session_removal_is_idempotent(#[case] removals: usize) {
    let (mut client, session, _seen, driver) = connected_client().await;
    let pending = client.call(session, TestMessage::new(HOLD, b"never".to_vec()));

    assert!(client.remove_session(session));
    for _ in 1..removals {
        assert!(!client.remove_session(session));
    }
    assert_eq!(client.session_count(), 0);
    assert!(client.service().channel(session).is_none());
    assert_eq!(pending.await, None, "pending call resolves empty on removal");

    driver.abort();
}

#[tokio::test]
async fn calls_on_missing_sessions_resolve_empty() {
    let mut client = dialer(&NetworkConfig::tcp(PrefixWidth::Four));
    let session = client.create_session("127.0.0.1:9").expect("address");
    client.remove_session(session);

    let reply = client.call(session, TestMessage::new(ECHO, b"x".to_vec()));
    assert_eq!(timeout(STEP, reply).await.expect("immediate"), None);
    client.send(session, &TestMessage::new(ECHO, b"x".to_vec()));
}
