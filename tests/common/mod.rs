//! Shared helpers for integration tests.
#![allow(dead_code, reason = "not every test binary uses every helper")]

use std::{future::Future, time::Duration};

use bincode::{Decode, Encode};
use tokio::{task::JoinHandle, time::timeout};
use wirelink::{
    BincodePacker,
    EventLoop,
    Network,
    NetworkConfig,
    NetworkMessage,
    ReqId,
};

/// Upper bound on how long any one exchange may take.
pub const STEP: Duration = Duration::from_secs(5);

/// Message type carried by every integration test.
#[derive(Encode, Decode, Default, Debug, Clone, PartialEq, Eq)]
pub struct TestMessage {
    pub req_id: ReqId,
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl TestMessage {
    pub fn new(kind: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            req_id: 0,
            kind,
            payload: payload.into(),
        }
    }
}

impl NetworkMessage for TestMessage {
    fn req_id(&self) -> ReqId { self.req_id }

    fn set_req_id(&mut self, req_id: ReqId) { self.req_id = req_id; }
}

pub type TestPacker = BincodePacker<TestMessage>;
pub type TestNetwork = Network<TestPacker>;

/// Build a network with listeners from `config`.
pub async fn bind(config: &NetworkConfig) -> TestNetwork {
    Network::bind(config, TestPacker::new(), EventLoop::new())
        .await
        .expect("failed to bind network")
}

/// Build a dial-only network.
pub fn dialer(config: &NetworkConfig) -> TestNetwork {
    Network::new(config, TestPacker::new(), EventLoop::new())
}

/// Drive `network` on its own task until the handle is aborted.
pub fn spawn_driver(mut network: TestNetwork) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            network.tick().await;
        }
    })
}

/// Drive `network` until `future` resolves, failing the test after [`STEP`].
pub async fn drive<F: Future>(network: &mut TestNetwork, future: F) -> F::Output {
    timeout(STEP, network.run_until(future))
        .await
        .expect("timed out driving network")
}
