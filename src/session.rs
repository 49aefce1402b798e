//! Application-facing sessions and request/reply correlation.
//!
//! A [`Session`] wraps one channel registered with the network's service.
//! Outbound messages go through the packer into a reusable scratch buffer
//! and then to the channel. Inbound messages complete a pending call when
//! their [`ReqId`] matches one, and otherwise go to the [`Dispatcher`].

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll, ready},
};

use bytes::BytesMut;
use log::debug;
use tokio::{sync::oneshot, time::Instant};

use crate::{
    error::{NetError, Result},
    id::{ReqId, ReqIdAllocator, SessionId},
    message::{MessageArena, NetworkMessage},
    packer::{PackError, Packer},
    service::Service,
};

/// Per-connection state above a channel.
pub struct Session<M> {
    id: SessionId,
    remote: String,
    pending: HashMap<ReqId, oneshot::Sender<M>>,
    last_send: Instant,
    last_recv: Instant,
    arena: MessageArena<M>,
    scratch: BytesMut,
}

impl<M> fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("pending", &self.pending.len())
            .field("last_send", &self.last_send)
            .field("last_recv", &self.last_recv)
            .finish_non_exhaustive()
    }
}

impl<M> Session<M>
where
    M: NetworkMessage + Default,
{
    pub(crate) fn new(id: SessionId, remote: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            remote,
            pending: HashMap::new(),
            last_send: now,
            last_recv: now,
            arena: MessageArena::default(),
            scratch: BytesMut::new(),
        }
    }

    /// Identifier shared with the underlying channel.
    #[must_use]
    pub fn id(&self) -> SessionId { self.id }

    /// Peer address, or the dialled address for outbound sessions.
    #[must_use]
    pub fn remote(&self) -> &str { &self.remote }

    /// When a message was last handed to the channel.
    #[must_use]
    pub fn last_send(&self) -> Instant { self.last_send }

    /// When a message was last decoded from the channel.
    #[must_use]
    pub fn last_recv(&self) -> Instant { self.last_recv }

    /// Number of calls awaiting a reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize { self.pending.len() }

    /// Idle message instances held for reuse.
    #[must_use]
    pub fn arena(&self) -> &MessageArena<M> { &self.arena }

    /// Serialize `message` and queue it on the channel.
    pub(crate) fn send<P>(&mut self, service: &mut Service, packer: &P, message: &M) -> Result<()>
    where
        P: Packer<Message = M>,
    {
        self.scratch.clear();
        packer
            .serialize_into(message, &mut self.scratch)
            .map_err(NetError::Pack)?;
        service.send(self.id, &self.scratch)?;
        self.last_send = Instant::now();
        Ok(())
    }

    /// Stamp `message` with a fresh request id, send it, and return a future
    /// for the reply.
    ///
    /// A message that cannot be sent yields a future that resolves to `None`.
    pub(crate) fn call<P>(
        &mut self,
        service: &mut Service,
        packer: &P,
        req_ids: &mut ReqIdAllocator,
        mut message: M,
    ) -> ReplyFuture<M>
    where
        P: Packer<Message = M>,
    {
        let req_id = req_ids.next_id();
        message.set_req_id(req_id);
        if let Err(e) = self.send(service, packer, &message) {
            debug!("call not sent: session={}, req_id={req_id}, error={e}", self.id);
            return ReplyFuture::resolved();
        }
        self.arena.recycle(message);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(req_id, tx);
        ReplyFuture::new(rx)
    }

    /// Decode one packet.
    ///
    /// Returns `Ok(None)` when the message completed a pending call, or the
    /// message itself when it is unsolicited.
    pub(crate) fn receive<P>(&mut self, packer: &P, packet: &[u8]) -> Result<Option<M>, PackError>
    where
        P: Packer<Message = M>,
    {
        let instance = self.arena.fetch();
        let message = packer.deserialize(packet, instance)?;
        self.last_recv = Instant::now();
        let Some(reply) = self.pending.remove(&message.req_id()) else {
            return Ok(Some(message));
        };
        if let Err(message) = reply.send(message) {
            self.arena.recycle(message);
        }
        Ok(None)
    }

    /// Drop pending calls, resolving their futures to `None`, and clear the
    /// arena.
    pub(crate) fn dispose(&mut self) {
        self.pending.clear();
        self.arena.clear();
    }
}

/// Resolves to the reply of a call, or `None` if the session went away or
/// the request could not be sent.
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct ReplyFuture<M> {
    rx: Option<oneshot::Receiver<M>>,
}

impl<M> ReplyFuture<M> {
    fn new(rx: oneshot::Receiver<M>) -> Self { Self { rx: Some(rx) } }

    pub(crate) fn resolved() -> Self { Self { rx: None } }
}

impl<M> Future for ReplyFuture<M> {
    type Output = Option<M>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(None);
        };
        let reply = ready!(Pin::new(rx).poll(cx)).ok();
        self.rx = None;
        Poll::Ready(reply)
    }
}

/// A session and the network resources a dispatcher may use while handling
/// one message.
pub struct SessionContext<'a, P: Packer> {
    pub(crate) session: &'a mut Session<P::Message>,
    pub(crate) service: &'a mut Service,
    pub(crate) packer: &'a P,
    pub(crate) req_ids: &'a mut ReqIdAllocator,
}

impl<P: Packer> SessionContext<'_, P> {
    /// Identifier of the session the message arrived on.
    #[must_use]
    pub fn id(&self) -> SessionId { self.session.id() }

    /// Peer address of the session.
    #[must_use]
    pub fn remote(&self) -> &str { self.session.remote() }

    /// Send `message` on this session.
    ///
    /// # Errors
    /// Returns an error if the message cannot be packed or the channel
    /// rejects it.
    pub fn send(&mut self, message: &P::Message) -> Result<()> {
        self.session.send(self.service, self.packer, message)
    }

    /// Answer the request carrying `req_id` with `message`.
    ///
    /// # Errors
    /// As for [`send`](Self::send).
    pub fn reply(&mut self, req_id: ReqId, mut message: P::Message) -> Result<()> {
        message.set_req_id(req_id);
        let sent = self.send(&message);
        self.session.arena.recycle(message);
        sent
    }

    /// Issue a call on this session.
    pub fn call(&mut self, message: P::Message) -> ReplyFuture<P::Message> {
        self.session
            .call(self.service, self.packer, self.req_ids, message)
    }

    /// Hand a consumed message back for reuse by later decodes.
    pub fn recycle(&mut self, message: P::Message) { self.session.arena.recycle(message); }
}

/// Handles inbound messages that do not answer a pending call.
pub trait Dispatcher<P: Packer>: Send {
    /// Handle `message`, received on `ctx`'s session.
    fn dispatch(&mut self, ctx: &mut SessionContext<'_, P>, message: P::Message);
}

impl<P, F> Dispatcher<P> for F
where
    P: Packer,
    F: FnMut(&mut SessionContext<'_, P>, P::Message) + Send,
{
    fn dispatch(&mut self, ctx: &mut SessionContext<'_, P>, message: P::Message) {
        self(ctx, message);
    }
}
