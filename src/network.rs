//! Top-level session registry.
//!
//! A [`Network`] owns one [`Service`], the [`Session`]s wrapping its
//! channels, the packer and the dispatcher. It is driven by whoever owns it:
//! [`update`](Network::update) applies everything already posted,
//! [`tick`](Network::tick) waits for at least one completion, and
//! [`run_until`](Network::run_until) keeps driving until a future resolves.

use std::{collections::HashMap, future::Future, net::SocketAddr};

use log::{debug, info};
use tokio::select;

use crate::{
    channel::ChannelState,
    config::NetworkConfig,
    error::{ChannelError, Result},
    event::{Event, EventLoop, Notice},
    hooks::NetworkHooks,
    id::{ReqIdAllocator, SessionId},
    packer::Packer,
    service::Service,
    session::{Dispatcher, ReplyFuture, Session, SessionContext},
};

/// Registry of sessions over one transport endpoint.
///
/// # Examples
///
/// ```no_run
/// use wirelink::{
///     config::NetworkConfig,
///     event::EventLoop,
///     frame::PrefixWidth,
///     id::ReqId,
///     message::NetworkMessage,
///     network::Network,
///     packer::BincodePacker,
/// };
///
/// #[derive(bincode::Encode, bincode::Decode, Default)]
/// struct Echo {
///     req_id: ReqId,
///     text: String,
/// }
///
/// impl NetworkMessage for Echo {
///     fn req_id(&self) -> ReqId { self.req_id }
///     fn set_req_id(&mut self, req_id: ReqId) { self.req_id = req_id; }
/// }
///
/// # async fn run() -> wirelink::error::Result<()> {
/// let config = NetworkConfig::tcp(PrefixWidth::Four);
/// let mut network = Network::new(&config, BincodePacker::<Echo>::new(), EventLoop::new());
/// let session = network.create_session("127.0.0.1:10002")?;
/// let reply = network.call(session, Echo::default());
/// let reply = network.run_until(reply).await;
/// # let _ = reply;
/// # Ok(())
/// # }
/// ```
pub struct Network<P: Packer> {
    service: Service,
    sessions: HashMap<SessionId, Session<P::Message>>,
    packer: P,
    dispatcher: Option<Box<dyn Dispatcher<P>>>,
    events: EventLoop,
    req_ids: ReqIdAllocator,
    notices: Vec<Notice>,
    hooks: NetworkHooks,
}

impl<P: Packer> std::fmt::Debug for Network<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("service", &self.service)
            .field("sessions", &self.sessions.len())
            .field("dispatcher", &self.dispatcher.is_some())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl<P: Packer> Network<P> {
    /// Create a dial-only network.
    ///
    /// Completions are funnelled through `events`, which the network owns
    /// from now on.
    #[must_use]
    pub fn new(config: &NetworkConfig, packer: P, events: EventLoop) -> Self {
        let service = Service::new(config, events.sender());
        Self::with_service(service, packer, events)
    }

    /// Create a network and start the listeners named in `config`.
    ///
    /// # Errors
    /// Returns an error if a listener cannot be bound.
    pub async fn bind(config: &NetworkConfig, packer: P, events: EventLoop) -> Result<Self> {
        let service = Service::bind(config, events.sender()).await?;
        Ok(Self::with_service(service, packer, events))
    }

    fn with_service(service: Service, packer: P, events: EventLoop) -> Self {
        Self {
            service,
            sessions: HashMap::new(),
            packer,
            dispatcher: None,
            events,
            req_ids: ReqIdAllocator::default(),
            notices: Vec::new(),
            hooks: NetworkHooks::default(),
        }
    }

    /// Route unsolicited messages to `dispatcher`.
    pub fn set_dispatcher<D>(&mut self, dispatcher: D)
    where
        D: Dispatcher<P> + 'static,
    {
        self.dispatcher = Some(Box::new(dispatcher));
    }

    /// Route unsolicited messages to a closure.
    pub fn dispatch_with<F>(&mut self, dispatcher: F)
    where
        F: FnMut(&mut SessionContext<'_, P>, P::Message) + Send + 'static,
    {
        self.set_dispatcher(dispatcher);
    }

    /// Replace the accept and error notifications.
    pub fn set_hooks(&mut self, hooks: NetworkHooks) { self.hooks = hooks; }

    /// Mutable access to the accept and error notifications.
    pub fn hooks_mut(&mut self) -> &mut NetworkHooks { &mut self.hooks }

    /// The service owning this network's channels.
    #[must_use]
    pub fn service(&self) -> &Service { &self.service }

    /// Addresses the service's listeners are bound to.
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] { self.service.local_addrs() }

    /// Look up a session.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<&Session<P::Message>> { self.sessions.get(&id) }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize { self.sessions.len() }

    /// Dial `address` and register a session for it.
    ///
    /// The session exists as soon as this returns; a failed connect later
    /// arrives as an error notification and removes it.
    ///
    /// # Errors
    /// Returns [`NetError::InvalidAddress`](crate::error::NetError::InvalidAddress)
    /// if `address` does not fit the transport.
    pub fn create_session(&mut self, address: &str) -> Result<SessionId> {
        let id = self.service.connect_channel(address)?;
        self.sessions
            .insert(id, Session::new(id, address.to_owned()));
        self.service.start(id)?;
        Ok(id)
    }

    /// Remove a session and dispose its channel.
    ///
    /// Returns `false` if nothing was registered under `id`; removal is
    /// idempotent.
    pub fn remove_session(&mut self, id: SessionId) -> bool {
        let session = self.sessions.remove(&id);
        let channel = self.service.remove_channel(id);
        if let Some(mut session) = session {
            session.dispose();
            debug!("session removed: session={id}");
            return true;
        }
        channel
    }

    /// Send `message` on session `id`, doing nothing if it is gone.
    pub fn send(&mut self, id: SessionId, message: &P::Message) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if let Err(e) = session.send(&mut self.service, &self.packer, message) {
            debug!("send dropped: session={id}, error={e}");
        }
    }

    /// Issue a call on session `id`.
    ///
    /// The future resolves to `None` immediately if the session is gone.
    pub fn call(&mut self, id: SessionId, message: P::Message) -> ReplyFuture<P::Message> {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.call(&mut self.service, &self.packer, &mut self.req_ids, message)
            }
            None => ReplyFuture::resolved(),
        }
    }

    /// Apply every completion posted so far, then start pending sends.
    ///
    /// Never waits.
    pub fn update(&mut self) {
        self.drain_notices();
        while let Some(event) = self.events.try_next() {
            self.apply(event);
        }
        self.service.update();
    }

    /// Wait for at least one completion, then [`update`](Self::update).
    pub async fn tick(&mut self) {
        if let Some(event) = self.events.next().await {
            self.apply(event);
        }
        self.update();
    }

    /// Drive the network until `future` resolves.
    pub async fn run_until<F: Future>(&mut self, future: F) -> F::Output {
        tokio::pin!(future);
        loop {
            self.update();
            select! {
                biased;

                output = &mut future => return output,
                event = self.events.next() => {
                    if let Some(event) = event {
                        self.apply(event);
                    }
                }
            }
        }
    }

    /// Stop the listeners, dispose every channel and drop every session.
    pub fn dispose(&mut self) {
        self.service.dispose();
        for (_, mut session) in self.sessions.drain() {
            session.dispose();
        }
        self.notices.clear();
    }

    fn apply(&mut self, event: Event) {
        self.service.handle_event(event);
        self.drain_notices();
    }

    fn drain_notices(&mut self) {
        loop {
            self.service.take_notices(&mut self.notices);
            if self.notices.is_empty() {
                return;
            }
            let mut batch = std::mem::take(&mut self.notices);
            for notice in batch.drain(..) {
                self.handle_notice(notice);
            }
            self.notices = batch;
        }
    }

    fn handle_notice(&mut self, notice: Notice) {
        match notice {
            Notice::Accepted(id) => self.accepted(id),
            Notice::Read(id, packet) => self.read(id, &packet),
            Notice::Error(id, error) => self.errored(id, &error),
        }
    }

    fn accepted(&mut self, id: SessionId) {
        let Some(remote) = self.service.channel(id).map(|c| c.remote().to_owned()) else {
            return;
        };
        self.sessions.insert(id, Session::new(id, remote.clone()));
        self.hooks.on_accept(id, &remote);
        if let Err(e) = self.service.start(id) {
            debug!("accepted channel vanished before start: session={id}, error={e}");
        }
    }

    fn read(&mut self, id: SessionId, packet: &[u8]) {
        let open = self
            .service
            .channel(id)
            .is_some_and(|c| c.state() != ChannelState::Closed);
        let Some(session) = self.sessions.get_mut(&id).filter(|_| open) else {
            debug!("discarding packet for closed session {id}");
            return;
        };
        let message = match session.receive(&self.packer, packet) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(
                    session = %id,
                    remote = %session.remote(),
                    error = %e,
                    "failed to deserialize message, removing session"
                );
                self.service
                    .fail_channel(id, ChannelError::Protocol(e.to_string()));
                return;
            }
        };
        let Some(dispatcher) = self.dispatcher.as_mut() else {
            debug!("no dispatcher for unsolicited message: session={id}");
            return;
        };
        let mut ctx = SessionContext {
            session,
            service: &mut self.service,
            packer: &self.packer,
            req_ids: &mut self.req_ids,
        };
        dispatcher.dispatch(&mut ctx, message);
    }

    fn errored(&mut self, id: SessionId, error: &ChannelError) {
        info!("session error: session={id}, code={}, error={error}", error.code());
        self.hooks.on_error(id, error);
        self.remove_session(id);
    }
}

impl<P: Packer> Drop for Network<P> {
    fn drop(&mut self) { self.dispose(); }
}
