//! Channel registry for one transport endpoint.
//!
//! A [`Service`] owns every channel it dialled or accepted, the listeners
//! feeding it, and the pending-send worklist. It applies completions posted
//! by channel I/O tasks and queues the resulting [`Notice`]s for its owner.

mod accept;
mod backoff;

use std::{
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    sync::Arc,
};

use log::{debug, info};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::http::{Uri, uri::InvalidUri};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

pub use self::backoff::BackoffConfig;
use self::accept::{AcceptLoopOptions, accept_loop, post_tcp, upgrade_ws};
use crate::{
    channel::{Channel, ChannelOptions, IoContext, TransportKind},
    config::{NetworkConfig, TransportConfig},
    error::{ChannelError, NetError, Result},
    event::{Event, EventKind, EventSender, Notice},
    id::{ChannelId, IdAllocator},
    metrics,
};

/// Owner of the channels of one transport endpoint.
///
/// All methods must be called from the context that drives the event loop
/// the service posts into.
#[derive(Debug)]
pub struct Service {
    kind: TransportKind,
    options: ChannelOptions,
    listen: Listen,
    backoff: BackoffConfig,
    channels: HashMap<ChannelId, Channel>,
    pending_send: Vec<ChannelId>,
    ids: IdAllocator,
    io: IoContext,
    shutdown: CancellationToken,
    notices: Vec<Notice>,
    local_addrs: Vec<SocketAddr>,
}

#[derive(Debug)]
enum Listen {
    None,
    Tcp(SocketAddr),
    WebSocket(Vec<String>),
}

impl Service {
    /// Create a service that only dials out.
    ///
    /// Listen settings in `config` take effect through [`Service::bind`].
    #[must_use]
    pub fn new(config: &NetworkConfig, events: EventSender) -> Self {
        let (kind, listen) = match &config.transport {
            TransportConfig::Tcp { prefix, bind } => (
                TransportKind::Tcp(*prefix),
                bind.map_or(Listen::None, Listen::Tcp),
            ),
            TransportConfig::WebSocket { prefixes } if prefixes.is_empty() => {
                (TransportKind::WebSocket, Listen::None)
            }
            TransportConfig::WebSocket { prefixes } => {
                (TransportKind::WebSocket, Listen::WebSocket(prefixes.clone()))
            }
        };
        Self {
            kind,
            options: ChannelOptions {
                chunk_size: config.chunk_size.max(1),
                max_send_buffered: config.max_send_buffered,
            },
            listen,
            backoff: config.accept_backoff,
            channels: HashMap::new(),
            pending_send: Vec::new(),
            ids: IdAllocator::default(),
            io: IoContext::new(events, TaskTracker::new()),
            shutdown: CancellationToken::new(),
            notices: Vec::new(),
            local_addrs: Vec::new(),
        }
    }

    /// Create a service and start its listeners.
    ///
    /// # Errors
    /// Returns [`NetError::Bind`] if a listener cannot be bound and
    /// [`NetError::InvalidAddress`] for a malformed WebSocket prefix.
    pub async fn bind(config: &NetworkConfig, events: EventSender) -> Result<Self> {
        let mut service = Self::new(config, events);
        service.listen().await?;
        Ok(service)
    }

    async fn listen(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.listen, Listen::None) {
            Listen::None => Ok(()),
            Listen::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await.map_err(|source| NetError::Bind {
                    address: addr.to_string(),
                    source,
                })?;
                let handler = post_tcp(self.io.events.clone());
                self.spawn_listener(listener, handler)
            }
            Listen::WebSocket(prefixes) => {
                for ((host, port), paths) in group_prefixes(&prefixes)? {
                    let address = format!("{host}:{port}");
                    let listener = TcpListener::bind((host.as_str(), port))
                        .await
                        .map_err(|source| NetError::Bind { address, source })?;
                    let handler = upgrade_ws(
                        paths.into(),
                        self.io.events.clone(),
                        self.io.tracker.clone(),
                        self.shutdown.clone(),
                    );
                    self.spawn_listener(listener, handler)?;
                }
                Ok(())
            }
        }
    }

    fn spawn_listener<H>(&mut self, listener: TcpListener, handler: H) -> Result<()>
    where
        H: Fn(TcpStream, SocketAddr) + Send + Sync + 'static,
    {
        let local = listener.local_addr().map_err(|source| NetError::Bind {
            address: "listener".to_owned(),
            source,
        })?;
        info!("listening: kind={:?}, local_addr={local}", self.kind);
        self.local_addrs.push(local);
        self.io.spawn(accept_loop(
            Arc::new(listener),
            handler,
            AcceptLoopOptions {
                shutdown: self.shutdown.clone(),
                backoff: self.backoff,
            },
        ));
        Ok(())
    }

    /// Transport realization of every channel in this service.
    #[must_use]
    pub fn kind(&self) -> TransportKind { self.kind }

    /// Addresses the listeners are bound to.
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] { &self.local_addrs }

    /// Look up a registered channel.
    #[must_use]
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> { self.channels.get(&id) }

    /// Number of registered channels.
    #[must_use]
    pub fn channel_count(&self) -> usize { self.channels.len() }

    /// Register an outbound channel to `address` without starting any I/O.
    ///
    /// Raw-socket addresses are `host:port`; WebSocket addresses are `ws://`
    /// or `wss://` URLs.
    ///
    /// # Errors
    /// Returns [`NetError::InvalidAddress`] if `address` does not fit the
    /// transport.
    pub fn connect_channel(&mut self, address: &str) -> Result<ChannelId> {
        match self.kind {
            TransportKind::Tcp(_) => check_host_port(address)?,
            TransportKind::WebSocket => check_ws_url(address)?,
        }
        let id = self.ids.next_id();
        let channel = Channel::outbound(
            id,
            self.kind,
            address.to_owned(),
            self.options,
            self.io.clone(),
            self.shutdown.child_token(),
        );
        self.register(channel);
        Ok(id)
    }

    fn register(&mut self, channel: Channel) {
        metrics::inc_connections();
        self.channels.insert(channel.id(), channel);
    }

    /// Start I/O on a registered channel.
    ///
    /// # Errors
    /// Returns [`NetError::UnknownChannel`] if `id` is not registered.
    pub fn start(&mut self, id: ChannelId) -> Result<()> {
        let channel = self
            .channels
            .get_mut(&id)
            .ok_or(NetError::UnknownChannel(id))?;
        channel.start();
        Ok(())
    }

    /// Queue `data` as one packet on channel `id`.
    ///
    /// Raw-socket channels are marked for the next [`update`](Self::update)
    /// pass rather than written immediately.
    ///
    /// # Errors
    /// Returns [`NetError::UnknownChannel`], [`NetError::ChannelClosed`], or
    /// [`NetError::Channel`] for a size violation, which also fails the
    /// channel.
    pub fn send(&mut self, id: ChannelId, data: &[u8]) -> Result<()> {
        let channel = self
            .channels
            .get_mut(&id)
            .ok_or(NetError::UnknownChannel(id))?;
        channel.send(data, &mut self.notices)?;
        if matches!(self.kind, TransportKind::Tcp(_)) {
            self.pending_send.push(id);
        }
        Ok(())
    }

    /// Start one send on every distinct channel marked since the last pass,
    /// then clear the worklist.
    pub fn update(&mut self) {
        if self.pending_send.is_empty() {
            return;
        }
        self.pending_send.sort_unstable();
        self.pending_send.dedup();
        for id in self.pending_send.drain(..) {
            if let Some(channel) = self.channels.get_mut(&id) {
                if !channel.is_sending() {
                    channel.start_send();
                }
            }
        }
    }

    /// Fail channel `id` with `error`, raising its error notice.
    pub fn fail_channel(&mut self, id: ChannelId, error: ChannelError) {
        if let Some(channel) = self.channels.get_mut(&id) {
            channel.fail(error, &mut self.notices);
        }
    }

    /// Dispose and unregister channel `id`.
    ///
    /// Returns `false` if it was not registered, so each channel is disposed
    /// exactly once.
    pub fn remove_channel(&mut self, id: ChannelId) -> bool {
        let Some(mut channel) = self.channels.remove(&id) else {
            return false;
        };
        channel.dispose();
        self.pending_send.retain(|pending| *pending != id);
        metrics::dec_connections();
        debug!("channel removed: channel={id}, remote={}", channel.remote());
        true
    }

    /// Apply one completion from the event loop.
    ///
    /// Completions for channels that are no longer registered are discarded.
    pub fn handle_event(&mut self, event: Event) {
        match event.0 {
            EventKind::Tcp { channel, event } => match self.channels.get_mut(&channel) {
                Some(target) => target.handle_tcp(event, &mut self.notices),
                None => debug!("discarding completion for disposed channel {channel}"),
            },
            EventKind::Ws { channel, event } => match self.channels.get_mut(&channel) {
                Some(target) => target.handle_ws(event, &mut self.notices),
                None => debug!("discarding completion for disposed channel {channel}"),
            },
            EventKind::AcceptedTcp { stream, peer } => {
                let TransportKind::Tcp(width) = self.kind else { return };
                if self.shutdown.is_cancelled() {
                    return;
                }
                let id = self.ids.next_id();
                let channel = Channel::inbound_tcp(
                    id,
                    stream,
                    peer.to_string(),
                    width,
                    self.options,
                    self.io.clone(),
                    self.shutdown.child_token(),
                );
                self.accepted(channel);
            }
            EventKind::AcceptedWs { stream, peer } => {
                if self.shutdown.is_cancelled() {
                    return;
                }
                let id = self.ids.next_id();
                let channel = Channel::inbound_ws(
                    id,
                    *stream,
                    peer.to_string(),
                    self.options,
                    self.io.clone(),
                    self.shutdown.child_token(),
                );
                self.accepted(channel);
            }
        }
    }

    fn accepted(&mut self, channel: Channel) {
        let id = channel.id();
        tracing::info!(channel = %id, remote = %channel.remote(), "accepted connection");
        self.register(channel);
        self.notices.push(Notice::Accepted(id));
    }

    /// Move queued notices onto the end of `out`, in the order raised.
    pub fn take_notices(&mut self, out: &mut Vec<Notice>) { out.append(&mut self.notices); }

    /// Stop the listeners and dispose every channel.
    pub fn dispose(&mut self) {
        self.shutdown.cancel();
        for (_, mut channel) in self.channels.drain() {
            channel.dispose();
            metrics::dec_connections();
        }
        self.pending_send.clear();
        self.notices.clear();
        self.io.tracker.close();
    }

    /// Wait until every listener and I/O task has finished.
    ///
    /// Only completes after [`dispose`](Self::dispose).
    pub async fn wait(&self) { self.io.tracker.wait().await; }
}

impl Drop for Service {
    fn drop(&mut self) { self.shutdown.cancel(); }
}

fn invalid(address: &str, reason: impl Into<String>) -> NetError {
    NetError::InvalidAddress {
        address: address.to_owned(),
        reason: reason.into(),
    }
}

fn check_host_port(address: &str) -> Result<()> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid(address, "expected host:port"))?;
    if host.is_empty() {
        return Err(invalid(address, "missing host"));
    }
    port.parse::<u16>()
        .map_err(|_| invalid(address, "invalid port"))?;
    Ok(())
}

fn check_ws_url(address: &str) -> Result<()> {
    let uri: Uri = address
        .parse()
        .map_err(|e: InvalidUri| invalid(address, e.to_string()))?;
    match uri.scheme_str() {
        Some("ws" | "wss") => {}
        _ => return Err(invalid(address, "expected a ws:// or wss:// URL")),
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(invalid(address, "missing host"));
    }
    Ok(())
}

/// Group listen prefixes by the address they bind, collecting the paths each
/// listener accepts. A `*` or `+` host binds every interface.
fn group_prefixes(prefixes: &[String]) -> Result<BTreeMap<(String, u16), Vec<String>>> {
    let mut groups: BTreeMap<(String, u16), Vec<String>> = BTreeMap::new();
    for prefix in prefixes {
        let normalized = prefix
            .replacen("://*", "://0.0.0.0", 1)
            .replacen("://+", "://0.0.0.0", 1);
        let uri: Uri = normalized
            .parse()
            .map_err(|e: InvalidUri| invalid(prefix, e.to_string()))?;
        match uri.scheme_str() {
            Some("http" | "ws") => {}
            Some("https" | "wss") => {
                return Err(invalid(prefix, "TLS listeners are not supported"));
            }
            _ => return Err(invalid(prefix, "expected an http:// or ws:// prefix")),
        }
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid(prefix, "missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();
        let port = uri.port_u16().unwrap_or(80);
        groups
            .entry((host, port))
            .or_default()
            .push(uri.path().to_owned());
    }
    Ok(groups)
}
