//! Accept loops for raw-socket and WebSocket listeners.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::warn;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, sleep},
};
use tokio_tungstenite::{
    MaybeTlsStream,
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
    },
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::backoff::BackoffConfig;
use crate::{
    channel::transport_config,
    event::{EventKind, EventSender},
};

/// Source of incoming connections consumed by [`accept_loop`].
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(crate) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

#[derive(Clone, Debug)]
pub(crate) struct AcceptLoopOptions {
    pub shutdown: CancellationToken,
    pub backoff: BackoffConfig,
}

/// Accept connections from `listener` until `shutdown` is cancelled, passing
/// each one to `on_accept`.
///
/// A failed accept does not end the loop: it is logged, then the loop sleeps
/// for the current back-off delay before listening again.
pub(crate) async fn accept_loop<L, H>(listener: Arc<L>, on_accept: H, options: AcceptLoopOptions)
where
    L: AcceptListener + 'static,
    H: Fn(TcpStream, SocketAddr) + Send + Sync,
{
    let AcceptLoopOptions { shutdown, backoff } = options;
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;
    while let Some(next_delay) =
        accept_iteration(&listener, &on_accept, &shutdown, &backoff, delay).await
    {
        delay = next_delay;
    }
}

async fn accept_iteration<L, H>(
    listener: &Arc<L>,
    on_accept: &H,
    shutdown: &CancellationToken,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration>
where
    L: AcceptListener + 'static,
    H: Fn(TcpStream, SocketAddr) + Send + Sync,
{
    select! {
        biased;

        () = shutdown.cancelled() => None,
        res = listener.accept() => Some(match res {
            Ok((stream, peer)) => {
                on_accept(stream, peer);
                backoff.initial_delay
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                select! {
                    biased;

                    () = shutdown.cancelled() => return None,
                    () = sleep(delay) => {}
                }
                backoff.next_delay(delay)
            }
        }),
    }
}

/// Accept handler for raw-socket listeners: post the stream to the loop.
pub(crate) fn post_tcp(events: EventSender) -> impl Fn(TcpStream, SocketAddr) + Send + Sync {
    move |stream, peer| {
        events.post(EventKind::AcceptedTcp { stream, peer });
    }
}

/// Accept handler for WebSocket listeners: upgrade each stream on its own
/// task so a slow handshake does not hold up the listener.
pub(crate) fn upgrade_ws(
    paths: Arc<[String]>,
    events: EventSender,
    tracker: TaskTracker,
    shutdown: CancellationToken,
) -> impl Fn(TcpStream, SocketAddr) + Send + Sync {
    move |stream, peer| {
        tracker.spawn(upgrade(
            stream,
            peer,
            Arc::clone(&paths),
            events.clone(),
            shutdown.clone(),
        ));
    }
}

async fn upgrade(
    stream: TcpStream,
    peer: SocketAddr,
    paths: Arc<[String]>,
    events: EventSender,
    shutdown: CancellationToken,
) {
    let route =
        move |request: &Request, response: Response| route_request(&paths, request, response);
    let stream = MaybeTlsStream::Plain(stream);
    let result = select! {
        biased;

        () = shutdown.cancelled() => return,
        res = accept_hdr_async_with_config(stream, route, Some(transport_config())) => res,
    };
    match result {
        Ok(stream) => {
            events.post(EventKind::AcceptedWs {
                stream: Box::new(stream),
                peer,
            });
        }
        Err(e) => warn!("websocket upgrade failed: peer={peer}, error={e}"),
    }
}

/// Accept the upgrade if the request path falls under one of `paths`.
#[allow(
    clippy::result_large_err,
    reason = "signature fixed by the tungstenite handshake callback"
)]
fn route_request(
    paths: &[String],
    request: &Request,
    response: Response,
) -> Result<Response, ErrorResponse> {
    let path = request.uri().path();
    if paths.iter().any(|prefix| path.starts_with(prefix.as_str())) {
        return Ok(response);
    }
    let mut error = ErrorResponse::new(Some(format!("no listener for {path}")));
    *error.status_mut() = StatusCode::NOT_FOUND;
    Err(error)
}
