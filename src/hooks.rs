//! Application callbacks invoked by a [`Network`](crate::network::Network).
//!
//! [`NetworkHooks`] stores the optional accept and error notifications. Both
//! run on the context driving the network, after the registry has been
//! updated for accepts and before the session is removed for errors.

use crate::{error::ChannelError, id::SessionId};

/// Type alias for the `on_accept` callback.
type OnAcceptHook = Box<dyn FnMut(SessionId, &str) + Send + 'static>;

/// Type alias for the `on_error` callback.
type OnErrorHook = Box<dyn FnMut(SessionId, &ChannelError) + Send + 'static>;

/// Callbacks a network raises for connection lifecycle changes.
///
/// # Examples
///
/// ```
/// use wirelink::hooks::NetworkHooks;
///
/// let mut hooks = NetworkHooks::default();
/// hooks.on_error = Some(Box::new(|id, error: &wirelink::ChannelError| {
///     eprintln!("session {id} failed with code {}", error.code());
/// }));
/// ```
#[derive(Default)]
pub struct NetworkHooks {
    /// Invoked once per accepted connection with its session id and peer
    /// address.
    pub on_accept: Option<OnAcceptHook>,
    /// Invoked once per terminal channel failure.
    pub on_error: Option<OnErrorHook>,
}

impl std::fmt::Debug for NetworkHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkHooks")
            .field("on_accept", &self.on_accept.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl NetworkHooks {
    /// Run the `on_accept` hook if registered.
    pub fn on_accept(&mut self, id: SessionId, remote: &str) {
        if let Some(hook) = &mut self.on_accept {
            hook(id, remote);
        }
    }

    /// Run the `on_error` hook if registered.
    pub fn on_error(&mut self, id: SessionId, error: &ChannelError) {
        if let Some(hook) = &mut self.on_error {
            hook(id, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::id::ChannelId;

    #[test]
    fn unset_hooks_are_skipped() {
        let mut hooks = NetworkHooks::default();
        hooks.on_accept(ChannelId::new(1), "127.0.0.1:1");
        hooks.on_error(ChannelId::new(1), &ChannelError::PeerClosed);
    }

    #[test]
    fn registered_hooks_receive_arguments() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let accepts = Arc::clone(&seen);
        let errors = Arc::clone(&seen);
        let mut hooks = NetworkHooks {
            on_accept: Some(Box::new(move |id, remote: &str| {
                accepts.lock().expect("lock").push(format!("accept {id} {remote}"));
            })),
            on_error: Some(Box::new(move |id, error: &ChannelError| {
                errors.lock().expect("lock").push(format!("error {id} {}", error.code()));
            })),
        };
        hooks.on_accept(ChannelId::new(3), "10.0.0.1:9");
        hooks.on_error(ChannelId::new(3), &ChannelError::PeerClosed);
        assert_eq!(
            *seen.lock().expect("lock"),
            ["accept #3 10.0.0.1:9", "error #3 102008"]
        );
    }
}
