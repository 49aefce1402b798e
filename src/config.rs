//! Construction-time configuration.
//!
//! [`NetworkConfig`] derives `Deserialize` so it can be embedded in an
//! application's own configuration file; every field has a default.

use std::net::SocketAddr;

use serde::Deserialize;

use crate::{frame::PrefixWidth, ring_buffer::DEFAULT_CHUNK_SIZE, service::BackoffConfig};

/// Transport realization and its listen settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Length-prefixed frames over TCP.
    Tcp {
        /// Width of the length prefix.
        #[serde(default)]
        prefix: PrefixWidth,
        /// Listen address; `None` for a dial-only network.
        #[serde(default)]
        bind: Option<SocketAddr>,
    },
    /// One binary message per packet over WebSocket.
    WebSocket {
        /// Listen prefixes such as `http://*:8080/game/`; empty for a
        /// dial-only network.
        #[serde(default)]
        prefixes: Vec<String>,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Tcp {
            prefix: PrefixWidth::default(),
            bind: None,
        }
    }
}

/// Settings for a [`Network`](crate::network::Network) and its service.
///
/// # Examples
///
/// ```
/// use wirelink::{config::NetworkConfig, frame::PrefixWidth};
///
/// let config = NetworkConfig::tcp(PrefixWidth::Four)
///     .bind("127.0.0.1:0".parse().expect("valid address"))
///     .max_send_buffered(1 << 20);
/// assert_eq!(config.max_send_buffered, Some(1 << 20));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Transport realization.
    pub transport: TransportConfig,
    /// Ring buffer chunk size for raw-socket channels.
    pub chunk_size: usize,
    /// Upper bound on bytes queued per channel; `None` leaves it unbounded.
    pub max_send_buffered: Option<usize>,
    /// Delay applied after a failed accept or upgrade.
    pub accept_backoff: BackoffConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_send_buffered: None,
            accept_backoff: BackoffConfig::default(),
        }
    }
}

impl NetworkConfig {
    /// Raw-socket configuration with the given prefix width, dial-only.
    #[must_use]
    pub fn tcp(prefix: PrefixWidth) -> Self {
        Self {
            transport: TransportConfig::Tcp { prefix, bind: None },
            ..Self::default()
        }
    }

    /// WebSocket configuration listening on `prefixes`.
    #[must_use]
    pub fn websocket<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transport: TransportConfig::WebSocket {
                prefixes: prefixes.into_iter().map(Into::into).collect(),
            },
            ..Self::default()
        }
    }

    /// Listen on `addr`. Ignored by WebSocket configurations.
    #[must_use]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        if let TransportConfig::Tcp { bind, .. } = &mut self.transport {
            *bind = Some(addr);
        }
        self
    }

    /// Cap the bytes each channel may queue for sending.
    #[must_use]
    pub fn max_send_buffered(mut self, limit: usize) -> Self {
        self.max_send_buffered = Some(limit);
        self
    }

    /// Use `chunk_size`-byte ring buffer chunks.
    ///
    /// # Panics
    /// Panics if `chunk_size` is zero.
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        self.chunk_size = chunk_size;
        self
    }
}
