#![doc(html_root_url = "https://docs.rs/wirelink/latest")]
//! Public API for the `wirelink` library.
//!
//! This crate turns TCP byte streams and WebSocket messages into discrete
//! packets, keeps many connections behind one single-consumer event loop,
//! and layers request/reply correlation on top.

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod hooks;
pub mod id;
pub mod message;
pub mod metrics;
pub mod network;
pub mod packer;
pub mod ring_buffer;
pub mod service;
pub mod session;

pub use channel::{Channel, ChannelRole, ChannelState, TransportKind};
pub use config::{NetworkConfig, TransportConfig};
pub use error::{ChannelError, FramingError, NetError, Result, SizeError};
pub use event::{EventLoop, EventSender, Notice};
pub use frame::{PacketParser, PrefixWidth};
pub use hooks::NetworkHooks;
pub use id::{ChannelId, ReqId, SessionId};
pub use message::{MessageArena, NetworkMessage};
pub use metrics::{CHANNEL_ERRORS_TOTAL, CHANNELS_ACTIVE, Direction, PACKETS_TOTAL};
pub use network::Network;
pub use packer::{BincodePacker, PackError, Packer};
pub use ring_buffer::RingBuffer;
pub use service::Service;
pub use session::{Dispatcher, ReplyFuture, Session, SessionContext};
