//! Metric helpers for `wirelink`.
//!
//! Thin wrappers over the [`metrics`](https://docs.rs/metrics) facade. With
//! the `metrics` feature disabled they compile to no-ops.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking registered channels.
pub const CHANNELS_ACTIVE: &str = "wirelink_channels_active";
/// Name of the counter tracking packets by direction.
pub const PACKETS_TOTAL: &str = "wirelink_packets_total";
/// Name of the counter tracking channel failures.
pub const CHANNEL_ERRORS_TOTAL: &str = "wirelink_channel_errors_total";

/// Direction of a packet.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Complete packet received from a peer.
    Inbound,
    /// Packet queued for a peer.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active channels gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CHANNELS_ACTIVE).increment(1.0);
}

/// Decrement the active channels gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CHANNELS_ACTIVE).decrement(1.0);
}

/// Record one packet in `direction`.
pub fn inc_packets(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(PACKETS_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a channel failure.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(CHANNEL_ERRORS_TOTAL).increment(1);
}
