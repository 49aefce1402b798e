//! Length prefix widths and their body-size bounds.
use std::fmt;

use bytes::BufMut;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::conversion::encode_prefix;
use crate::error::{FramingError, SizeError};

/// Smallest body a frame may declare, whatever the prefix width.
pub const MIN_BODY_SIZE: usize = 2;
/// Largest body a 2-byte prefix may declare.
pub const MAX_BODY_U16: usize = 65_535;
/// Largest body a 4-byte prefix may declare.
pub const MAX_BODY_U32: usize = 65_535 * 16;

/// Width of the little-endian length prefix preceding every raw-socket frame.
///
/// The width is fixed per service. The prefix encodes the body length only,
/// not its own bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PrefixWidth {
    /// 2-byte prefix, bodies of `2..=65_535` bytes.
    Two,
    /// 4-byte prefix, bodies of `2..=1_048_560` bytes.
    #[default]
    Four,
}

/// Error returned when converting an unsupported byte count into a
/// [`PrefixWidth`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("length prefix must be 2 or 4 bytes, got {0}")]
pub struct UnsupportedPrefixWidth(pub u8);

impl PrefixWidth {
    /// Number of bytes occupied by the prefix on the wire.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Two => 2,
            Self::Four => 4,
        }
    }

    /// Largest body this prefix width may carry.
    #[must_use]
    pub const fn max_body(self) -> usize {
        match self {
            Self::Two => MAX_BODY_U16,
            Self::Four => MAX_BODY_U32,
        }
    }

    /// Validate a body size decoded from an inbound prefix.
    ///
    /// # Errors
    /// Returns [`FramingError::InvalidSize`] if `size` lies outside
    /// `MIN_BODY_SIZE..=self.max_body()`.
    pub fn check_inbound(self, size: usize) -> Result<(), FramingError> {
        if (MIN_BODY_SIZE..=self.max_body()).contains(&size) {
            Ok(())
        } else {
            Err(FramingError::InvalidSize { size, width: self })
        }
    }

    /// Validate the size of an outbound body before anything is buffered.
    ///
    /// # Errors
    /// Returns [`SizeError::Outbound`] for bodies above the maximum and
    /// [`SizeError::Undersized`] for bodies the peer would reject as too small.
    pub fn check_outbound(self, size: usize) -> Result<(), SizeError> {
        if size > self.max_body() {
            return Err(SizeError::Outbound {
                size,
                max: self.max_body(),
            });
        }
        if size < MIN_BODY_SIZE {
            return Err(SizeError::Undersized {
                size,
                min: MIN_BODY_SIZE,
            });
        }
        Ok(())
    }

    /// Read the declared body size from the first [`bytes`](Self::bytes)
    /// bytes of `prefix`.
    #[must_use]
    pub fn read_len(self, prefix: [u8; 4]) -> usize {
        match self {
            Self::Two => usize::from(u16::from_le_bytes([prefix[0], prefix[1]])),
            Self::Four => usize::try_from(u32::from_le_bytes(prefix)).unwrap_or(usize::MAX),
        }
    }

    /// Validate `len` and append its prefix encoding to `dst`.
    ///
    /// # Errors
    /// Returns a [`SizeError`] if `len` is outside the bounds of this width.
    pub fn write_len(self, len: usize, dst: &mut impl BufMut) -> Result<(), SizeError> {
        self.check_outbound(len)?;
        let mut buf = [0u8; 4];
        let written = encode_prefix(len, self, &mut buf).map_err(|_| SizeError::Outbound {
            size: len,
            max: self.max_body(),
        })?;
        dst.put_slice(&buf[..written]);
        Ok(())
    }
}

impl TryFrom<u8> for PrefixWidth {
    type Error = UnsupportedPrefixWidth;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            other => Err(UnsupportedPrefixWidth(other)),
        }
    }
}

impl From<PrefixWidth> for u8 {
    fn from(width: PrefixWidth) -> Self {
        match width {
            PrefixWidth::Two => 2,
            PrefixWidth::Four => 4,
        }
    }
}

impl fmt::Display for PrefixWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-byte", self.bytes())
    }
}
