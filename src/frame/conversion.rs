//! Little-endian encoding helpers for length prefixes.
use std::io;

use super::format::PrefixWidth;

pub(crate) const ERR_FRAME_TOO_LARGE: &str = "frame too large for length prefix";
pub(crate) const ERR_INCOMPLETE_PREFIX: &str = "incomplete length prefix";

fn prefix_bytes<const N: usize>(bytes: &[u8]) -> io::Result<[u8; N]> {
    bytes
        .get(..N)
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, ERR_INCOMPLETE_PREFIX))
}

/// Decode the body length stored in the first `width` bytes of `bytes`.
///
/// # Errors
/// Returns [`io::ErrorKind::UnexpectedEof`] if `bytes` is shorter than the
/// prefix.
pub fn decode_prefix(bytes: &[u8], width: PrefixWidth) -> io::Result<usize> {
    match width {
        PrefixWidth::Two => Ok(usize::from(u16::from_le_bytes(prefix_bytes(bytes)?))),
        PrefixWidth::Four => {
            let value = u32::from_le_bytes(prefix_bytes(bytes)?);
            usize::try_from(value)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, ERR_FRAME_TOO_LARGE))
        }
    }
}

/// Encode `len` into the front of `out`, returning the number of prefix bytes.
///
/// Bytes of `out` beyond the prefix are zeroed.
///
/// # Errors
/// Returns [`io::ErrorKind::InvalidInput`] if `len` does not fit the prefix
/// integer.
#[must_use = "length prefix byte count must be used"]
pub fn encode_prefix(len: usize, width: PrefixWidth, out: &mut [u8; 4]) -> io::Result<usize> {
    let too_large = |_| io::Error::new(io::ErrorKind::InvalidInput, ERR_FRAME_TOO_LARGE);
    match width {
        PrefixWidth::Two => {
            let value = u16::try_from(len).map_err(too_large)?;
            out[..2].copy_from_slice(&value.to_le_bytes());
            out[2..].fill(0);
            Ok(2)
        }
        PrefixWidth::Four => {
            let value = u32::try_from(len).map_err(too_large)?;
            out.copy_from_slice(&value.to_le_bytes());
            Ok(4)
        }
    }
}
