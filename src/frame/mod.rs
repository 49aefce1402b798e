//! Length-prefixed framing for raw-socket channels.
//!
//! Every frame is `[prefix][body]`, where the prefix is a little-endian
//! unsigned body length of 2 or 4 bytes. [`PacketParser`] turns buffered
//! bytes back into packets; [`encode_frame`] produces the wire form.

pub mod conversion;
pub mod format;
pub mod parser;

use bytes::BufMut;
pub use conversion::{decode_prefix, encode_prefix};
pub use format::{MAX_BODY_U16, MAX_BODY_U32, MIN_BODY_SIZE, PrefixWidth, UnsupportedPrefixWidth};
pub use parser::{PacketParser, ParserState};

use crate::error::SizeError;

/// Append `body` with its length prefix to `dst`.
///
/// # Errors
/// Returns a [`SizeError`] and leaves `dst` untouched if `body` is outside
/// the bounds of `width`.
///
/// # Examples
///
/// ```
/// use wirelink::frame::{PrefixWidth, encode_frame};
///
/// let mut wire = Vec::new();
/// encode_frame(b"hi", PrefixWidth::Four, &mut wire).expect("valid body");
/// assert_eq!(wire, [2, 0, 0, 0, b'h', b'i']);
/// ```
pub fn encode_frame(body: &[u8], width: PrefixWidth, dst: &mut impl BufMut) -> Result<(), SizeError> {
    width.write_len(body.len(), dst)?;
    dst.put_slice(body);
    Ok(())
}

#[cfg(test)]
mod tests;
