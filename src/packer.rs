//! Message packing.
//!
//! A [`Packer`] turns application messages into packet bodies and back. It
//! never sees length prefixes or WebSocket framing. [`BincodePacker`] is the
//! default implementation.

use std::{error::Error, marker::PhantomData};

use bincode::{Decode, Encode, config};
use bytes::{BufMut, BytesMut};

use crate::message::NetworkMessage;

/// Error type returned across the packer boundary.
pub type PackError = Box<dyn Error + Send + Sync>;

/// Converts messages to and from packet bodies.
///
/// Raw-socket channels reject bodies shorter than
/// [`MIN_BODY_SIZE`](crate::frame::MIN_BODY_SIZE) bytes: such a send fails
/// the channel with [`SizeError::Undersized`](crate::SizeError::Undersized).
/// Encodings that can be a single byte, such as a bincode struct holding
/// only a small integer, need padding or an extra field.
pub trait Packer: Send + Sync + 'static {
    /// The application message type.
    type Message: NetworkMessage + Default + Send + 'static;

    /// Append the encoding of `message` to `dst`.
    ///
    /// The appended body must be at least
    /// [`MIN_BODY_SIZE`](crate::frame::MIN_BODY_SIZE) bytes long when sent
    /// over a raw-socket channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    fn serialize_into(&self, message: &Self::Message, dst: &mut BytesMut) -> Result<(), PackError>;

    /// Decode one packet body.
    ///
    /// `instance` comes from the session's
    /// [`MessageArena`](crate::message::MessageArena): a previously
    /// recycled message when one is held, else a default one. Implementations
    /// that overwrite its fields in place keep the allocations it owns.
    ///
    /// # Errors
    ///
    /// Returns an error if `src` is not exactly one valid message.
    fn deserialize(&self, src: &[u8], instance: Self::Message) -> Result<Self::Message, PackError>;
}

/// A packet decoded into a message but left bytes over.
#[derive(Debug, thiserror::Error)]
#[error("{trailing} trailing bytes after message")]
pub struct TrailingBytes {
    /// Number of unconsumed bytes.
    pub trailing: usize,
}

/// Packer using bincode's standard configuration.
///
/// Bincode builds each message from scratch, so the instance passed to
/// [`deserialize`](Packer::deserialize) is dropped rather than reused.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use wirelink::{
///     id::ReqId,
///     message::NetworkMessage,
///     packer::{BincodePacker, Packer},
/// };
///
/// #[derive(bincode::Encode, bincode::Decode, Default, Debug, PartialEq)]
/// struct Ping {
///     req_id: ReqId,
///     nonce: u64,
/// }
///
/// impl NetworkMessage for Ping {
///     fn req_id(&self) -> ReqId { self.req_id }
///     fn set_req_id(&mut self, req_id: ReqId) { self.req_id = req_id; }
/// }
///
/// let packer = BincodePacker::<Ping>::new();
/// let mut body = BytesMut::new();
/// let ping = Ping { req_id: 3, nonce: 42 };
/// packer.serialize_into(&ping, &mut body).expect("encode");
/// let decoded = packer.deserialize(&body, Ping::default()).expect("decode");
/// assert_eq!(decoded, ping);
/// ```
pub struct BincodePacker<M>(PhantomData<fn() -> M>);

impl<M> BincodePacker<M> {
    /// Create a packer for `M`.
    #[must_use]
    pub const fn new() -> Self { Self(PhantomData) }
}

impl<M> Default for BincodePacker<M> {
    fn default() -> Self { Self::new() }
}

impl<M> Clone for BincodePacker<M> {
    fn clone(&self) -> Self { *self }
}

impl<M> Copy for BincodePacker<M> {}

impl<M> std::fmt::Debug for BincodePacker<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BincodePacker")
    }
}

impl<M> Packer for BincodePacker<M>
where
    M: NetworkMessage + Encode + Decode<()> + Default + Send + 'static,
{
    type Message = M;

    fn serialize_into(&self, message: &M, dst: &mut BytesMut) -> Result<(), PackError> {
        let mut writer = (&mut *dst).writer();
        bincode::encode_into_std_write(message, &mut writer, config::standard())?;
        Ok(())
    }

    fn deserialize(&self, src: &[u8], _instance: M) -> Result<M, PackError> {
        let (message, read) = bincode::decode_from_slice(src, config::standard())?;
        if read != src.len() {
            return Err(Box::new(TrailingBytes {
                trailing: src.len() - read,
            }));
        }
        Ok(message)
    }
}
