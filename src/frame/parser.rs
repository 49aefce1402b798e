//! Two-state parser extracting length-prefixed packets from a [`RingBuffer`].

use bytes::{Bytes, BytesMut};

use super::format::{MAX_BODY_U16, PrefixWidth};
use crate::{error::FramingError, ring_buffer::RingBuffer};

/// Position of the parser within the current frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParserState {
    /// Waiting for a complete length prefix.
    #[default]
    ReadingSize,
    /// Prefix consumed; waiting for the declared number of body bytes.
    ReadingBody,
}

/// Incremental decoder for `[prefix][body]` frames.
///
/// At most one decoded packet is held at a time. Once [`parse`](Self::parse)
/// reports a ready packet it keeps doing so, without consuming further input,
/// until the packet is taken with [`take_packet`](Self::take_packet).
///
/// A [`FramingError`] leaves the parser in an unspecified position; the
/// stream must be abandoned rather than resynchronised.
///
/// # Examples
///
/// ```
/// use wirelink::{
///     frame::{PacketParser, PrefixWidth},
///     ring_buffer::RingBuffer,
/// };
///
/// let mut buffer = RingBuffer::new();
/// buffer.write(&[3, 0, b'a', b'b', b'c']);
///
/// let mut parser = PacketParser::new(PrefixWidth::Two);
/// assert!(parser.parse(&mut buffer).expect("valid frame"));
/// assert_eq!(&parser.take_packet().expect("ready")[..], b"abc");
/// assert!(!parser.parse(&mut buffer).expect("no more input"));
/// ```
#[derive(Debug)]
pub struct PacketParser {
    width: PrefixWidth,
    state: ParserState,
    body_size: usize,
    body: BytesMut,
    ready: bool,
}

impl PacketParser {
    /// Create a parser for frames using `width`-byte length prefixes.
    #[must_use]
    pub fn new(width: PrefixWidth) -> Self {
        Self {
            width,
            state: ParserState::ReadingSize,
            body_size: 0,
            body: BytesMut::with_capacity(MAX_BODY_U16),
            ready: false,
        }
    }

    /// Prefix width this parser expects.
    #[must_use]
    pub fn width(&self) -> PrefixWidth { self.width }

    /// Current state of the frame state machine.
    #[must_use]
    pub fn state(&self) -> ParserState { self.state }

    /// Returns `true` while a decoded packet awaits [`take_packet`](Self::take_packet).
    #[must_use]
    pub fn is_ready(&self) -> bool { self.ready }

    /// Advance the state machine over the bytes buffered in `buffer`.
    ///
    /// Returns `Ok(true)` once a complete packet is ready and `Ok(false)` when
    /// more input is needed. Callers drain a receive by looping until this
    /// returns `Ok(false)`, taking the packet after each `Ok(true)`.
    ///
    /// # Errors
    /// Returns [`FramingError::InvalidSize`] when a prefix declares a body
    /// outside the bounds of the configured width. The prefix has been
    /// consumed, the body has not.
    pub fn parse(&mut self, buffer: &mut RingBuffer) -> Result<bool, FramingError> {
        if self.ready {
            return Ok(true);
        }
        loop {
            match self.state {
                ParserState::ReadingSize => {
                    let mut prefix = [0u8; 4];
                    if buffer.read_into(&mut prefix[..self.width.bytes()]).is_err() {
                        return Ok(false);
                    }
                    let size = self.width.read_len(prefix);
                    self.width.check_inbound(size)?;
                    self.body_size = size;
                    self.state = ParserState::ReadingBody;
                }
                ParserState::ReadingBody => {
                    self.body.clear();
                    if buffer.read_to(self.body_size, &mut self.body).is_err() {
                        return Ok(false);
                    }
                    self.ready = true;
                    self.state = ParserState::ReadingSize;
                    return Ok(true);
                }
            }
        }
    }

    /// Take the ready packet, clearing the ready flag.
    ///
    /// The decode buffer's allocation is reclaimed once the returned
    /// [`Bytes`] and all its clones are dropped.
    pub fn take_packet(&mut self) -> Option<Bytes> {
        if !self.ready {
            return None;
        }
        self.ready = false;
        Some(self.body.split().freeze())
    }
}
