//! Unit tests for prefix helpers and the packet parser.

use std::io;

use proptest::prelude::*;
use rstest::rstest;

use super::{conversion::*, format::*, parser::*};
use crate::{error::FramingError, ring_buffer::RingBuffer};

#[rstest]
#[case(vec![0x34, 0x12], PrefixWidth::Two, 0x1234)]
#[case(vec![0xFF, 0xFF], PrefixWidth::Two, 0xFFFF)]
#[case(vec![1, 0, 0, 0], PrefixWidth::Four, 1)]
#[case(vec![0xF0, 0xFF, 0x0F, 0x00], PrefixWidth::Four, 1_048_560)]
#[case(vec![0x0A, 0, 0, 0, 0xEE], PrefixWidth::Four, 10)]
fn decode_prefix_reads_little_endian(
    #[case] bytes: Vec<u8>,
    #[case] width: PrefixWidth,
    #[case] expected: usize,
) {
    assert_eq!(
        decode_prefix(&bytes, width).expect("failed to decode prefix"),
        expected
    );
}

#[rstest]
#[case(vec![0x01], PrefixWidth::Two)]
#[case(vec![0x02, 0x03, 0x04], PrefixWidth::Four)]
fn decode_prefix_short(#[case] bytes: Vec<u8>, #[case] width: PrefixWidth) {
    let err = decode_prefix(&bytes, width).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
}

#[rstest]
#[case::two_ignores_trailing_bytes([0x34, 0x12, 0xEE, 0xEE], PrefixWidth::Two, 0x1234)]
#[case::two_max([0xFF, 0xFF, 0, 0], PrefixWidth::Two, 0xFFFF)]
#[case::four([0xF0, 0xFF, 0x0F, 0x00], PrefixWidth::Four, 1_048_560)]
fn read_len_uses_only_the_prefix_width(
    #[case] prefix: [u8; 4],
    #[case] width: PrefixWidth,
    #[case] expected: usize,
) {
    assert_eq!(width.read_len(prefix), expected);
}

#[rstest]
#[case(0x1234usize, PrefixWidth::Two, vec![0x34, 0x12])]
#[case(10usize, PrefixWidth::Four, vec![10, 0, 0, 0])]
fn encode_prefix_writes_little_endian(
    #[case] len: usize,
    #[case] width: PrefixWidth,
    #[case] expected: Vec<u8>,
) {
    let mut buf = [0xAAu8; 4];
    let written = encode_prefix(len, width, &mut buf).expect("failed to encode prefix");
    assert_eq!(&buf[..written], expected.as_slice());
    assert!(buf[written..].iter().all(|&b| b == 0));
}

#[test]
fn encode_prefix_rejects_overflow() {
    let mut buf = [0u8; 4];
    let err = encode_prefix(70_000, PrefixWidth::Two, &mut buf).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}

#[rstest]
#[case::two_min(PrefixWidth::Two, 2, true)]
#[case::two_max(PrefixWidth::Two, 65_535, true)]
#[case::two_below(PrefixWidth::Two, 1, false)]
#[case::four_min(PrefixWidth::Four, 2, true)]
#[case::four_max(PrefixWidth::Four, 1_048_560, true)]
#[case::four_below(PrefixWidth::Four, 1, false)]
#[case::four_above(PrefixWidth::Four, 1_048_561, false)]
fn inbound_bounds(#[case] width: PrefixWidth, #[case] size: usize, #[case] ok: bool) {
    assert_eq!(width.check_inbound(size).is_ok(), ok);
}

#[test]
fn prefix_width_from_byte_count() {
    assert_eq!(PrefixWidth::try_from(2), Ok(PrefixWidth::Two));
    assert_eq!(PrefixWidth::try_from(4), Ok(PrefixWidth::Four));
    assert_eq!(PrefixWidth::try_from(3), Err(UnsupportedPrefixWidth(3)));
}

fn framed(body: &[u8], width: PrefixWidth) -> Vec<u8> {
    let mut wire = Vec::new();
    super::encode_frame(body, width, &mut wire).expect("body within bounds");
    wire
}

#[rstest]
#[case::below_minimum(1u32)]
#[case::above_maximum(1_048_561u32)]
fn four_byte_prefix_out_of_bounds_is_rejected_before_body(#[case] declared: u32) {
    let mut buffer = RingBuffer::new();
    buffer.write(&declared.to_le_bytes());
    buffer.write(&[0xAB; 8]);
    let mut parser = PacketParser::new(PrefixWidth::Four);

    let err = parser.parse(&mut buffer).expect_err("prefix out of bounds");
    assert!(matches!(
        err,
        FramingError::InvalidSize { size, width: PrefixWidth::Four } if size == declared as usize
    ));
    assert_eq!(buffer.len(), 8, "no body bytes may be consumed");
}

#[test]
fn two_byte_prefix_below_minimum_is_rejected() {
    let mut buffer = RingBuffer::new();
    buffer.write(&[0, 0]);
    let mut parser = PacketParser::new(PrefixWidth::Two);
    assert!(parser.parse(&mut buffer).is_err());
}

#[test]
fn one_receive_may_carry_several_packets() {
    let mut buffer = RingBuffer::with_chunk_size(16);
    for body in [&b"first"[..], b"second", b"3rd"] {
        buffer.write(&framed(body, PrefixWidth::Two));
    }
    buffer.write(&[9, 0, b'p']);

    let mut parser = PacketParser::new(PrefixWidth::Two);
    let mut packets = Vec::new();
    while parser.parse(&mut buffer).expect("valid frames") {
        packets.push(parser.take_packet().expect("ready packet"));
    }
    assert_eq!(packets, [&b"first"[..], b"second", b"3rd"]);
    assert_eq!(parser.state(), ParserState::ReadingBody);
    assert_eq!(buffer.len(), 1);
}

#[test]
fn ready_packet_blocks_further_parsing() {
    let mut buffer = RingBuffer::new();
    buffer.write(&framed(b"aa", PrefixWidth::Four));
    buffer.write(&framed(b"bb", PrefixWidth::Four));
    let mut parser = PacketParser::new(PrefixWidth::Four);

    assert!(parser.parse(&mut buffer).expect("valid"));
    let remaining = buffer.len();
    assert!(parser.parse(&mut buffer).expect("still ready"));
    assert_eq!(buffer.len(), remaining, "a held packet stops consumption");

    assert_eq!(&parser.take_packet().expect("ready")[..], b"aa");
    assert!(parser.take_packet().is_none());
    assert!(parser.parse(&mut buffer).expect("valid"));
    assert_eq!(&parser.take_packet().expect("ready")[..], b"bb");
}

fn parse_in_pieces(wire: &[u8], pieces: &[usize], width: PrefixWidth) -> Vec<Vec<u8>> {
    let mut buffer = RingBuffer::with_chunk_size(64);
    let mut parser = PacketParser::new(width);
    let mut packets = Vec::new();
    let mut rest = wire;
    let mut sizes = pieces.iter().copied().cycle();
    while !rest.is_empty() {
        let n = sizes.next().unwrap_or(1).clamp(1, rest.len());
        buffer.write(&rest[..n]);
        rest = &rest[n..];
        while parser.parse(&mut buffer).expect("valid frame") {
            packets.push(parser.take_packet().expect("ready").to_vec());
        }
    }
    packets
}

#[rstest]
#[case::one_byte_at_a_time(vec![1])]
#[case::all_at_once(vec![usize::MAX])]
#[case::three_four_three(vec![3, 4, 3])]
fn framing_is_independent_of_chunking(#[case] pieces: Vec<usize>) {
    let body: Vec<u8> = (0u8..10).collect();
    let packets = parse_in_pieces(&framed(&body, PrefixWidth::Four), &pieces, PrefixWidth::Four);
    assert_eq!(packets, vec![body]);
}

proptest! {
    #[test]
    fn framing_round_trip_for_any_split(
        body in proptest::collection::vec(any::<u8>(), 2..600),
        pieces in proptest::collection::vec(1usize..50, 1..8),
    ) {
        let packets = parse_in_pieces(&framed(&body, PrefixWidth::Four), &pieces, PrefixWidth::Four);
        prop_assert_eq!(packets, vec![body]);
    }
}
