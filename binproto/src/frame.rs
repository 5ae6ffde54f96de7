//! Frame definition and wire (de)serialization for the packet transport.
//!
//! # Frame Format
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Start token 0xB5AD (LE)       |   Sync  |Proto|Type |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Payload length (LE)           |   Header checksum (LE) |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Payload (if length > 0) ...             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Payload checksum (LE, only if length > 0)             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The start token is never covered by either checksum. The header
//! checksum covers exactly the 4 bytes from `sync` through `length`; the
//! trailing checksum (present only when there is a payload) covers those
//! same 4 header bytes concatenated with the payload.

use crate::checksum::checksum16;
use crate::error::{Error, Result};

/// 16-bit start-of-frame token, little-endian on the wire as `AD B5`.
pub const START_TOKEN: u16 = 0xB5AD;

/// Size of the fixed header covered by the header checksum.
const HEADER_SIZE: usize = 4;

/// A decoded packet: the fields a caller needs to route and consume it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    pub protocol_id: u8,
    pub packet_type: u8,
    pub sync: u8,
    pub payload: Vec<u8>,
}

/// Builds a wire frame for `(protocol_id, packet_type, sync, payload)`.
///
/// `protocol_id` and `packet_type` are each nibbles (0..=15); callers that
/// pass a larger value are masked down silently, matching the original
/// packer's `& 0xF` behavior.
///
/// Fails with [`Error::PayloadOverflow`] if `payload.len()` exceeds
/// `max_block_size` — the frame is never built or written in that case.
pub fn build(
    protocol_id: u8,
    packet_type: u8,
    sync: u8,
    payload: &[u8],
    max_block_size: u32,
) -> Result<Vec<u8>> {
    if payload.len() as u32 > max_block_size {
        return Err(Error::PayloadOverflow);
    }

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.push(sync);
    header.push(((protocol_id & 0x0F) << 4) | (packet_type & 0x0F));
    header.extend_from_slice(&(payload.len() as u16).to_le_bytes());

    let mut buf = Vec::with_capacity(2 + HEADER_SIZE + 2 + payload.len() + 2);
    buf.extend_from_slice(&START_TOKEN.to_le_bytes());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(&checksum16(&header).to_le_bytes());

    if !payload.is_empty() {
        let mut covered = header;
        covered.extend_from_slice(payload);
        buf.extend_from_slice(payload);
        buf.extend_from_slice(&checksum16(&covered).to_le_bytes());
    }

    Ok(buf)
}

/// Parses and validates a wire frame produced by [`build`].
///
/// Used by tests exercising the build/parse round-trip law; the real
/// receive path never sees raw frame bytes — only ASCII response lines —
/// so this is not used by [`crate::transport::Transport`] at runtime.
pub fn parse(bytes: &[u8]) -> Result<ParsedPacket> {
    if bytes.len() < 2 + HEADER_SIZE + 2 {
        return Err(Error::Protocol("frame shorter than minimum header".into()));
    }
    let token = u16::from_le_bytes([bytes[0], bytes[1]]);
    if token != START_TOKEN {
        return Err(Error::Protocol("bad start token".into()));
    }

    let header = &bytes[2..2 + HEADER_SIZE];
    let hdr_csum_bytes = &bytes[2 + HEADER_SIZE..2 + HEADER_SIZE + 2];
    let hdr_csum = u16::from_le_bytes([hdr_csum_bytes[0], hdr_csum_bytes[1]]);
    if checksum16(header) != hdr_csum {
        return Err(Error::Protocol("header checksum mismatch".into()));
    }

    let sync = header[0];
    let protocol_id = header[1] >> 4;
    let packet_type = header[1] & 0x0F;
    let len = u16::from_le_bytes([header[2], header[3]]) as usize;

    if len == 0 {
        return Ok(ParsedPacket {
            protocol_id,
            packet_type,
            sync,
            payload: Vec::new(),
        });
    }

    let payload_start = 2 + HEADER_SIZE + 2;
    let payload_end = payload_start + len;
    if bytes.len() < payload_end + 2 {
        return Err(Error::Protocol("frame shorter than declared payload".into()));
    }
    let payload = &bytes[payload_start..payload_end];
    let trailer = &bytes[payload_end..payload_end + 2];
    let trailer_csum = u16::from_le_bytes([trailer[0], trailer[1]]);

    let mut covered = header.to_vec();
    covered.extend_from_slice(payload);
    if checksum16(&covered) != trailer_csum {
        return Err(Error::Protocol("payload checksum mismatch".into()));
    }

    Ok(ParsedPacket {
        protocol_id,
        packet_type,
        sync,
        payload: payload.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S1: literal golden vector from the spec.
    #[test]
    fn golden_empty_control_frame() {
        let frame = build(0, 1, 0, &[], 0).unwrap();
        let header = [0x00u8, 0x01, 0x00, 0x00];
        let csum = checksum16(&header).to_le_bytes();
        let mut expected = vec![0xAD, 0xB5];
        expected.extend_from_slice(&header);
        expected.extend_from_slice(&csum);
        assert_eq!(frame, expected);
    }

    #[test]
    fn roundtrip_with_payload() {
        let frame = build(3, 7, 42, b"hello", 1024).unwrap();
        let parsed = parse(&frame).unwrap();
        assert_eq!(parsed.protocol_id, 3);
        assert_eq!(parsed.packet_type, 7);
        assert_eq!(parsed.sync, 42);
        assert_eq!(parsed.payload, b"hello");
    }

    #[test]
    fn roundtrip_empty_payload() {
        let frame = build(1, 2, 5, &[], 16).unwrap();
        let parsed = parse(&frame).unwrap();
        assert_eq!(parsed.protocol_id, 1);
        assert_eq!(parsed.packet_type, 2);
        assert_eq!(parsed.sync, 5);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn overflow_rejected_before_any_bytes_are_produced() {
        let err = build(0, 0, 0, &[0u8; 10], 4).unwrap_err();
        assert!(matches!(err, Error::PayloadOverflow));
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut frame = build(0, 3, 0, b"abcdef", 64).unwrap();
        let last = frame.len() - 3;
        frame[last] ^= 0xAA;
        assert!(parse(&frame).is_err());
    }

    #[test]
    fn nibble_fields_are_masked() {
        let frame = build(0xFF, 0xFF, 0, &[], 0).unwrap();
        let parsed = parse(&frame).unwrap();
        assert_eq!(parsed.protocol_id, 0x0F);
        assert_eq!(parsed.packet_type, 0x0F);
    }
}
