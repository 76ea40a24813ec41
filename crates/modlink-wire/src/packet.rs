use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};

/// Packet header: uid (4) + length (1) + function (1) + seq/options (1) + flags (1).
pub const HEADER_SIZE: usize = 8;

/// Maximum payload size fixed by the protocol.
pub const MAX_PAYLOAD_SIZE: usize = 64;

/// Maximum total packet size (header + payload).
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// Largest sequence number the 5-bit wire field can carry.
/// Zero is reserved for fire-and-forget requests.
pub const MAX_SEQUENCE_NUMBER: u8 = 31;

/// Device-level error code: success.
pub const ERROR_CODE_OK: u8 = 0;
/// Device-level error code: a request parameter was rejected.
pub const ERROR_CODE_INVALID_PARAMETER: u8 = 1;
/// Device-level error code: the function ID is not supported.
pub const ERROR_CODE_NOT_SUPPORTED: u8 = 2;

/// A single wire message: request, response, or unsolicited callback.
///
/// The codec does not distinguish the three; a response mirrors the function
/// ID and sequence number of its request, and a callback carries sequence
/// number zero (or one that matches no outstanding request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Target or source device UID.
    pub uid: u32,
    /// Function or callback ID, device-specific.
    pub function_id: u8,
    /// Request/response correlation ID, 1..=31. Zero means no response expected.
    pub sequence_number: u8,
    /// Whether the sender expects a response.
    pub response_expected: bool,
    /// Device-level error code echoed in responses.
    pub error_code: u8,
    /// Function-specific payload, treated opaquely here.
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet, validating the fields against the wire limits.
    pub fn new(
        uid: u32,
        function_id: u8,
        sequence_number: u8,
        response_expected: bool,
        payload: impl Into<Bytes>,
    ) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WireError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if sequence_number > MAX_SEQUENCE_NUMBER {
            return Err(WireError::SequenceOutOfRange(sequence_number));
        }
        Ok(Self {
            uid,
            function_id,
            sequence_number,
            response_expected,
            error_code: ERROR_CODE_OK,
            payload,
        })
    }

    /// The total wire size of this packet (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode this packet into the wire format.
    ///
    /// Wire format (all integers little-endian):
    /// ```text
    /// ┌──────────┬─────────┬──────────┬─────────────┬─────────┬────────────────┐
    /// │ UID (4B) │ Len (1B)│ Func (1B)│ Seq/Opt (1B)│ Flg (1B)│ Payload        │
    /// └──────────┴─────────┴──────────┴─────────────┴─────────┴────────────────┘
    /// ```
    /// Seq/Opt: bits 3..=7 sequence number, bit 0 response-expected.
    /// Flg: bits 6..=7 error code.
    ///
    /// Never fails for a packet constructed through [`Packet::new`].
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_size());
        dst.put_u32_le(self.uid);
        dst.put_u8(self.wire_size() as u8);
        dst.put_u8(self.function_id);
        let mut seq_options = self.sequence_number << 3;
        if self.response_expected {
            seq_options |= 0x01;
        }
        dst.put_u8(seq_options);
        dst.put_u8(self.error_code << 6);
        dst.put_slice(&self.payload);
    }
}

/// Decode one packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// Returns `Err(WireError::InvalidLength)` if the declared length is
/// internally inconsistent; the caller should [`resync`] and retry.
/// On success, consumes the packet's bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut) -> Result<Option<Packet>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let declared = src[4];
    if (declared as usize) < HEADER_SIZE || declared as usize > MAX_PACKET_SIZE {
        return Err(WireError::InvalidLength {
            declared,
            min: HEADER_SIZE as u8,
            max: MAX_PACKET_SIZE as u8,
        });
    }

    let total = declared as usize;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    let uid = u32::from_le_bytes(src[0..4].try_into().expect("4-byte slice"));
    let function_id = src[5];
    let seq_options = src[6];
    let flags = src[7];

    src.advance(HEADER_SIZE);
    let payload = src.split_to(total - HEADER_SIZE).freeze();

    Ok(Some(Packet {
        uid,
        function_id,
        sequence_number: seq_options >> 3,
        response_expected: seq_options & 0x01 != 0,
        error_code: flags >> 6,
        payload,
    }))
}

/// Discard bytes up to the next position that could plausibly start a header.
///
/// Called after [`decode_packet`] reports an invalid length. The header has
/// no magic number, so plausibility means "the length byte at offset 4 is in
/// range". Always discards at least one byte. Returns how many were dropped.
pub fn resync(src: &mut BytesMut) -> usize {
    let mut dropped = 0;
    if !src.is_empty() {
        src.advance(1);
        dropped += 1;
    }
    while src.len() > 4 {
        let declared = src[4] as usize;
        if (HEADER_SIZE..=MAX_PACKET_SIZE).contains(&declared) {
            break;
        }
        src.advance(1);
        dropped += 1;
    }
    dropped
}
