//! Binary packet codec for the modlink daemon wire protocol.
//!
//! Every message on the socket is a fixed 8-byte header plus a payload of up
//! to 64 bytes:
//! - A 4-byte little-endian device UID for multiplexing
//! - A 1-byte total packet length (header included) for framing
//! - A 1-byte function ID
//! - A sequence/options byte correlating requests with responses
//! - A flags byte carrying the device-level error code
//!
//! No partial reads, no buffer management in user code.

pub mod error;
pub mod packet;
pub mod reader;
pub mod writer;

pub use error::{Result, WireError};
pub use packet::{
    decode_packet, resync, Packet, ERROR_CODE_INVALID_PARAMETER, ERROR_CODE_NOT_SUPPORTED,
    ERROR_CODE_OK, HEADER_SIZE, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE, MAX_SEQUENCE_NUMBER,
};
pub use reader::PacketReader;
pub use writer::PacketWriter;
