/// Errors that can occur during packet encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The header declares a length that cannot be a valid packet.
    #[error("invalid packet length {declared} (must be {min}..={max})")]
    InvalidLength {
        declared: u8,
        min: u8,
        max: u8,
    },

    /// The payload exceeds the fixed protocol maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The sequence number does not fit the 5-bit wire field.
    #[error("sequence number {0} out of range (0..=31)")]
    SequenceOutOfRange(u8),

    /// An I/O error occurred while reading or writing packets.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, WireError>;
