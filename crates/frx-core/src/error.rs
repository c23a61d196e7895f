use thiserror::Error;

/// Failures while parsing a packet preamble off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("short packet header: need {expected} bytes, got {actual}")]
    ShortHeader { expected: usize, actual: usize },

    #[error("unknown packet type {0:#04x}")]
    UnknownPacketType(u8),
}
