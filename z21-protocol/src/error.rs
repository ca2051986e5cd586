//! Error types for the Z21 LAN protocol.

use thiserror::Error;

/// Protocol-level errors that can occur while decoding or encoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame or payload is shorter than the command requires.
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Encoded frame would not fit the 16-bit length field.
    #[error("Frame too large: {0} bytes (max: 65535)")]
    FrameTooLarge(usize),

    /// LocoNet tunnel payload exceeds the relay limit.
    #[error("Tunnel payload too large: {len} bytes (max: {max})")]
    TunnelTooLarge { len: usize, max: usize },
}

impl ProtocolError {
    /// Shorthand for a payload that ran out at `actual` bytes.
    pub(crate) fn short(expected: usize, actual: usize) -> Self {
        ProtocolError::IncompleteFrame { expected, actual }
    }
}
