//! Error types for NETCONF framing and message handling

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed frame on the wire
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Message exceeds the configured size limit
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size
        size: usize,
        /// Maximum allowed size
        max: usize
    },

    /// Peer closed the stream in the middle of a message
    #[error("Stream closed")]
    StreamClosed,

    /// Message is not valid UTF-8
    #[error("Invalid UTF-8 in message: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// XML could not be parsed
    #[error("XML error: {0}")]
    Xml(String),

    /// Peer sent a message we did not expect
    #[error("Unexpected message: {0}")]
    Unexpected(String),

    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for ProtocolError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml(err.to_string())
    }
}
