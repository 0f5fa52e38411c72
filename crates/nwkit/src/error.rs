//! Error types for the nwkit library

use crate::config::ConfigError;
use nwkit_netconf::ProtocolError;
use nwkit_ssh::TransportError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for nwkit operations
#[derive(Debug, Error)]
pub enum NwError {
    /// Credentials were rejected
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Network or handshake failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// SSH-level failure after the connection was up
    #[error("SSH error: {0}")]
    Ssh(String),

    /// The managed device reported an error
    #[error("Device error: {0}")]
    Device(String),

    /// A caller-supplied argument is unusable
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Required fields were empty
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    /// A local file does not exist
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Message composition or delivery failed
    #[error("Email error: {0}")]
    Email(String),

    /// Timeout errors
    #[error("Operation timed out")]
    Timeout,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NwError {
    /// Whether the error is a credential rejection
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<TransportError> for NwError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connection(msg) => Self::Connection(msg),
            TransportError::Authentication(msg) => Self::Auth(msg),
            TransportError::HostKey(msg) => Self::Ssh(format!("host key rejected: {}", msg)),
            TransportError::Io(e) => Self::Io(e),
            TransportError::Timeout => Self::Timeout,
            TransportError::Protocol(msg) => Self::Ssh(msg),
            TransportError::Configuration(msg) => Self::InvalidArgument(msg),
            TransportError::Closed => Self::Ssh("session is closed".to_string()),
            TransportError::CommandFailed { code, message } => {
                Self::Ssh(format!("command exited with status {}: {}", code, message))
            }
        }
    }
}

impl From<ProtocolError> for NwError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => Self::Io(e),
            ProtocolError::StreamClosed => Self::Connection("NETCONF session closed by the device".to_string()),
            other => Self::Device(format!("NETCONF protocol error: {}", other)),
        }
    }
}

impl From<lettre::error::Error> for NwError {
    fn from(err: lettre::error::Error) -> Self {
        Self::Email(format!("message composition failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_names_every_field() {
        let err = NwError::MissingFields(vec!["from", "subject", "body"]);
        assert_eq!(err.to_string(), "Missing required fields: from, subject, body");
    }

    #[test]
    fn test_transport_error_mapping() {
        assert!(NwError::from(TransportError::Authentication("denied".into())).is_auth());
        assert!(matches!(
            NwError::from(TransportError::Connection("refused".into())),
            NwError::Connection(_)
        ));
        assert!(matches!(NwError::from(TransportError::Timeout), NwError::Timeout));
        assert!(matches!(
            NwError::from(TransportError::HostKey("changed".into())),
            NwError::Ssh(msg) if msg.contains("changed")
        ));
    }

    #[test]
    fn test_protocol_error_mapping() {
        assert!(matches!(NwError::from(ProtocolError::StreamClosed), NwError::Connection(_)));
        assert!(matches!(
            NwError::from(ProtocolError::InvalidFrame("bad".into())),
            NwError::Device(_)
        ));
    }
}
