//! SSH-specific error types

use thiserror::Error;
use std::io;

/// libssh2 error codes we classify explicitly
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_KEX_FAILURE: i32 = -5;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// SSH connection error
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Host key rejected by the configured policy
    #[error("Host key verification failed: {0}")]
    HostKey(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Session was already closed
    #[error("Session closed")]
    Closed,

    /// Remote command failed
    #[error("Remote command failed with exit code {code}: {message}")]
    CommandFailed {
        /// Exit code of the failed command
        code: i32,
        /// Error message
        message: String
    },
}

impl TransportError {
    /// Classify a libssh2 error, prefixing the message with what we were doing
    pub fn from_ssh(context: &str, err: ssh2::Error) -> Self {
        let detail = format!("{}: {}", context, err.message());
        match err.code() {
            ssh2::ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => Self::Timeout,
            ssh2::ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED) => Self::Authentication(detail),
            ssh2::ErrorCode::Session(
                LIBSSH2_ERROR_SOCKET_SEND
                | LIBSSH2_ERROR_SOCKET_RECV
                | LIBSSH2_ERROR_SOCKET_DISCONNECT
                | LIBSSH2_ERROR_KEX_FAILURE,
            ) => Self::Connection(detail),
            _ => Self::Protocol(detail),
        }
    }
}

impl From<ssh2::Error> for TransportError {
    fn from(err: ssh2::Error) -> Self {
        Self::from_ssh("libssh2", err)
    }
}
