//! # nwkit SSH Transport
//!
//! SSH sessions for nwkit: direct connections, sessions tunneled through a
//! jump host, and SCP file copy, all on libssh2.

#![warn(missing_docs)]

/// Transport abstraction and shared types
pub mod transport;

/// libssh2-backed connector and client
pub mod libssh2;

/// Host key verification
pub mod host_keys;

/// Loopback relay for tunneled sessions
pub mod relay;

/// SCP upload and download
pub mod scp;

/// Blocking work from async callers
pub mod blocking;

/// SSH-specific error types
pub mod error;

pub use transport::{
    CommandOutput, ConnectionInfo, SshClient, SshConfig, SshConnector, SshTarget, TransportType,
    DEFAULT_SSH_PORT,
};
pub use libssh2::{Libssh2Client, Libssh2Connector};
pub use host_keys::HostKeyPolicy;
pub use relay::ChannelRelay;
pub use blocking::run_blocking;
pub use error::TransportError;
