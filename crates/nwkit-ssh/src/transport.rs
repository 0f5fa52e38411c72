//! Transport abstraction: SSH targets, configuration and client traits

use async_trait::async_trait;
use crate::{HostKeyPolicy, TransportError};
use directories::BaseDirs;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Where to connect and how to authenticate
#[derive(Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Remote hostname or IP
    pub host: String,
    /// Remote port (default: 22)
    pub port: u16,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl SshTarget {
    /// Create a target on the default port
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Override the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `user@host:port`, for logs
    pub fn display_name(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// SSH configuration shared by every session a connector opens
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Command timeout in seconds; also bounds every blocking libssh2 call
    pub command_timeout: u64,
    /// How unknown or changed host keys are handled
    pub host_key_policy: HostKeyPolicy,
    /// known_hosts file consulted before accepting a key
    pub known_hosts_path: Option<PathBuf>,
    /// Write newly accepted keys back to `known_hosts_path`
    pub save_host_keys: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            command_timeout: 300,
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: default_known_hosts_path(),
            save_host_keys: false,
        }
    }
}

impl SshConfig {
    /// Connection timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Command timeout as a duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    /// Session timeout handed to libssh2, in milliseconds
    pub(crate) fn session_timeout_ms(&self) -> u32 {
        u32::try_from(self.command_timeout.saturating_mul(1000)).unwrap_or(u32::MAX)
    }
}

/// `~/.ssh/known_hosts` of the current user, if a home directory is known
pub fn default_known_hosts_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
}

/// How a session reached its host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransportType {
    /// Plain TCP connection
    Direct,
    /// Carried inside a direct-tcpip channel of another session
    Tunneled {
        /// `host:port` of the carrying session
        via: String,
    },
    /// Test double
    Local,
}

/// Connection information
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Correlation id for logs
    pub session_id: Uuid,
    /// Remote hostname or IP
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Username
    pub username: String,
    /// Connection type
    pub transport_type: TransportType,
}

impl ConnectionInfo {
    /// Info for a freshly opened session
    pub fn new(target: &SshTarget, transport_type: TransportType) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            host: target.host.clone(),
            port: target.port,
            username: target.username.clone(),
            transport_type,
        }
    }
}

/// Output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status reported by the server
    pub exit_status: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Exit status zero
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Turn a non-zero exit status into an error
    pub fn into_result(self) -> Result<Self, TransportError> {
        if self.success() {
            Ok(self)
        } else {
            Err(TransportError::CommandFailed {
                code: self.exit_status,
                message: self.stderr.trim().to_string(),
            })
        }
    }
}

/// An open SSH session
#[async_trait]
pub trait SshClient: Send + Sync {
    /// Get connection information
    fn connection_info(&self) -> ConnectionInfo;

    /// Execute a command and collect its output
    async fn exec(&self, command: &str) -> Result<CommandOutput, TransportError>;

    /// Copy a local file to the remote host over SCP; returns bytes sent
    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, TransportError>;

    /// Copy a remote file to the local host over SCP; returns bytes received
    async fn download(&self, remote: &str, local: &Path) -> Result<u64, TransportError>;

    /// Open a direct-tcpip channel to `target` sourced from `origin`, then
    /// establish and authenticate a second session through it.
    ///
    /// This session must stay open for as long as the returned one is used.
    async fn connect_through(
        &self,
        target: &SshTarget,
        origin: (&str, u16),
    ) -> Result<Arc<dyn SshClient>, TransportError>;

    /// Close the session. Closing twice is not an error.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens SSH sessions
#[async_trait]
pub trait SshConnector: Send + Sync {
    /// Connect and authenticate to the target
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn SshClient>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_config_default() {
        let config = SshConfig::default();
        assert_eq!(config.connect_timeout, 30);
        assert_eq!(config.command_timeout, 300);
        assert_eq!(config.host_key_policy, HostKeyPolicy::AcceptNew);
        assert!(!config.save_host_keys);
        assert_eq!(config.session_timeout_ms(), 300_000);
    }

    #[test]
    fn test_known_hosts_under_user_home() {
        let path = default_known_hosts_path().expect("home directory resolves for the test user");
        assert!(path.ends_with(".ssh/known_hosts"));
        let home = BaseDirs::new().unwrap();
        assert!(path.starts_with(home.home_dir()));
        assert_eq!(SshConfig::default().known_hosts_path, Some(path));
    }

    #[test]
    fn test_session_timeout_saturates() {
        let config = SshConfig {
            command_timeout: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.session_timeout_ms(), u32::MAX);
    }

    #[test]
    fn test_target_defaults_to_port_22() {
        let target = SshTarget::new("jump.example.com", "admin", "secret");
        assert_eq!(target.port, 22);
        assert_eq!(target.with_port(2222).display_name(), "admin@jump.example.com:2222");
    }

    #[test]
    fn test_target_debug_hides_password() {
        let target = SshTarget::new("h", "u", "hunter2");
        let rendered = format!("{:?}", target);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_connection_info() {
        let target = SshTarget::new("test.example.com", "testuser", "pw").with_port(2222);
        let info = ConnectionInfo::new(&target, TransportType::Direct);

        assert_eq!(info.host, "test.example.com");
        assert_eq!(info.port, 2222);
        assert_eq!(info.username, "testuser");
        assert_eq!(info.transport_type, TransportType::Direct);
        assert_ne!(info.session_id, ConnectionInfo::new(&target, TransportType::Direct).session_id);
    }

    #[test]
    fn test_command_output_into_result() {
        let ok = CommandOutput { exit_status: 0, stdout: "/home/admin\n".into(), stderr: String::new() };
        assert!(ok.clone().into_result().is_ok());

        let failed = CommandOutput { exit_status: 2, stdout: String::new(), stderr: "no such file\n".into() };
        match failed.into_result() {
            Err(TransportError::CommandFailed { code, message }) => {
                assert_eq!(code, 2);
                assert_eq!(message, "no such file");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
