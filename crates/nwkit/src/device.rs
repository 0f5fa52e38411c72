//! Managed device sessions.
//!
//! A device is reached over NETCONF on SSH (the `netconf` subsystem). After
//! the hello exchange the session gathers a few Junos facts so callers can
//! see who they are talking to. A pty shell on the same SSH connection backs
//! [`ShellSession`].

use crate::Result;
use async_trait::async_trait;
use nwkit_netconf::RpcReply;
use nwkit_ssh::{ConnectionInfo, SshTarget};
use serde::Serialize;
use std::sync::Arc;

mod netconf;
mod shell;

pub use netconf::{NetconfConnector, NetconfDevice};
pub use shell::{JunosShell, DEFAULT_PROMPT};

/// Facts reported by a device after connecting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceFacts {
    /// Configured host name
    pub hostname: Option<String>,
    /// Product model
    pub model: Option<String>,
    /// Software version
    pub version: Option<String>,
    /// Chassis serial number
    pub serial_number: Option<String>,
    /// NETCONF session id assigned by the device
    pub session_id: Option<u32>,
    /// Capabilities the device advertised in its hello
    pub capabilities: Vec<String>,
}

impl DeviceFacts {
    /// Fill model, version and host name from a `<get-software-information>` reply
    pub fn apply_software_information(&mut self, reply: &RpcReply) {
        self.hostname = reply.text_of("host-name").or(self.hostname.take());
        self.model = reply.text_of("product-model").or(self.model.take());
        self.version = reply
            .text_of("junos-version")
            .or_else(|| reply.text_of("version"))
            .or(self.version.take());
    }

    /// Fill the serial number from a `<get-chassis-inventory>` reply
    pub fn apply_chassis_inventory(&mut self, reply: &RpcReply) {
        self.serial_number = reply.text_of("serial-number").or(self.serial_number.take());
    }
}

/// Output of one shell command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellOutput {
    /// Exit status, when the shell reported one
    pub exit_status: Option<i32>,
    /// Command output without the echoed command line or trailing prompt
    pub output: String,
}

impl ShellOutput {
    /// Exit status zero
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Opens device sessions
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Connect, authenticate and complete the management handshake
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn DeviceSession>>;
}

/// One open management session
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Host name as reported by the device, or the address used to reach it
    fn hostname(&self) -> String;

    /// Facts gathered when the session opened
    fn facts(&self) -> DeviceFacts;

    /// Connection information
    fn connection_info(&self) -> ConnectionInfo;

    /// Issue an RPC; `body` is the XML inside `<rpc>`.
    ///
    /// An error-severity `<rpc-error>` in the reply is returned as
    /// [`NwError::Device`](crate::NwError::Device).
    async fn rpc(&self, body: &str) -> Result<RpcReply>;

    /// Open a shell-mode sub-session on the same connection
    async fn open_shell(&self) -> Result<Box<dyn ShellSession>>;

    /// End the session. Closing twice is not an error.
    async fn close(&self) -> Result<()>;
}

/// Shell-mode sub-session of a device
#[async_trait]
pub trait ShellSession: Send {
    /// Run a command and wait for the prompt to come back
    async fn run(&mut self, command: &str) -> Result<ShellOutput>;

    /// Leave the shell
    async fn close(&mut self) -> Result<()>;
}
