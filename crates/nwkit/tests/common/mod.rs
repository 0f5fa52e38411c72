//! Mock connectors shared by the integration tests.
//!
//! Every mock appends to one event log so tests can assert on call order.

#![allow(dead_code)]

use async_trait::async_trait;
use nwkit::netconf::RpcReply;
use nwkit::ssh::{CommandOutput, ConnectionInfo, TransportError, TransportType};
use nwkit::{
    DeviceConnector, DeviceFacts, DeviceSession, NwError, NwUtilities, Settings, ShellOutput, ShellSession,
    SshClient, SshConnector, SshTarget,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Ordered log of mock calls
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.all().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.all().iter().position(|e| e == event)
    }
}

// SSH

pub struct MockSshClient {
    info: ConnectionInfo,
    events: Events,
    fail_close: bool,
    fail_tunnel: bool,
    closed: AtomicBool,
}

#[async_trait]
impl SshClient for MockSshClient {
    fn connection_info(&self) -> ConnectionInfo {
        self.info.clone()
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, TransportError> {
        self.events.push(format!("exec:{}:{}", self.info.host, command));
        Ok(CommandOutput {
            exit_status: 0,
            stdout: "/home/jumper\n".to_string(),
            stderr: String::new(),
        })
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, TransportError> {
        let size = std::fs::metadata(local)?.len();
        self.events.push(format!("upload:{}:{}", self.info.host, remote));
        Ok(size)
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, TransportError> {
        std::fs::write(local, b"downloaded")?;
        self.events.push(format!("download:{}:{}", self.info.host, remote));
        Ok(10)
    }

    async fn connect_through(
        &self,
        target: &SshTarget,
        origin: (&str, u16),
    ) -> Result<Arc<dyn SshClient>, TransportError> {
        self.events.push(format!(
            "tunnel:{}:{}->{}:{}",
            origin.0, origin.1, target.host, target.port
        ));
        if self.fail_tunnel {
            return Err(TransportError::Authentication(format!("{} rejected the password", target.host)));
        }
        Ok(Arc::new(MockSshClient {
            info: ConnectionInfo::new(
                target,
                TransportType::Tunneled {
                    via: format!("{}:{}", self.info.host, self.info.port),
                },
            ),
            events: self.events.clone(),
            fail_close: false,
            fail_tunnel: false,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Relaxed);
        self.events.push(format!("close:{}", self.info.host));
        if self.fail_close {
            return Err(TransportError::Protocol("socket reset".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockSshConnector {
    pub events: Events,
    pub targets: Mutex<Vec<SshTarget>>,
    pub reject_password: bool,
    pub fail_close_hosts: HashSet<String>,
    pub fail_tunnel: bool,
}

impl MockSshConnector {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SshConnector for MockSshConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn SshClient>, TransportError> {
        self.events.push(format!("connect:{}", target.host));
        self.targets.lock().unwrap().push(target.clone());
        if self.reject_password {
            return Err(TransportError::Authentication(format!("{}: bad password", target.host)));
        }
        Ok(Arc::new(MockSshClient {
            info: ConnectionInfo::new(target, TransportType::Local),
            events: self.events.clone(),
            fail_close: self.fail_close_hosts.contains(&target.host),
            fail_tunnel: self.fail_tunnel,
            closed: AtomicBool::new(false),
        }))
    }
}

// Device

pub struct MockDevice {
    info: ConnectionInfo,
    events: Events,
    fail_close: bool,
}

#[async_trait]
impl DeviceSession for MockDevice {
    fn hostname(&self) -> String {
        format!("{}-re0", self.info.host)
    }

    fn facts(&self) -> DeviceFacts {
        DeviceFacts {
            hostname: Some(self.hostname()),
            model: Some("mx204".to_string()),
            ..Default::default()
        }
    }

    fn connection_info(&self) -> ConnectionInfo {
        self.info.clone()
    }

    async fn rpc(&self, body: &str) -> nwkit::Result<RpcReply> {
        self.events.push(format!("rpc:{}", body));
        Ok(RpcReply::parse("<rpc-reply><ok/></rpc-reply>")?)
    }

    async fn open_shell(&self) -> nwkit::Result<Box<dyn ShellSession>> {
        self.events.push(format!("shell:{}", self.info.host));
        Ok(Box::new(MockShell {
            events: self.events.clone(),
        }))
    }

    async fn close(&self) -> nwkit::Result<()> {
        self.events.push(format!("close-device:{}", self.info.host));
        if self.fail_close {
            return Err(NwError::Connection("device went away".to_string()));
        }
        Ok(())
    }
}

pub struct MockShell {
    events: Events,
}

#[async_trait]
impl ShellSession for MockShell {
    async fn run(&mut self, command: &str) -> nwkit::Result<ShellOutput> {
        self.events.push(format!("run:{}", command));
        Ok(ShellOutput {
            exit_status: Some(0),
            output: format!("ran {}", command),
        })
    }

    async fn close(&mut self) -> nwkit::Result<()> {
        self.events.push("shell-close");
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDeviceConnector {
    pub events: Events,
    pub targets: Mutex<Vec<SshTarget>>,
    pub reject_password: bool,
    pub fail_close: bool,
}

impl MockDeviceConnector {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }
}

#[async_trait]
impl DeviceConnector for MockDeviceConnector {
    async fn connect(&self, target: &SshTarget) -> nwkit::Result<Arc<dyn DeviceSession>> {
        self.events.push(format!("open-device:{}", target.host));
        self.targets.lock().unwrap().push(target.clone());
        if self.reject_password {
            return Err(NwError::Auth(format!("{}: bad password", target.host)));
        }
        Ok(Arc::new(MockDevice {
            info: ConnectionInfo::new(target, TransportType::Local),
            events: self.events.clone(),
            fail_close: self.fail_close,
        }))
    }
}

/// Manager wired to the given mocks
pub fn manager(
    settings: Settings,
    device: Arc<MockDeviceConnector>,
    ssh: Arc<MockSshConnector>,
) -> NwUtilities {
    NwUtilities::builder()
        .with_settings(settings)
        .with_device_connector(device)
        .with_ssh_connector(ssh)
        .build()
        .unwrap()
}

pub fn jump_target() -> SshTarget {
    SshTarget::new("bastion", "jumper", "pw")
}

pub fn lab_settings() -> Settings {
    Settings {
        device: Some(SshTarget::new("192.0.2.10", "netops", "secret")),
        jumphost: Some(jump_target()),
        ..Default::default()
    }
}
