//! NETCONF over SSH device sessions

use super::shell::JunosShell;
use super::{DeviceConnector, DeviceFacts, DeviceSession, ShellSession};
use crate::{NwError, Result};
use async_trait::async_trait;
use nwkit_netconf::{ErrorSeverity, FrameCodec, Hello, Rpc, RpcReply};
use nwkit_ssh::libssh2::establish;
use nwkit_ssh::{run_blocking, ConnectionInfo, SshConfig, SshTarget, TransportError, TransportType};
use ssh2::{Channel, Session};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const SUBSYSTEM: &str = "netconf";

/// Opens NETCONF sessions over libssh2
#[derive(Debug, Clone, Default)]
pub struct NetconfConnector {
    config: SshConfig,
}

impl NetconfConnector {
    /// Create a connector
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DeviceConnector for NetconfConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn DeviceSession>> {
        info!("Opening NETCONF session to {}", target.display_name());

        let config = self.config.clone();
        let blocking_target = target.clone();
        let (session, rpc_channel, server_hello) =
            run_blocking(self.config.connect_timeout(), "NETCONF connect", move || {
                Ok(open_netconf(&blocking_target, &config))
            })
            .await??;

        let mut facts = DeviceFacts {
            session_id: server_hello.session_id,
            capabilities: server_hello.capabilities,
            ..Default::default()
        };
        let mut device = NetconfDevice {
            session,
            rpc_channel: Arc::new(Mutex::new(rpc_channel)),
            info: ConnectionInfo::new(target, TransportType::Direct),
            config: self.config.clone(),
            facts: DeviceFacts::default(),
            closed: AtomicBool::new(false),
        };

        if let Err(e) = device.gather_facts(&mut facts).await {
            if let Err(close_err) = device.close().await {
                debug!("Close after failed fact gathering also failed: {}", close_err);
            }
            return Err(e);
        }

        device.facts = facts;
        info!(
            "NETCONF session {} open to {}",
            device.facts.session_id.map(|id| id.to_string()).unwrap_or_else(|| "?".into()),
            device.hostname()
        );
        Ok(Arc::new(device))
    }
}

/// RPC channel state, used from blocking threads only
struct RpcChannel<S = Channel> {
    stream: S,
    codec: FrameCodec,
    next_message_id: u64,
}

impl<S: Read + Write> RpcChannel<S> {
    /// Swap hellos on a freshly started subsystem and switch to the
    /// negotiated framing. Hellos always use end-of-message framing.
    fn start(mut stream: S, host: &str) -> Result<(Self, Hello)> {
        let mut codec = FrameCodec::new();
        let raw = codec
            .read_message(&mut stream)?
            .ok_or_else(|| NwError::Connection(format!("{} closed before sending hello", host)))?;
        let server = Hello::parse(&raw)?;

        let client = Hello::client();
        codec.write_message(&mut stream, &client.to_xml())?;
        let framing = client.negotiate_framing(&server);
        codec.set_framing(framing);
        debug!("NETCONF hello done with {}, framing {}", host, framing.name());

        Ok((
            Self {
                stream,
                codec,
                next_message_id: 1,
            },
            server,
        ))
    }

    fn exchange(&mut self, body: &str) -> Result<RpcReply> {
        let message_id = self.next_message_id;
        self.next_message_id += 1;

        let rpc = Rpc::new(message_id, body);
        debug!("-> rpc {}: {}", message_id, body);
        self.codec.write_message(&mut self.stream, &rpc.to_xml())?;

        let raw = self
            .codec
            .read_message(&mut self.stream)?
            .ok_or_else(|| NwError::Connection("device closed the NETCONF channel".to_string()))?;
        let reply = RpcReply::parse(&raw)?;

        if let Some(id) = reply.message_id.as_deref() {
            if id != message_id.to_string() {
                warn!("Reply message-id {} does not match request {}", id, message_id);
            }
        }
        Ok(reply)
    }
}

/// Connect, authenticate, start the subsystem and swap hellos
fn open_netconf(target: &SshTarget, config: &SshConfig) -> Result<(Session, RpcChannel, Hello)> {
    let session = establish(target, config)?;

    let mut channel = session
        .channel_session()
        .map_err(|e| TransportError::from_ssh("open session channel", e))?;
    channel
        .subsystem(SUBSYSTEM)
        .map_err(|e| TransportError::from_ssh("start netconf subsystem", e))?;

    let (rpc_channel, server) = RpcChannel::start(channel, &target.host)?;
    Ok((session, rpc_channel, server))
}

/// A NETCONF session to one device
pub struct NetconfDevice {
    session: Session,
    rpc_channel: Arc<Mutex<RpcChannel>>,
    info: ConnectionInfo,
    config: SshConfig,
    facts: DeviceFacts,
    closed: AtomicBool,
}

impl NetconfDevice {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(NwError::Connection(format!("session to {} is closed", self.info.host)));
        }
        Ok(())
    }

    /// Raw exchange; rpc-errors are left in the reply
    async fn exchange(&self, body: &str) -> Result<RpcReply> {
        self.ensure_open()?;
        let rpc_channel = Arc::clone(&self.rpc_channel);
        let body = body.to_string();
        run_blocking(self.config.command_timeout(), "NETCONF rpc", move || {
            Ok(rpc_channel
                .lock()
                .map_err(|_| NwError::Device("NETCONF channel state poisoned".to_string()))
                .and_then(|mut channel| channel.exchange(&body)))
        })
        .await?
    }

    async fn gather_facts(&self, facts: &mut DeviceFacts) -> Result<()> {
        let software = self.exchange("<get-software-information/>").await?;
        if software.is_ok() {
            facts.apply_software_information(&software);
        } else {
            warn!("{} did not return software information; not a Junos device?", self.info.host);
        }

        let chassis = self.exchange("<get-chassis-inventory/>").await?;
        if chassis.is_ok() {
            facts.apply_chassis_inventory(&chassis);
        } else {
            debug!("{} did not return a chassis inventory", self.info.host);
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceSession for NetconfDevice {
    fn hostname(&self) -> String {
        self.facts.hostname.clone().unwrap_or_else(|| self.info.host.clone())
    }

    fn facts(&self) -> DeviceFacts {
        self.facts.clone()
    }

    fn connection_info(&self) -> ConnectionInfo {
        self.info.clone()
    }

    async fn rpc(&self, body: &str) -> Result<RpcReply> {
        let reply = self.exchange(body).await?;

        for warning in reply.errors.iter().filter(|e| e.severity == ErrorSeverity::Warning) {
            warn!("{} warned: {}", self.info.host, warning);
        }

        let failures: Vec<String> = reply.failures().map(|e| e.to_string()).collect();
        if !failures.is_empty() {
            return Err(NwError::Device(failures.join("; ")));
        }
        Ok(reply)
    }

    async fn open_shell(&self) -> Result<Box<dyn ShellSession>> {
        self.ensure_open()?;
        let shell = JunosShell::open(self.session.clone(), self.info.host.clone(), self.config.clone()).await?;
        Ok(Box::new(shell))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            debug!("NETCONF session to {} already closed", self.info.host);
            return Ok(());
        }

        let rpc_channel = Arc::clone(&self.rpc_channel);
        let session = self.session.clone();
        let host = self.info.host.clone();

        run_blocking(self.config.connect_timeout(), "NETCONF close", move || {
            match rpc_channel.lock() {
                Ok(mut guard) => {
                    let state = &mut *guard;
                    let goodbye = Rpc::close_session(state.next_message_id).to_xml();
                    let acknowledged = state
                        .codec
                        .write_message(&mut state.stream, &goodbye)
                        .and_then(|_| state.codec.read_message(&mut state.stream));
                    if let Err(e) = acknowledged {
                        debug!("close-session to {} not acknowledged: {}", host, e);
                    }
                    // The disconnect below tears the channel down regardless
                    let _ = state.stream.send_eof();
                    let _ = state.stream.close();
                }
                Err(_) => warn!("NETCONF channel state for {} poisoned", host),
            }

            session
                .disconnect(None, "closed by nwkit", None)
                .map_err(|e| TransportError::from_ssh(&format!("disconnect from {}", host), e))
        })
        .await?;

        info!("NETCONF session to {} closed", self.info.host);
        Ok(())
    }
}

impl Drop for NetconfDevice {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Relaxed) {
            warn!("Device session to {} dropped without close", self.info.host);
        }
    }
}

impl std::fmt::Debug for NetconfDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetconfDevice")
            .field("info", &self.info)
            .field("facts", &self.facts)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
