//! libssh2-backed sessions

use async_trait::async_trait;
use crate::blocking::{read_to_end, retry_ssh, run_blocking};
use crate::host_keys::verify_host_key;
use crate::relay::ChannelRelay;
use crate::transport::{CommandOutput, ConnectionInfo, SshClient, SshConfig, SshConnector, SshTarget, TransportType};
use crate::{scp, TransportError};
use ssh2::Session;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Resolve the first socket address of a target
fn resolve(target: &SshTarget) -> Result<SocketAddr, TransportError> {
    (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Connection(format!("Failed to resolve {}: {}", target.host, e)))?
        .next()
        .ok_or_else(|| TransportError::Connection(format!("No addresses resolved for {}", target.host)))
}

/// Open a TCP connection and run the SSH handshake and password auth on it
pub fn establish(target: &SshTarget, config: &SshConfig) -> Result<Session, TransportError> {
    let addr = resolve(target)?;
    let stream = TcpStream::connect_timeout(&addr, config.connect_timeout())
        .map_err(|e| TransportError::Connection(format!("Failed to connect to {}: {}", target.display_name(), e)))?;
    handshake_over(stream, target, config)
}

/// Run the SSH handshake and password auth over an already connected stream
pub fn handshake_over(stream: TcpStream, target: &SshTarget, config: &SshConfig) -> Result<Session, TransportError> {
    let mut session = Session::new()
        .map_err(|e| TransportError::from_ssh("session init", e))?;
    session.set_timeout(config.session_timeout_ms());
    session.set_tcp_stream(stream);

    session.handshake().map_err(|e| {
        TransportError::Connection(format!("SSH handshake with {} failed: {}", target.display_name(), e))
    })?;

    verify_host_key(
        &session,
        &target.host,
        target.port,
        config.host_key_policy,
        config.known_hosts_path.as_deref(),
        config.save_host_keys,
    )?;

    session
        .userauth_password(&target.username, &target.password)
        .map_err(|e| TransportError::Authentication(format!("{}: {}", target.display_name(), e.message())))?;

    if !session.authenticated() {
        return Err(TransportError::Authentication(format!(
            "{}: server did not accept the password",
            target.display_name()
        )));
    }

    Ok(session)
}

/// Connector opening direct libssh2 sessions
#[derive(Debug, Clone, Default)]
pub struct Libssh2Connector {
    /// Configuration applied to every session
    config: SshConfig,
}

impl Libssh2Connector {
    /// Create a connector
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Configuration in use
    pub fn config(&self) -> &SshConfig {
        &self.config
    }
}

#[async_trait]
impl SshConnector for Libssh2Connector {
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn SshClient>, TransportError> {
        info!("Connecting to {}", target.display_name());

        let config = self.config.clone();
        let blocking_target = target.clone();
        let session = run_blocking(self.config.connect_timeout(), "SSH connect", move || {
            establish(&blocking_target, &config)
        })
        .await?;

        let client = Libssh2Client::new(
            session,
            ConnectionInfo::new(target, TransportType::Direct),
            self.config.clone(),
            None,
        );
        info!("Successfully connected to {}", target.display_name());
        Ok(Arc::new(client))
    }
}

/// One libssh2 session
pub struct Libssh2Client {
    /// Underlying session
    session: Session,
    /// Connection information
    info: ConnectionInfo,
    /// Configuration the session was opened with
    config: SshConfig,
    /// Relay carrying this session, when it runs inside a tunnel
    relay: Mutex<Option<ChannelRelay>>,
    /// Session is non-blocking because it carries a tunnel
    carrying: Arc<AtomicBool>,
    /// Close already ran
    closed: AtomicBool,
}

impl Libssh2Client {
    fn new(session: Session, info: ConnectionInfo, config: SshConfig, relay: Option<ChannelRelay>) -> Self {
        Self {
            session,
            info,
            config,
            relay: Mutex::new(relay),
            carrying: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether this session currently carries a tunnel
    pub fn is_carrying_tunnel(&self) -> bool {
        self.carrying.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.command_timeout()
    }

    fn take_relay(&self) -> Option<ChannelRelay> {
        match self.relay.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl SshClient for Libssh2Client {
    fn connection_info(&self) -> ConnectionInfo {
        self.info.clone()
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, TransportError> {
        self.ensure_open()?;
        debug!("Executing on {}: {}", self.info.host, command);

        let session = self.session.clone();
        let command = command.to_string();
        let deadline = self.deadline();
        run_blocking(self.config.command_timeout(), "exec", move || {
            let mut channel = retry_ssh(deadline, "open session channel", || session.channel_session())?;
            retry_ssh(deadline, "exec", || channel.exec(&command))?;

            let stdout = read_to_end(&mut channel, deadline)?;
            let stderr = read_to_end(&mut channel.stderr(), deadline)?;

            retry_ssh(deadline, "exec close", || channel.wait_close())?;
            let exit_status = retry_ssh(deadline, "exit status", || channel.exit_status())?;

            Ok(CommandOutput {
                exit_status,
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            })
        })
        .await
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, TransportError> {
        self.ensure_open()?;
        let session = self.session.clone();
        let local = local.to_path_buf();
        let remote = remote.to_string();
        let deadline = self.deadline();
        run_blocking(self.config.command_timeout(), "SCP upload", move || {
            scp::upload(&session, &local, &remote, deadline)
        })
        .await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, TransportError> {
        self.ensure_open()?;
        let session = self.session.clone();
        let local: PathBuf = local.to_path_buf();
        let remote = remote.to_string();
        let deadline = self.deadline();
        run_blocking(self.config.command_timeout(), "SCP download", move || {
            scp::download(&session, &remote, &local, deadline)
        })
        .await
    }

    async fn connect_through(
        &self,
        target: &SshTarget,
        origin: (&str, u16),
    ) -> Result<Arc<dyn SshClient>, TransportError> {
        self.ensure_open()?;

        let session = self.session.clone();
        let config = self.config.clone();
        let carrying = Arc::clone(&self.carrying);
        let blocking_target = target.clone();
        let origin = (origin.0.to_string(), origin.1);
        let deadline = Instant::now() + self.config.connect_timeout();

        let (inner, relay) = run_blocking(self.config.connect_timeout(), "tunnel connect", move || {
            let destination = format!("{}:{}", blocking_target.host, blocking_target.port);
            // The carrier may already be non-blocking under another tunnel
            let channel = retry_ssh(deadline, &format!("direct-tcpip to {}", destination), || {
                session.channel_direct_tcpip(
                    &blocking_target.host,
                    blocking_target.port,
                    Some((origin.0.as_str(), origin.1)),
                )
            })?;
            debug!("Forwarded channel to {} opened", destination);

            let (relay, stream) = ChannelRelay::start(&session, channel, destination)?;
            carrying.store(true, Ordering::Relaxed);

            // Dropping the relay on failure stops its thread
            let inner = handshake_over(stream, &blocking_target, &config)?;
            Ok((inner, relay))
        })
        .await?;

        let via = format!("{}:{}", self.info.host, self.info.port);
        let client = Libssh2Client::new(
            inner,
            ConnectionInfo::new(target, TransportType::Tunneled { via }),
            self.config.clone(),
            Some(relay),
        );
        Ok(Arc::new(client))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::Relaxed) {
            debug!("Session to {} already closed", self.info.host);
            return Ok(());
        }

        let relay = self.take_relay();
        let session = self.session.clone();
        let host = self.info.host.clone();
        let carrying = self.is_carrying_tunnel();

        run_blocking(self.config.connect_timeout(), "SSH disconnect", move || {
            if carrying {
                session.set_blocking(true);
            }
            let result = session
                .disconnect(None, "closed by nwkit", None)
                .map_err(|e| TransportError::from_ssh(&format!("disconnect from {}", host), e));
            // Stop the relay after the inner session said goodbye through it
            if let Some(mut relay) = relay {
                relay.stop();
            }
            result
        })
        .await
    }
}

impl Drop for Libssh2Client {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Relaxed) {
            warn!("Session to {} dropped without close", self.info.host);
        }
    }
}

impl std::fmt::Debug for Libssh2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Libssh2Client")
            .field("info", &self.info)
            .field("carrying", &self.is_carrying_tunnel())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
