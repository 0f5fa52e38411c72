//! The `NwUtilities` session manager.
//!
//! One cached session per role:
//!
//! | role      | opened by          | closed by             |
//! |-----------|--------------------|-----------------------|
//! | device    | `open_device`      | `close_device`        |
//! | jump host | `connect_jumphost` | `disconnect_jumphost` |
//! | tunnel    | `connect_tunnel`   | `disconnect_tunnel`   |
//!
//! Opening a role that is already open hands back the cached session
//! unchanged. Closing never fails; the outcome is reported instead.

use crate::config::{Settings, DEFAULT_CONFIG_PATH};
use crate::device::{DeviceConnector, DeviceSession, NetconfConnector, ShellSession};
use crate::notify::{self, EmailRequest};
use crate::session::{CloseOutcome, SessionSlot, TeardownReport, TunnelCloseOutcome, TunnelPair};
use crate::{NwError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use nwkit_ssh::{Libssh2Connector, SshClient, SshConnector, SshTarget};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Builder for [`NwUtilities`]
pub struct NwUtilitiesBuilder {
    config_path: PathBuf,
    settings: Option<Settings>,
    device_connector: Option<Arc<dyn DeviceConnector>>,
    ssh_connector: Option<Arc<dyn SshConnector>>,
}

impl Default for NwUtilitiesBuilder {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            settings: None,
            device_connector: None,
            ssh_connector: None,
        }
    }
}

impl NwUtilitiesBuilder {
    /// Read configuration from `path` instead of `./_config.ini`
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    /// Use these settings and skip the configuration file
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Open device sessions through a custom connector
    pub fn with_device_connector(mut self, connector: Arc<dyn DeviceConnector>) -> Self {
        self.device_connector = Some(connector);
        self
    }

    /// Open SSH sessions through a custom connector
    pub fn with_ssh_connector(mut self, connector: Arc<dyn SshConnector>) -> Self {
        self.ssh_connector = Some(connector);
        self
    }

    /// Load settings and build the manager
    pub fn build(self) -> Result<NwUtilities> {
        let settings = match self.settings {
            Some(settings) => settings,
            None => Settings::load(&self.config_path).map_err(|e| {
                error!("Invalid configuration in {}: {}", self.config_path.display(), e);
                e
            })?,
        };

        let device_connector: Arc<dyn DeviceConnector> = match self.device_connector {
            Some(connector) => connector,
            None => Arc::new(NetconfConnector::new(settings.ssh.clone())),
        };
        let ssh_connector: Arc<dyn SshConnector> = match self.ssh_connector {
            Some(connector) => connector,
            None => Arc::new(Libssh2Connector::new(settings.ssh.clone())),
        };

        debug!("NwUtilities ready (ssh timeouts {}s/{}s)", settings.ssh.connect_timeout, settings.ssh.command_timeout);

        Ok(NwUtilities {
            settings,
            device_connector,
            ssh_connector,
            device: SessionSlot::Absent,
            jumphost: SessionSlot::Absent,
            tunnel: SessionSlot::Absent,
        })
    }
}

/// Device, jump-host and tunnel sessions plus file copy and email helpers
pub struct NwUtilities {
    settings: Settings,
    device_connector: Arc<dyn DeviceConnector>,
    ssh_connector: Arc<dyn SshConnector>,
    device: SessionSlot<Arc<dyn DeviceSession>>,
    jumphost: SessionSlot<Arc<dyn SshClient>>,
    tunnel: SessionSlot<TunnelPair>,
}

impl NwUtilities {
    /// Manager configured from `./_config.ini`
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Start building a manager
    pub fn builder() -> NwUtilitiesBuilder {
        NwUtilitiesBuilder::default()
    }

    /// Settings in effect
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Cached device session
    pub fn device(&self) -> Option<Arc<dyn DeviceSession>> {
        self.device.get().cloned()
    }

    /// Cached jump-host session
    pub fn jumphost(&self) -> Option<Arc<dyn SshClient>> {
        self.jumphost.get().cloned()
    }

    /// Cached tunnel pair
    pub fn tunnel(&self) -> Option<TunnelPair> {
        self.tunnel.get().cloned()
    }

    // Device

    /// Open a device session, or return the one already open
    pub async fn open_device(&mut self, target: &SshTarget) -> Result<Arc<dyn DeviceSession>> {
        if let Some(device) = self.device.get() {
            info!("Already connected to {}", device.hostname());
            return Ok(Arc::clone(device));
        }

        info!("Connecting to device {}", target.display_name());
        let device = self.device_connector.connect(target).await.map_err(|e| {
            if e.is_auth() {
                error!("Authentication failed for {}: {}", target.display_name(), e);
            } else {
                error!("Failed to connect to device {}: {}", target.display_name(), e);
            }
            e
        })?;

        info!("Connected to {}", device.hostname());
        self.device.fill(Arc::clone(&device));
        Ok(device)
    }

    /// Close the device session
    pub async fn close_device(&mut self) -> CloseOutcome {
        let Some(device) = self.device.take() else {
            warn!("No active device session to close");
            return CloseOutcome::NotOpen;
        };

        let hostname = device.hostname();
        match device.close().await {
            Ok(()) => {
                info!("Closed device session to {}", hostname);
                CloseOutcome::Closed
            }
            Err(e) => {
                error!("Error closing device session to {}: {}", hostname, e);
                CloseOutcome::Failed(e.to_string())
            }
        }
    }

    /// Shell sub-session on the device, opening the device from `[lab_device]` if needed
    pub async fn open_shell(&mut self) -> Result<Box<dyn ShellSession>> {
        let device = match self.device() {
            Some(device) => device,
            None => {
                let target = self.settings.device.clone().ok_or_else(|| {
                    error!("No device session open and no [lab_device] configured");
                    NwError::InvalidArgument("no device session is open and [lab_device] is not configured".to_string())
                })?;
                self.open_device(&target).await?
            }
        };

        device.open_shell().await.map_err(|e| {
            error!("Failed to open shell on {}: {}", device.hostname(), e);
            e
        })
    }

    // Jump host

    /// Open a jump-host session, or return the one already open
    pub async fn connect_jumphost(&mut self, target: &SshTarget) -> Result<Arc<dyn SshClient>> {
        if let Some(client) = self.jumphost.get() {
            info!("Already connected to jump host {}", client.connection_info().host);
            return Ok(Arc::clone(client));
        }

        info!("Connecting to jump host {}", target.display_name());
        let client = self.ssh_connector.connect(target).await.map_err(|e| {
            let e = NwError::from(e);
            error!("Failed to connect to jump host {}: {}", target.display_name(), e);
            e
        })?;

        info!("Connected to jump host {}", target.host);
        self.jumphost.fill(Arc::clone(&client));
        Ok(client)
    }

    /// Close the jump-host session
    pub async fn disconnect_jumphost(&mut self) -> CloseOutcome {
        close_ssh("jump host", self.jumphost.take()).await
    }

    // Tunnel

    /// Open a session to `destination` tunneled through `jump`, or return
    /// the pair already open.
    pub async fn connect_tunnel(&mut self, jump: &SshTarget, destination: &SshTarget) -> Result<TunnelPair> {
        if destination.host.trim().is_empty() {
            error!("Tunnel destination host is required");
            return Err(NwError::InvalidArgument("destination host is required".to_string()));
        }

        if let Some(pair) = self.tunnel.get() {
            info!("Tunnel to {} already open", pair.target.connection_info().host);
            return Ok(pair.clone());
        }

        info!("Opening tunnel to {} via {}", destination.display_name(), jump.display_name());

        let jump_session = self.ssh_connector.connect(jump).await.map_err(|e| {
            let e = NwError::from(e);
            error!("Failed to connect to jump host {}: {}", jump.display_name(), e);
            e
        })?;

        let target = match jump_session
            .connect_through(destination, (jump.host.as_str(), jump.port))
            .await
        {
            Ok(target) => target,
            Err(e) => {
                let e = NwError::from(e);
                error!("Failed to open tunnel to {}: {}", destination.display_name(), e);
                if let Err(cleanup) = jump_session.close().await {
                    debug!("Closing jump host after failed tunnel also failed: {}", cleanup);
                }
                return Err(e);
            }
        };

        info!("Tunnel to {} via {} open", destination.host, jump.host);
        let pair = TunnelPair {
            target,
            jump: jump_session,
        };
        self.tunnel.fill(pair.clone());
        Ok(pair)
    }

    /// Close the tunnel pair, target first
    pub async fn disconnect_tunnel(&mut self) -> TunnelCloseOutcome {
        let Some(pair) = self.tunnel.take() else {
            warn!("No active tunnel to close");
            return TunnelCloseOutcome::not_open();
        };

        let target = close_ssh("tunnel target", Some(pair.target)).await;
        let jump = close_ssh("tunnel jump host", Some(pair.jump)).await;
        TunnelCloseOutcome { target, jump }
    }

    // File transfer

    /// Jump-host session for SCP: the cached one, else the one carrying the
    /// tunnel, else a new one opened from `[jumphost]`
    async fn transfer_carrier(&mut self) -> Result<Arc<dyn SshClient>> {
        if let Some(client) = self.jumphost() {
            return Ok(client);
        }
        if let Some(pair) = self.tunnel() {
            debug!("Copying over the jump host carrying the tunnel");
            return Ok(pair.jump);
        }
        let target = self.settings.jumphost.clone().ok_or_else(|| {
            error!("No jump-host session open and no [jumphost] configured");
            NwError::InvalidArgument("no jump-host session is open and [jumphost] is not configured".to_string())
        })?;
        self.connect_jumphost(&target).await
    }

    /// Upload `src` to `dst` over SCP through the jump host.
    ///
    /// Empty paths and `use_jumphost == false` return `Ok(false)`; a missing
    /// local file is an error raised before any connection is made.
    pub async fn copy_local_to_remote(&mut self, src: &str, dst: &str, use_jumphost: bool) -> Result<bool> {
        if src.is_empty() || dst.is_empty() {
            error!("Source and destination paths must be provided");
            return Ok(false);
        }

        let local = Path::new(src);
        if !local.exists() {
            error!("Source file not found: {}", src);
            return Err(NwError::FileNotFound(local.to_path_buf()));
        }

        if !use_jumphost {
            error!("Direct SCP is not supported; use the jump host");
            return Ok(false);
        }

        info!("Copying {} to {} via jump host", src, dst);
        let carrier = self.transfer_carrier().await?;
        let bytes = carrier.upload(local, dst).await.map_err(|e| {
            let e = NwError::from(e);
            error!("Failed to copy {} to {}: {}", src, dst, e);
            e
        })?;

        info!("Copied {} to {} ({} bytes)", src, dst, bytes);
        Ok(true)
    }

    /// Download `src` to `dst` over SCP through the jump host
    pub async fn copy_remote_to_local(&mut self, src: &str, dst: &str, use_jumphost: bool) -> Result<bool> {
        if src.is_empty() || dst.is_empty() {
            error!("Source and destination paths must be provided");
            return Ok(false);
        }

        if !use_jumphost {
            error!("Direct SCP is not supported; use the jump host");
            return Ok(false);
        }

        info!("Copying {} from remote to {}", src, dst);
        let carrier = self.transfer_carrier().await?;
        let bytes = carrier.download(src, Path::new(dst)).await.map_err(|e| {
            let e = NwError::from(e);
            error!("Failed to copy {} to {}: {}", src, dst, e);
            e
        })?;

        info!("Copied {} to {} ({} bytes)", src, dst, bytes);
        Ok(true)
    }

    // Email

    /// Send an HTML notification through the configured relay
    pub async fn send_email(&self, request: &EmailRequest) -> Result<bool> {
        let missing = request.missing_fields();
        if !missing.is_empty() {
            error!("Missing required email fields: {}", missing.join(", "));
            return Err(NwError::MissingFields(missing));
        }
        notify::send_email(request, &self.settings.email).await
    }

    // Teardown

    /// Close the device, the tunnel pair and the jump host; every step runs
    pub async fn close_all_connections(&mut self) -> TeardownReport {
        info!("Closing all connections");
        let report = TeardownReport {
            device: self.close_device().await,
            tunnel: self.disconnect_tunnel().await,
            jumphost: self.disconnect_jumphost().await,
        };

        for (step, reason) in report.failures() {
            warn!("Teardown step '{}' failed: {}", step, reason);
        }
        report
    }

    /// Run `f` with this manager, then close everything however `f` ends.
    ///
    /// A panic inside `f` is resumed after the teardown.
    pub async fn scoped<T, F>(&mut self, f: F) -> (T, TeardownReport)
    where
        F: for<'a> FnOnce(&'a mut NwUtilities) -> BoxFuture<'a, T>,
    {
        let outcome = AssertUnwindSafe(async { f(&mut *self).await }).catch_unwind().await;
        let report = self.close_all_connections().await;

        match outcome {
            Ok(value) => (value, report),
            Err(panic) => {
                error!("Scoped block panicked; connections were closed");
                std::panic::resume_unwind(panic)
            }
        }
    }
}

async fn close_ssh(role: &str, client: Option<Arc<dyn SshClient>>) -> CloseOutcome {
    let Some(client) = client else {
        warn!("No active {} session to close", role);
        return CloseOutcome::NotOpen;
    };

    let host = client.connection_info().host;
    match client.close().await {
        Ok(()) => {
            info!("Closed {} session to {}", role, host);
            CloseOutcome::Closed
        }
        Err(e) => {
            error!("Error closing {} session to {}: {}", role, host, e);
            CloseOutcome::Failed(e.to_string())
        }
    }
}

impl Drop for NwUtilities {
    fn drop(&mut self) {
        if self.device.is_open() || self.jumphost.is_open() || self.tunnel.is_open() {
            warn!("NwUtilities dropped with open sessions; call close_all_connections first");
        }
    }
}

impl std::fmt::Debug for NwUtilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NwUtilities")
            .field("device_open", &self.device.is_open())
            .field("jumphost_open", &self.jumphost.is_open())
            .field("tunnel_open", &self.tunnel.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests;
