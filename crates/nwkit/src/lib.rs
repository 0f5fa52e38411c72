//! # nwkit
//!
//! Network automation helpers built around one manager, [`NwUtilities`]:
//!
//! - NETCONF sessions to Junos devices, with a shell sub-session
//! - SSH sessions to a jump host, and sessions tunneled through it
//! - SCP file copy carried by the jump-host session
//! - HTML email notifications with attachments
//!
//! ```no_run
//! use nwkit::{NwUtilities, SshTarget};
//!
//! # async fn demo() -> nwkit::Result<()> {
//! let mut nw = NwUtilities::new()?;
//! let device = nw.open_device(&SshTarget::new("192.0.2.10", "netops", "secret")).await?;
//! println!("{:?}", device.facts());
//! nw.close_all_connections().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use nwkit_netconf as netconf;
pub use nwkit_ssh as ssh;

/// Error types for the nwkit library
pub mod error;

/// INI configuration and typed settings
pub mod config;

/// Session slots and teardown reports
pub mod session;

/// Managed device sessions
pub mod device;

/// Email notifications
pub mod notify;

/// Local filesystem checks
pub mod fs;

/// Logging setup
pub mod logging;

/// The session manager
pub mod utilities;

pub use config::{ConfigError, ConfigStore, EmailSettings, Settings};
pub use device::{DeviceConnector, DeviceFacts, DeviceSession, ShellOutput, ShellSession};
pub use error::NwError;
pub use notify::EmailRequest;
pub use nwkit_ssh::{HostKeyPolicy, SshClient, SshConfig, SshConnector, SshTarget};
pub use session::{CloseOutcome, SessionSlot, TeardownReport, TunnelCloseOutcome, TunnelPair};
pub use utilities::{NwUtilities, NwUtilitiesBuilder};

/// Result type alias for nwkit operations
pub type Result<T> = std::result::Result<T, NwError>;
