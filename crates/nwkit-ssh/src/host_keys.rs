//! Host key verification policies

use crate::TransportError;
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// What to do with a server's host key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Trust on first use: accept unknown keys, reject changed ones
    #[default]
    AcceptNew,
    /// Only accept keys already present in known_hosts
    Strict,
    /// Accept every key without checking
    AcceptAny,
}

impl FromStr for HostKeyPolicy {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept-new" | "accept_new" | "tofu" => Ok(Self::AcceptNew),
            "strict" | "yes" => Ok(Self::Strict),
            "accept-any" | "accept_any" | "no" => Ok(Self::AcceptAny),
            other => Err(TransportError::Configuration(format!(
                "unknown host key policy '{}' (expected accept-new, strict or accept-any)",
                other
            ))),
        }
    }
}

/// Name used for a host in known_hosts lines
pub fn known_hosts_entry(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// Check the key presented during the handshake against the policy
pub fn verify_host_key(
    session: &Session,
    host: &str,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts_path: Option<&Path>,
    save_new_keys: bool,
) -> Result<(), TransportError> {
    if policy == HostKeyPolicy::AcceptAny {
        debug!("Skipping host key verification for {}:{}", host, port);
        return Ok(());
    }

    let (key, key_type) = session
        .host_key()
        .ok_or_else(|| TransportError::HostKey(format!("{} presented no host key", host)))?;

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| TransportError::from_ssh("known hosts init", e))?;

    if let Some(path) = known_hosts_path.filter(|p| p.exists()) {
        if let Err(e) = known_hosts.read_file(path, KnownHostFileKind::OpenSSH) {
            warn!("Could not read known hosts file {}: {}", path.display(), e);
        }
    }

    match known_hosts.check_port(host, port, key) {
        CheckResult::Match => {
            debug!("Host key for {}:{} matches known hosts", host, port);
            Ok(())
        }
        CheckResult::Mismatch => Err(TransportError::HostKey(format!(
            "host key for {} does not match the recorded key",
            known_hosts_entry(host, port)
        ))),
        CheckResult::NotFound | CheckResult::Failure => {
            if policy == HostKeyPolicy::Strict {
                return Err(TransportError::HostKey(format!(
                    "no known host key for {}",
                    known_hosts_entry(host, port)
                )));
            }

            info!("Accepting new host key for {}", known_hosts_entry(host, port));
            known_hosts
                .add(&known_hosts_entry(host, port), key, "added by nwkit", key_type.into())
                .map_err(|e| TransportError::from_ssh("known hosts add", e))?;

            if save_new_keys {
                if let Some(path) = known_hosts_path {
                    if let Err(e) = known_hosts.write_file(path, KnownHostFileKind::OpenSSH) {
                        warn!("Could not save host key to {}: {}", path.display(), e);
                    }
                }
            }
            Ok(())
        }
    }
}
