//! Configuration loading.
//!
//! Settings live in a small INI file (`./_config.ini` by default), read with
//! the `config` crate. The raw file is held in a [`ConfigStore`], a
//! section-keyed string map that follows the usual INI conventions:
//!
//! - `[section]` headers, with `[DEFAULT]` values visible from every section
//! - `key = value` or `key: value`, keys case-insensitive
//! - `#` and `;` comment lines
//!
//! [`Settings`] is the typed view the manager actually uses. Each section is
//! resolved against `[DEFAULT]`, deserialized through serde, validated once,
//! and never re-read.

use config::{Config, File, FileFormat, Source};
use nwkit_ssh::{HostKeyPolicy, SshConfig, SshTarget, DEFAULT_SSH_PORT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "./_config.ini";

/// Section whose values every other section inherits
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// Default mail relay host
pub const DEFAULT_SMTP_SERVER: &str = "localhost";

/// Default mail relay port
pub const DEFAULT_SMTP_PORT: u16 = 25;

/// Sections [`Settings`] is built from
const SETTINGS_SECTIONS: [&str; 4] = ["lab_device", "jumphost", "email_data", "ssh"];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Malformed INI text, or a value of the wrong type
    #[error("invalid configuration: {0}")]
    Format(#[from] config::ConfigError),

    /// A key appeared before any `[section]` header
    #[error("key '{key}' appears before the first section header")]
    MissingSectionHeader {
        /// Offending key
        key: String,
    },

    /// A value was rejected after conversion
    #[error("[{section}] {key} = '{value}': {reason}")]
    Invalid {
        /// Section name
        section: String,
        /// Key name
        key: String,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Raw section-keyed settings
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    defaults: HashMap<String, String>,
    sections: HashMap<String, HashMap<String, String>>,
    source: Option<PathBuf>,
}

impl ConfigStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a file; a missing file yields an empty store and a warning
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Config file {} not found, continuing without defaults", path.display());
            return Ok(Self::new());
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut store = Self::parse(&text)?;
        store.source = Some(path.to_path_buf());
        debug!(
            "Loaded {} section(s) from {}",
            store.sections.len(),
            path.display()
        );
        Ok(store)
    }

    /// Parse INI text
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let table = File::from_str(text, FileFormat::Ini).collect()?;

        let mut store = Self::new();
        for (name, value) in table {
            let entries = value
                .into_table()
                .map_err(|_| ConfigError::MissingSectionHeader { key: name.clone() })?;

            let section = store.section_mut(&name);
            for (key, value) in entries {
                section.insert(key.to_lowercase(), value.into_string()?);
            }
        }
        Ok(store)
    }

    fn section_mut(&mut self, name: &str) -> &mut HashMap<String, String> {
        if name == DEFAULT_SECTION {
            &mut self.defaults
        } else {
            self.sections.entry(name.to_string()).or_default()
        }
    }

    /// File this store was loaded from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Whether a section exists
    pub fn has_section(&self, section: &str) -> bool {
        section == DEFAULT_SECTION || self.sections.contains_key(section)
    }

    /// Look up `key` in `section`, falling back to `[DEFAULT]`.
    ///
    /// A section that does not exist has no values, not even defaults.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        if section != DEFAULT_SECTION {
            let values = self.sections.get(section)?;
            if let Some(value) = values.get(&key) {
                return Some(value);
            }
        }
        self.defaults.get(&key).map(String::as_str)
    }

    /// Look up a value with a fallback
    pub fn get_or<'a>(&'a self, section: &str, key: &str, fallback: &'a str) -> &'a str {
        self.get(section, key).unwrap_or(fallback)
    }

    /// Every value visible from `section`, `[DEFAULT]` included
    pub fn section_values(&self, section: &str) -> HashMap<String, String> {
        if !self.has_section(section) {
            return HashMap::new();
        }
        let mut values = self.defaults.clone();
        if let Some(own) = self.sections.get(section) {
            values.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        values
    }

    /// Hand the known sections to the `config` crate for typed deserialization.
    ///
    /// Empty values are left out so they read as unset.
    fn to_config(&self) -> Result<Config, ConfigError> {
        let mut builder = Config::builder();
        for section in SETTINGS_SECTIONS {
            for (key, value) in self.section_values(section) {
                if value.is_empty() {
                    continue;
                }
                builder = builder.set_override(format!("{}.{}", section, key), value)?;
            }
        }
        Ok(builder.build()?)
    }
}

/// `[lab_device]` / `[jumphost]` as written
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TargetSection {
    host_ip: Option<String>,
    jump: Option<String>,
    username: String,
    password: String,
    port: Option<u16>,
}

impl TargetSection {
    /// Build a target; absent when the host key is missing
    fn into_target(self, section: &str, host: Option<String>) -> Result<Option<SshTarget>, ConfigError> {
        let Some(host) = host else {
            return Ok(None);
        };
        let port = self.port.unwrap_or(DEFAULT_SSH_PORT);
        if port == 0 {
            return Err(ConfigError::Invalid {
                section: section.to_string(),
                key: "port".to_string(),
                value: "0".to_string(),
                reason: "port must be non-zero".to_string(),
            });
        }
        Ok(Some(SshTarget::new(host, self.username, self.password).with_port(port)))
    }
}

/// `[email_data]` as written
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EmailSection {
    email_footer: Option<String>,
    smtp_server: Option<String>,
    smtp_port: Option<u16>,
}

/// `[ssh]` as written
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SshSection {
    connect_timeout: Option<u64>,
    command_timeout: Option<u64>,
    host_key_policy: Option<String>,
    known_hosts: Option<PathBuf>,
    save_host_keys: Option<bool>,
}

/// The whole file as written
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    lab_device: TargetSection,
    jumphost: TargetSection,
    email_data: EmailSection,
    ssh: SshSection,
}

/// Mail relay settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailSettings {
    /// Footer line appended to every message
    pub footer: Option<String>,
    /// SMTP relay host
    pub smtp_server: String,
    /// SMTP relay port
    pub smtp_port: u16,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            footer: None,
            smtp_server: DEFAULT_SMTP_SERVER.to_string(),
            smtp_port: DEFAULT_SMTP_PORT,
        }
    }
}

/// Typed, validated settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// `[lab_device]` defaults for device and shell sessions
    pub device: Option<SshTarget>,
    /// `[jumphost]` defaults for jump-host sessions and file copies
    pub jumphost: Option<SshTarget>,
    /// `[email_data]`
    pub email: EmailSettings,
    /// `[ssh]` transport settings
    pub ssh: SshConfig,
}

impl Settings {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_store(&ConfigStore::load(path)?)
    }

    /// Derive settings from a raw store
    pub fn from_store(store: &ConfigStore) -> Result<Self, ConfigError> {
        let mut raw: RawSettings = store.to_config()?.try_deserialize()?;

        let device_host = raw.lab_device.host_ip.take();
        let device = raw.lab_device.into_target("lab_device", device_host)?;
        let jump_host = raw.jumphost.jump.take();
        let jumphost = raw.jumphost.into_target("jumphost", jump_host)?;

        let defaults = EmailSettings::default();
        let email = EmailSettings {
            footer: raw.email_data.email_footer,
            smtp_server: raw.email_data.smtp_server.unwrap_or(defaults.smtp_server),
            smtp_port: raw.email_data.smtp_port.unwrap_or(defaults.smtp_port),
        };

        let mut ssh = SshConfig::default();
        if let Some(secs) = raw.ssh.connect_timeout {
            ssh.connect_timeout = positive(secs, "connect_timeout")?;
        }
        if let Some(secs) = raw.ssh.command_timeout {
            ssh.command_timeout = positive(secs, "command_timeout")?;
        }
        if let Some(policy) = raw.ssh.host_key_policy {
            ssh.host_key_policy = match policy.parse::<HostKeyPolicy>() {
                Ok(parsed) => parsed,
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        section: "ssh".to_string(),
                        key: "host_key_policy".to_string(),
                        value: policy,
                        reason: e.to_string(),
                    })
                }
            };
        }
        if let Some(path) = raw.ssh.known_hosts {
            ssh.known_hosts_path = Some(path);
        }
        if let Some(save) = raw.ssh.save_host_keys {
            ssh.save_host_keys = save;
        }

        Ok(Self {
            device,
            jumphost,
            email,
            ssh,
        })
    }
}

fn positive(secs: u64, key: &str) -> Result<u64, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Invalid {
            section: "ssh".to_string(),
            key: key.to_string(),
            value: "0".to_string(),
            reason: "must be at least one second".to_string(),
        });
    }
    Ok(secs)
}
