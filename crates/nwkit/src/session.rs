//! Per-role session slots and teardown bookkeeping

use nwkit_ssh::SshClient;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Cached state of one session role
#[derive(Debug)]
pub enum SessionSlot<T> {
    /// Nothing cached
    Absent,
    /// An open session
    Open(T),
}

impl<T> Default for SessionSlot<T> {
    fn default() -> Self {
        Self::Absent
    }
}

impl<T> SessionSlot<T> {
    /// Whether a session is cached
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// Borrow the cached session
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Open(value) => Some(value),
            Self::Absent => None,
        }
    }

    /// Cache a session, returning whatever was cached before
    pub fn fill(&mut self, value: T) -> Option<T> {
        std::mem::replace(self, Self::Open(value)).into_option()
    }

    /// Clear the slot, returning the cached session
    pub fn take(&mut self) -> Option<T> {
        std::mem::take(self).into_option()
    }

    fn into_option(self) -> Option<T> {
        match self {
            Self::Open(value) => Some(value),
            Self::Absent => None,
        }
    }
}

/// Result of one teardown step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CloseOutcome {
    /// The session was open and closed cleanly
    Closed,
    /// Nothing was cached
    NotOpen,
    /// Close failed; the slot was cleared anyway
    Failed(String),
}

impl CloseOutcome {
    /// Whether the step failed
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for CloseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::NotOpen => write!(f, "not open"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Outcome of closing a tunnel pair, target first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelCloseOutcome {
    /// Tunneled target session
    pub target: CloseOutcome,
    /// Jump session carrying the tunnel
    pub jump: CloseOutcome,
}

impl TunnelCloseOutcome {
    pub(crate) fn not_open() -> Self {
        Self {
            target: CloseOutcome::NotOpen,
            jump: CloseOutcome::NotOpen,
        }
    }
}

/// What `close_all_connections` did, step by step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Device session
    pub device: CloseOutcome,
    /// Tunnel pair
    pub tunnel: TunnelCloseOutcome,
    /// Plain jump-host session
    pub jumphost: CloseOutcome,
}

impl TeardownReport {
    /// Whether every step succeeded or had nothing to do
    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }

    /// `(step, reason)` for each failed step
    pub fn failures(&self) -> Vec<(&'static str, &str)> {
        [
            ("device", &self.device),
            ("tunnel target", &self.tunnel.target),
            ("tunnel jump host", &self.tunnel.jump),
            ("jump host", &self.jumphost),
        ]
        .into_iter()
        .filter_map(|(step, outcome)| match outcome {
            CloseOutcome::Failed(reason) => Some((step, reason.as_str())),
            _ => None,
        })
        .collect()
    }
}

/// A target session carried through a jump session.
///
/// The jump session must outlive the target; closing goes target first.
#[derive(Clone)]
pub struct TunnelPair {
    /// Session to the destination host
    pub target: Arc<dyn SshClient>,
    /// Session to the jump host carrying the tunnel
    pub jump: Arc<dyn SshClient>,
}

impl fmt::Debug for TunnelPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelPair")
            .field("target", &self.target.connection_info())
            .field("jump", &self.jump.connection_info())
            .finish()
    }
}
