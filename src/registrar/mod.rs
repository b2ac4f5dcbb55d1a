//! System proxy registration.
//!
//! # Responsibilities
//! - Point the OS proxy settings at the running listener on start
//! - Restore direct connections on stop
//!
//! # Design Decisions
//! - The engine only talks to the [`Registrar`] trait; platforms plug in behind it
//! - [`NoopRegistrar`] is the default everywhere, so the engine runs headless
//! - Registrar calls are synchronous and short; failures are reported, never retried

use std::net::SocketAddr;
use std::ops::{BitOr, BitOrAssign};

use thiserror::Error;

use crate::config::ProxyMode;

#[cfg(target_os = "linux")]
pub mod gsettings;

#[cfg(target_os = "linux")]
pub use gsettings::GsettingsRegistrar;

/// Which kinds of traffic the OS should send through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorModes(u8);

impl InterceptorModes {
    pub const NONE: Self = Self(0);
    pub const HTTP: Self = Self(1);
    pub const HTTPS: Self = Self(2);
    pub const ALL: Self = Self(1 | 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl Default for InterceptorModes {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for InterceptorModes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for InterceptorModes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<ProxyMode> for InterceptorModes {
    fn from(mode: ProxyMode) -> Self {
        match mode {
            ProxyMode::Http => Self::HTTP,
            ProxyMode::Https => Self::HTTPS,
        }
    }
}

impl FromIterator<ProxyMode> for InterceptorModes {
    fn from_iter<I: IntoIterator<Item = ProxyMode>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::NONE, |modes, mode| modes | Self::from(mode))
    }
}

impl std::fmt::Display for InterceptorModes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.contains(Self::HTTP), self.contains(Self::HTTPS)) {
            (true, true) => write!(f, "http+https"),
            (true, false) => write!(f, "http"),
            (false, true) => write!(f, "https"),
            (false, false) => write!(f, "none"),
        }
    }
}

/// What the registrar is asked to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// Loopback address of the running listener.
    pub address: SocketAddr,
    pub modes: InterceptorModes,
    /// Host patterns that bypass the proxy.
    pub overrides: Vec<String>,
    /// Also bypass loopback and local hostnames.
    pub bypass_local: bool,
}

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("command '{0}' not found")]
    CommandNotFound(String),

    #[error("'{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Installs and removes the OS-level proxy configuration.
pub trait Registrar: Send + Sync {
    fn set_proxy(&self, settings: &ProxySettings) -> Result<(), RegistrarError>;

    fn clear_proxy(&self) -> Result<(), RegistrarError>;
}

/// Leaves OS settings untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistrar;

impl Registrar for NoopRegistrar {
    fn set_proxy(&self, settings: &ProxySettings) -> Result<(), RegistrarError> {
        tracing::debug!(address = %settings.address, modes = %settings.modes, "System proxy registration skipped");
        Ok(())
    }

    fn clear_proxy(&self) -> Result<(), RegistrarError> {
        Ok(())
    }
}
