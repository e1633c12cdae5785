//! Unified error type for key manager operations.
//!
//! Each module keeps its own small error enum; [`Error`] wraps them for the
//! public [`KeyManager`](crate::manager::KeyManager) API and the command
//! layer. None of these are fatal: the manager logs them and carries on.

use thiserror::Error;

use crate::config::ConfigError;
use crate::mac::{MacParseError, MacString};
use crate::notify::SubscribersFull;
use crate::registry::RegistryError;
use crate::storage::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A MAC address string that is not six hex octets.
    #[error("invalid MAC address: {0}")]
    InvalidMac(#[from] MacParseError),

    /// No key with this address is registered.
    #[error("key not found: {0}")]
    KeyNotFound(MacString),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Subscribers(#[from] SubscribersFull),
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// The operation referred to a key that is not registered.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
    }

    /// The caller supplied input that can never succeed as given.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidMac(_) | Self::Config(_))
    }

    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Short machine-readable code for command replies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMac(_) => "invalid_mac",
            Self::KeyNotFound(_) => "not_found",
            Self::Registry(RegistryError::Full) => "registry_full",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Subscribers(_) => "subscribers_full",
        }
    }
}
