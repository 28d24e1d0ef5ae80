//! Error types for the integration crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `RegistrationError`: Invalid or duplicate integration configuration
//! - `StoreError`: Failures of the shared key/expiry store
//! - `TransportError`: Failures that produced no HTTP response
//! - `StartupError`: Failures building a framework from settings
//!
//! Only registration and start-up surface errors to callers. Store and transport errors
//! are logged and folded into `ApiResponse` / `SyncResult` values.

use std::fmt;

/// Errors from registering an integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The integration name is not usable as a key.
    InvalidName { name: String, reason: String },
    /// An integration with this name is already registered.
    AlreadyRegistered { name: String },
    /// The base URL is not an absolute http(s) URL.
    InvalidBaseUrl { name: String, reason: String },
    /// A numeric limit is out of range.
    InvalidLimit {
        name: String,
        field: &'static str,
        reason: String,
    },
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName { name, reason } => {
                write!(f, "invalid integration name '{name}': {reason}")
            }
            Self::AlreadyRegistered { name } => {
                write!(f, "integration '{name}' is already registered")
            }
            Self::InvalidBaseUrl { name, reason } => {
                write!(f, "integration '{name}' has an invalid base URL: {reason}")
            }
            Self::InvalidLimit {
                name,
                field,
                reason,
            } => {
                write!(f, "integration '{name}' has an invalid {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for RegistrationError {}

/// Errors from the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    Unavailable { reason: String },
    /// A command was rejected by the store.
    CommandFailed { command: &'static str, reason: String },
    /// The key holds a value of a different kind.
    WrongType { key: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "shared store unavailable: {reason}"),
            Self::CommandFailed { command, reason } => {
                write!(f, "shared store command '{command}' failed: {reason}")
            }
            Self::WrongType { key } => {
                write!(f, "shared store key '{key}' holds the wrong kind of value")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from a transport attempt that produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The attempt did not finish within its timeout.
    Timeout,
    /// The connection could not be established or was reset.
    Connection { reason: String },
    /// Any other failure (invalid request, body read error, ...).
    Other { reason: String },
}

impl TransportError {
    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection { .. })
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Request timeout"),
            Self::Connection { reason } => write!(f, "Connection error: {reason}"),
            Self::Other { reason } => write!(f, "Request failed: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors from building a framework out of settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    /// The shared store could not be opened.
    Store { reason: String },
    /// A configured integration was rejected.
    Registration { name: String, reason: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store { reason } => write!(f, "failed to open shared store: {reason}"),
            Self::Registration { name, reason } => {
                write!(f, "failed to register integration '{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for StartupError {}
