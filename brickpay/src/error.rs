//! The recoverable failure taxonomy.
//!
//! Nothing in this subsystem is fatal: every public operation returns a
//! result that either succeeds or carries one of the kinds below, and
//! each kind is locally recoverable by retrying the specific operation
//! that produced it.

use serde::{Deserialize, Serialize};

/// Failure kinds a public operation can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// No injected provider satisfied the requested capability.
    ///
    /// Non-fatal: connection attempts degrade to a wallet deep link
    /// and dispatch degrades to a fallback payment target instead of
    /// failing.
    #[error("no capable wallet provider found")]
    ProviderNotFound,

    /// The user declined the request in the wallet's own UI.
    #[error("request rejected in the wallet")]
    UserRejected,

    /// The fiat amount was non-positive or malformed.
    #[error("payment amount must be positive")]
    InvalidAmount,

    /// No rate or scheme is registered for the asset kind.
    #[error("unsupported asset: {0}")]
    UnsupportedAsset(String),

    /// The provider channel failed.
    #[error("provider channel failure: {0}")]
    Network(String),

    /// The application-level bound elapsed before the provider
    /// resolved. A late result from the underlying call is discarded.
    #[error("operation timed out")]
    Timeout,

    /// Another connect or dispatch call is still outstanding.
    /// Concurrent requests are rejected, not queued.
    #[error("another request is already in flight")]
    Busy,
}

/// Error surfaced by a provider's request channel.
///
/// Providers distinguish a deliberate user denial from transport or
/// internal failures; everything else about their error shape is
/// opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The user dismissed or denied the request in the wallet UI.
    #[error("rejected by user: {0}")]
    Rejected(String),

    /// Transport or provider-internal failure.
    #[error("provider channel error: {0}")]
    Channel(String),
}

impl ProviderError {
    /// Maps the channel error onto the public taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Rejected(_) => ErrorKind::UserRejected,
            Self::Channel(msg) => ErrorKind::Network(msg.clone()),
        }
    }
}
