//! Injected wallet providers and environment discovery.
//!
//! The hosting environment (a browser page, a wallet's in-app browser,
//! a test harness) injects zero or more wallet provider objects. This
//! module reframes that ambient access as injected dependencies: the
//! environment is a [`HostEnvironment`] trait object, each wallet
//! handle is a [`WalletProvider`], and [`ProviderRegistry`] performs a
//! synchronous capability scan over whatever the environment currently
//! exposes.
//!
//! Nothing here is cached: providers can be injected or removed at any
//! time, so every discovery call re-resolves from scratch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::error::ProviderError;

/// The wallet implementations this subsystem knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletKind {
    /// MetaMask browser extension / mobile app.
    #[serde(rename = "metamask")]
    MetaMask,
    /// Coinbase Wallet.
    #[serde(rename = "coinbase-wallet")]
    CoinbaseWallet,
    /// Binance Web3 Wallet (and Trust-style injected variants).
    #[serde(rename = "binance-wallet")]
    BinanceWallet,
    /// Phantom (Solana).
    #[serde(rename = "phantom")]
    Phantom,
}

impl WalletKind {
    /// All known wallet kinds, in the order the UI lists them.
    pub const ALL: [Self; 4] = [
        Self::MetaMask,
        Self::CoinbaseWallet,
        Self::BinanceWallet,
        Self::Phantom,
    ];

    /// Capability flags identifying this wallet on an injected handle,
    /// in preference order.
    #[must_use]
    pub const fn capability_flags(self) -> &'static [&'static str] {
        match self {
            Self::MetaMask => &["isMetaMask"],
            Self::CoinbaseWallet => &["isCoinbaseWallet"],
            Self::BinanceWallet => &["isBinance", "isTrust", "isToshi"],
            Self::Phantom => &["isPhantom"],
        }
    }

    /// True when the environment may expose this wallet as a dedicated
    /// global object rather than through the primary provider.
    #[must_use]
    pub const fn has_dedicated_global(self) -> bool {
        matches!(self, Self::BinanceWallet | Self::Phantom)
    }
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MetaMask => "metamask",
            Self::CoinbaseWallet => "coinbase-wallet",
            Self::BinanceWallet => "binance-wallet",
            Self::Phantom => "phantom",
        };
        f.write_str(name)
    }
}

/// A message submitted through a provider's JSON request channel.
///
/// Mirrors the `request({ method, params })` shape injected providers
/// expose, so chain crates can describe transfers without the core
/// knowing any chain's wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCall {
    /// Provider method name (e.g. `eth_sendTransaction`).
    pub method: String,
    /// Method parameters, already in the provider's expected shape.
    pub params: Value,
}

impl ProviderCall {
    /// Creates a new provider-channel call.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Callback invoked with the provider's current account list on every
/// account-change notification.
pub type AccountsCallback = Box<dyn Fn(Vec<String>) + Send + Sync>;

/// Guard for an account-change subscription.
///
/// Dropping the guard (or calling [`AccountsSubscription::unsubscribe`])
/// releases the provider-side callback exactly once, so repeated
/// connect/disconnect cycles cannot accumulate dangling callbacks.
pub struct AccountsSubscription(Option<Box<dyn FnOnce() + Send>>);

impl AccountsSubscription {
    /// Wraps the provider's release action.
    #[must_use]
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(release)))
    }

    /// Subscription that releases nothing, for providers without a
    /// notification channel.
    #[must_use]
    pub const fn noop() -> Self {
        Self(None)
    }

    /// Releases the subscription now instead of at drop time.
    pub fn unsubscribe(mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

impl Drop for AccountsSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

impl fmt::Debug for AccountsSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AccountsSubscription")
            .field(&self.0.is_some())
            .finish()
    }
}

/// An injected wallet handle.
///
/// Implementations wrap whatever object the hosting environment
/// exposes. The core consumes only three operations: a capability
/// probe, an account request, and the JSON request channel transfers
/// are submitted through.
///
/// Implementations must not hold internal locks while invoking
/// account-change callbacks; a callback may release its own
/// subscription re-entrantly.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// True when the handle carries the given capability flag.
    fn has_capability(&self, flag: &str) -> bool;

    /// Asks the wallet for its account list, prompting the user if the
    /// page has no standing grant.
    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError>;

    /// Submits a call through the provider's request channel.
    async fn request(&self, call: ProviderCall) -> Result<Value, ProviderError>;

    /// Registers an account-change callback, returning its release
    /// guard.
    fn subscribe_accounts(&self, callback: AccountsCallback) -> AccountsSubscription;
}

/// The hosting environment's injection surface and navigation
/// primitive.
///
/// This is the seam that replaces ambient global reads: production code
/// adapts the real page globals, tests substitute fakes.
pub trait HostEnvironment: Send + Sync {
    /// The primary injected provider, if any.
    fn primary(&self) -> Option<Arc<dyn WalletProvider>>;

    /// Sub-providers exposed when the primary aggregates several
    /// wallets, in enumeration order.
    fn sub_providers(&self) -> Vec<Arc<dyn WalletProvider>>;

    /// A dedicated provider global for the given wallet kind, if
    /// injected.
    fn dedicated(&self, kind: WalletKind) -> Option<Arc<dyn WalletProvider>>;

    /// The page address embedded into wallet deep links.
    fn current_url(&self) -> Option<Url>;

    /// Hands a URI to the environment's navigation primitive. Fire and
    /// forget: the outcome is unobservable.
    fn open_uri(&self, uri: &Url);
}

/// A discovered provider matched to a wallet kind.
///
/// Descriptors are not held across calls; each discovery re-resolves
/// against the environment's current injection state.
#[derive(Clone)]
pub struct ProviderDescriptor {
    /// The wallet kind the handle was matched for.
    pub kind: WalletKind,
    /// The capability flag that matched (the kind's primary flag for
    /// dedicated globals).
    pub capability_flag: &'static str,
    /// The opaque provider handle.
    pub handle: Arc<dyn WalletProvider>,
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("kind", &self.kind)
            .field("capability_flag", &self.capability_flag)
            .finish_non_exhaustive()
    }
}

/// Discovers wallet providers in the hosting environment.
#[derive(Clone)]
pub struct ProviderRegistry {
    env: Arc<dyn HostEnvironment>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry").finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    /// Creates a registry over the given environment.
    #[must_use]
    pub fn new(env: Arc<dyn HostEnvironment>) -> Self {
        Self { env }
    }

    /// The environment this registry scans.
    #[must_use]
    pub fn env(&self) -> &Arc<dyn HostEnvironment> {
        &self.env
    }

    /// Single synchronous pass for one capability flag: the primary
    /// provider first, then the aggregator's sub-providers in
    /// enumeration order.
    ///
    /// The first match wins. When several sub-providers carry the same
    /// flag the winner is whichever the environment enumerates first,
    /// which is not stable across environments.
    #[must_use]
    pub fn discover_flag(&self, flag: &str) -> Option<Arc<dyn WalletProvider>> {
        if let Some(primary) = self.env.primary()
            && primary.has_capability(flag)
        {
            return Some(primary);
        }
        self.env
            .sub_providers()
            .into_iter()
            .find(|p| p.has_capability(flag))
    }

    /// Resolves a provider for the wallet kind: the kind's dedicated
    /// global first (when it has one), then each of its capability
    /// flags in preference order.
    #[must_use]
    pub fn discover(&self, kind: WalletKind) -> Option<ProviderDescriptor> {
        let primary_flag = kind.capability_flags().first().copied().unwrap_or("");
        if kind.has_dedicated_global()
            && let Some(handle) = self.env.dedicated(kind)
        {
            tracing::debug!(wallet = %kind, "matched dedicated provider global");
            return Some(ProviderDescriptor {
                kind,
                capability_flag: primary_flag,
                handle,
            });
        }
        kind.capability_flags().iter().find_map(|flag| {
            self.discover_flag(flag).map(|handle| {
                tracing::debug!(wallet = %kind, flag, "matched injected provider");
                ProviderDescriptor {
                    kind,
                    capability_flag: flag,
                    handle,
                }
            })
        })
    }

    /// First provider satisfying any of the given flags, scanning the
    /// primary provider, aggregator sub-providers, and dedicated
    /// globals in that order.
    #[must_use]
    pub fn discover_capable(&self, flags: &[&'static str]) -> Option<Arc<dyn WalletProvider>> {
        for flag in flags {
            if let Some(handle) = self.discover_flag(flag) {
                return Some(handle);
            }
        }
        WalletKind::ALL
            .into_iter()
            .filter(|k| k.has_dedicated_global())
            .filter_map(|k| self.env.dedicated(k))
            .find(|handle| flags.iter().any(|flag| handle.has_capability(flag)))
    }
}
