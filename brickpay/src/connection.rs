//! The session connection state machine.
//!
//! Exactly one [`ConnectionState`] exists per session. It is owned and
//! mutated only by [`ConnectionController`]; every other component
//! observes it through snapshots or registered watchers.
//!
//! States cycle through `Disconnected -> Connecting -> Connected`
//! (or `Failed`) with no terminal state. Concurrent connect attempts
//! are serialized: a second call while one is outstanding is rejected
//! with [`ErrorKind::Busy`] rather than queued or raced.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use url::Url;

use crate::deeplink::DeepLinkFallback;
use crate::error::ErrorKind;
use crate::provider::{
    AccountsSubscription, HostEnvironment, ProviderRegistry, WalletKind, WalletProvider,
};
use crate::watcher;

/// Where the session currently stands with respect to a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No wallet attached.
    Disconnected,
    /// An account request is in flight.
    Connecting,
    /// A wallet granted an account.
    Connected,
    /// The last attempt failed; retry is allowed.
    Failed,
}

/// The single source of truth for "who am I connected to".
///
/// `account` is populated exactly when `status == Connected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    /// Current machine state.
    pub status: ConnectionStatus,
    /// The granted account address, while connected.
    pub account: Option<String>,
    /// The wallet kind this session targets or holds.
    pub provider_kind: Option<WalletKind>,
    /// The failure that produced a `Failed` status.
    pub error: Option<ErrorKind>,
}

impl ConnectionState {
    /// The session-start state.
    #[must_use]
    pub const fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            account: None,
            provider_kind: None,
            error: None,
        }
    }

    fn failed(error: ErrorKind, kind: WalletKind) -> Self {
        Self {
            status: ConnectionStatus::Failed,
            account: None,
            provider_kind: Some(kind),
            error: Some(error),
        }
    }

    /// True when a wallet account is attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// How a connect attempt completed without an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    /// A provider was found and granted an account.
    Connected(ConnectionState),
    /// No capable provider was injected; a wallet deep link was opened
    /// instead and the session stays disconnected. Absence of a
    /// provider is an alternate completion path, not an error.
    DeepLinkOpened {
        /// The link handed to the environment, `None` when it could
        /// not be built.
        deep_link: Option<Url>,
    },
}

/// Controller tunables.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Bound on the account-request round trip. A provider resolving
    /// later than this is ignored.
    pub connect_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
        }
    }
}

type StateListener = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

struct StateCell {
    state: ConnectionState,
    /// Bumped on every transition so late-resolving provider calls
    /// from a superseded attempt are discarded.
    epoch: u64,
    handle: Option<Arc<dyn WalletProvider>>,
    subscription: Option<AccountsSubscription>,
}

pub(crate) struct ControllerInner {
    registry: ProviderRegistry,
    deep_link: DeepLinkFallback,
    options: ControllerOptions,
    cell: Mutex<StateCell>,
    listeners: Mutex<Vec<(u64, StateListener)>>,
    listener_seq: AtomicU64,
}

impl ControllerInner {
    fn lock_cell(&self) -> MutexGuard<'_, StateCell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(u64, StateListener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Announces the current state to registered watchers, outside any
    /// lock held over the cell.
    fn notify(&self) {
        let state = self.lock_cell().state.clone();
        let snapshot: Vec<StateListener> = self
            .lock_listeners()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in snapshot {
            cb(&state);
        }
    }

    /// Applies `state` if the attempt `epoch` is still current.
    ///
    /// `binding` carries the provider handle and watcher subscription
    /// of a successful connect; it is dropped untouched (releasing its
    /// subscription) when the attempt was superseded.
    fn finish(
        &self,
        epoch: u64,
        state: ConnectionState,
        binding: Option<(Arc<dyn WalletProvider>, AccountsSubscription)>,
    ) -> bool {
        let applied;
        let stale;
        {
            let mut cell = self.lock_cell();
            if cell.epoch == epoch {
                cell.epoch += 1;
                cell.state = state;
                if let Some((handle, subscription)) = binding {
                    cell.handle = Some(handle);
                    cell.subscription = Some(subscription);
                }
                applied = true;
                stale = None;
            } else {
                applied = false;
                stale = Some(binding);
            }
        }
        // Releases a superseded subscription outside the cell lock.
        drop(stale);
        if applied {
            self.notify();
        }
        applied
    }

    /// Normalizes an account-change notification into a transition.
    ///
    /// Applied strictly in arrival order; only meaningful while
    /// connected.
    pub(crate) fn accounts_changed(&self, accounts: &[String]) {
        let released;
        {
            let mut cell = self.lock_cell();
            if cell.state.status != ConnectionStatus::Connected {
                return;
            }
            match accounts.first().filter(|a| !a.is_empty()) {
                None => {
                    tracing::info!("wallet cleared its account list; disconnecting");
                    cell.epoch += 1;
                    cell.state = ConnectionState::disconnected();
                    released = (cell.handle.take(), cell.subscription.take());
                }
                Some(account) => {
                    if cell.state.account.as_deref() == Some(account.as_str()) {
                        return;
                    }
                    tracing::debug!("active account switched in the wallet");
                    cell.epoch += 1;
                    cell.state.account = Some(account.clone());
                    released = (None, None);
                }
            }
        }
        drop(released);
        self.notify();
    }
}

/// Owns and mutates the session's [`ConnectionState`].
#[derive(Clone)]
pub struct ConnectionController {
    inner: Arc<ControllerInner>,
}

impl fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionController")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Guard for a state-change watcher registration; unregisters on drop.
#[derive(Debug)]
pub struct WatchHandle {
    inner: Weak<ControllerInner>,
    id: u64,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.lock_listeners().retain(|(id, _)| *id != self.id);
        }
    }
}

impl ConnectionController {
    /// Creates a controller over the given environment.
    #[must_use]
    pub fn new(env: Arc<dyn HostEnvironment>, options: ControllerOptions) -> Self {
        let registry = ProviderRegistry::new(Arc::clone(&env));
        let deep_link = DeepLinkFallback::new(env);
        Self {
            inner: Arc::new(ControllerInner {
                registry,
                deep_link,
                options,
                cell: Mutex::new(StateCell {
                    state: ConnectionState::disconnected(),
                    epoch: 0,
                    handle: None,
                    subscription: None,
                }),
                listeners: Mutex::new(Vec::new()),
                listener_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock_cell().state.clone()
    }

    /// The discovery registry this controller resolves providers with.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    /// The active provider handle, while connected.
    pub(crate) fn active_provider(&self) -> Option<Arc<dyn WalletProvider>> {
        let cell = self.inner.lock_cell();
        if cell.state.is_connected() {
            cell.handle.clone()
        } else {
            None
        }
    }

    /// Connects the session to a wallet of the given kind.
    ///
    /// Idempotent while already connected to the same kind: the current
    /// state is returned without a second account request. When no
    /// capable provider is injected, a wallet deep link is opened and
    /// the session returns to disconnected (an alternate completion
    /// path, not a failure).
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Busy`] when another attempt is outstanding, or
    ///   when this attempt was superseded by `disconnect` mid-flight
    /// - [`ErrorKind::Timeout`] when the provider exceeds the
    ///   configured bound (a late grant is discarded)
    /// - [`ErrorKind::UserRejected`] / [`ErrorKind::Network`] as
    ///   reported by the provider channel
    pub async fn connect(&self, kind: WalletKind) -> Result<ConnectOutcome, ErrorKind> {
        let epoch = {
            let mut cell = self.inner.lock_cell();
            match cell.state.status {
                ConnectionStatus::Connected if cell.state.provider_kind == Some(kind) => {
                    tracing::debug!(wallet = %kind, "already connected; connect is a no-op");
                    return Ok(ConnectOutcome::Connected(cell.state.clone()));
                }
                ConnectionStatus::Connecting => return Err(ErrorKind::Busy),
                _ => {}
            }
            cell.epoch += 1;
            cell.state = ConnectionState {
                status: ConnectionStatus::Connecting,
                account: None,
                provider_kind: Some(kind),
                error: None,
            };
            // A reconnect to a different kind drops the old binding.
            cell.handle = None;
            cell.subscription = None;
            cell.epoch
        };
        self.inner.notify();

        let Some(descriptor) = self.inner.registry.discover(kind) else {
            tracing::info!(wallet = %kind, "no injected provider; opening deep link");
            let deep_link = self.inner.deep_link.open(kind);
            self.inner
                .finish(epoch, ConnectionState::disconnected(), None);
            return Ok(ConnectOutcome::DeepLinkOpened { deep_link });
        };

        let handle = Arc::clone(&descriptor.handle);
        let attempt = tokio::time::timeout(
            self.inner.options.connect_timeout,
            handle.request_accounts(),
        )
        .await;

        match attempt {
            Err(_elapsed) => {
                tracing::warn!(wallet = %kind, "account request timed out");
                self.inner
                    .finish(epoch, ConnectionState::failed(ErrorKind::Timeout, kind), None);
                Err(ErrorKind::Timeout)
            }
            Ok(Err(err)) => {
                let error = err.kind();
                tracing::warn!(wallet = %kind, %err, "account request failed");
                self.inner
                    .finish(epoch, ConnectionState::failed(error.clone(), kind), None);
                Err(error)
            }
            Ok(Ok(accounts)) => {
                match accounts.into_iter().next().filter(|a| !a.is_empty()) {
                    None => {
                        // A grant with no accounts is a denial.
                        self.inner.finish(
                            epoch,
                            ConnectionState::failed(ErrorKind::UserRejected, kind),
                            None,
                        );
                        Err(ErrorKind::UserRejected)
                    }
                    Some(account) => {
                        let subscription = watcher::attach(&self.inner, &handle);
                        let state = ConnectionState {
                            status: ConnectionStatus::Connected,
                            account: Some(account),
                            provider_kind: Some(kind),
                            error: None,
                        };
                        if self
                            .inner
                            .finish(epoch, state.clone(), Some((handle, subscription)))
                        {
                            tracing::info!(wallet = %kind, "connected");
                            Ok(ConnectOutcome::Connected(state))
                        } else {
                            Err(ErrorKind::Busy)
                        }
                    }
                }
            }
        }
    }

    /// Unconditionally resets the session to disconnected.
    ///
    /// Local-state-only: the provider-side permission grant is not
    /// revoked, so a silent reconnect by the same wallet remains
    /// possible.
    pub fn disconnect(&self) {
        let released;
        {
            let mut cell = self.inner.lock_cell();
            cell.epoch += 1;
            cell.state = ConnectionState::disconnected();
            released = (cell.handle.take(), cell.subscription.take());
        }
        drop(released);
        tracing::debug!("disconnected (local state only)");
        self.inner.notify();
    }

    /// Registers a state-change watcher; the returned guard
    /// unregisters it on drop.
    pub fn watch_account(
        &self,
        callback: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> WatchHandle {
        let id = self.inner.listener_seq.fetch_add(1, Ordering::Relaxed);
        self.inner.lock_listeners().push((id, Arc::new(callback)));
        WatchHandle {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }
}
