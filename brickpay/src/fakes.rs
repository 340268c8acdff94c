//! Hand-rolled fakes for the environment and provider seams.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use url::Url;

use crate::error::ProviderError;
use crate::provider::{
    AccountsCallback, AccountsSubscription, HostEnvironment, ProviderCall, WalletKind,
    WalletProvider,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type SharedListeners = Arc<Mutex<Vec<(u64, Arc<dyn Fn(Vec<String>) + Send + Sync>)>>>;

/// Scriptable wallet provider.
pub(crate) struct FakeProvider {
    flags: Vec<&'static str>,
    accounts: Mutex<Result<Vec<String>, ProviderError>>,
    account_calls: AtomicUsize,
    pend_accounts: bool,
    pend_requests: bool,
    response: Mutex<Result<Value, ProviderError>>,
    requests: Mutex<Vec<ProviderCall>>,
    listeners: SharedListeners,
    listener_seq: AtomicU64,
}

impl FakeProvider {
    pub(crate) fn new(flags: &[&'static str]) -> Arc<Self> {
        Arc::new(Self::unwrapped(flags))
    }

    /// Provider whose account request never resolves.
    pub(crate) fn pending(flags: &[&'static str]) -> Arc<Self> {
        let mut this = Self::unwrapped(flags);
        this.pend_accounts = true;
        Arc::new(this)
    }

    /// Provider whose request channel never resolves.
    pub(crate) fn pending_requests(flags: &[&'static str], accounts: &[&str]) -> Arc<Self> {
        let mut this = Self::unwrapped(flags);
        this.pend_requests = true;
        this.accounts = Mutex::new(Ok(accounts.iter().map(ToString::to_string).collect()));
        Arc::new(this)
    }

    fn unwrapped(flags: &[&'static str]) -> Self {
        Self {
            flags: flags.to_vec(),
            accounts: Mutex::new(Ok(Vec::new())),
            account_calls: AtomicUsize::new(0),
            pend_accounts: false,
            pend_requests: false,
            response: Mutex::new(Ok(Value::Null)),
            requests: Mutex::new(Vec::new()),
            listeners: Arc::default(),
            listener_seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_accounts(&self, accounts: &[&str]) {
        *lock(&self.accounts) = Ok(accounts.iter().map(ToString::to_string).collect());
    }

    pub(crate) fn set_accounts_error(&self, error: ProviderError) {
        *lock(&self.accounts) = Err(error);
    }

    pub(crate) fn set_response(&self, response: Value) {
        *lock(&self.response) = Ok(response);
    }

    pub(crate) fn set_request_error(&self, error: ProviderError) {
        *lock(&self.response) = Err(error);
    }

    pub(crate) fn account_request_count(&self) -> usize {
        self.account_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn recorded_requests(&self) -> Vec<ProviderCall> {
        lock(&self.requests).clone()
    }

    pub(crate) fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Delivers an account-change notification to all subscribers.
    ///
    /// Callbacks are invoked outside the listener lock so a callback
    /// may release its own subscription.
    pub(crate) fn emit_accounts(&self, accounts: &[&str]) {
        let snapshot: Vec<_> = lock(&self.listeners)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        let accounts: Vec<String> = accounts.iter().map(ToString::to_string).collect();
        for cb in snapshot {
            cb(accounts.clone());
        }
    }
}

#[async_trait]
impl WalletProvider for FakeProvider {
    fn has_capability(&self, flag: &str) -> bool {
        self.flags.contains(&flag)
    }

    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        if self.pend_accounts {
            std::future::pending::<()>().await;
        }
        lock(&self.accounts).clone()
    }

    async fn request(&self, call: ProviderCall) -> Result<Value, ProviderError> {
        lock(&self.requests).push(call);
        if self.pend_requests {
            std::future::pending::<()>().await;
        }
        lock(&self.response).clone()
    }

    fn subscribe_accounts(&self, callback: AccountsCallback) -> AccountsSubscription {
        let id = self.listener_seq.fetch_add(1, Ordering::SeqCst);
        lock(&self.listeners).push((id, Arc::from(callback)));
        let listeners = Arc::clone(&self.listeners);
        AccountsSubscription::new(move || {
            lock(&listeners).retain(|(i, _)| *i != id);
        })
    }
}

/// Scriptable hosting environment.
pub(crate) struct FakeEnv {
    primary: Mutex<Option<Arc<dyn WalletProvider>>>,
    subs: Mutex<Vec<Arc<dyn WalletProvider>>>,
    dedicated: Mutex<HashMap<WalletKind, Arc<dyn WalletProvider>>>,
    url: Mutex<Option<Url>>,
    opened: Mutex<Vec<Url>>,
}

impl FakeEnv {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            primary: Mutex::new(None),
            subs: Mutex::new(Vec::new()),
            dedicated: Mutex::new(HashMap::new()),
            url: Mutex::new(Url::parse("https://app.example/checkout").ok()),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_primary(&self, provider: Arc<dyn WalletProvider>) {
        *lock(&self.primary) = Some(provider);
    }

    pub(crate) fn add_sub(&self, provider: Arc<dyn WalletProvider>) {
        lock(&self.subs).push(provider);
    }

    pub(crate) fn set_dedicated(&self, kind: WalletKind, provider: Arc<dyn WalletProvider>) {
        lock(&self.dedicated).insert(kind, provider);
    }

    pub(crate) fn clear_url(&self) {
        *lock(&self.url) = None;
    }

    pub(crate) fn opened(&self) -> Vec<Url> {
        lock(&self.opened).clone()
    }
}

impl HostEnvironment for FakeEnv {
    fn primary(&self) -> Option<Arc<dyn WalletProvider>> {
        lock(&self.primary).clone()
    }

    fn sub_providers(&self) -> Vec<Arc<dyn WalletProvider>> {
        lock(&self.subs).clone()
    }

    fn dedicated(&self, kind: WalletKind) -> Option<Arc<dyn WalletProvider>> {
        lock(&self.dedicated).get(&kind).cloned()
    }

    fn current_url(&self) -> Option<Url> {
        lock(&self.url).clone()
    }

    fn open_uri(&self, uri: &Url) {
        lock(&self.opened).push(uri.clone());
    }
}
