//! Account-change subscription plumbing.
//!
//! A connection owns exactly one subscription to its provider's
//! account-change channel. Notifications are normalized into state
//! transitions in arrival order: an empty list clears the connection,
//! a changed first entry swaps the active account in place without a
//! reconnect handshake. The subscription guard is released when the
//! controller leaves the connected state or the session is dropped.

use std::sync::Arc;

use crate::connection::ControllerInner;
use crate::provider::{AccountsSubscription, WalletProvider};

/// Subscribes the controller to `provider`'s account-change channel.
///
/// The callback holds only a weak reference, so a dropped session
/// cannot be kept alive by a chatty provider.
pub(crate) fn attach(
    inner: &Arc<ControllerInner>,
    provider: &Arc<dyn WalletProvider>,
) -> AccountsSubscription {
    let weak = Arc::downgrade(inner);
    provider.subscribe_accounts(Box::new(move |accounts| {
        if let Some(inner) = weak.upgrade() {
            inner.accounts_changed(&accounts);
        }
    }))
}
