//! Wallet universal links for environments without injected providers.
//!
//! On mobile the wallet is a separate application: when discovery finds
//! nothing, the flow degrades to opening a wallet-specific universal
//! link that embeds the current page address so the wallet's in-app
//! browser can return the user here.

use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::provider::{HostEnvironment, WalletKind};

/// Builds and opens wallet-specific universal links.
///
/// Opening is fire-and-forget: the environment cannot report whether
/// the link reached a wallet, so callers must independently surface
/// manual-completion instructions (address plus amount) as a fallback.
#[derive(Clone)]
pub struct DeepLinkFallback {
    env: Arc<dyn HostEnvironment>,
}

impl fmt::Debug for DeepLinkFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepLinkFallback").finish_non_exhaustive()
    }
}

impl DeepLinkFallback {
    /// Creates the fallback over the given environment.
    #[must_use]
    pub fn new(env: Arc<dyn HostEnvironment>) -> Self {
        Self { env }
    }

    /// The universal link for the wallet kind.
    ///
    /// Returns `None` only when the assembled link is unparseable,
    /// which cannot happen for a well-formed page URL.
    #[must_use]
    pub fn link_for(&self, kind: WalletKind) -> Option<Url> {
        let page = self.env.current_url();
        let page_str = page.as_ref().map(Url::as_str).unwrap_or_default();
        match kind {
            WalletKind::MetaMask => {
                let host_and_path = page_str
                    .trim_start_matches("https://")
                    .trim_start_matches("http://");
                Url::parse(&format!("https://link.metamask.io/dapp/{host_and_path}")).ok()
            }
            WalletKind::CoinbaseWallet => {
                Url::parse_with_params("https://go.cb-w.com/dapp", &[("cb_url", page_str)]).ok()
            }
            WalletKind::BinanceWallet => Url::parse("https://www.binance.com/en/web3wallet").ok(),
            WalletKind::Phantom => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(page_str.as_bytes()).collect();
                Url::parse(&format!(
                    "https://phantom.app/ul/browse/{encoded}?ref={encoded}"
                ))
                .ok()
            }
        }
    }

    /// Opens the deep link through the environment's navigation
    /// primitive and returns what was opened.
    pub fn open(&self, kind: WalletKind) -> Option<Url> {
        let Some(link) = self.link_for(kind) else {
            tracing::warn!(wallet = %kind, "could not build deep link");
            return None;
        };
        tracing::info!(wallet = %kind, link = %link, "opening wallet deep link");
        self.env.open_uri(&link);
        Some(link)
    }
}
