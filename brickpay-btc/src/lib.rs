//! Bitcoin support for the brickpay checkout flow.
//!
//! Bitcoin has no injected provider channel: no wallet capability flag
//! marks a handle as able to sign a Bitcoin transfer from the page.
//! Every Bitcoin payment therefore degrades to a BIP-21 `bitcoin:`
//! payment target the user completes in their own wallet.

use serde_json::Value;
use url::Url;

use brickpay::asset::AssetKind;
use brickpay::error::ErrorKind;
use brickpay::payment::{PaymentRequest, PaymentScheme, scheme_uri};
use brickpay::provider::ProviderCall;

/// The Bitcoin payment scheme.
///
/// Advertises no capability flags, so the dispatcher routes every
/// Bitcoin payment straight to [`BitcoinScheme::payment_uri`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BitcoinScheme;

impl BitcoinScheme {
    /// Creates the scheme.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PaymentScheme for BitcoinScheme {
    fn asset(&self) -> AssetKind {
        AssetKind::Btc
    }

    fn capability_flags(&self) -> &'static [&'static str] {
        &[]
    }

    /// BIP-21 target: `bitcoin:{address}?amount={btc}&label={label}`.
    ///
    /// The amount is rendered in whole BTC at the asset's display
    /// precision, as BIP-21 specifies.
    fn payment_uri(&self, request: &PaymentRequest) -> Result<Url, ErrorKind> {
        scheme_uri(
            "bitcoin",
            &request.recipient,
            &[
                ("amount", &request.crypto_amount.to_string()),
                ("label", &request.label),
            ],
        )
    }

    fn transfer_call(
        &self,
        _from: &str,
        _request: &PaymentRequest,
    ) -> Result<ProviderCall, ErrorKind> {
        // Unreachable through the dispatcher: no flags means no
        // signing path is ever resolved.
        Err(ErrorKind::UnsupportedAsset(
            AssetKind::Btc.ticker().to_owned(),
        ))
    }

    fn transaction_id(&self, _response: &Value) -> Result<String, ErrorKind> {
        Err(ErrorKind::UnsupportedAsset(
            AssetKind::Btc.ticker().to_owned(),
        ))
    }
}
