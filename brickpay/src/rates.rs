//! Fiat-to-crypto conversion.

use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::asset::AssetKind;
use crate::error::ErrorKind;

/// Source of USD exchange rates for supported assets.
///
/// The shipped implementation is a fixed demo table; a live source
/// plugs in behind this trait without touching the dispatcher.
pub trait ExchangeRateProvider: Send + Sync {
    /// USD price of one whole unit of the asset.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnsupportedAsset`] when no rate is known for the
    /// asset kind.
    fn rate(&self, asset: AssetKind) -> Result<Decimal, ErrorKind>;
}

/// Static demo rate table. Deterministic, no side effects.
#[derive(Debug, Clone)]
pub struct FixedRateTable(HashMap<AssetKind, Decimal>);

impl FixedRateTable {
    /// Builds a table from explicit `(asset, usd_rate)` pairs.
    #[must_use]
    pub fn new(rates: impl IntoIterator<Item = (AssetKind, Decimal)>) -> Self {
        Self(rates.into_iter().collect())
    }
}

impl Default for FixedRateTable {
    /// The demo rates: BTC 60 000, ETH 2 000, SOL 150 USD.
    fn default() -> Self {
        Self::new([
            (AssetKind::Btc, Decimal::from(60_000)),
            (AssetKind::Eth, Decimal::from(2_000)),
            (AssetKind::Sol, Decimal::from(150)),
        ])
    }
}

impl ExchangeRateProvider for FixedRateTable {
    fn rate(&self, asset: AssetKind) -> Result<Decimal, ErrorKind> {
        self.0
            .get(&asset)
            .copied()
            .ok_or_else(|| ErrorKind::UnsupportedAsset(asset.to_string()))
    }
}
