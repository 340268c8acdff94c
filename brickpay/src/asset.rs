//! Asset classes and their fixed display precision.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The asset classes a catalog item can be paid in.
///
/// Serializes to the uppercase ticker (`"BTC"`, `"ETH"`, `"SOL"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetKind {
    /// Bitcoin-style UTXO chain.
    Btc,
    /// Ethereum-compatible account chain.
    Eth,
    /// Solana-style chain.
    Sol,
}

impl AssetKind {
    /// All supported asset kinds.
    pub const ALL: [Self; 3] = [Self::Btc, Self::Eth, Self::Sol];

    /// Number of decimal places amounts of this asset are rounded and
    /// displayed at.
    #[must_use]
    pub const fn precision(self) -> u32 {
        match self {
            Self::Btc => 8,
            Self::Eth => 6,
            Self::Sol => 3,
        }
    }

    /// The uppercase ticker symbol.
    #[must_use]
    pub const fn ticker(self) -> &'static str {
        match self {
            Self::Btc => "BTC",
            Self::Eth => "ETH",
            Self::Sol => "SOL",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_is_fixed_per_asset() {
        assert_eq!(AssetKind::Btc.precision(), 8);
        assert_eq!(AssetKind::Eth.precision(), 6);
        assert_eq!(AssetKind::Sol.precision(), 3);
    }

    #[test]
    fn serializes_as_ticker() {
        assert_eq!(serde_json::to_string(&AssetKind::Btc).unwrap(), "\"BTC\"");
        let parsed: AssetKind = serde_json::from_str("\"SOL\"").unwrap();
        assert_eq!(parsed, AssetKind::Sol);
    }
}
