//! EIP-155 (EVM) transfer support for the brickpay checkout flow.
//!
//! Any EVM-flavored injected provider can sign an ETH transfer, so
//! this scheme matches every EVM capability flag the wallet set
//! exposes and submits through the standard `eth_sendTransaction`
//! request-channel method. Amounts cross the channel as hex-encoded
//! wei.

use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::str::FromStr;
use url::Url;

use brickpay::asset::AssetKind;
use brickpay::error::ErrorKind;
use brickpay::payment::{PaymentRequest, PaymentScheme, scheme_uri};
use brickpay::provider::ProviderCall;

/// Wei per whole ETH, as a power of ten.
const WEI_DECIMALS: u32 = 18;

/// The EVM payment scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct Eip155Scheme;

impl Eip155Scheme {
    /// Creates the scheme.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Converts a whole-ETH decimal amount into wei.
///
/// # Errors
///
/// [`ErrorKind::InvalidAmount`] for negative amounts or amounts finer
/// than one wei.
pub fn to_wei(amount: Decimal) -> Result<U256, ErrorKind> {
    if amount.is_sign_negative() {
        return Err(ErrorKind::InvalidAmount);
    }
    let amount = amount.normalize();
    let scale = amount.scale();
    if scale > WEI_DECIMALS {
        return Err(ErrorKind::InvalidAmount);
    }
    let mantissa = u128::try_from(amount.mantissa()).map_err(|_| ErrorKind::InvalidAmount)?;
    U256::from(mantissa)
        .checked_mul(U256::from(10u8).pow(U256::from(WEI_DECIMALS - scale)))
        .ok_or(ErrorKind::InvalidAmount)
}

fn parse_address(raw: &str) -> Result<Address, ErrorKind> {
    Address::from_str(raw).map_err(|e| ErrorKind::Network(format!("invalid EVM address: {e}")))
}

impl PaymentScheme for Eip155Scheme {
    fn asset(&self) -> AssetKind {
        AssetKind::Eth
    }

    fn capability_flags(&self) -> &'static [&'static str] {
        &[
            "isMetaMask",
            "isCoinbaseWallet",
            "isBinance",
            "isTrust",
            "isToshi",
        ]
    }

    /// Payment target: `ethereum:{address}?value={wei}&label={label}`.
    fn payment_uri(&self, request: &PaymentRequest) -> Result<Url, ErrorKind> {
        let recipient = parse_address(&request.recipient)?;
        let wei = to_wei(request.crypto_amount)?;
        scheme_uri(
            "ethereum",
            &recipient.to_string(),
            &[("value", &wei.to_string()), ("label", &request.label)],
        )
    }

    fn transfer_call(
        &self,
        from: &str,
        request: &PaymentRequest,
    ) -> Result<ProviderCall, ErrorKind> {
        let from = parse_address(from)?;
        let to = parse_address(&request.recipient)?;
        let wei = to_wei(request.crypto_amount)?;
        Ok(ProviderCall::new(
            "eth_sendTransaction",
            json!([{
                "from": from.to_string(),
                "to": to.to_string(),
                "value": format!("{wei:#x}"),
            }]),
        ))
    }

    fn transaction_id(&self, response: &Value) -> Result<String, ErrorKind> {
        response
            .as_str()
            .filter(|hash| !hash.is_empty())
            .map(ToOwned::to_owned)
            .ok_or_else(|| ErrorKind::Network("provider returned no transaction hash".to_owned()))
    }
}
