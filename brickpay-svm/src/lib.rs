//! Solana transfer support for the brickpay checkout flow.
//!
//! Phantom-style injected providers expose a request channel that
//! builds, signs, and submits a system transfer in one round trip.
//! Amounts cross the channel as integer lamports; the Solana Pay style
//! `solana:` payment target carries whole-SOL decimals instead.

use rust_decimal::Decimal;
use serde_json::{Value, json};
use solana_pubkey::Pubkey;
use std::str::FromStr;
use url::Url;

use brickpay::asset::AssetKind;
use brickpay::error::ErrorKind;
use brickpay::payment::{PaymentRequest, PaymentScheme, scheme_uri};
use brickpay::provider::ProviderCall;

/// Lamports per whole SOL, as a power of ten.
const LAMPORT_DECIMALS: u32 = 9;

/// The Solana payment scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolanaScheme;

impl SolanaScheme {
    /// Creates the scheme.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Converts a whole-SOL decimal amount into lamports.
///
/// # Errors
///
/// [`ErrorKind::InvalidAmount`] for negative amounts, amounts finer
/// than one lamport, or amounts past the `u64` lamport range.
pub fn to_lamports(amount: Decimal) -> Result<u64, ErrorKind> {
    if amount.is_sign_negative() {
        return Err(ErrorKind::InvalidAmount);
    }
    let amount = amount.normalize();
    let scale = amount.scale();
    if scale > LAMPORT_DECIMALS {
        return Err(ErrorKind::InvalidAmount);
    }
    let mantissa = u64::try_from(amount.mantissa()).map_err(|_| ErrorKind::InvalidAmount)?;
    10u64
        .checked_pow(LAMPORT_DECIMALS - scale)
        .and_then(|unit| mantissa.checked_mul(unit))
        .ok_or(ErrorKind::InvalidAmount)
}

fn parse_pubkey(raw: &str) -> Result<Pubkey, ErrorKind> {
    Pubkey::from_str(raw).map_err(|e| ErrorKind::Network(format!("invalid Solana address: {e}")))
}

impl PaymentScheme for SolanaScheme {
    fn asset(&self) -> AssetKind {
        AssetKind::Sol
    }

    fn capability_flags(&self) -> &'static [&'static str] {
        &["isPhantom"]
    }

    /// Payment target: `solana:{address}?amount={sol}&label={label}`.
    fn payment_uri(&self, request: &PaymentRequest) -> Result<Url, ErrorKind> {
        let recipient = parse_pubkey(&request.recipient)?;
        scheme_uri(
            "solana",
            &recipient.to_string(),
            &[
                ("amount", &request.crypto_amount.to_string()),
                ("label", &request.label),
            ],
        )
    }

    fn transfer_call(
        &self,
        from: &str,
        request: &PaymentRequest,
    ) -> Result<ProviderCall, ErrorKind> {
        let from = parse_pubkey(from)?;
        let to = parse_pubkey(&request.recipient)?;
        let lamports = to_lamports(request.crypto_amount)?;
        Ok(ProviderCall::new(
            "signAndSendTransfer",
            json!({
                "from": from.to_string(),
                "to": to.to_string(),
                "lamports": lamports,
            }),
        ))
    }

    /// Phantom-style providers answer with `{ "signature": "..." }`;
    /// a bare signature string is accepted too.
    fn transaction_id(&self, response: &Value) -> Result<String, ErrorKind> {
        response
            .get("signature")
            .and_then(Value::as_str)
            .or_else(|| response.as_str())
            .filter(|sig| !sig.is_empty())
            .map(ToOwned::to_owned)
            .ok_or_else(|| ErrorKind::Network("provider returned no signature".to_owned()))
    }
}
