//! Payment requests, scheme routing, and dispatch.
//!
//! [`PaymentDispatcher`] prices a catalog amount into an immutable
//! [`PaymentRequest`], then routes dispatch by asset class to a
//! registered [`PaymentScheme`]. A scheme either describes a
//! provider-channel submission or degrades to a scannable payment
//! target; the dispatcher never lets a provider-channel failure
//! escape, every outcome comes back inside [`PaymentResult`].

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use url::Url;

use crate::asset::AssetKind;
use crate::connection::ConnectionController;
use crate::error::ErrorKind;
use crate::provider::{ProviderCall, WalletProvider};
use crate::rates::ExchangeRateProvider;

/// An immutable, fully priced payment attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRequest {
    /// Asset class the payment is made in.
    pub asset: AssetKind,
    /// The catalog price in USD.
    pub fiat_amount_usd: Decimal,
    /// Crypto amount at the asset's fixed display precision.
    pub crypto_amount: Decimal,
    /// The constant receiving address for the asset class.
    pub recipient: String,
    /// Human-readable payment label (the catalog item name).
    pub label: String,
}

/// How a dispatch attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PaymentOutcome {
    /// Submitted through the provider channel (submission only, not
    /// on-chain confirmation).
    Submitted {
        /// Transaction hash or signature reported by the provider.
        transaction_id: String,
    },
    /// No in-environment signing path; present this target to the user
    /// as a scannable/clickable payment instruction.
    Fallback {
        /// Scheme-specific payment URI.
        uri: Url,
        /// The receiving address, for manual completion.
        recipient: String,
        /// The amount due, for manual completion.
        crypto_amount: Decimal,
    },
    /// Captured failure; retrying the dispatch is always safe.
    Rejected {
        /// What went wrong.
        error: ErrorKind,
    },
}

/// The result of one dispatch attempt, paired with the request it
/// answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentResult {
    /// The request as dispatched.
    pub request: PaymentRequest,
    /// How it ended.
    pub outcome: PaymentOutcome,
}

/// Chain-family behavior behind [`PaymentDispatcher::dispatch`].
///
/// One implementation exists per asset class (see the `brickpay-btc`,
/// `brickpay-evm`, and `brickpay-svm` crates). The dispatcher routes by
/// asset kind and stays ignorant of wire formats.
pub trait PaymentScheme: Send + Sync {
    /// The asset class this scheme pays.
    fn asset(&self) -> AssetKind;

    /// Capability flags identifying providers able to submit this
    /// asset's transfers, in preference order. Empty when no
    /// in-environment signing path exists for the asset class.
    fn capability_flags(&self) -> &'static [&'static str];

    /// Scheme-specific payment URI for out-of-environment completion.
    ///
    /// # Errors
    ///
    /// Only for unrepresentable recipient or label configuration.
    fn payment_uri(&self, request: &PaymentRequest) -> Result<Url, ErrorKind>;

    /// The provider-channel call submitting this payment from `from`.
    ///
    /// # Errors
    ///
    /// When the request cannot be encoded for this chain family.
    fn transfer_call(&self, from: &str, request: &PaymentRequest)
    -> Result<ProviderCall, ErrorKind>;

    /// Extracts the transaction identifier from the provider's
    /// response.
    ///
    /// # Errors
    ///
    /// When the response carries no identifier.
    fn transaction_id(&self, response: &Value) -> Result<String, ErrorKind>;
}

/// Registry of payment schemes keyed by asset kind.
#[derive(Default)]
pub struct SchemeRegistry(HashMap<AssetKind, Box<dyn PaymentScheme>>);

impl fmt::Debug for SchemeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let assets: Vec<AssetKind> = self.0.keys().copied().collect();
        f.debug_tuple("SchemeRegistry").field(&assets).finish()
    }
}

impl SchemeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Registers a scheme under its asset kind, replacing any previous
    /// registration.
    pub fn register(&mut self, scheme: Box<dyn PaymentScheme>) -> &mut Self {
        self.0.insert(scheme.asset(), scheme);
        self
    }

    /// Looks up the scheme for an asset kind.
    #[must_use]
    pub fn by_asset(&self, asset: AssetKind) -> Option<&dyn PaymentScheme> {
        self.0.get(&asset).map(|s| &**s)
    }
}

/// The constant receiving addresses, one per asset class.
///
/// Demo placeholders; real deployments override these through
/// [`DispatcherOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientBook {
    /// Bitcoin receiving address.
    pub btc: String,
    /// ETH-compatible receiving address.
    pub eth: String,
    /// Solana receiving address.
    pub sol: String,
}

impl RecipientBook {
    /// The address for the given asset class.
    #[must_use]
    pub fn for_asset(&self, asset: AssetKind) -> &str {
        match asset {
            AssetKind::Btc => &self.btc,
            AssetKind::Eth => &self.eth,
            AssetKind::Sol => &self.sol,
        }
    }
}

impl Default for RecipientBook {
    fn default() -> Self {
        Self {
            btc: "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq".to_owned(),
            eth: "0xF2a96e3C6A3a1c6a213460a1b294b2B6415Ba833".to_owned(),
            sol: "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM".to_owned(),
        }
    }
}

/// Dispatcher tunables.
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Bound on the transfer-submission round trip. A provider
    /// resolving later than this is ignored.
    pub dispatch_timeout: Duration,
    /// Whether dispatch may re-query the environment for a capable
    /// provider when the connected handle cannot pay the requested
    /// asset, instead of using only the cached connection handle.
    pub rediscover_providers: bool,
    /// Constant recipient per asset class.
    pub recipients: RecipientBook,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(30),
            rediscover_providers: true,
            recipients: RecipientBook::default(),
        }
    }
}

/// Builds and dispatches payment attempts.
pub struct PaymentDispatcher {
    controller: Arc<ConnectionController>,
    schemes: SchemeRegistry,
    rates: Arc<dyn ExchangeRateProvider>,
    options: DispatcherOptions,
    in_flight: AtomicBool,
}

impl fmt::Debug for PaymentDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentDispatcher")
            .field("schemes", &self.schemes)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Resets the in-flight flag even when the dispatch future is dropped
/// mid-submission.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PaymentDispatcher {
    /// Creates a dispatcher over the given connection and schemes.
    #[must_use]
    pub fn new(
        controller: Arc<ConnectionController>,
        schemes: SchemeRegistry,
        rates: Arc<dyn ExchangeRateProvider>,
        options: DispatcherOptions,
    ) -> Self {
        Self {
            controller,
            schemes,
            rates,
            options,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Validates and prices a payment attempt.
    ///
    /// The crypto amount is `fiat / rate` rounded midpoint-away-from-
    /// zero to the asset's fixed precision, then rescaled so display
    /// strings carry trailing zeros (`"0.25000000"`).
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidAmount`] for a non-positive fiat amount
    /// - [`ErrorKind::UnsupportedAsset`] when no rate is known
    pub fn build_payment_request(
        &self,
        asset: AssetKind,
        fiat_amount_usd: Decimal,
        label: impl Into<String>,
    ) -> Result<PaymentRequest, ErrorKind> {
        if fiat_amount_usd <= Decimal::ZERO {
            return Err(ErrorKind::InvalidAmount);
        }
        let rate = self.rates.rate(asset)?;
        if rate <= Decimal::ZERO {
            return Err(ErrorKind::UnsupportedAsset(asset.to_string()));
        }
        let mut crypto_amount = (fiat_amount_usd / rate)
            .round_dp_with_strategy(asset.precision(), RoundingStrategy::MidpointAwayFromZero);
        crypto_amount.rescale(asset.precision());
        Ok(PaymentRequest {
            asset,
            fiat_amount_usd,
            crypto_amount,
            recipient: self.options.recipients.for_asset(asset).to_owned(),
            label: label.into(),
        })
    }

    /// Dispatches a payment attempt.
    ///
    /// Total: provider-channel failures come back inside the result as
    /// [`PaymentOutcome::Rejected`], never as a panic or an `Err`. An
    /// asset with no signing path, or no usable provider, degrades to
    /// [`PaymentOutcome::Fallback`].
    pub async fn dispatch(&self, request: &PaymentRequest) -> PaymentResult {
        let outcome = self.dispatch_outcome(request).await;
        PaymentResult {
            request: request.clone(),
            outcome,
        }
    }

    async fn dispatch_outcome(&self, request: &PaymentRequest) -> PaymentOutcome {
        let Some(scheme) = self.schemes.by_asset(request.asset) else {
            return PaymentOutcome::Rejected {
                error: ErrorKind::UnsupportedAsset(request.asset.to_string()),
            };
        };
        if scheme.capability_flags().is_empty() {
            // No in-environment signing path exists for this asset
            // class at all.
            return Self::fallback(scheme, request);
        }
        let (from, provider) = match self.signing_path(scheme) {
            Ok(path) => path,
            Err(error) => {
                tracing::info!(asset = %request.asset, %error, "degrading to payment target");
                return Self::fallback(scheme, request);
            }
        };
        if self.in_flight.swap(true, Ordering::Acquire) {
            return PaymentOutcome::Rejected {
                error: ErrorKind::Busy,
            };
        }
        let guard = InFlightGuard(&self.in_flight);
        let outcome = self.submit(scheme, provider.as_ref(), &from, request).await;
        drop(guard);
        outcome
    }

    /// Resolves the paying account and a capability-matching provider.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ProviderNotFound`] when the session is not
    /// connected or no provider satisfies the scheme's flags; dispatch
    /// degrades to a fallback target on this error.
    fn signing_path(
        &self,
        scheme: &dyn PaymentScheme,
    ) -> Result<(String, Arc<dyn WalletProvider>), ErrorKind> {
        let state = self.controller.state();
        let account = match state.account {
            Some(account) if state.is_connected() => account,
            _ => return Err(ErrorKind::ProviderNotFound),
        };
        let flags = scheme.capability_flags();
        if let Some(handle) = self.controller.active_provider()
            && flags.iter().any(|flag| handle.has_capability(flag))
        {
            return Ok((account, handle));
        }
        if self.options.rediscover_providers
            && let Some(handle) = self.controller.registry().discover_capable(flags)
        {
            return Ok((account, handle));
        }
        Err(ErrorKind::ProviderNotFound)
    }

    fn fallback(scheme: &dyn PaymentScheme, request: &PaymentRequest) -> PaymentOutcome {
        match scheme.payment_uri(request) {
            Ok(uri) => PaymentOutcome::Fallback {
                uri,
                recipient: request.recipient.clone(),
                crypto_amount: request.crypto_amount,
            },
            Err(error) => PaymentOutcome::Rejected { error },
        }
    }

    async fn submit(
        &self,
        scheme: &dyn PaymentScheme,
        provider: &dyn WalletProvider,
        from: &str,
        request: &PaymentRequest,
    ) -> PaymentOutcome {
        let call = match scheme.transfer_call(from, request) {
            Ok(call) => call,
            Err(error) => return PaymentOutcome::Rejected { error },
        };
        tracing::debug!(asset = %request.asset, method = %call.method, "submitting transfer");
        match tokio::time::timeout(self.options.dispatch_timeout, provider.request(call)).await {
            Err(_elapsed) => {
                tracing::warn!(asset = %request.asset, "transfer submission timed out");
                PaymentOutcome::Rejected {
                    error: ErrorKind::Timeout,
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(asset = %request.asset, %err, "transfer submission failed");
                PaymentOutcome::Rejected { error: err.kind() }
            }
            Ok(Ok(response)) => match scheme.transaction_id(&response) {
                Ok(transaction_id) => {
                    tracing::info!(asset = %request.asset, %transaction_id, "transfer submitted");
                    PaymentOutcome::Submitted { transaction_id }
                }
                Err(error) => PaymentOutcome::Rejected { error },
            },
        }
    }
}

/// Characters escaped in payment-URI query values: everything except
/// ASCII alphanumerics and the RFC 3986 mark characters `-_.!~*'()`.
/// Spaces become `%20`, never `+`; strict BIP-21-style parsers treat a
/// bare `+` as a literal plus.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Builds a `scheme:address?query` payment URI with percent-encoded
/// query values.
///
/// # Errors
///
/// [`ErrorKind::Network`] when the assembled target is unparseable
/// (an address with characters no URI can carry).
pub fn scheme_uri(scheme: &str, address: &str, pairs: &[(&str, &str)]) -> Result<Url, ErrorKind> {
    let query = pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", utf8_percent_encode(value, QUERY_VALUE)))
        .collect::<Vec<_>>()
        .join("&");
    let raw = format!("{scheme}:{address}?{query}");
    Url::parse(&raw).map_err(|e| ErrorKind::Network(format!("malformed payment target: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionController, ControllerOptions};
    use crate::error::ProviderError;
    use crate::fakes::{FakeEnv, FakeProvider};
    use crate::provider::WalletKind;
    use crate::rates::FixedRateTable;
    use serde_json::json;

    /// Minimal scheme used to exercise routing; wire formats are
    /// covered by the chain crates.
    struct TestScheme {
        flags: &'static [&'static str],
    }

    impl PaymentScheme for TestScheme {
        fn asset(&self) -> AssetKind {
            AssetKind::Eth
        }

        fn capability_flags(&self) -> &'static [&'static str] {
            self.flags
        }

        fn payment_uri(&self, request: &PaymentRequest) -> Result<Url, ErrorKind> {
            scheme_uri(
                "test",
                &request.recipient,
                &[("amount", &request.crypto_amount.to_string())],
            )
        }

        fn transfer_call(
            &self,
            from: &str,
            request: &PaymentRequest,
        ) -> Result<ProviderCall, ErrorKind> {
            Ok(ProviderCall::new(
                "test_send",
                json!({ "from": from, "to": request.recipient }),
            ))
        }

        fn transaction_id(&self, response: &Value) -> Result<String, ErrorKind> {
            response
                .as_str()
                .map(ToOwned::to_owned)
                .ok_or_else(|| ErrorKind::Network("missing id".into()))
        }
    }

    fn dispatcher_with(env: Arc<FakeEnv>, flags: &'static [&'static str]) -> PaymentDispatcher {
        let controller = Arc::new(ConnectionController::new(env, ControllerOptions::default()));
        let mut schemes = SchemeRegistry::new();
        schemes.register(Box::new(TestScheme { flags }));
        PaymentDispatcher::new(
            controller,
            schemes,
            Arc::new(FixedRateTable::default()),
            DispatcherOptions::default(),
        )
    }

    async fn connected_dispatcher(
        env: Arc<FakeEnv>,
        flags: &'static [&'static str],
    ) -> PaymentDispatcher {
        let dispatcher = dispatcher_with(env, flags);
        dispatcher
            .controller
            .connect(WalletKind::MetaMask)
            .await
            .unwrap();
        dispatcher
    }

    #[test]
    fn prices_btc_at_eight_decimals() {
        let dispatcher = dispatcher_with(FakeEnv::new(), &[]);
        let request = dispatcher
            .build_payment_request(AssetKind::Btc, Decimal::from(15_000), "Penthouse")
            .unwrap();
        assert_eq!(request.crypto_amount.to_string(), "0.25000000");
    }

    #[test]
    fn prices_eth_at_six_decimals() {
        let dispatcher = dispatcher_with(FakeEnv::new(), &[]);
        let request = dispatcher
            .build_payment_request(AssetKind::Eth, Decimal::from(85_000), "Office")
            .unwrap();
        assert_eq!(request.crypto_amount.to_string(), "42.500000");
    }

    #[test]
    fn conversion_round_trips_within_half_a_rounding_unit() {
        let dispatcher = dispatcher_with(FakeEnv::new(), &[]);
        let table = FixedRateTable::default();
        for (asset, fiat) in [
            (AssetKind::Btc, Decimal::new(1_234_567, 2)),
            (AssetKind::Eth, Decimal::new(999, 2)),
            (AssetKind::Sol, Decimal::new(85_000, 0)),
        ] {
            let request = dispatcher.build_payment_request(asset, fiat, "x").unwrap();
            let rate = table.rate(asset).unwrap();
            let round_trip = request.crypto_amount * rate;
            let half_unit = Decimal::new(5, asset.precision() + 1) * rate;
            assert!(
                (round_trip - fiat).abs() <= half_unit,
                "{asset}: {round_trip} vs {fiat}"
            );
        }
    }

    #[test]
    fn rejects_non_positive_amounts() {
        let dispatcher = dispatcher_with(FakeEnv::new(), &[]);
        for fiat in [Decimal::ZERO, Decimal::from(-5)] {
            assert_eq!(
                dispatcher.build_payment_request(AssetKind::Eth, fiat, "x"),
                Err(ErrorKind::InvalidAmount)
            );
        }
    }

    #[test]
    fn unknown_rate_is_unsupported() {
        let controller = Arc::new(ConnectionController::new(
            FakeEnv::new(),
            ControllerOptions::default(),
        ));
        let dispatcher = PaymentDispatcher::new(
            controller,
            SchemeRegistry::new(),
            Arc::new(FixedRateTable::new([])),
            DispatcherOptions::default(),
        );
        assert_eq!(
            dispatcher.build_payment_request(AssetKind::Sol, Decimal::ONE, "x"),
            Err(ErrorKind::UnsupportedAsset("SOL".into()))
        );
    }

    #[test]
    fn disconnected_session_has_no_signing_path() {
        let dispatcher = dispatcher_with(FakeEnv::new(), &["isMetaMask"]);
        let scheme = dispatcher.schemes.by_asset(AssetKind::Eth).unwrap();
        assert!(matches!(
            dispatcher.signing_path(scheme),
            Err(ErrorKind::ProviderNotFound)
        ));
    }

    #[tokio::test]
    async fn no_provider_degrades_to_fallback() {
        let dispatcher = dispatcher_with(FakeEnv::new(), &["isMetaMask"]);
        let request = dispatcher
            .build_payment_request(AssetKind::Eth, Decimal::from(100), "x")
            .unwrap();
        let result = dispatcher.dispatch(&request).await;
        let PaymentOutcome::Fallback { uri, recipient, .. } = result.outcome else {
            panic!("expected fallback, got {:?}", result.outcome);
        };
        assert_eq!(uri.scheme(), "test");
        assert_eq!(recipient, request.recipient);
    }

    #[tokio::test]
    async fn flagless_scheme_always_falls_back() {
        let env = FakeEnv::new();
        let provider = FakeProvider::new(&["isMetaMask"]);
        provider.set_accounts(&["0xAAA"]);
        env.set_primary(provider);
        let dispatcher = connected_dispatcher(env, &[]).await;

        let request = dispatcher
            .build_payment_request(AssetKind::Eth, Decimal::from(100), "x")
            .unwrap();
        let result = dispatcher.dispatch(&request).await;
        assert!(matches!(result.outcome, PaymentOutcome::Fallback { .. }));
    }

    #[tokio::test]
    async fn connected_capable_provider_submits() {
        let env = FakeEnv::new();
        let provider = FakeProvider::new(&["isMetaMask"]);
        provider.set_accounts(&["0xAAA"]);
        provider.set_response(json!("0xfeedbeef"));
        env.set_primary(provider.clone());
        let dispatcher = connected_dispatcher(env, &["isMetaMask"]).await;

        let request = dispatcher
            .build_payment_request(AssetKind::Eth, Decimal::from(100), "x")
            .unwrap();
        let result = dispatcher.dispatch(&request).await;
        assert_eq!(
            result.outcome,
            PaymentOutcome::Submitted {
                transaction_id: "0xfeedbeef".into()
            }
        );
        let calls = provider.recorded_requests();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "test_send");
        assert_eq!(calls[0].params["from"], "0xAAA");
    }

    #[tokio::test]
    async fn user_rejection_is_captured() {
        let env = FakeEnv::new();
        let provider = FakeProvider::new(&["isMetaMask"]);
        provider.set_accounts(&["0xAAA"]);
        provider.set_request_error(ProviderError::Rejected("nope".into()));
        env.set_primary(provider);
        let dispatcher = connected_dispatcher(env, &["isMetaMask"]).await;

        let request = dispatcher
            .build_payment_request(AssetKind::Eth, Decimal::from(100), "x")
            .unwrap();
        let result = dispatcher.dispatch(&request).await;
        assert_eq!(
            result.outcome,
            PaymentOutcome::Rejected {
                error: ErrorKind::UserRejected
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_submission_times_out() {
        let env = FakeEnv::new();
        let provider = FakeProvider::pending_requests(&["isMetaMask"], &["0xAAA"]);
        env.set_primary(provider);
        let dispatcher = connected_dispatcher(env, &["isMetaMask"]).await;

        let request = dispatcher
            .build_payment_request(AssetKind::Eth, Decimal::from(100), "x")
            .unwrap();
        let result = dispatcher.dispatch(&request).await;
        assert_eq!(
            result.outcome,
            PaymentOutcome::Rejected {
                error: ErrorKind::Timeout
            }
        );
    }

    #[tokio::test]
    async fn overlapping_dispatch_is_busy() {
        let env = FakeEnv::new();
        let provider = FakeProvider::pending_requests(&["isMetaMask"], &["0xAAA"]);
        env.set_primary(provider);
        let dispatcher = Arc::new(connected_dispatcher(env, &["isMetaMask"]).await);

        let request = dispatcher
            .build_payment_request(AssetKind::Eth, Decimal::from(100), "x")
            .unwrap();
        let racing = Arc::clone(&dispatcher);
        let racing_request = request.clone();
        let _first = tokio::spawn(async move { racing.dispatch(&racing_request).await });
        tokio::task::yield_now().await;

        let result = dispatcher.dispatch(&request).await;
        assert_eq!(
            result.outcome,
            PaymentOutcome::Rejected {
                error: ErrorKind::Busy
            }
        );
    }

    #[tokio::test]
    async fn cached_handle_only_mode_skips_rediscovery() {
        let env = FakeEnv::new();
        // Connected through Phantom's dedicated global; an EVM-capable
        // provider is also injected.
        let phantom = FakeProvider::new(&["isPhantom"]);
        phantom.set_accounts(&["So1Account"]);
        env.set_dedicated(WalletKind::Phantom, phantom);
        let metamask = FakeProvider::new(&["isMetaMask"]);
        metamask.set_response(json!("0xhash"));
        env.set_primary(metamask);

        let controller = Arc::new(ConnectionController::new(
            env.clone(),
            ControllerOptions::default(),
        ));
        controller.connect(WalletKind::Phantom).await.unwrap();

        let mut schemes = SchemeRegistry::new();
        schemes.register(Box::new(TestScheme {
            flags: &["isMetaMask"],
        }));
        let dispatcher = PaymentDispatcher::new(
            Arc::clone(&controller),
            schemes,
            Arc::new(FixedRateTable::default()),
            DispatcherOptions {
                rediscover_providers: false,
                ..DispatcherOptions::default()
            },
        );

        let request = dispatcher
            .build_payment_request(AssetKind::Eth, Decimal::from(100), "x")
            .unwrap();
        let result = dispatcher.dispatch(&request).await;
        assert!(matches!(result.outcome, PaymentOutcome::Fallback { .. }));

        // With rediscovery on, the same environment submits.
        let mut schemes = SchemeRegistry::new();
        schemes.register(Box::new(TestScheme {
            flags: &["isMetaMask"],
        }));
        let dispatcher = PaymentDispatcher::new(
            controller,
            schemes,
            Arc::new(FixedRateTable::default()),
            DispatcherOptions::default(),
        );
        let result = dispatcher.dispatch(&request).await;
        assert!(matches!(result.outcome, PaymentOutcome::Submitted { .. }));
    }

    #[tokio::test]
    async fn missing_scheme_is_unsupported() {
        let controller = Arc::new(ConnectionController::new(
            FakeEnv::new(),
            ControllerOptions::default(),
        ));
        let dispatcher = PaymentDispatcher::new(
            controller,
            SchemeRegistry::new(),
            Arc::new(FixedRateTable::default()),
            DispatcherOptions::default(),
        );
        let request = dispatcher
            .build_payment_request(AssetKind::Btc, Decimal::from(100), "x")
            .unwrap();
        let result = dispatcher.dispatch(&request).await;
        assert_eq!(
            result.outcome,
            PaymentOutcome::Rejected {
                error: ErrorKind::UnsupportedAsset("BTC".into())
            }
        );
    }

    #[test]
    fn scheme_uri_percent_encodes_query() {
        let uri = scheme_uri("bitcoin", "bc1qexample", &[("label", "Marina Apartment")]).unwrap();
        assert_eq!(uri.scheme(), "bitcoin");
        // Spaces must encode as %20: a strict BIP-21 parser reads a
        // bare + as a literal plus character.
        assert!(uri.as_str().contains("label=Marina%20Apartment"));
        assert!(!uri.as_str().contains('+'));
    }

    #[test]
    fn scheme_uri_leaves_unreserved_marks_bare() {
        let uri = scheme_uri("solana", "9WzDexample", &[("amount", "566.667")]).unwrap();
        assert!(uri.as_str().ends_with("?amount=566.667"));
    }
}
