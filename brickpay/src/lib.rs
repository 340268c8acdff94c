//! Wallet-provider discovery and cross-chain payment dispatch.
//!
//! This crate is the chain-agnostic core of the checkout flow: it
//! discovers wallet providers injected into the hosting environment,
//! owns the session's connection state, prices catalog items into
//! crypto amounts, and dispatches transfers through whichever provider
//! channel is available, degrading to a scannable payment target when
//! none is.
//!
//! # Overview
//!
//! The UI asks [`connection::ConnectionController::connect`] for a
//! wallet kind. Discovery runs through [`provider::ProviderRegistry`];
//! success lands in a connected state, absence of a provider opens a
//! [`deeplink::DeepLinkFallback`] link and leaves the session
//! disconnected. Payments are built by
//! [`payment::PaymentDispatcher::build_payment_request`] (priced via a
//! [`rates::ExchangeRateProvider`]) and submitted by
//! [`payment::PaymentDispatcher::dispatch`].
//!
//! # Modules
//!
//! - [`asset`] - Asset classes and their fixed display precision
//! - [`connection`] - The session connection state machine
//! - [`deeplink`] - Wallet universal links for provider-less environments
//! - [`error`] - The recoverable failure taxonomy
//! - [`payment`] - Payment requests, scheme routing, and dispatch
//! - [`provider`] - Injected provider traits and discovery
//! - [`rates`] - Fiat-to-crypto conversion
//!
//! Chain-family wire formats live in separate crates (`brickpay-btc`,
//! `brickpay-evm`, `brickpay-svm`), each implementing
//! [`payment::PaymentScheme`].

pub mod asset;
pub mod connection;
pub mod deeplink;
pub mod error;
pub mod payment;
pub mod provider;
pub mod rates;
mod watcher;

#[cfg(test)]
pub(crate) mod fakes;
