//! The `fluxacredit` payment scheme.
//!
//! A single non-negotiable credit charge per request on the logical
//! `fluxa:monetize` network, authenticated by an HTTP Message Signature
//! (RFC 9421 style, Ed25519) bound to the exact bytes of the
//! `PAYMENT-SIGNATURE` header.
//!
//! # Roles
//!
//! - [`server::FluxaCreditServer`] - prices offers and stamps charge ids
//! - [`client::FluxaCreditClient`] - builds payloads and signs the headers
//! - [`facilitator::FluxaCreditFacilitator`] - verifies signatures and runs
//!   the idempotent credit ledger
//!
//! The signature machinery lives in [`httpsig`], scoped to the minimal
//! RFC 9421 subset plus the Web-Bot-Auth directory profile this scheme needs.

use fluxa402_types::network::Network;

pub mod client;
pub mod facilitator;
pub mod httpsig;
pub mod server;

pub use client::FluxaCreditClient;
pub use facilitator::FluxaCreditFacilitator;
pub use server::FluxaCreditServer;

/// Scheme identifier on the wire.
pub const CREDIT_SCHEME: &str = "fluxacredit";

/// Asset symbol of the credit ledger.
pub const FLUXA_CREDIT_ASSET: &str = "FLUXA_CREDIT";

/// The logical credit network this scheme is registered for.
pub fn fluxa_monetize() -> Network {
    Network::new("fluxa", "monetize")
}
