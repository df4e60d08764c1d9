//! The `odp-deferred` payment scheme.
//!
//! A payer opens a spend-capped session against a locked debit wallet, then
//! authorizes one EIP-712 receipt per request. Receipts are verified inline
//! and the resource is served immediately; settlement happens later, in
//! contiguous-nonce batches, either synthetically or through the on-chain
//! settlement contract.
//!
//! # Roles
//!
//! - [`client::OdpDeferredClient`] - signs session approvals and receipts
//! - [`facilitator::OdpDeferredFacilitator`] - runs the session state
//!   machine, verification checks, and batch settlement
//! - [`scheduler::AutoSettler`] - the background batch-settlement loop
//!
//! Session state lives behind the [`store::SessionStore`] interface; the
//! facilitator is its single writer.

pub mod chain;
pub mod client;
pub mod eip712;
pub mod facilitator;
pub mod scheduler;
pub mod store;
pub mod types;

pub use chain::{Receipt, SessionApproval};
pub use client::OdpDeferredClient;
pub use facilitator::{OdpDeferredConfig, OdpDeferredFacilitator, SettlementMode};

/// Scheme identifier on the wire.
pub const ODP_SCHEME: &str = "odp-deferred";
