//! Core types for the x402 v2 micropayment protocol.
//!
//! This crate provides the foundational types shared by every fluxa402 role:
//! buyers (clients), resource servers, and facilitators. It is scheme-agnostic;
//! the concrete payment schemes (`fluxacredit`, `odp-deferred`) live in their
//! own crates and plug into the registries defined here.
//!
//! # Overview
//!
//! The x402 protocol enables micropayments over HTTP by leveraging the
//! 402 Payment Required status code. A resource server answers an unpaid
//! request with a [`proto::PaymentRequired`] offer; the client picks one of
//! the offered [`proto::PaymentRequirements`] and retries with a signed
//! [`proto::PaymentPayload`]; a facilitator verifies (and, scheme permitting,
//! settles) the payment.
//!
//! # Modules
//!
//! - [`network`] - CAIP-2-style network identifiers and wildcard family patterns
//! - [`proto`] - Wire format types and the payment header codecs
//! - [`reason`] - Stable semantic failure tags carried in 200-OK bodies
//! - [`scheme`] - Scheme traits and the `(scheme, network)` dispatch registries
//! - [`facilitator`] - Role-level verify/settle interface and the registry dispatcher
//! - [`timestamp`] - Unix timestamps serialized as decimal strings
//! - [`amount`] - 256-bit token amounts serialized as decimal strings
//! - [`util`] - Base64url header codec helpers

pub mod amount;
pub mod facilitator;
pub mod network;
pub mod proto;
pub mod reason;
pub mod scheme;
pub mod timestamp;
pub mod util;
