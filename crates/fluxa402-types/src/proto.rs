//! Wire format types for x402 v2 payment messages.
//!
//! This module defines the JSON messages exchanged between buyers, resource
//! servers, and facilitators, plus the codecs for the three payment headers.
//!
//! # Key Types
//!
//! - [`PaymentRequired`] - HTTP 402 response body: the server's offer
//! - [`PaymentRequirements`] - one accepted way to pay
//! - [`PaymentPayload`] - one payment attempt from the buyer
//! - [`VerifyRequest`] / [`VerifyResponse`] - facilitator verification messages
//! - [`SettleRequest`] / [`SettleResponse`] - facilitator settlement messages
//! - [`SupportedResponse`] - facilitator discovery response
//!
//! # Wire Format
//!
//! All types serialize to JSON using camelCase field names. The
//! `PAYMENT-REQUIRED`, `PAYMENT-SIGNATURE`, and `PAYMENT-RESPONSE` headers
//! carry base64url-without-padding of the compact JSON encoding; see
//! [`crate::util::b64`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{serde_as, VecSkipError};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::{Display, Formatter};

use crate::amount::TokenAmount;
use crate::network::Network;
use crate::reason::InvalidReason;
use crate::timestamp::UnixTimestamp;
use crate::util::b64::{HeaderBytes, HeaderCodecError};

/// Name of the header carrying a [`PaymentRequired`] offer.
pub const PAYMENT_REQUIRED_HEADER: &str = "payment-required";
/// Name of the header carrying a [`PaymentPayload`] attempt.
pub const PAYMENT_SIGNATURE_HEADER: &str = "payment-signature";
/// Name of the header carrying a [`PaymentResponse`] outcome.
pub const PAYMENT_RESPONSE_HEADER: &str = "payment-response";

/// Extension key under which the resource server forwards the raw
/// Web-Bot-Auth header material to the facilitator.
pub const WEB_BOT_AUTH_EXTENSION: &str = "web-bot-auth";

/// Version marker for x402 protocol version 2.
///
/// Serializes as the integer `2`; deserialization of any other number fails.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct X402Version2;

impl X402Version2 {
    pub const VALUE: u8 = 2;
}

impl From<X402Version2> for u8 {
    fn from(_: X402Version2) -> Self {
        X402Version2::VALUE
    }
}

impl Serialize for X402Version2 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(Self::VALUE)
    }
}

impl<'de> Deserialize<'de> for X402Version2 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        if num == Self::VALUE {
            Ok(X402Version2)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected version {}, got {}",
                Self::VALUE,
                num
            )))
        }
    }
}

impl Display for X402Version2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::VALUE)
    }
}

/// Metadata about the resource being paid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// URL of the resource.
    pub url: String,
    /// Human-readable description of the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the resource content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ResourceInfo {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            description: None,
            mime_type: None,
        }
    }
}

/// Payment terms set by the seller: one accepted way to pay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// The payment scheme identifier (e.g., `"fluxacredit"`, `"odp-deferred"`).
    pub scheme: String,
    /// The CAIP-2-style network identifier.
    pub network: Network,
    /// The payment amount in the asset's smallest unit.
    pub amount: TokenAmount,
    /// Scheme-specific asset identifier (token address or logical symbol).
    pub asset: String,
    /// The payee identifier (address or logical name).
    pub pay_to: String,
    /// Maximum time in seconds for payment validity.
    pub max_timeout_seconds: u64,
    /// Scheme-specific extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// HTTP 402 Payment Required response body: the server's offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version (always 2).
    pub x402_version: X402Version2,
    /// Optional error message if a prior attempt was malformed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Information about the resource being paid for.
    pub resource: ResourceInfo,
    /// Ordered, non-empty list of acceptable payment methods.
    pub accepts: Vec<PaymentRequirements>,
}

impl PaymentRequired {
    /// Encodes this offer as a `PAYMENT-REQUIRED` header value.
    pub fn to_header(&self) -> Result<String, HeaderCodecError> {
        Ok(HeaderBytes::encode_json(self)?.to_string())
    }

    /// Decodes a `PAYMENT-REQUIRED` header value.
    pub fn from_header(value: &str) -> Result<Self, HeaderCodecError> {
        HeaderBytes::from(value).decode_json()
    }
}

/// A signed payment attempt from the buyer.
///
/// `accepted` echoes the [`PaymentRequirements`] the buyer agreed to;
/// `payload` is the scheme-specific signed material. `extensions` carries
/// out-of-band context, notably the [`WebBotAuthEnvelope`] attached by the
/// resource server for the credit scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Protocol version (always 2).
    pub x402_version: X402Version2,
    /// Information about the resource being paid for.
    pub resource: ResourceInfo,
    /// The payment requirements the buyer accepted.
    pub accepted: PaymentRequirements,
    /// The scheme-specific signed payload.
    pub payload: serde_json::Value,
    /// Out-of-band context keyed by extension name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl PaymentPayload {
    /// Encodes this attempt as a `PAYMENT-SIGNATURE` header value.
    pub fn to_header(&self) -> Result<String, HeaderCodecError> {
        Ok(HeaderBytes::encode_json(self)?.to_string())
    }

    /// Decodes a `PAYMENT-SIGNATURE` header value.
    pub fn from_header(value: &str) -> Result<Self, HeaderCodecError> {
        HeaderBytes::from(value).decode_json()
    }

    /// The Web-Bot-Auth envelope, if the resource server attached one.
    pub fn web_bot_auth(&self) -> Option<WebBotAuthEnvelope> {
        let value = self.extensions.get(WEB_BOT_AUTH_EXTENSION)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Attaches a Web-Bot-Auth envelope, replacing any existing one.
    pub fn set_web_bot_auth(&mut self, envelope: &WebBotAuthEnvelope) {
        let value = serde_json::to_value(envelope).expect("envelope is plain strings");
        self.extensions
            .insert(WEB_BOT_AUTH_EXTENSION.to_string(), value);
    }
}

/// Raw Web-Bot-Auth header material, forwarded verbatim by the resource
/// server. `payment_signature_header` is the exact received bytes of the
/// `PAYMENT-SIGNATURE` header; it is part of the signature base and must
/// pass through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebBotAuthEnvelope {
    /// The `Signature-Agent` header value, double quotes included.
    pub signature_agent: String,
    /// The `Signature-Input` header value.
    pub signature_input: String,
    /// The `Signature` header value.
    pub signature: String,
    /// The exact `PAYMENT-SIGNATURE` header value as received.
    pub payment_signature_header: String,
}

/// Compares two JSON documents structurally.
///
/// Objects compare by key regardless of order (maps are normalized by
/// key-sorting recursively); arrays retain order. Used for the credit
/// scheme's requirement binding: `payload.accepted` must deep-equal the
/// requirements presented to the facilitator.
pub fn structurally_equal<A: Serialize, B: Serialize>(a: &A, b: &B) -> bool {
    // serde_json::Value maps are BTreeMaps, so equality is key-order
    // insensitive by construction.
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Body of `POST /verify` and `POST /settle` on the facilitator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// The signed payment attempt.
    pub payment_payload: PaymentPayload,
    /// The payment requirements to verify against.
    pub payment_requirements: PaymentRequirements,
}

/// Settlement uses the same request shape as verification.
pub type SettleRequest = VerifyRequest;

/// Response from a payment verification request.
///
/// Semantic failures set `invalid_reason` and still travel with HTTP 200.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// Whether the payment attempt is acceptable.
    pub is_valid: bool,
    /// Why the attempt was rejected, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<InvalidReason>,
    /// The identified payer (address or key thumbprint).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

impl VerifyResponse {
    pub fn valid<S: Into<String>>(payer: S) -> Self {
        Self {
            is_valid: true,
            invalid_reason: None,
            payer: Some(payer.into()),
        }
    }

    pub fn invalid(reason: InvalidReason) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(reason),
            payer: None,
        }
    }

    pub fn invalid_with_payer<S: Into<String>>(reason: InvalidReason, payer: S) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(reason),
            payer: Some(payer.into()),
        }
    }
}

/// Response from a payment settlement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    /// Whether settlement succeeded.
    pub success: bool,
    /// Settlement transaction identifier; empty on failure.
    pub transaction: String,
    /// The network the settlement applies to.
    pub network: Network,
    /// The identified payer, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    /// Why settlement was refused, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<InvalidReason>,
}

impl SettleResponse {
    pub fn success<T: Into<String>>(transaction: T, network: Network) -> Self {
        Self {
            success: true,
            transaction: transaction.into(),
            network,
            payer: None,
            error_reason: None,
        }
    }

    pub fn with_payer<S: Into<String>>(mut self, payer: S) -> Self {
        self.payer = Some(payer.into());
        self
    }

    pub fn failure(reason: InvalidReason, network: Network) -> Self {
        Self {
            success: false,
            transaction: String::new(),
            network,
            payer: None,
            error_reason: Some(reason),
        }
    }
}

/// Body of the `PAYMENT-RESPONSE` header returned to the buyer with the
/// delivered resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    /// The payment scheme that served the request.
    pub scheme: String,
    /// The network the payment applied to.
    pub network: Network,
    /// Scheme-level charge identifier (credit scheme).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Credits charged (credit scheme).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charged_credits: Option<TokenAmount>,
    /// Settlement transaction identifier (on-chain schemes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// When the response was produced.
    pub timestamp: UnixTimestamp,
}

impl PaymentResponse {
    /// Encodes this outcome as a `PAYMENT-RESPONSE` header value.
    pub fn to_header(&self) -> Result<String, HeaderCodecError> {
        Ok(HeaderBytes::encode_json(self)?.to_string())
    }

    /// Decodes a `PAYMENT-RESPONSE` header value.
    pub fn from_header(value: &str) -> Result<Self, HeaderCodecError> {
        HeaderBytes::from(value).decode_json()
    }
}

/// Describes a payment method supported by a facilitator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    /// The x402 protocol version.
    pub x402_version: u8,
    /// The payment scheme identifier.
    pub scheme: String,
    /// The network or family the scheme is registered for.
    pub network: String,
    /// Optional scheme-specific metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Response from a facilitator's `GET /supported` endpoint.
#[serde_as]
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    /// List of supported payment kinds.
    #[serde_as(as = "VecSkipError<_>")]
    pub kinds: Vec<SupportedPaymentKind>,
    /// List of supported protocol extensions.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Map of networks to signer addresses for that network.
    #[serde(default)]
    pub signers: HashMap<Network, Vec<String>>,
}

/// Error body for internal facilitator failures (HTTP 500).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
