//! Payment scheme traits and the `(scheme, network)` dispatch registries.
//!
//! Each payment scheme ships up to three role implementations: a client
//! (produces payloads), a server (prices offers), and a facilitator
//! (verifies and settles). Each role keeps its own [`SchemeRegistry`],
//! indexed by scheme name and a [`NetworkPattern`].
//!
//! # Lookup order
//!
//! 1. Exact match on `(scheme, network)`.
//! 2. Family match: same scheme, registered namespace equals the network's
//!    namespace with a `*` reference.
//! 3. Miss.
//!
//! Registration never rebinds an existing pair; a rebind is a fatal
//! configuration error surfaced at startup.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::amount::TokenAmount;
use crate::network::{Network, NetworkPattern};
use crate::proto::{
    PaymentPayload, PaymentRequirements, ResourceInfo, SettleResponse, SupportedPaymentKind,
    SupportedResponse, VerifyResponse, X402Version2,
};

/// Facilitator-side scheme implementation: verifies and settles payments.
///
/// Semantic rejections are `Ok` responses with an `invalid_reason` /
/// `error_reason`; `Err` is reserved for internal failures (malformed
/// plumbing, chain transport breakage) that surface as HTTP 5xx.
#[async_trait]
pub trait FacilitatorScheme: Send + Sync {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, SchemeError>;

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, SchemeError>;

    /// The `{x402Version, scheme, network}` triples this handler serves.
    fn kinds(&self) -> Vec<SupportedPaymentKind>;

    /// Signer addresses per network, for processor-authorization discovery.
    fn signers(&self) -> HashMap<Network, Vec<String>> {
        HashMap::new()
    }
}

/// Client-side scheme implementation: turns an accepted offer into a
/// signed [`PaymentPayload`].
#[async_trait]
pub trait ClientScheme: Send + Sync {
    async fn create_payment(
        &self,
        resource: &ResourceInfo,
        selected: &PaymentRequirements,
    ) -> Result<PaymentPayload, SchemeError>;
}

/// Server-side scheme implementation: prices offers and enriches
/// requirements before they go out in a 402.
pub trait ServerScheme: Send + Sync {
    /// Normalizes a configured price into the wire amount.
    fn parse_price(&self, price: &Price) -> Result<TokenAmount, SchemeError>;

    /// Injects scheme-specific data (e.g., a fresh charge id) into
    /// requirements about to be offered.
    fn enhance_payment_requirements(
        &self,
        requirements: &mut PaymentRequirements,
    ) -> Result<(), SchemeError>;
}

/// A configured price, before scheme normalization.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum Price {
    /// Bare number; truncated toward zero by the scheme.
    Number(f64),
    /// Decimal string; truncated toward zero by the scheme.
    Text(String),
    /// Fully specified amount and asset.
    #[serde(rename_all = "camelCase")]
    Detailed { amount: String, asset: String },
}

/// Errors raised by scheme implementations for non-semantic failures.
#[derive(Debug, thiserror::Error)]
pub enum SchemeError {
    /// The payload or requirements could not be decoded at all.
    #[error("invalid payload: {0}")]
    Decoding(String),
    /// A configured price could not be normalized.
    #[error("invalid price: {0}")]
    Price(String),
    /// A chain or upstream call failed in transport.
    #[error("onchain error: {0}")]
    Onchain(String),
    /// Anything else that should become a 5xx.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SchemeError {
    fn from(value: serde_json::Error) -> Self {
        SchemeError::Decoding(value.to_string())
    }
}

/// Error raised when registry configuration is invalid.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// An existing `(scheme, network)` pair was registered again.
    #[error("scheme {scheme} is already registered for {pattern}")]
    Rebind {
        scheme: String,
        pattern: NetworkPattern,
    },
}

/// A `(scheme, network-pattern)` keyed handler registry.
///
/// The same shape backs the client, server, and facilitator registries;
/// only the handler trait differs. Registries are populated at startup and
/// shared immutably afterwards, so readers take no lock.
pub struct SchemeRegistry<T: ?Sized> {
    exact: HashMap<(String, Network), Arc<T>>,
    families: HashMap<(String, String), Arc<T>>,
}

impl<T: ?Sized> Default for SchemeRegistry<T> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            families: HashMap::new(),
        }
    }
}

impl<T: ?Sized> Debug for SchemeRegistry<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut slugs: Vec<String> = self
            .exact
            .keys()
            .map(|(scheme, network)| format!("{scheme}@{network}"))
            .chain(
                self.families
                    .keys()
                    .map(|(scheme, namespace)| format!("{scheme}@{namespace}:*")),
            )
            .collect();
        slugs.sort();
        f.debug_tuple("SchemeRegistry").field(&slugs).finish()
    }
}

impl<T: ?Sized> SchemeRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a scheme and network pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Rebind`] if the pair is already bound.
    /// Callers treat this as fatal configuration.
    pub fn register<S: Into<String>>(
        &mut self,
        scheme: S,
        pattern: NetworkPattern,
        handler: Arc<T>,
    ) -> Result<(), RegistryError> {
        let scheme = scheme.into();
        match &pattern {
            NetworkPattern::Exact(network) => {
                let key = (scheme.clone(), network.clone());
                if self.exact.contains_key(&key) {
                    return Err(RegistryError::Rebind { scheme, pattern });
                }
                self.exact.insert(key, handler);
            }
            NetworkPattern::Family { namespace } => {
                let key = (scheme.clone(), namespace.clone());
                if self.families.contains_key(&key) {
                    return Err(RegistryError::Rebind { scheme, pattern });
                }
                self.families.insert(key, handler);
            }
        }
        tracing::info!(scheme = %scheme, pattern = %pattern, "Registered scheme handler");
        Ok(())
    }

    /// Builder-style [`SchemeRegistry::register`].
    ///
    /// # Panics
    ///
    /// Panics on a rebind, which is a fatal configuration error.
    pub fn and_register<S: Into<String>>(
        mut self,
        scheme: S,
        pattern: NetworkPattern,
        handler: Arc<T>,
    ) -> Self {
        self.register(scheme, pattern, handler)
            .expect("scheme registry rebind");
        self
    }

    /// Resolves a handler: exact pair first, then the scheme's family for
    /// the network's namespace.
    pub fn lookup(&self, scheme: &str, network: &Network) -> Option<&Arc<T>> {
        let exact_key = (scheme.to_string(), network.clone());
        if let Some(handler) = self.exact.get(&exact_key) {
            return Some(handler);
        }
        let family_key = (scheme.to_string(), network.namespace.clone());
        self.families.get(&family_key)
    }

    /// All registered handlers, exact bindings first.
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<T>> {
        self.exact.values().chain(self.families.values())
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.families.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.families.len()
    }
}

impl SchemeRegistry<dyn FacilitatorScheme> {
    /// Enumerates supported kinds and signers for discovery.
    pub fn supported(&self) -> SupportedResponse {
        let mut kinds = Vec::new();
        let mut signers: HashMap<Network, Vec<String>> = HashMap::new();
        for handler in self.handlers() {
            kinds.extend(handler.kinds());
            for (network, addresses) in handler.signers() {
                signers.entry(network).or_insert(addresses);
            }
        }
        SupportedResponse {
            kinds,
            extensions: Vec::new(),
            signers,
        }
    }
}

/// Convenience constructor for a handler's discovery triple.
pub fn supported_kind<S: Into<String>, N: Into<String>>(
    scheme: S,
    network: N,
) -> SupportedPaymentKind {
    SupportedPaymentKind {
        x402_version: X402Version2::VALUE,
        scheme: scheme.into(),
        network: network.into(),
        extra: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::VerifyResponse;
    use crate::reason::InvalidReason;

    struct StubScheme(&'static str);

    #[async_trait]
    impl FacilitatorScheme for StubScheme {
        async fn verify(
            &self,
            _payload: &PaymentPayload,
            _requirements: &PaymentRequirements,
        ) -> Result<VerifyResponse, SchemeError> {
            Ok(VerifyResponse::valid(self.0))
        }

        async fn settle(
            &self,
            _payload: &PaymentPayload,
            _requirements: &PaymentRequirements,
        ) -> Result<SettleResponse, SchemeError> {
            Ok(SettleResponse::failure(
                InvalidReason::NoReceipts,
                Network::new("eip155", "84532"),
            ))
        }

        fn kinds(&self) -> Vec<SupportedPaymentKind> {
            vec![supported_kind("odp-deferred", "eip155:*")]
        }
    }

    fn registry() -> SchemeRegistry<dyn FacilitatorScheme> {
        SchemeRegistry::<dyn FacilitatorScheme>::new()
            .and_register(
                "odp-deferred",
                NetworkPattern::family("eip155"),
                Arc::new(StubScheme("family")),
            )
            .and_register(
                "odp-deferred",
                NetworkPattern::exact("eip155", "84532"),
                Arc::new(StubScheme("exact")),
            )
            .and_register(
                "fluxacredit",
                NetworkPattern::exact("fluxa", "monetize"),
                Arc::new(StubScheme("credit")),
            )
    }

    #[tokio::test]
    async fn test_exact_match_wins_over_family() {
        let registry = registry();
        let handler = registry
            .lookup("odp-deferred", &Network::new("eip155", "84532"))
            .unwrap();
        let payload = sample_payload();
        let response = handler
            .verify(&payload, &payload.accepted.clone())
            .await
            .unwrap();
        assert_eq!(response.payer.as_deref(), Some("exact"));
    }

    #[tokio::test]
    async fn test_family_match_catches_other_references() {
        let registry = registry();
        let handler = registry
            .lookup("odp-deferred", &Network::new("eip155", "8453"))
            .unwrap();
        let payload = sample_payload();
        let response = handler
            .verify(&payload, &payload.accepted.clone())
            .await
            .unwrap();
        assert_eq!(response.payer.as_deref(), Some("family"));
    }

    #[test]
    fn test_miss_on_unknown_scheme_or_namespace() {
        let registry = registry();
        assert!(registry
            .lookup("odp-deferred", &Network::new("solana", "devnet"))
            .is_none());
        assert!(registry
            .lookup("nonexistent", &Network::new("eip155", "84532"))
            .is_none());
    }

    #[test]
    fn test_rebind_concrete_pair_is_an_error() {
        let mut registry: SchemeRegistry<dyn FacilitatorScheme> = SchemeRegistry::new();
        registry
            .register(
                "fluxacredit",
                NetworkPattern::exact("fluxa", "monetize"),
                Arc::new(StubScheme("first")),
            )
            .unwrap();
        let second = registry.register(
            "fluxacredit",
            NetworkPattern::exact("fluxa", "monetize"),
            Arc::new(StubScheme("second")),
        );
        assert!(matches!(second, Err(RegistryError::Rebind { .. })));
    }

    #[test]
    fn test_supported_enumerates_all_handlers() {
        let registry = registry();
        let supported = registry.supported();
        assert_eq!(supported.kinds.len(), 3);
    }

    struct FlatPrice;

    impl ServerScheme for FlatPrice {
        fn parse_price(&self, price: &Price) -> Result<TokenAmount, SchemeError> {
            match price {
                Price::Number(value) => Ok(TokenAmount::from(*value as u64)),
                Price::Text(text) => text
                    .parse()
                    .map_err(|e| SchemeError::Price(format!("{e}"))),
                Price::Detailed { amount, .. } => amount
                    .parse()
                    .map_err(|e| SchemeError::Price(format!("{e}"))),
            }
        }

        fn enhance_payment_requirements(
            &self,
            _requirements: &mut PaymentRequirements,
        ) -> Result<(), SchemeError> {
            Ok(())
        }
    }

    #[test]
    fn test_server_registry_shares_the_same_dispatch() {
        // The same registry shape backs all three role registries.
        let registry: SchemeRegistry<dyn ServerScheme> = SchemeRegistry::new().and_register(
            "fluxacredit",
            NetworkPattern::exact("fluxa", "monetize"),
            Arc::new(FlatPrice),
        );
        let handler = registry
            .lookup("fluxacredit", &Network::new("fluxa", "monetize"))
            .unwrap();
        let amount = handler.parse_price(&Price::Text("25".to_string())).unwrap();
        assert_eq!(amount, TokenAmount::from(25u64));
        assert!(registry
            .lookup("fluxacredit", &Network::new("fluxa", "sandbox"))
            .is_none());
    }

    fn sample_payload() -> PaymentPayload {
        PaymentPayload {
            x402_version: X402Version2,
            resource: ResourceInfo::new("https://api.example.com/resource"),
            accepted: PaymentRequirements {
                scheme: "odp-deferred".to_string(),
                network: Network::new("eip155", "84532"),
                amount: TokenAmount::from(15000u64),
                asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
                pay_to: "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".to_string(),
                max_timeout_seconds: 60,
                extra: None,
            },
            payload: serde_json::json!({}),
            extensions: Default::default(),
        }
    }
}
