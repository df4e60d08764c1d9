//! Resource-server side of the credit scheme.
//!
//! Prices are configured in whole credits; [`FluxaCreditServer`] normalizes
//! them into wire amounts and stamps each outgoing offer with a unique
//! charge id the facilitator's ledger keys on.

use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;

use fluxa402_types::amount::TokenAmount;
use fluxa402_types::proto::PaymentRequirements;
use fluxa402_types::scheme::{Price, SchemeError, ServerScheme};

use crate::FLUXA_CREDIT_ASSET;

/// Server-side pricing for `fluxacredit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FluxaCreditServer;

impl FluxaCreditServer {
    pub fn new() -> Self {
        Self
    }
}

impl ServerScheme for FluxaCreditServer {
    /// Normalizes a configured price into whole credits.
    ///
    /// Bare numbers and strings truncate toward zero; the object form must
    /// name the `FLUXA_CREDIT` asset.
    fn parse_price(&self, price: &Price) -> Result<TokenAmount, SchemeError> {
        let decimal = match price {
            Price::Number(value) => Decimal::from_f64(*value)
                .ok_or_else(|| SchemeError::Price(format!("unrepresentable number {value}")))?,
            Price::Text(text) => Decimal::from_str(text)
                .map_err(|e| SchemeError::Price(format!("unparsable amount {text:?}: {e}")))?,
            Price::Detailed { amount, asset } => {
                if asset != FLUXA_CREDIT_ASSET {
                    return Err(SchemeError::Price(format!(
                        "asset must be {FLUXA_CREDIT_ASSET}, got {asset}"
                    )));
                }
                Decimal::from_str(amount)
                    .map_err(|e| SchemeError::Price(format!("unparsable amount {amount:?}: {e}")))?
            }
        };
        if decimal.is_sign_negative() {
            return Err(SchemeError::Price("price must not be negative".to_string()));
        }
        let truncated = decimal.trunc();
        truncated
            .to_string()
            .parse()
            .map_err(|e| SchemeError::Price(format!("price out of range: {e}")))
    }

    /// Injects a random 128-bit `extra.id` when the offer has none.
    ///
    /// The id is unique per issuance and keys the facilitator's idempotent
    /// settlement ledger.
    fn enhance_payment_requirements(
        &self,
        requirements: &mut PaymentRequirements,
    ) -> Result<(), SchemeError> {
        let extra = requirements
            .extra
            .get_or_insert_with(|| json!({}));
        let map = extra
            .as_object_mut()
            .ok_or_else(|| SchemeError::Decoding("extra must be an object".to_string()))?;
        if !map.contains_key("id") {
            let id: u128 = rand::rng().random();
            map.insert("id".to_string(), json!(format!("{id:032x}")));
        }
        Ok(())
    }
}

/// The charge id stamped into `requirements.extra`, when present.
pub fn charge_id(requirements: &PaymentRequirements) -> Option<&str> {
    requirements.extra.as_ref()?.get("id")?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxa402_types::network::Network;

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: crate::CREDIT_SCHEME.to_string(),
            network: Network::new("fluxa", "monetize"),
            amount: TokenAmount::from(25u64),
            asset: FLUXA_CREDIT_ASSET.to_string(),
            pay_to: "fluxa:facilitator:us-east-1".to_string(),
            max_timeout_seconds: 60,
            extra: None,
        }
    }

    #[test]
    fn test_parse_price_truncates_toward_zero() {
        let server = FluxaCreditServer::new();
        assert_eq!(
            server.parse_price(&Price::Number(25.9)).unwrap(),
            TokenAmount::from(25u64)
        );
        assert_eq!(
            server.parse_price(&Price::Text("25.9".to_string())).unwrap(),
            TokenAmount::from(25u64)
        );
        assert_eq!(
            server.parse_price(&Price::Text("25".to_string())).unwrap(),
            TokenAmount::from(25u64)
        );
    }

    #[test]
    fn test_parse_price_rejects_negative() {
        let server = FluxaCreditServer::new();
        assert!(server.parse_price(&Price::Number(-1.0)).is_err());
        assert!(server.parse_price(&Price::Text("-25".to_string())).is_err());
    }

    #[test]
    fn test_parse_price_object_requires_credit_asset() {
        let server = FluxaCreditServer::new();
        let ok = Price::Detailed {
            amount: "25".to_string(),
            asset: FLUXA_CREDIT_ASSET.to_string(),
        };
        assert_eq!(server.parse_price(&ok).unwrap(), TokenAmount::from(25u64));

        let wrong = Price::Detailed {
            amount: "25".to_string(),
            asset: "USDC".to_string(),
        };
        assert!(server.parse_price(&wrong).is_err());
    }

    #[test]
    fn test_enhance_injects_unique_id() {
        let server = FluxaCreditServer::new();
        let mut a = requirements();
        let mut b = requirements();
        server.enhance_payment_requirements(&mut a).unwrap();
        server.enhance_payment_requirements(&mut b).unwrap();
        let id_a = charge_id(&a).unwrap().to_string();
        let id_b = charge_id(&b).unwrap().to_string();
        assert_eq!(id_a.len(), 32);
        assert_ne!(id_a, id_b);
    }

    #[test]
    fn test_enhance_keeps_existing_id() {
        let server = FluxaCreditServer::new();
        let mut existing = requirements();
        existing.extra = Some(json!({"id": "abc123"}));
        server.enhance_payment_requirements(&mut existing).unwrap();
        assert_eq!(charge_id(&existing), Some("abc123"));
    }
}
