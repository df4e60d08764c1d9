//! Facilitator side of the credit scheme.
//!
//! Verification binds the buyer's `accepted` requirements to the ones the
//! resource server presented, then authenticates the request through the
//! Web-Bot-Auth HTTP Message Signature attached by the resource server.
//! Settlement debits a synthetic credit ledger, idempotent on the offer's
//! `extra.id`.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use fluxa402_types::amount::TokenAmount;
use fluxa402_types::network::Network;
use fluxa402_types::proto::{
    structurally_equal, PaymentPayload, PaymentRequirements, SettleResponse, SupportedPaymentKind,
    VerifyResponse,
};
use fluxa402_types::reason::InvalidReason;
use fluxa402_types::scheme::{supported_kind, FacilitatorScheme, SchemeError};

use crate::httpsig::{KeyDirectory, WebBotAuthVerifier};
use crate::server::charge_id;
use crate::{fluxa_monetize, CREDIT_SCHEME};

/// Payload field the payer falls back to when signature verification does
/// not yield a key thumbprint.
const AGENT_ID_FIELD: &str = "signature-fluxa-ai-agent-id";

#[derive(Debug, Clone)]
struct LedgerEntry {
    transaction: String,
    amount: TokenAmount,
}

/// Facilitator-side `fluxacredit` implementation.
///
/// The ledger here is synthetic: a charge is a map entry keyed by the
/// offer's `extra.id`. Deployments may swap in a real ledger as long as
/// settlement stays idempotent on that id.
pub struct FluxaCreditFacilitator {
    verifier: WebBotAuthVerifier,
    ledger: DashMap<String, LedgerEntry>,
}

impl FluxaCreditFacilitator {
    pub fn new(directory: Arc<dyn KeyDirectory>) -> Self {
        Self {
            verifier: WebBotAuthVerifier::new(directory),
            ledger: DashMap::new(),
        }
    }

    /// Total credits debited so far, across all charges.
    pub fn total_charged(&self) -> TokenAmount {
        self.ledger
            .iter()
            .fold(TokenAmount::ZERO, |total, entry| {
                total.saturating_add(entry.amount)
            })
    }

    /// Number of distinct charges on the ledger.
    pub fn charge_count(&self) -> usize {
        self.ledger.len()
    }

    fn payer_fallback(payload: &PaymentPayload) -> Option<String> {
        payload
            .payload
            .get(AGENT_ID_FIELD)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    fn invalid(payload: &PaymentPayload, reason: InvalidReason) -> VerifyResponse {
        match Self::payer_fallback(payload) {
            Some(payer) => VerifyResponse::invalid_with_payer(reason, payer),
            None => VerifyResponse::invalid(reason),
        }
    }
}

#[async_trait]
impl FacilitatorScheme for FluxaCreditFacilitator {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, SchemeError> {
        // Structural binding: the payer signed over `accepted`; it must be
        // the very requirements the resource server forwarded.
        if payload.accepted.scheme != requirements.scheme {
            return Ok(Self::invalid(payload, InvalidReason::UnsupportedScheme));
        }
        if payload.accepted.network != requirements.network {
            return Ok(Self::invalid(payload, InvalidReason::NetworkMismatch));
        }
        if !structurally_equal(&payload.accepted, requirements) {
            return Ok(Self::invalid(
                payload,
                InvalidReason::InvalidRequirementsExtra,
            ));
        }

        let Some(envelope) = payload.web_bot_auth() else {
            return Ok(Self::invalid(payload, InvalidReason::InvalidWebBotAuth));
        };

        match self
            .verifier
            .verify(&envelope, "GET", &payload.resource.url)
            .await
        {
            Ok(thumbprint) => Ok(VerifyResponse::valid(thumbprint)),
            Err(error) => {
                tracing::warn!(error = %error, "Web-Bot-Auth verification failed");
                Ok(Self::invalid(payload, error.reason()))
            }
        }
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, SchemeError> {
        let Some(id) = charge_id(requirements) else {
            return Ok(SettleResponse::failure(
                InvalidReason::InvalidRequirementsExtra,
                requirements.network.clone(),
            ));
        };

        // Idempotent on the charge id: a repeated settle returns the same
        // transaction and does not debit the ledger again.
        let entry = self
            .ledger
            .entry(id.to_string())
            .or_insert_with(|| LedgerEntry {
                transaction: format!("credit-ledger:{id}"),
                amount: requirements.amount,
            });
        let mut response =
            SettleResponse::success(entry.transaction.clone(), requirements.network.clone());
        if let Some(payer) = Self::payer_fallback(payload) {
            response = response.with_payer(payer);
        }
        tracing::info!(id = %id, amount = %requirements.amount, "credit charge settled");
        Ok(response)
    }

    fn kinds(&self) -> Vec<SupportedPaymentKind> {
        vec![supported_kind(CREDIT_SCHEME, fluxa_monetize().to_string())]
    }

    fn signers(&self) -> HashMap<Network, Vec<String>> {
        HashMap::new()
    }
}
