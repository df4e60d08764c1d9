//! Buyer side of the deferred scheme.
//!
//! The client signs one session approval per session and one receipt per
//! request, advancing its local nonce as receipts go out. The approval and
//! its signature ride along on the first receipt only; the facilitator
//! stores them and later receipts reference the open session.

use alloy_primitives::{Address, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use dashmap::DashMap;

use fluxa402_types::proto::{PaymentPayload, PaymentRequirements, ResourceInfo, X402Version2};
use fluxa402_types::scheme::{ClientScheme, SchemeError};
use fluxa402_types::timestamp::UnixTimestamp;

use crate::eip712::{approval_signing_hash, authorized_processors_hash, receipt_signing_hash};
use crate::types::{OdpExtras, OdpPayload, ReceiptWire, SessionApprovalWire};

/// Buyer-side `odp-deferred` implementation.
pub struct OdpDeferredClient {
    signer: PrivateKeySigner,
    /// Next nonce per session this client has issued receipts for.
    next_nonce: DashMap<B256, U256>,
}

impl OdpDeferredClient {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self {
            signer,
            next_nonce: DashMap::new(),
        }
    }

    /// The payer address receipts recover to.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    fn build_approval(
        &self,
        requirements: &PaymentRequirements,
        extras: &OdpExtras,
    ) -> Result<SessionApprovalWire, SchemeError> {
        let payee: Address = requirements
            .pay_to
            .parse()
            .map_err(|_| SchemeError::Decoding("payTo is not an address".to_string()))?;
        let asset: Address = requirements
            .asset
            .parse()
            .map_err(|_| SchemeError::Decoding("asset is not an address".to_string()))?;
        Ok(SessionApprovalWire {
            payer: self.address(),
            payee,
            asset,
            max_spend: extras.max_spend,
            expiry: extras.expiry,
            session_id: extras.session_id,
            start_nonce: extras.start_nonce,
            authorized_processors_hash: authorized_processors_hash(extras.processors()),
        })
    }
}

#[async_trait]
impl ClientScheme for OdpDeferredClient {
    async fn create_payment(
        &self,
        resource: &ResourceInfo,
        selected: &PaymentRequirements,
    ) -> Result<PaymentPayload, SchemeError> {
        let extras = OdpExtras::from_requirements(selected)
            .map_err(|e| SchemeError::Decoding(format!("odp extras: {e}")))?;
        let chain_id = selected
            .network
            .eip155_chain_id()
            .ok_or_else(|| SchemeError::Decoding("network is not eip155".to_string()))?;

        let nonce = *self
            .next_nonce
            .entry(extras.session_id)
            .or_insert(extras.start_nonce);
        let first_receipt = nonce == extras.start_nonce;

        let now = UnixTimestamp::now();
        let deadline = (now + selected.max_timeout_seconds).min(extras.expiry);
        let receipt = ReceiptWire {
            session_id: extras.session_id,
            nonce,
            amount: selected.amount,
            deadline,
            request_hash: extras.expected_request_hash(),
        };
        let receipt_hash =
            receipt_signing_hash(&receipt.as_typed(), chain_id, extras.settlement_contract);
        let receipt_signature = self
            .signer
            .sign_hash_sync(&receipt_hash)
            .map_err(|e| SchemeError::Internal(format!("receipt signing: {e}")))?;

        let mut odp = OdpPayload {
            session_approval: None,
            session_signature: None,
            receipt: Some(receipt),
            receipt_signature: Some(receipt_signature.as_bytes().to_vec().into()),
        };
        if first_receipt {
            let approval = self.build_approval(selected, &extras)?;
            let approval_hash = approval_signing_hash(
                &approval.as_typed(),
                chain_id,
                extras.settlement_contract,
            );
            let session_signature = self
                .signer
                .sign_hash_sync(&approval_hash)
                .map_err(|e| SchemeError::Internal(format!("approval signing: {e}")))?;
            odp.session_approval = Some(approval);
            odp.session_signature = Some(session_signature.as_bytes().to_vec().into());
        }

        // Advance only after signing succeeded.
        self.next_nonce
            .insert(extras.session_id, nonce + U256::from(1u64));

        Ok(PaymentPayload {
            x402_version: X402Version2,
            resource: resource.clone(),
            accepted: selected.clone(),
            payload: serde_json::to_value(&odp)?,
            extensions: Default::default(),
        })
    }
}

/// Picks the first requirements entry this client can pay, preserving the
/// server's preference order.
pub fn select_requirements<'a>(
    accepts: &'a [PaymentRequirements],
    scheme: &str,
) -> Option<&'a PaymentRequirements> {
    accepts.iter().find(|requirements| {
        requirements.scheme == scheme && requirements.network.eip155_chain_id().is_some()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxa402_types::amount::TokenAmount;
    use fluxa402_types::network::Network;
    use serde_json::json;

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: crate::ODP_SCHEME.to_string(),
            network: Network::new("eip155", "84532"),
            amount: TokenAmount::from(15000u64),
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            pay_to: "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".to_string(),
            max_timeout_seconds: 60,
            extra: Some(json!({
                "sessionId": "0x4b2f0000000000000000000000000000000000000000000000000000000006c7",
                "startNonce": "0",
                "maxSpend": "1000000",
                "expiry": (UnixTimestamp::now() + 3600).to_string(),
                "settlementContract": "0xB1F3000000000000000000000000000000000000",
                "debitWallet": "0x4a52000000000000000000000000000000000000",
                "withdrawDelaySeconds": "86400",
            })),
        }
    }

    #[tokio::test]
    async fn test_first_payment_carries_approval() {
        let client = OdpDeferredClient::new(PrivateKeySigner::random());
        let resource = ResourceInfo::new("https://api.example.com/resource");
        let payload = client
            .create_payment(&resource, &requirements())
            .await
            .unwrap();
        let odp: OdpPayload = serde_json::from_value(payload.payload).unwrap();
        assert!(odp.session_approval.is_some());
        assert!(odp.session_signature.is_some());
        assert_eq!(odp.receipt.unwrap().nonce, U256::ZERO);
    }

    #[tokio::test]
    async fn test_nonce_advances_and_approval_drops_off() {
        let client = OdpDeferredClient::new(PrivateKeySigner::random());
        let resource = ResourceInfo::new("https://api.example.com/resource");
        let requirements = requirements();

        let _first = client.create_payment(&resource, &requirements).await.unwrap();
        let second = client.create_payment(&resource, &requirements).await.unwrap();
        let odp: OdpPayload = serde_json::from_value(second.payload).unwrap();
        assert!(odp.session_approval.is_none());
        assert_eq!(odp.receipt.unwrap().nonce, U256::from(1u64));
    }

    #[test]
    fn test_select_requirements_prefers_order() {
        let odp = requirements();
        let mut credit = requirements();
        credit.scheme = "fluxacredit".to_string();
        let accepts = vec![credit, odp];
        let selected = select_requirements(&accepts, crate::ODP_SCHEME).unwrap();
        assert_eq!(selected.scheme, crate::ODP_SCHEME);
    }
}
