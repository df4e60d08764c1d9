//! Facilitator side of the deferred scheme.
//!
//! `verify` runs the full check ladder in order, first failure
//! short-circuiting with its wire reason, and on success appends the
//! receipt to the session atomically. `settle` batches a contiguous nonce
//! range and submits it, synthetically or on-chain. All verify and settle
//! work for one session is serialized behind that session's mutex, held
//! across chain RPC so balance checks and nonce advance stay consistent.

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::instrument;

use async_trait::async_trait;

use fluxa402_types::network::Network;
use fluxa402_types::proto::{
    PaymentPayload, PaymentRequirements, SettleResponse, SupportedPaymentKind, VerifyResponse,
};
use fluxa402_types::reason::InvalidReason;
use fluxa402_types::scheme::{supported_kind, FacilitatorScheme, SchemeError};
use fluxa402_types::timestamp::UnixTimestamp;

use crate::chain::{FacilitatorEvmSigner, SettleSessionCall};
use crate::eip712::{
    approval_signing_hash, authorized_processors_hash, receipt_signing_hash, recover_signer,
};
use crate::store::{SessionLocks, SessionRecord, SessionStore, SignedReceipt};
use crate::types::{OdpExtras, OdpPayload};
use crate::ODP_SCHEME;

/// How settlement batches are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
    /// Transaction hash is computed locally; no chain I/O.
    Synthetic,
    /// Batches are submitted to the settlement contract.
    Onchain,
}

/// Static configuration of one deferred-scheme facilitator.
#[derive(Debug, Clone)]
pub struct OdpDeferredConfig {
    pub settlement_contract: Address,
    pub debit_wallet: Address,
    pub withdraw_delay_seconds: U256,
    pub settlement_mode: SettlementMode,
    /// Cap on receipts per settlement batch; unlimited when absent.
    pub max_receipts_per_settlement: Option<usize>,
    /// Concrete networks served, for discovery metadata.
    pub networks: Vec<Network>,
}

/// Counters surfaced at `/benchmark/metrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OdpStats {
    pub verified_receipts: u64,
    pub settled_receipts: u64,
    pub settlement_txs: u64,
    pub pending_sessions: usize,
}

/// Facilitator-side `odp-deferred` implementation, registered for the
/// `eip155:*` family.
pub struct OdpDeferredFacilitator {
    config: OdpDeferredConfig,
    signer: Arc<dyn FacilitatorEvmSigner>,
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    /// Sessions with outstanding receipts, in insertion order.
    pending: Mutex<Vec<B256>>,
    verified_receipts: AtomicU64,
    settled_receipts: AtomicU64,
    settlement_txs: AtomicU64,
}

impl OdpDeferredFacilitator {
    pub fn new(
        config: OdpDeferredConfig,
        signer: Arc<dyn FacilitatorEvmSigner>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            config,
            signer,
            store,
            locks: SessionLocks::new(),
            pending: Mutex::new(Vec::new()),
            verified_receipts: AtomicU64::new(0),
            settled_receipts: AtomicU64::new(0),
            settlement_txs: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> OdpStats {
        OdpStats {
            verified_receipts: self.verified_receipts.load(Ordering::Relaxed),
            settled_receipts: self.settled_receipts.load(Ordering::Relaxed),
            settlement_txs: self.settlement_txs.load(Ordering::Relaxed),
            pending_sessions: self.pending.lock().expect("pending lock").len(),
        }
    }

    fn note_pending(&self, session_id: B256) {
        let mut pending = self.pending.lock().expect("pending lock");
        if !pending.contains(&session_id) {
            pending.push(session_id);
        }
    }

    fn drop_pending(&self, session_id: &B256) {
        let mut pending = self.pending.lock().expect("pending lock");
        pending.retain(|id| id != session_id);
    }

    /// Snapshot of the pending set, in insertion order.
    pub fn pending_snapshot(&self) -> Vec<B256> {
        self.pending.lock().expect("pending lock").clone()
    }

    /// Verification ladder; first failure wins.
    #[instrument(skip_all, fields(scheme = %requirements.scheme, network = %requirements.network))]
    async fn verify_inner(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, SchemeError> {
        let accepted = &payload.accepted;
        if accepted.scheme != requirements.scheme || accepted.scheme != ODP_SCHEME {
            return Ok(VerifyResponse::invalid(InvalidReason::UnsupportedScheme));
        }
        if accepted.network != requirements.network {
            return Ok(VerifyResponse::invalid(InvalidReason::NetworkMismatch));
        }
        let Some(chain_id) = requirements.network.eip155_chain_id() else {
            return Ok(VerifyResponse::invalid(InvalidReason::NetworkMismatch));
        };
        let extras = match OdpExtras::from_requirements(requirements) {
            Ok(extras) => extras,
            Err(error) => {
                tracing::debug!(error = %error, "requirements extra rejected");
                return Ok(VerifyResponse::invalid(
                    InvalidReason::InvalidRequirementsExtra,
                ));
            }
        };

        let odp: OdpPayload = match serde_json::from_value(payload.payload.clone()) {
            Ok(odp) => odp,
            Err(_) => {
                return Ok(VerifyResponse::invalid(
                    InvalidReason::InvalidOdpPayloadMissingReceipt,
                ));
            }
        };
        let Some(receipt) = odp.receipt.as_ref() else {
            return Ok(VerifyResponse::invalid(
                InvalidReason::InvalidOdpPayloadMissingReceipt,
            ));
        };
        let Some(receipt_signature) = odp.receipt_signature.as_ref() else {
            return Ok(VerifyResponse::invalid(
                InvalidReason::MissingReceiptSignature,
            ));
        };
        if receipt.session_id != extras.session_id {
            return Ok(VerifyResponse::invalid(InvalidReason::SessionIdMismatch));
        }
        if extras.settlement_contract != self.config.settlement_contract {
            return Ok(VerifyResponse::invalid(
                InvalidReason::SettlementContractMismatch,
            ));
        }
        if extras.debit_wallet != self.config.debit_wallet {
            return Ok(VerifyResponse::invalid(InvalidReason::DebitWalletMismatch));
        }
        if extras.withdraw_delay_seconds != self.config.withdraw_delay_seconds {
            return Ok(VerifyResponse::invalid(InvalidReason::WithdrawDelayMismatch));
        }

        // Everything past this point reads or writes session state.
        let session_lock = self.locks.lock_for(extras.session_id);
        let _guard = session_lock.lock().await;

        let (mut record, is_new) = match self.resolve_session(
            &odp,
            requirements,
            &extras,
            chain_id,
        ) {
            Ok(resolved) => resolved,
            Err(reason) => return Ok(VerifyResponse::invalid(reason)),
        };
        let payer = record.approval.payer;

        // Processor authorization: an empty list means any processor.
        let processors = extras.processors();
        if !processors.is_empty() {
            let ours = self.signer.addresses();
            if !processors.iter().any(|p| ours.contains(p)) {
                return Ok(VerifyResponse::invalid(InvalidReason::UnauthorizedProcessor));
            }
        }

        // Debit wallet state. Transport failures must not look like success.
        let balance = match self
            .signer
            .debit_balance_of(extras.debit_wallet, payer, record.approval.asset)
            .await
        {
            Ok(balance) => balance,
            Err(error) => {
                tracing::warn!(error = %error, "debit wallet balance read failed");
                return Ok(VerifyResponse::invalid(
                    InvalidReason::DebitWalletWithdrawDelayMismatch,
                ));
            }
        };
        let onchain_delay = match self
            .signer
            .debit_withdraw_delay_seconds(extras.debit_wallet)
            .await
        {
            Ok(delay) => delay,
            Err(error) => {
                tracing::warn!(error = %error, "debit wallet delay read failed");
                return Ok(VerifyResponse::invalid(
                    InvalidReason::DebitWalletWithdrawDelayMismatch,
                ));
            }
        };
        if onchain_delay != extras.withdraw_delay_seconds {
            return Ok(VerifyResponse::invalid(
                InvalidReason::DebitWalletWithdrawDelayMismatch,
            ));
        }

        // Receipt signature against the session payer.
        let receipt_hash =
            receipt_signing_hash(&receipt.as_typed(), chain_id, self.config.settlement_contract);
        match recover_signer(receipt_hash, receipt_signature) {
            Ok(recovered) if recovered == payer => {}
            _ => {
                return Ok(VerifyResponse::invalid(
                    InvalidReason::InvalidReceiptSignature,
                ));
            }
        }

        if receipt.nonce != record.next_nonce {
            return Ok(VerifyResponse::invalid(InvalidReason::ReceiptNonceMismatch));
        }
        if receipt.amount != requirements.amount {
            return Ok(VerifyResponse::invalid(InvalidReason::ReceiptAmountMismatch));
        }
        if let Some(cap) = extras.max_amount_per_receipt {
            if receipt.amount > cap {
                return Ok(VerifyResponse::invalid(
                    InvalidReason::ReceiptAmountExceedsMax,
                ));
            }
        }

        let now = UnixTimestamp::now();
        if record.approval.expiry < now {
            return Ok(VerifyResponse::invalid(InvalidReason::SessionExpired));
        }
        // A deadline exactly at `now` is still acceptable.
        if receipt.deadline < now {
            return Ok(VerifyResponse::invalid(
                InvalidReason::ReceiptDeadlineInvalid,
            ));
        }
        let ceiling = (now + requirements.max_timeout_seconds).min(record.approval.expiry);
        if receipt.deadline > ceiling {
            return Ok(VerifyResponse::invalid(
                InvalidReason::ReceiptDeadlineInvalid,
            ));
        }

        if receipt.request_hash != extras.expected_request_hash() {
            return Ok(VerifyResponse::invalid(InvalidReason::RequestHashMismatch));
        }

        let Some(new_spent) = record.spent.checked_add(receipt.amount) else {
            return Ok(VerifyResponse::invalid(
                InvalidReason::SessionMaxSpendExceeded,
            ));
        };
        if new_spent > record.approval.max_spend {
            return Ok(VerifyResponse::invalid(
                InvalidReason::SessionMaxSpendExceeded,
            ));
        }
        if new_spent.inner() > balance {
            return Ok(VerifyResponse::invalid(
                InvalidReason::InsufficientDebitWalletBalance,
            ));
        }

        // Accept: append, advance, persist. Still under the session lock.
        record.receipts.push(SignedReceipt {
            receipt: receipt.clone(),
            signature: receipt_signature.clone(),
        });
        record.spent = new_spent;
        record.next_nonce += U256::from(1u64);
        self.store.put(extras.session_id, record);
        self.note_pending(extras.session_id);
        self.verified_receipts.fetch_add(1, Ordering::Relaxed);
        if is_new {
            tracing::info!(session = %extras.session_id, payer = %payer, "session opened");
        }
        tracing::debug!(session = %extras.session_id, nonce = %receipt.nonce, "receipt accepted");

        Ok(VerifyResponse::valid(payer.to_string()))
    }

    /// Resolves the session record: new from a supplied approval, or the
    /// stored one, reconciled field-for-field.
    fn resolve_session(
        &self,
        odp: &OdpPayload,
        requirements: &PaymentRequirements,
        extras: &OdpExtras,
        chain_id: u64,
    ) -> Result<(SessionRecord, bool), InvalidReason> {
        let expected_hash = authorized_processors_hash(extras.processors());

        if let Some(approval) = odp.session_approval.as_ref() {
            let Some(signature) = odp.session_signature.as_ref() else {
                return Err(InvalidReason::MissingSessionSignature);
            };
            let approval_hash = approval_signing_hash(
                &approval.as_typed(),
                chain_id,
                self.config.settlement_contract,
            );
            match recover_signer(approval_hash, signature) {
                Ok(recovered) if recovered == approval.payer => {}
                _ => return Err(InvalidReason::InvalidSessionSignature),
            }

            // The approval the payer signed must match the offer.
            let payee: Address = requirements
                .pay_to
                .parse()
                .map_err(|_| InvalidReason::SessionApprovalMismatch)?;
            let asset: Address = requirements
                .asset
                .parse()
                .map_err(|_| InvalidReason::SessionApprovalMismatch)?;
            if approval.payee != payee
                || approval.asset != asset
                || approval.session_id != extras.session_id
                || approval.start_nonce != extras.start_nonce
                || approval.max_spend != extras.max_spend
                || approval.expiry != extras.expiry
            {
                return Err(InvalidReason::SessionApprovalMismatch);
            }
            if approval.authorized_processors_hash != expected_hash {
                return Err(InvalidReason::AuthorizedProcessorsHashMismatch);
            }

            match self.store.get(&extras.session_id) {
                Some(existing) => {
                    if existing.approval != *approval || existing.session_signature != *signature {
                        return Err(InvalidReason::SessionApprovalMismatch);
                    }
                    Ok((existing, false))
                }
                None => Ok((
                    SessionRecord::open(
                        approval.clone(),
                        signature.clone(),
                        self.config.settlement_contract,
                        requirements.network.clone(),
                    ),
                    true,
                )),
            }
        } else {
            let record = self
                .store
                .get(&extras.session_id)
                .ok_or(InvalidReason::MissingSessionApproval)?;
            // Requirements must keep matching the stored approval exactly.
            let approval = &record.approval;
            let payee_matches = requirements
                .pay_to
                .parse::<Address>()
                .map(|payee| payee == approval.payee)
                .unwrap_or(false);
            let asset_matches = requirements
                .asset
                .parse::<Address>()
                .map(|asset| asset == approval.asset)
                .unwrap_or(false);
            if approval.authorized_processors_hash != expected_hash {
                return Err(InvalidReason::AuthorizedProcessorsHashMismatch);
            }
            if !payee_matches
                || !asset_matches
                || approval.start_nonce != extras.start_nonce
                || approval.max_spend != extras.max_spend
                || approval.expiry != extras.expiry
            {
                return Err(InvalidReason::RequirementsSessionMismatch);
            }
            Ok((record, false))
        }
    }

    /// Settles one session's outstanding receipts, holding its lock for the
    /// whole call. `network` is used for failure responses when no record
    /// exists.
    #[instrument(skip(self), fields(session = %session_id))]
    pub async fn settle_session_by_id(
        &self,
        session_id: B256,
        network: Network,
    ) -> SettleResponse {
        let session_lock = self.locks.lock_for(session_id);
        let _guard = session_lock.lock().await;

        let Some(mut record) = self.store.get(&session_id) else {
            return SettleResponse::failure(InvalidReason::SessionNotFound, network);
        };
        if record.settling {
            return SettleResponse::failure(InvalidReason::SettlementInProgress, record.network);
        }
        record.settling = true;
        self.store.put(session_id, record.clone());

        let response = self.settle_batch(session_id, &mut record).await;

        // Clear the flag on every exit path and persist whatever the batch
        // left behind.
        record.settling = false;
        self.store.put(session_id, record.clone());
        if record.receipts.is_empty() {
            self.drop_pending(&session_id);
        }
        response
    }

    async fn settle_batch(&self, session_id: B256, record: &mut SessionRecord) -> SettleResponse {
        let network = record.network.clone();
        let payer = record.approval.payer;

        let batch_len = self
            .config
            .max_receipts_per_settlement
            .map(|cap| cap.min(record.receipts.len()))
            .unwrap_or(record.receipts.len());
        if batch_len == 0 {
            return SettleResponse::failure(InvalidReason::NoReceipts, network);
        }
        let batch = &record.receipts[..batch_len];

        let mut total = U256::ZERO;
        for signed in batch {
            total = total.saturating_add(signed.receipt.amount.inner());
        }

        let balance = match self
            .signer
            .debit_balance_of(self.config.debit_wallet, payer, record.approval.asset)
            .await
        {
            Ok(balance) => balance,
            Err(error) => {
                tracing::warn!(error = %error, "balance read failed before settlement");
                return SettleResponse::failure(
                    InvalidReason::SettlementTransactionFailed,
                    network,
                );
            }
        };
        if balance < total {
            return SettleResponse::failure(
                InvalidReason::InsufficientDebitWalletBalance,
                network,
            );
        }

        let start_nonce = batch[0].receipt.nonce;
        let end_nonce = batch[batch_len - 1].receipt.nonce;
        let contiguous = batch
            .iter()
            .enumerate()
            .all(|(i, signed)| signed.receipt.nonce == start_nonce + U256::from(i as u64));
        if !contiguous {
            return SettleResponse::failure(InvalidReason::ReceiptNonceGap, network);
        }

        let transaction = match self.config.settlement_mode {
            SettlementMode::Synthetic => {
                synthetic_settlement_hash(session_id, start_nonce, end_nonce, total).to_string()
            }
            SettlementMode::Onchain => {
                let call = SettleSessionCall {
                    settlement_contract: record.settlement_contract,
                    approval: record.approval.as_typed(),
                    session_signature: record.session_signature.clone(),
                    start_nonce,
                    end_nonce,
                    total_amount: total,
                };
                match self.signer.settle_session(call).await {
                    Ok(outcome) if outcome.success => outcome.transaction_hash.to_string(),
                    Ok(outcome) => {
                        tracing::warn!(tx = %outcome.transaction_hash, "settlement reverted");
                        return SettleResponse::failure(
                            InvalidReason::SettlementTransactionFailed,
                            network,
                        );
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "settlement submission failed");
                        return SettleResponse::failure(
                            InvalidReason::SettlementTransactionFailed,
                            network,
                        );
                    }
                }
            }
        };

        // Gross spend is not reduced: `spent` tracks session lifetime spend.
        record
            .receipts
            .retain(|signed| signed.receipt.nonce > end_nonce);
        self.settled_receipts
            .fetch_add(batch_len as u64, Ordering::Relaxed);
        self.settlement_txs.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            session = %session_id,
            start = %start_nonce,
            end = %end_nonce,
            total = %total,
            tx = %transaction,
            "session batch settled"
        );

        SettleResponse::success(transaction, network).with_payer(payer.to_string())
    }

    /// One scheduler pass: settle every pending session that is neither
    /// settling nor empty, then evict closed sessions.
    pub async fn settle_pending(&self) {
        for session_id in self.pending_snapshot() {
            let Some(record) = self.store.get(&session_id) else {
                self.drop_pending(&session_id);
                continue;
            };
            if record.settling || record.receipts.is_empty() {
                continue;
            }
            let network = record.network.clone();
            let response = self.settle_session_by_id(session_id, network).await;
            if !response.success {
                tracing::warn!(
                    session = %session_id,
                    reason = ?response.error_reason,
                    "scheduled settlement failed"
                );
            }
        }
        self.evict_closed();
    }

    /// Removes sessions that are drained and past expiry.
    pub fn evict_closed(&self) {
        let now = UnixTimestamp::now();
        for session_id in self.pending_snapshot() {
            let Some(record) = self.store.get(&session_id) else {
                self.drop_pending(&session_id);
                continue;
            };
            if record.receipts.is_empty() && record.approval.expiry < now && !record.settling {
                self.store.delete(&session_id);
                self.locks.remove(&session_id);
                self.drop_pending(&session_id);
                tracing::info!(session = %session_id, "session closed");
            }
        }
    }
}

/// `keccak256(abi.encodePacked(sessionId, startNonce, endNonce, total))`.
pub fn synthetic_settlement_hash(
    session_id: B256,
    start_nonce: U256,
    end_nonce: U256,
    total: U256,
) -> B256 {
    let mut packed = Vec::with_capacity(128);
    packed.extend_from_slice(session_id.as_slice());
    packed.extend_from_slice(&start_nonce.to_be_bytes::<32>());
    packed.extend_from_slice(&end_nonce.to_be_bytes::<32>());
    packed.extend_from_slice(&total.to_be_bytes::<32>());
    keccak256(&packed)
}

#[async_trait]
impl FacilitatorScheme for OdpDeferredFacilitator {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, SchemeError> {
        self.verify_inner(payload, requirements).await
    }

    async fn settle(
        &self,
        _payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, SchemeError> {
        let network = requirements.network.clone();
        let extras = match OdpExtras::from_requirements(requirements) {
            Ok(extras) => extras,
            Err(_) => {
                return Ok(SettleResponse::failure(
                    InvalidReason::InvalidRequirementsExtra,
                    network,
                ));
            }
        };
        if extras.settlement_contract != self.config.settlement_contract {
            return Ok(SettleResponse::failure(
                InvalidReason::SettlementContractMismatch,
                network,
            ));
        }
        if extras.debit_wallet != self.config.debit_wallet {
            return Ok(SettleResponse::failure(
                InvalidReason::DebitWalletMismatch,
                network,
            ));
        }
        if extras.withdraw_delay_seconds != self.config.withdraw_delay_seconds {
            return Ok(SettleResponse::failure(
                InvalidReason::WithdrawDelayMismatch,
                network,
            ));
        }
        let processors = extras.processors();
        if !processors.is_empty() {
            let ours = self.signer.addresses();
            if !processors.iter().any(|p| ours.contains(p)) {
                return Ok(SettleResponse::failure(
                    InvalidReason::UnauthorizedProcessor,
                    network,
                ));
            }
        }
        match self
            .signer
            .debit_withdraw_delay_seconds(extras.debit_wallet)
            .await
        {
            Ok(delay) if delay == extras.withdraw_delay_seconds => {}
            Ok(_) | Err(_) => {
                return Ok(SettleResponse::failure(
                    InvalidReason::DebitWalletWithdrawDelayMismatch,
                    network,
                ));
            }
        }

        Ok(self.settle_session_by_id(extras.session_id, network).await)
    }

    fn kinds(&self) -> Vec<SupportedPaymentKind> {
        let mut kind = supported_kind(ODP_SCHEME, "eip155:*");
        kind.extra = Some(json!({
            "settlementContract": self.config.settlement_contract.to_string(),
            "debitWallet": self.config.debit_wallet.to_string(),
            "withdrawDelaySeconds": self.config.withdraw_delay_seconds.to_string(),
        }));
        vec![kind]
    }

    fn signers(&self) -> HashMap<Network, Vec<String>> {
        let addresses: Vec<String> = self
            .signer
            .addresses()
            .iter()
            .map(|address| address.to_string())
            .collect();
        self.config
            .networks
            .iter()
            .map(|network| (network.clone(), addresses.clone()))
            .collect()
    }
}
