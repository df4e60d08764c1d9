//! End-to-end deferred scheme flows: session open, receipt stream, batch
//! settlement, and the rejection ladder.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use fluxa402_odp::chain::{MockEvmSigner, TxOutcome};
use fluxa402_odp::client::OdpDeferredClient;
use fluxa402_odp::eip712::receipt_signing_hash;
use fluxa402_odp::facilitator::synthetic_settlement_hash;
use fluxa402_odp::scheduler::AutoSettler;
use fluxa402_odp::store::{InMemorySessionStore, SessionStore};
use fluxa402_odp::types::{OdpPayload, ReceiptWire};
use fluxa402_odp::{OdpDeferredConfig, OdpDeferredFacilitator, SettlementMode, ODP_SCHEME};
use fluxa402_types::amount::TokenAmount;
use fluxa402_types::network::Network;
use fluxa402_types::proto::{PaymentPayload, PaymentRequirements, ResourceInfo, X402Version2};
use fluxa402_types::reason::InvalidReason;
use fluxa402_types::scheme::{ClientScheme, FacilitatorScheme};
use fluxa402_types::timestamp::UnixTimestamp;

const SETTLEMENT_CONTRACT: &str = "0xB1F3000000000000000000000000000000000000";
const DEBIT_WALLET: &str = "0x4a52000000000000000000000000000000000000";
const USDC: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";
const PAYEE: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";
const SESSION_ID: &str = "0x4b2f0000000000000000000000000000000000000000000000000000000006c7";

struct Harness {
    facilitator: Arc<OdpDeferredFacilitator>,
    signer: Arc<MockEvmSigner>,
    store: Arc<InMemorySessionStore>,
    payer: PrivateKeySigner,
    client: OdpDeferredClient,
    expiry: UnixTimestamp,
}

fn harness(mode: SettlementMode) -> Harness {
    let processor: Address = "0x7777000000000000000000000000000000000077".parse().unwrap();
    let signer = Arc::new(MockEvmSigner::new(U256::from(86400u64), vec![processor]));
    let store = Arc::new(InMemorySessionStore::new());
    let config = OdpDeferredConfig {
        settlement_contract: SETTLEMENT_CONTRACT.parse().unwrap(),
        debit_wallet: DEBIT_WALLET.parse().unwrap(),
        withdraw_delay_seconds: U256::from(86400u64),
        settlement_mode: mode,
        max_receipts_per_settlement: None,
        networks: vec![Network::new("eip155", "84532")],
    };
    let facilitator = Arc::new(OdpDeferredFacilitator::new(
        config,
        signer.clone(),
        store.clone(),
    ));
    let payer = PrivateKeySigner::random();
    signer.set_balance(
        payer.address(),
        USDC.parse().unwrap(),
        U256::from(1_000_000u64),
    );
    let client = OdpDeferredClient::new(payer.clone());
    Harness {
        facilitator,
        signer,
        store,
        payer,
        client,
        expiry: UnixTimestamp::now() + 3600,
    }
}

fn requirements(h: &Harness, amount: u64, max_spend: u64) -> PaymentRequirements {
    PaymentRequirements {
        scheme: ODP_SCHEME.to_string(),
        network: Network::new("eip155", "84532"),
        amount: TokenAmount::from(amount),
        asset: USDC.to_string(),
        pay_to: PAYEE.to_string(),
        max_timeout_seconds: 60,
        extra: Some(json!({
            "sessionId": SESSION_ID,
            "startNonce": "0",
            "maxSpend": max_spend.to_string(),
            "expiry": h.expiry.to_string(),
            "settlementContract": SETTLEMENT_CONTRACT,
            "debitWallet": DEBIT_WALLET,
            "withdrawDelaySeconds": "86400",
        })),
    }
}

fn session_id() -> B256 {
    SESSION_ID.parse().unwrap()
}

async fn pay(h: &Harness, requirements: &PaymentRequirements) -> PaymentPayload {
    let resource = ResourceInfo::new("https://api.example.com/resource");
    h.client.create_payment(&resource, requirements).await.unwrap()
}

#[tokio::test]
async fn first_receipt_opens_session() {
    let h = harness(SettlementMode::Synthetic);
    let requirements = requirements(&h, 15000, 1_000_000);
    let payload = pay(&h, &requirements).await;

    let response = h
        .facilitator
        .verify(&payload, &requirements)
        .await
        .unwrap();
    assert!(response.is_valid, "reason: {:?}", response.invalid_reason);
    assert_eq!(
        response.payer.as_deref(),
        Some(h.payer.address().to_string().as_str())
    );

    let record = h.store.get(&session_id()).unwrap();
    assert_eq!(record.next_nonce, U256::from(1u64));
    assert_eq!(record.spent, TokenAmount::from(15000u64));
    assert_eq!(record.receipts.len(), 1);
    assert_eq!(record.receipts[0].receipt.nonce, U256::ZERO);
    assert!(!record.settling);
}

#[tokio::test]
async fn nonce_skip_is_rejected_and_state_unchanged() {
    let h = harness(SettlementMode::Synthetic);
    let requirements = requirements(&h, 15000, 1_000_000);
    let first = pay(&h, &requirements).await;
    assert!(h.facilitator.verify(&first, &requirements).await.unwrap().is_valid);

    // Hand-sign a receipt skipping nonce 1.
    let receipt = ReceiptWire {
        session_id: session_id(),
        nonce: U256::from(2u64),
        amount: TokenAmount::from(15000u64),
        deadline: UnixTimestamp::now() + 60,
        request_hash: B256::ZERO,
    };
    let hash = receipt_signing_hash(
        &receipt.as_typed(),
        84532,
        SETTLEMENT_CONTRACT.parse().unwrap(),
    );
    let signature = h.payer.sign_hash_sync(&hash).unwrap();
    let odp = OdpPayload {
        session_approval: None,
        session_signature: None,
        receipt: Some(receipt),
        receipt_signature: Some(signature.as_bytes().to_vec().into()),
    };
    let payload = PaymentPayload {
        x402_version: X402Version2,
        resource: ResourceInfo::new("https://api.example.com/resource"),
        accepted: requirements.clone(),
        payload: serde_json::to_value(&odp).unwrap(),
        extensions: Default::default(),
    };

    let response = h
        .facilitator
        .verify(&payload, &requirements)
        .await
        .unwrap();
    assert!(!response.is_valid);
    assert_eq!(
        response.invalid_reason,
        Some(InvalidReason::ReceiptNonceMismatch)
    );

    let record = h.store.get(&session_id()).unwrap();
    assert_eq!(record.next_nonce, U256::from(1u64));
    assert_eq!(record.spent, TokenAmount::from(15000u64));
    assert_eq!(record.receipts.len(), 1);
}

#[tokio::test]
async fn batch_settlement_synthetic_mode() {
    let h = harness(SettlementMode::Synthetic);
    let requirements = requirements(&h, 15000, 1_000_000);

    for _ in 0..5 {
        let payload = pay(&h, &requirements).await;
        let response = h
            .facilitator
            .verify(&payload, &requirements)
            .await
            .unwrap();
        assert!(response.is_valid, "reason: {:?}", response.invalid_reason);
    }
    let record = h.store.get(&session_id()).unwrap();
    assert_eq!(record.spent, TokenAmount::from(75000u64));
    assert_eq!(record.receipts.len(), 5);

    let payload = pay(&h, &requirements).await; // settle body reuses the wire shape
    let settle = h.facilitator.settle(&payload, &requirements).await.unwrap();
    assert!(settle.success, "reason: {:?}", settle.error_reason);
    let expected = synthetic_settlement_hash(
        session_id(),
        U256::ZERO,
        U256::from(4u64),
        U256::from(75000u64),
    );
    assert_eq!(settle.transaction, expected.to_string());

    let record = h.store.get(&session_id()).unwrap();
    assert!(record.receipts.is_empty());
    // Gross spend is retained after settlement.
    assert_eq!(record.spent, TokenAmount::from(75000u64));
    assert!(!record.settling);
}

#[tokio::test]
async fn over_spend_is_rejected_after_two_receipts() {
    let h = harness(SettlementMode::Synthetic);
    let requirements = requirements(&h, 15000, 30000);

    for expected_valid in [true, true, false] {
        let payload = pay(&h, &requirements).await;
        let response = h
            .facilitator
            .verify(&payload, &requirements)
            .await
            .unwrap();
        assert_eq!(response.is_valid, expected_valid);
        if !expected_valid {
            assert_eq!(
                response.invalid_reason,
                Some(InvalidReason::SessionMaxSpendExceeded)
            );
        }
    }
    let record = h.store.get(&session_id()).unwrap();
    assert_eq!(record.receipts.len(), 2);
    assert_eq!(record.spent, TokenAmount::from(30000u64));
}

#[tokio::test]
async fn settle_without_receipts_reports_no_receipts() {
    let h = harness(SettlementMode::Synthetic);
    let requirements = requirements(&h, 15000, 1_000_000);
    let payload = pay(&h, &requirements).await;
    assert!(h.facilitator.verify(&payload, &requirements).await.unwrap().is_valid);

    let settle = h.facilitator.settle(&payload, &requirements).await.unwrap();
    assert!(settle.success);
    let again = h.facilitator.settle(&payload, &requirements).await.unwrap();
    assert!(!again.success);
    assert_eq!(again.error_reason, Some(InvalidReason::NoReceipts));
}

#[tokio::test]
async fn settle_is_refused_while_in_progress() {
    let h = harness(SettlementMode::Synthetic);
    let requirements = requirements(&h, 15000, 1_000_000);
    let payload = pay(&h, &requirements).await;
    assert!(h.facilitator.verify(&payload, &requirements).await.unwrap().is_valid);

    let mut record = h.store.get(&session_id()).unwrap();
    record.settling = true;
    h.store.put(session_id(), record);

    let settle = h.facilitator.settle(&payload, &requirements).await.unwrap();
    assert!(!settle.success);
    assert_eq!(
        settle.error_reason,
        Some(InvalidReason::SettlementInProgress)
    );
}

#[tokio::test]
async fn missing_session_approval_is_rejected() {
    let h = harness(SettlementMode::Synthetic);
    let requirements = requirements(&h, 15000, 1_000_000);
    // Advance the client past the first receipt against a facilitator that
    // never saw the session.
    let _first = pay(&h, &requirements).await;
    let second = pay(&h, &requirements).await;

    let response = h
        .facilitator
        .verify(&second, &requirements)
        .await
        .unwrap();
    assert!(!response.is_valid);
    assert_eq!(
        response.invalid_reason,
        Some(InvalidReason::MissingSessionApproval)
    );
}

#[tokio::test]
async fn insufficient_debit_wallet_balance_is_rejected() {
    let h = harness(SettlementMode::Synthetic);
    h.signer.set_balance(
        h.payer.address(),
        USDC.parse().unwrap(),
        U256::from(20_000u64),
    );
    let requirements = requirements(&h, 15000, 1_000_000);

    let first = pay(&h, &requirements).await;
    assert!(h.facilitator.verify(&first, &requirements).await.unwrap().is_valid);

    let second = pay(&h, &requirements).await;
    let response = h
        .facilitator
        .verify(&second, &requirements)
        .await
        .unwrap();
    assert!(!response.is_valid);
    assert_eq!(
        response.invalid_reason,
        Some(InvalidReason::InsufficientDebitWalletBalance)
    );
}

#[tokio::test]
async fn receipt_amount_must_match_requirements() {
    let h = harness(SettlementMode::Synthetic);
    let offered = requirements(&h, 15000, 1_000_000);
    let payload = pay(&h, &offered).await;

    // Facilitator is handed requirements demanding a different amount.
    let mut wrong = offered.clone();
    wrong.amount = TokenAmount::from(20000u64);
    let response = h.facilitator.verify(&payload, &wrong).await.unwrap();
    assert!(!response.is_valid);
    assert_eq!(
        response.invalid_reason,
        Some(InvalidReason::ReceiptAmountMismatch)
    );
}

#[tokio::test]
async fn stale_deadline_is_rejected() {
    let h = harness(SettlementMode::Synthetic);
    let requirements = requirements(&h, 15000, 1_000_000);
    let first = pay(&h, &requirements).await;
    assert!(h.facilitator.verify(&first, &requirements).await.unwrap().is_valid);

    let receipt = ReceiptWire {
        session_id: session_id(),
        nonce: U256::from(1u64),
        amount: TokenAmount::from(15000u64),
        deadline: UnixTimestamp::now().saturating_sub(1),
        request_hash: B256::ZERO,
    };
    let hash = receipt_signing_hash(
        &receipt.as_typed(),
        84532,
        SETTLEMENT_CONTRACT.parse().unwrap(),
    );
    let signature = h.payer.sign_hash_sync(&hash).unwrap();
    let odp = OdpPayload {
        session_approval: None,
        session_signature: None,
        receipt: Some(receipt),
        receipt_signature: Some(signature.as_bytes().to_vec().into()),
    };
    let payload = PaymentPayload {
        x402_version: X402Version2,
        resource: ResourceInfo::new("https://api.example.com/resource"),
        accepted: requirements.clone(),
        payload: serde_json::to_value(&odp).unwrap(),
        extensions: Default::default(),
    };

    let response = h
        .facilitator
        .verify(&payload, &requirements)
        .await
        .unwrap();
    assert!(!response.is_valid);
    assert_eq!(
        response.invalid_reason,
        Some(InvalidReason::ReceiptDeadlineInvalid)
    );
}

#[tokio::test]
async fn onchain_mode_submits_contiguous_batch() {
    let h = harness(SettlementMode::Onchain);
    let requirements = requirements(&h, 15000, 1_000_000);
    for _ in 0..3 {
        let payload = pay(&h, &requirements).await;
        assert!(h.facilitator.verify(&payload, &requirements).await.unwrap().is_valid);
    }

    let payload = pay(&h, &requirements).await;
    let settle = h.facilitator.settle(&payload, &requirements).await.unwrap();
    assert!(settle.success, "reason: {:?}", settle.error_reason);

    let calls = h.signer.settle_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].start_nonce, U256::ZERO);
    assert_eq!(calls[0].end_nonce, U256::from(2u64));
    assert_eq!(calls[0].total_amount, U256::from(45000u64));
}

#[tokio::test]
async fn onchain_revert_reports_settlement_transaction_failed() {
    let h = harness(SettlementMode::Onchain);
    let requirements = requirements(&h, 15000, 1_000_000);
    let payload = pay(&h, &requirements).await;
    assert!(h.facilitator.verify(&payload, &requirements).await.unwrap().is_valid);

    h.signer.set_settle_outcome(TxOutcome {
        transaction_hash: B256::repeat_byte(0xde),
        success: false,
    });
    let settle = h.facilitator.settle(&payload, &requirements).await.unwrap();
    assert!(!settle.success);
    assert_eq!(
        settle.error_reason,
        Some(InvalidReason::SettlementTransactionFailed)
    );
    // Receipts stay put for the next attempt; the flag is down again.
    let record = h.store.get(&session_id()).unwrap();
    assert_eq!(record.receipts.len(), 1);
    assert!(!record.settling);
}

#[tokio::test]
async fn scheduler_settles_pending_sessions() {
    let h = harness(SettlementMode::Synthetic);
    let requirements = requirements(&h, 15000, 1_000_000);
    for _ in 0..2 {
        let payload = pay(&h, &requirements).await;
        assert!(h.facilitator.verify(&payload, &requirements).await.unwrap().is_valid);
    }
    assert_eq!(h.facilitator.stats().pending_sessions, 1);

    let shutdown = CancellationToken::new();
    let handle = AutoSettler::new(h.facilitator.clone(), Duration::from_millis(50))
        .spawn(shutdown.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();
    handle.await.unwrap();

    let record = h.store.get(&session_id()).unwrap();
    assert!(record.receipts.is_empty());
    assert_eq!(h.facilitator.stats().settlement_txs, 1);
    assert_eq!(h.facilitator.stats().pending_sessions, 0);
}
