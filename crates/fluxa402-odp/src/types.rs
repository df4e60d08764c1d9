//! Wire shapes of the `odp-deferred` scheme.
//!
//! [`OdpExtras`] is the scheme-specific content of
//! `PaymentRequirements.extra`; [`OdpPayload`] is the scheme-specific
//! content of `PaymentPayload.payload`. Hex fields use `alloy` types, which
//! enforce exact lengths (`0x` + 64 chex for 32-byte values, 40 chex for
//! addresses) and canonicalize case on the way in.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use fluxa402_types::amount::{u256_str, TokenAmount};
use fluxa402_types::proto::PaymentRequirements;
use fluxa402_types::timestamp::UnixTimestamp;

use crate::{Receipt, SessionApproval};

/// Scheme-specific fields of a server's payment requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OdpExtras {
    /// Session identifier picked by the server, 32 bytes.
    pub session_id: B256,
    /// First receipt nonce of the session.
    #[serde(with = "u256_str")]
    pub start_nonce: U256,
    /// Session-level spend cap.
    pub max_spend: TokenAmount,
    /// Session expiry.
    pub expiry: UnixTimestamp,
    /// The settlement contract batches are submitted to.
    pub settlement_contract: Address,
    /// The debit wallet holding the payer's locked funds.
    pub debit_wallet: Address,
    /// The debit wallet's mandatory withdrawal delay.
    #[serde(with = "u256_str")]
    pub withdraw_delay_seconds: U256,
    /// Processors allowed to settle this session; empty or absent means any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_processors: Option<Vec<Address>>,
    /// Expected per-receipt request hash; zero hash when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_hash: Option<B256>,
    /// Cap on a single receipt's amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount_per_receipt: Option<TokenAmount>,
}

impl OdpExtras {
    /// Parses the extras out of payment requirements.
    pub fn from_requirements(requirements: &PaymentRequirements) -> Result<Self, serde_json::Error> {
        let extra = requirements.extra.clone().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(extra)
    }

    /// The request hash every receipt must carry; zero when unrestricted.
    pub fn expected_request_hash(&self) -> B256 {
        self.request_hash.unwrap_or(B256::ZERO)
    }

    /// The authorized processor set; empty means any.
    pub fn processors(&self) -> &[Address] {
        self.authorized_processors.as_deref().unwrap_or(&[])
    }
}

/// A payer's session-level authorization, wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionApprovalWire {
    pub payer: Address,
    pub payee: Address,
    pub asset: Address,
    pub max_spend: TokenAmount,
    pub expiry: UnixTimestamp,
    pub session_id: B256,
    #[serde(with = "u256_str")]
    pub start_nonce: U256,
    pub authorized_processors_hash: B256,
}

impl SessionApprovalWire {
    /// The EIP-712 struct this wire form signs as.
    pub fn as_typed(&self) -> SessionApproval {
        SessionApproval {
            payer: self.payer,
            payee: self.payee,
            asset: self.asset,
            maxSpend: self.max_spend.inner(),
            expiry: U256::from(self.expiry.as_secs()),
            sessionId: self.session_id,
            startNonce: self.start_nonce,
            authorizedProcessorsHash: self.authorized_processors_hash,
        }
    }
}

/// One request's micropayment, wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptWire {
    pub session_id: B256,
    #[serde(with = "u256_str")]
    pub nonce: U256,
    pub amount: TokenAmount,
    pub deadline: UnixTimestamp,
    pub request_hash: B256,
}

impl ReceiptWire {
    /// The EIP-712 struct this wire form signs as.
    pub fn as_typed(&self) -> Receipt {
        Receipt {
            sessionId: self.session_id,
            nonce: self.nonce,
            amount: self.amount.inner(),
            deadline: U256::from(self.deadline.as_secs()),
            requestHash: self.request_hash,
        }
    }
}

/// Scheme-specific content of a payment payload.
///
/// The session approval and its signature ride along on the first receipt
/// only; later receipts reference the stored session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OdpPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_approval: Option<SessionApprovalWire>,
    /// EIP-712 signature over the session approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_signature: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<ReceiptWire>,
    /// EIP-712 signature over the receipt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_signature: Option<Bytes>,
}
