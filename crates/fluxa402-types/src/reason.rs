//! Stable semantic failure tags.
//!
//! Every semantic payment failure travels as a string tag in the
//! `invalidReason` / `errorReason` field of a 200-OK body; it never raises
//! an HTTP error. The tags are part of the wire contract and must not
//! change spelling.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Machine-readable reason for a rejected verification or settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidReason {
    // Scheme/network routing.
    UnsupportedScheme,
    NetworkMismatch,
    // Structural payload problems.
    InvalidOdpPayloadMissingReceipt,
    MissingReceiptSignature,
    MissingSessionSignature,
    InvalidRequirementsExtra,
    // Session binding.
    SessionIdMismatch,
    SessionApprovalMismatch,
    MissingSessionApproval,
    RequirementsSessionMismatch,
    // Chain parity.
    SettlementContractMismatch,
    DebitWalletMismatch,
    WithdrawDelayMismatch,
    DebitWalletWithdrawDelayMismatch,
    // Signatures and processor authorization.
    InvalidSessionSignature,
    InvalidReceiptSignature,
    AuthorizedProcessorsHashMismatch,
    UnauthorizedProcessor,
    // Receipt contents.
    ReceiptNonceMismatch,
    ReceiptAmountMismatch,
    ReceiptAmountExceedsMax,
    ReceiptDeadlineInvalid,
    RequestHashMismatch,
    SessionExpired,
    // Spend and liquidity.
    SessionMaxSpendExceeded,
    InsufficientDebitWalletBalance,
    // Settlement.
    SessionNotFound,
    SettlementInProgress,
    NoReceipts,
    ReceiptNonceGap,
    SettlementTransactionFailed,
    // Web-Bot-Auth / HTTP Message Signatures.
    InvalidWebBotAuth,
    MissingComponentPaymentSignature,
    MissingComponentSignatureAgent,
    MissingComponentAuthority,
    LabelMismatch,
    WindowTooLong,
    ExpiredOrNotYetValid,
    KeyNotFound,
    SignatureVerifyFailed,
}

impl InvalidReason {
    /// The stable wire spelling of this tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::UnsupportedScheme => "unsupported_scheme",
            InvalidReason::NetworkMismatch => "network_mismatch",
            InvalidReason::InvalidOdpPayloadMissingReceipt => "invalid_odp_payload_missing_receipt",
            InvalidReason::MissingReceiptSignature => "missing_receipt_signature",
            InvalidReason::MissingSessionSignature => "missing_session_signature",
            InvalidReason::InvalidRequirementsExtra => "invalid_requirements_extra",
            InvalidReason::SessionIdMismatch => "session_id_mismatch",
            InvalidReason::SessionApprovalMismatch => "session_approval_mismatch",
            InvalidReason::MissingSessionApproval => "missing_session_approval",
            InvalidReason::RequirementsSessionMismatch => "requirements_session_mismatch",
            InvalidReason::SettlementContractMismatch => "settlement_contract_mismatch",
            InvalidReason::DebitWalletMismatch => "debit_wallet_mismatch",
            InvalidReason::WithdrawDelayMismatch => "withdraw_delay_mismatch",
            InvalidReason::DebitWalletWithdrawDelayMismatch => {
                "debit_wallet_withdraw_delay_mismatch"
            }
            InvalidReason::InvalidSessionSignature => "invalid_session_signature",
            InvalidReason::InvalidReceiptSignature => "invalid_receipt_signature",
            InvalidReason::AuthorizedProcessorsHashMismatch => "authorized_processors_hash_mismatch",
            InvalidReason::UnauthorizedProcessor => "unauthorized_processor",
            InvalidReason::ReceiptNonceMismatch => "receipt_nonce_mismatch",
            InvalidReason::ReceiptAmountMismatch => "receipt_amount_mismatch",
            InvalidReason::ReceiptAmountExceedsMax => "receipt_amount_exceeds_max",
            InvalidReason::ReceiptDeadlineInvalid => "receipt_deadline_invalid",
            InvalidReason::RequestHashMismatch => "request_hash_mismatch",
            InvalidReason::SessionExpired => "session_expired",
            InvalidReason::SessionMaxSpendExceeded => "session_max_spend_exceeded",
            InvalidReason::InsufficientDebitWalletBalance => "insufficient_debit_wallet_balance",
            InvalidReason::SessionNotFound => "session_not_found",
            InvalidReason::SettlementInProgress => "settlement_in_progress",
            InvalidReason::NoReceipts => "no_receipts",
            InvalidReason::ReceiptNonceGap => "receipt_nonce_gap",
            InvalidReason::SettlementTransactionFailed => "settlement_transaction_failed",
            InvalidReason::InvalidWebBotAuth => "invalid_web_bot_auth",
            InvalidReason::MissingComponentPaymentSignature => {
                "missing_component_payment-signature"
            }
            InvalidReason::MissingComponentSignatureAgent => "missing_component_signature-agent",
            InvalidReason::MissingComponentAuthority => "missing_component_@authority",
            InvalidReason::LabelMismatch => "label_mismatch",
            InvalidReason::WindowTooLong => "window_too_long",
            InvalidReason::ExpiredOrNotYetValid => "expired_or_not_yet_valid",
            InvalidReason::KeyNotFound => "key_not_found",
            InvalidReason::SignatureVerifyFailed => "signature_verify_failed",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        // Closed set: all wire spellings emitted by any fluxa402 role.
        const ALL: &[InvalidReason] = &[
            InvalidReason::UnsupportedScheme,
            InvalidReason::NetworkMismatch,
            InvalidReason::InvalidOdpPayloadMissingReceipt,
            InvalidReason::MissingReceiptSignature,
            InvalidReason::MissingSessionSignature,
            InvalidReason::InvalidRequirementsExtra,
            InvalidReason::SessionIdMismatch,
            InvalidReason::SessionApprovalMismatch,
            InvalidReason::MissingSessionApproval,
            InvalidReason::RequirementsSessionMismatch,
            InvalidReason::SettlementContractMismatch,
            InvalidReason::DebitWalletMismatch,
            InvalidReason::WithdrawDelayMismatch,
            InvalidReason::DebitWalletWithdrawDelayMismatch,
            InvalidReason::InvalidSessionSignature,
            InvalidReason::InvalidReceiptSignature,
            InvalidReason::AuthorizedProcessorsHashMismatch,
            InvalidReason::UnauthorizedProcessor,
            InvalidReason::ReceiptNonceMismatch,
            InvalidReason::ReceiptAmountMismatch,
            InvalidReason::ReceiptAmountExceedsMax,
            InvalidReason::ReceiptDeadlineInvalid,
            InvalidReason::RequestHashMismatch,
            InvalidReason::SessionExpired,
            InvalidReason::SessionMaxSpendExceeded,
            InvalidReason::InsufficientDebitWalletBalance,
            InvalidReason::SessionNotFound,
            InvalidReason::SettlementInProgress,
            InvalidReason::NoReceipts,
            InvalidReason::ReceiptNonceGap,
            InvalidReason::SettlementTransactionFailed,
            InvalidReason::InvalidWebBotAuth,
            InvalidReason::MissingComponentPaymentSignature,
            InvalidReason::MissingComponentSignatureAgent,
            InvalidReason::MissingComponentAuthority,
            InvalidReason::LabelMismatch,
            InvalidReason::WindowTooLong,
            InvalidReason::ExpiredOrNotYetValid,
            InvalidReason::KeyNotFound,
            InvalidReason::SignatureVerifyFailed,
        ];
        ALL.iter().copied().find(|reason| reason.as_str() == s)
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for InvalidReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for InvalidReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        InvalidReason::from_str(&s)
            .ok_or_else(|| de::Error::custom(format!("unknown invalid reason: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_are_stable() {
        assert_eq!(
            serde_json::to_string(&InvalidReason::ReceiptNonceMismatch).unwrap(),
            "\"receipt_nonce_mismatch\""
        );
        assert_eq!(
            serde_json::to_string(&InvalidReason::MissingComponentPaymentSignature).unwrap(),
            "\"missing_component_payment-signature\""
        );
        assert_eq!(
            serde_json::to_string(&InvalidReason::MissingComponentAuthority).unwrap(),
            "\"missing_component_@authority\""
        );
    }

    #[test]
    fn test_roundtrip_every_tag() {
        let sample = [
            InvalidReason::UnsupportedScheme,
            InvalidReason::SessionMaxSpendExceeded,
            InvalidReason::SettlementInProgress,
            InvalidReason::MissingComponentSignatureAgent,
            InvalidReason::ExpiredOrNotYetValid,
        ];
        for reason in sample {
            let json = serde_json::to_string(&reason).unwrap();
            let back: InvalidReason = serde_json::from_str(&json).unwrap();
            assert_eq!(reason, back);
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(serde_json::from_str::<InvalidReason>("\"no_such_reason\"").is_err());
    }
}
