//! EIP-712 domains, signing hashes, and signature recovery.
//!
//! Both the session approval and every receipt are signed under the domain
//! `x402-odp-deferred / 1 / chainId / settlementContract`. Recovery rejects
//! high-s signatures (EIP-2 malleability) before comparing the recovered
//! address with the expected payer.

use alloy_primitives::{keccak256, Address, Signature, B256, U256};
use alloy_sol_types::{eip712_domain, Eip712Domain, SolStruct};

use crate::{Receipt, SessionApproval};

/// EIP-712 domain name of the scheme.
pub const EIP712_DOMAIN_NAME: &str = "x402-odp-deferred";
/// EIP-712 domain version of the scheme.
pub const EIP712_DOMAIN_VERSION: &str = "1";

/// secp256k1 curve order N / 2; signatures with s above this are malleable.
const SECP256K1_N_DIV_2: U256 = U256::from_limbs([
    0xBFD25E8CD0364140,
    0xBAAEDCE6AF48A03B,
    0xFFFFFFFFFFFFFFFE,
    0x7FFFFFFFFFFFFFFF,
]);

/// Builds the scheme domain for a chain and settlement contract.
pub fn odp_domain(chain_id: u64, settlement_contract: Address) -> Eip712Domain {
    eip712_domain! {
        name: EIP712_DOMAIN_NAME,
        version: EIP712_DOMAIN_VERSION,
        chain_id: chain_id,
        verifying_contract: settlement_contract,
    }
}

/// The digest a payer signs for a session approval.
pub fn approval_signing_hash(
    approval: &SessionApproval,
    chain_id: u64,
    settlement_contract: Address,
) -> B256 {
    approval.eip712_signing_hash(&odp_domain(chain_id, settlement_contract))
}

/// The digest a payer signs for a receipt.
pub fn receipt_signing_hash(
    receipt: &Receipt,
    chain_id: u64,
    settlement_contract: Address,
) -> B256 {
    receipt.eip712_signing_hash(&odp_domain(chain_id, settlement_contract))
}

/// Signature recovery failures.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("signature must be 65 bytes, got {0}")]
    Length(usize),
    #[error("invalid signature encoding: {0}")]
    Encoding(String),
    #[error("high-s signature rejected")]
    HighS,
    #[error("recovery failed: {0}")]
    Recovery(String),
}

/// Recovers the signer of `hash` from a 65-byte signature.
pub fn recover_signer(hash: B256, signature_bytes: &[u8]) -> Result<Address, SignatureError> {
    if signature_bytes.len() != 65 {
        return Err(SignatureError::Length(signature_bytes.len()));
    }
    let signature = Signature::from_raw(signature_bytes)
        .map_err(|e| SignatureError::Encoding(e.to_string()))?;
    if signature.s() > SECP256K1_N_DIV_2 {
        return Err(SignatureError::HighS);
    }
    signature
        .recover_address_from_prehash(&hash)
        .map_err(|e| SignatureError::Recovery(e.to_string()))
}

/// `keccak256(abi.encodePacked(sortedLowercaseAddresses))`; the zero hash
/// when the processor set is empty (unrestricted).
pub fn authorized_processors_hash(processors: &[Address]) -> B256 {
    if processors.is_empty() {
        return B256::ZERO;
    }
    // Byte order equals lowercase-hex order, so a plain sort matches the
    // contract's sortedLowercaseAddresses convention.
    let mut sorted: Vec<Address> = processors.to_vec();
    sorted.sort();
    let mut packed = Vec::with_capacity(sorted.len() * 20);
    for address in &sorted {
        packed.extend_from_slice(address.as_slice());
    }
    keccak256(&packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    fn sample_receipt() -> Receipt {
        Receipt {
            sessionId: B256::repeat_byte(0x4b),
            nonce: U256::ZERO,
            amount: U256::from(15000u64),
            deadline: U256::from(1740672160u64),
            requestHash: B256::ZERO,
        }
    }

    #[test]
    fn test_receipt_sign_and_recover() {
        let signer = PrivateKeySigner::random();
        let contract: Address = "0xB1F3000000000000000000000000000000000000".parse().unwrap();
        let hash = receipt_signing_hash(&sample_receipt(), 84532, contract);
        let signature = signer.sign_hash_sync(&hash).unwrap();
        let recovered = recover_signer(hash, &signature.as_bytes()).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn test_domain_binds_chain_and_contract() {
        let contract: Address = "0xB1F3000000000000000000000000000000000000".parse().unwrap();
        let other: Address = "0x4a52000000000000000000000000000000000000".parse().unwrap();
        let receipt = sample_receipt();
        let hash = receipt_signing_hash(&receipt, 84532, contract);
        assert_ne!(hash, receipt_signing_hash(&receipt, 8453, contract));
        assert_ne!(hash, receipt_signing_hash(&receipt, 84532, other));
    }

    #[test]
    fn test_recover_rejects_wrong_length() {
        let hash = B256::repeat_byte(1);
        assert!(matches!(
            recover_signer(hash, &[0u8; 64]),
            Err(SignatureError::Length(64))
        ));
    }

    #[test]
    fn test_processors_hash_empty_is_zero() {
        assert_eq!(authorized_processors_hash(&[]), B256::ZERO);
    }

    #[test]
    fn test_processors_hash_is_order_insensitive() {
        let a: Address = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".parse().unwrap();
        let b: Address = "0x036CbD53842c5426634e7929541eC2318f3dCF7e".parse().unwrap();
        let forward = authorized_processors_hash(&[a, b]);
        let reverse = authorized_processors_hash(&[b, a]);
        assert_eq!(forward, reverse);
        assert_ne!(forward, B256::ZERO);
        assert_ne!(forward, authorized_processors_hash(&[a]));
    }
}
