//! Chain surface of the deferred scheme: the EIP-712 typed-data structs,
//! the debit wallet and settlement contract interfaces, and the signer
//! capability.
//!
//! [`FacilitatorEvmSigner`] is the opaque capability the facilitator holds:
//! read the debit wallet, submit settlement batches, and report its own
//! addresses for processor authorization. [`EvmSigner`] backs it with an
//! alloy provider; [`MockEvmSigner`] backs it with in-memory state for
//! synthetic mode and tests.

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::sol;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;

sol! {
    /// EIP-712 session-level authorization. The payer signs this once per
    /// session; the signature is replayed to the settlement contract with
    /// every batch.
    #[derive(Debug)]
    struct SessionApproval {
        address payer;
        address payee;
        address asset;
        uint256 maxSpend;
        uint256 expiry;
        bytes32 sessionId;
        uint256 startNonce;
        bytes32 authorizedProcessorsHash;
    }

    /// EIP-712 per-request micropayment under a session.
    #[derive(Debug)]
    struct Receipt {
        bytes32 sessionId;
        uint256 nonce;
        uint256 amount;
        uint256 deadline;
        bytes32 requestHash;
    }

    /// Read-only surface of the debit wallet holding the payer's locked
    /// funds.
    #[sol(rpc)]
    interface IDebitWallet {
        function balanceOf(address owner, address asset) external view returns (uint256);
        function withdrawDelaySeconds() external view returns (uint256);
    }

    /// Batch settlement entrypoint.
    #[sol(rpc)]
    interface IOdpSettlement {
        function settleSession(
            SessionApproval approval,
            bytes sessionSignature,
            uint256 startNonce,
            uint256 endNonce,
            uint256 totalAmount
        ) external;
    }
}

/// One settlement batch, ready for the chain.
#[derive(Debug, Clone)]
pub struct SettleSessionCall {
    pub settlement_contract: Address,
    pub approval: SessionApproval,
    pub session_signature: Bytes,
    pub start_nonce: U256,
    pub end_nonce: U256,
    pub total_amount: U256,
}

/// Outcome of a mined settlement transaction.
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub transaction_hash: B256,
    pub success: bool,
}

/// Chain transport failures.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("contract read failed: {0}")]
    Read(String),
    #[error("transaction failed: {0}")]
    Transaction(String),
}

/// The facilitator's chain capability.
#[async_trait]
pub trait FacilitatorEvmSigner: Send + Sync {
    /// `balanceOf(payer, asset)` on the debit wallet.
    async fn debit_balance_of(
        &self,
        debit_wallet: Address,
        payer: Address,
        asset: Address,
    ) -> Result<U256, ChainError>;

    /// `withdrawDelaySeconds()` on the debit wallet.
    async fn debit_withdraw_delay_seconds(&self, debit_wallet: Address)
        -> Result<U256, ChainError>;

    /// Submits a settlement batch and waits for the receipt.
    async fn settle_session(&self, call: SettleSessionCall) -> Result<TxOutcome, ChainError>;

    /// Addresses this signer settles from.
    fn addresses(&self) -> Vec<Address>;
}

/// Provider-backed signer for on-chain mode.
pub struct EvmSigner<P> {
    provider: P,
    addresses: Vec<Address>,
}

impl<P> EvmSigner<P> {
    pub fn new(provider: P, addresses: Vec<Address>) -> Self {
        Self {
            provider,
            addresses,
        }
    }
}

#[async_trait]
impl<P> FacilitatorEvmSigner for EvmSigner<P>
where
    P: alloy_provider::Provider + Send + Sync,
{
    async fn debit_balance_of(
        &self,
        debit_wallet: Address,
        payer: Address,
        asset: Address,
    ) -> Result<U256, ChainError> {
        let wallet = IDebitWallet::new(debit_wallet, &self.provider);
        wallet
            .balanceOf(payer, asset)
            .call()
            .await
            .map_err(|e| ChainError::Read(e.to_string()))
    }

    async fn debit_withdraw_delay_seconds(
        &self,
        debit_wallet: Address,
    ) -> Result<U256, ChainError> {
        let wallet = IDebitWallet::new(debit_wallet, &self.provider);
        wallet
            .withdrawDelaySeconds()
            .call()
            .await
            .map_err(|e| ChainError::Read(e.to_string()))
    }

    async fn settle_session(&self, call: SettleSessionCall) -> Result<TxOutcome, ChainError> {
        let settlement = IOdpSettlement::new(call.settlement_contract, &self.provider);
        let pending = settlement
            .settleSession(
                call.approval,
                call.session_signature,
                call.start_nonce,
                call.end_nonce,
                call.total_amount,
            )
            .send()
            .await
            .map_err(|e| ChainError::Transaction(e.to_string()))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ChainError::Transaction(e.to_string()))?;
        Ok(TxOutcome {
            transaction_hash: receipt.transaction_hash,
            success: receipt.status(),
        })
    }

    fn addresses(&self) -> Vec<Address> {
        self.addresses.clone()
    }
}

/// In-memory chain state for synthetic mode and tests.
pub struct MockEvmSigner {
    balances: DashMap<(Address, Address), U256>,
    default_balance: U256,
    withdraw_delay_seconds: U256,
    addresses: Vec<Address>,
    settle_outcome: Mutex<Option<TxOutcome>>,
    settle_calls: Mutex<Vec<SettleSessionCall>>,
}

impl MockEvmSigner {
    pub fn new(withdraw_delay_seconds: U256, addresses: Vec<Address>) -> Self {
        Self {
            balances: DashMap::new(),
            default_balance: U256::ZERO,
            withdraw_delay_seconds,
            addresses,
            settle_outcome: Mutex::new(None),
            settle_calls: Mutex::new(Vec::new()),
        }
    }

    /// Balance reported for payers without an explicit entry. Benchmark
    /// setups raise this so any payer can open a session.
    pub fn with_default_balance(mut self, balance: U256) -> Self {
        self.default_balance = balance;
        self
    }

    pub fn set_balance(&self, payer: Address, asset: Address, balance: U256) {
        self.balances.insert((payer, asset), balance);
    }

    /// Forces the next on-chain settlements to report this outcome.
    pub fn set_settle_outcome(&self, outcome: TxOutcome) {
        *self.settle_outcome.lock().expect("mock outcome lock") = Some(outcome);
    }

    /// Batches submitted so far.
    pub fn settle_calls(&self) -> Vec<SettleSessionCall> {
        self.settle_calls.lock().expect("mock calls lock").clone()
    }
}

#[async_trait]
impl FacilitatorEvmSigner for MockEvmSigner {
    async fn debit_balance_of(
        &self,
        _debit_wallet: Address,
        payer: Address,
        asset: Address,
    ) -> Result<U256, ChainError> {
        Ok(self
            .balances
            .get(&(payer, asset))
            .map(|balance| *balance)
            .unwrap_or(self.default_balance))
    }

    async fn debit_withdraw_delay_seconds(
        &self,
        _debit_wallet: Address,
    ) -> Result<U256, ChainError> {
        Ok(self.withdraw_delay_seconds)
    }

    async fn settle_session(&self, call: SettleSessionCall) -> Result<TxOutcome, ChainError> {
        self.settle_calls
            .lock()
            .expect("mock calls lock")
            .push(call.clone());
        let forced = self.settle_outcome.lock().expect("mock outcome lock").clone();
        Ok(forced.unwrap_or(TxOutcome {
            transaction_hash: B256::repeat_byte(0xfa),
            success: true,
        }))
    }

    fn addresses(&self) -> Vec<Address> {
        self.addresses.clone()
    }
}
