//! Session records, the store interface, and per-session locks.
//!
//! The facilitator is the single writer of session state. `put` is the unit
//! of atomicity: callers read-modify-write a whole [`SessionRecord`] while
//! holding that session's lock from [`SessionLocks`]. The store itself only
//! promises serializable updates per session; no ordering is guaranteed
//! across sessions.

use alloy_primitives::{Address, Bytes, B256, U256};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use fluxa402_types::amount::TokenAmount;
use fluxa402_types::network::Network;

use crate::types::{ReceiptWire, SessionApprovalWire};

/// A receipt together with the payer's EIP-712 signature over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedReceipt {
    pub receipt: ReceiptWire,
    pub signature: Bytes,
}

/// Facilitator-local state of one session.
///
/// Invariants, for one session at all times:
///
/// 1. `receipts[i].nonce == approval.start_nonce + i`
/// 2. `next_nonce == approval.start_nonce + receipts_ever_accepted`
/// 3. `spent` is the sum of every accepted receipt amount (gross, not
///    outstanding; settlement does not reduce it)
/// 4. `spent <= approval.max_spend`
/// 5. `settling` is raised only while a settlement call is in flight
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub approval: SessionApprovalWire,
    pub session_signature: Bytes,
    /// The settlement contract the approval was signed against.
    pub settlement_contract: Address,
    /// The network the session lives on; batches settle there.
    pub network: Network,
    pub next_nonce: U256,
    pub spent: TokenAmount,
    /// Outstanding receipts, ordered by nonce.
    pub receipts: Vec<SignedReceipt>,
    /// True only while a settlement call for this session is in flight.
    pub settling: bool,
}

impl SessionRecord {
    /// A fresh record for a just-approved session.
    pub fn open(
        approval: SessionApprovalWire,
        session_signature: Bytes,
        settlement_contract: Address,
        network: Network,
    ) -> Self {
        let next_nonce = approval.start_nonce;
        Self {
            approval,
            session_signature,
            settlement_contract,
            network,
            next_nonce,
            spent: TokenAmount::ZERO,
            receipts: Vec::new(),
            settling: false,
        }
    }
}

/// Abstract session persistence.
///
/// Implementations may be in-memory (the default), embedded KV, or an
/// external KV, as long as per-session updates are serializable.
pub trait SessionStore: Send + Sync {
    fn get(&self, session_id: &B256) -> Option<SessionRecord>;
    fn put(&self, session_id: B256, record: SessionRecord);
    fn delete(&self, session_id: &B256);
}

/// The default in-memory store.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<B256, SessionRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, session_id: &B256) -> Option<SessionRecord> {
        self.sessions.get(session_id).map(|record| record.clone())
    }

    fn put(&self, session_id: B256, record: SessionRecord) {
        self.sessions.insert(session_id, record);
    }

    fn delete(&self, session_id: &B256) {
        self.sessions.remove(session_id);
    }
}

/// Per-session mutexes serializing verify and settle.
///
/// The lock is held across chain RPC calls: balance checks and nonce
/// advance must observe a consistent record. Locks are evicted together
/// with their session on close.
#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<B256, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding `session_id`, created on first use.
    pub fn lock_for(&self, session_id: B256) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the lock entry of an evicted session.
    pub fn remove(&self, session_id: &B256) {
        // Only retire a lock nobody is holding or waiting on.
        self.locks.remove_if(session_id, |_, lock| {
            Arc::strong_count(lock) == 1 && lock.try_lock().is_ok()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use fluxa402_types::timestamp::UnixTimestamp;

    fn record() -> SessionRecord {
        SessionRecord::open(
            SessionApprovalWire {
                payer: Address::repeat_byte(1),
                payee: Address::repeat_byte(2),
                asset: Address::repeat_byte(3),
                max_spend: TokenAmount::from(1000000u64),
                expiry: UnixTimestamp::from_secs(1740673000),
                session_id: B256::repeat_byte(0x4b),
                start_nonce: U256::ZERO,
                authorized_processors_hash: B256::ZERO,
            },
            Bytes::from(vec![0u8; 65]),
            Address::repeat_byte(4),
            Network::new("eip155", "84532"),
        )
    }

    #[test]
    fn test_open_record_starts_at_start_nonce() {
        let record = record();
        assert_eq!(record.next_nonce, U256::ZERO);
        assert_eq!(record.spent, TokenAmount::ZERO);
        assert!(record.receipts.is_empty());
        assert!(!record.settling);
    }

    #[test]
    fn test_store_get_put_delete() {
        let store = InMemorySessionStore::new();
        let id = B256::repeat_byte(0x4b);
        assert!(store.get(&id).is_none());
        store.put(id, record());
        assert!(store.get(&id).is_some());
        store.delete(&id);
        assert!(store.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_lock_map_returns_same_mutex() {
        let locks = SessionLocks::new();
        let id = B256::repeat_byte(0x4b);
        let a = locks.lock_for(id);
        let b = locks.lock_for(id);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_lock_removal_skips_held_locks() {
        let locks = SessionLocks::new();
        let id = B256::repeat_byte(0x4b);
        let lock = locks.lock_for(id);
        let guard = lock.lock().await;
        locks.remove(&id);
        // Held elsewhere, so the entry survives and stays the same mutex.
        assert!(Arc::ptr_eq(&lock, &locks.lock_for(id)));
        drop(guard);
        drop(lock);
        locks.remove(&id);
        // Now retired; the next caller gets a fresh mutex.
        let fresh = locks.lock_for(id);
        assert_eq!(Arc::strong_count(&fresh), 2);
    }
}
