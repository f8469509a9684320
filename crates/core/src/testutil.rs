//! Shared test fixtures: a scriptable mock chain client and record seeding
//! helpers over a temporary store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use relayer_chain::{CallRequest, ChainClient, ChainError, ReceiptInfo};

use crate::custody::{KeyCustody, LocalKeyCustody};
use crate::store::Store;
use crate::types::{now_ms, AccountStatus, BuilderRecord, OperatorRecord};

// Well-known test private key (DO NOT USE IN PRODUCTION)
pub(crate) const TEST_OPERATOR_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub(crate) const TEST_OPERATOR_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

pub(crate) fn custody() -> Arc<LocalKeyCustody> {
    Arc::new(LocalKeyCustody::new(&[7u8; 32]).unwrap())
}

pub(crate) fn store() -> Arc<Store> {
    Arc::new(Store::temporary().unwrap())
}

pub(crate) fn seed_builder(
    store: &Store,
    custody: &dyn KeyCustody,
    api_key: &str,
    secret: &str,
    passphrase: &str,
) -> BuilderRecord {
    let record = BuilderRecord {
        api_key: api_key.to_string(),
        encrypted_secret: custody.encrypt(secret).unwrap(),
        encrypted_passphrase: custody.encrypt(passphrase).unwrap(),
        name: format!("{api_key} builder"),
        status: AccountStatus::Active,
        created_at: now_ms(),
        updated_at: now_ms(),
    };
    store.put_builder(&record).unwrap();
    record
}

pub(crate) fn seed_operator(
    store: &Store,
    custody: &dyn KeyCustody,
    address: &str,
    private_key: &str,
    current_nonce: Option<u64>,
) -> OperatorRecord {
    let record = OperatorRecord {
        address: address.to_string(),
        encrypted_private_key: custody.encrypt(private_key).unwrap(),
        status: AccountStatus::Active,
        balance_threshold: "1000000000000000000".to_string(),
        current_nonce,
        created_at: now_ms(),
        updated_at: now_ms(),
    };
    store.put_operator(&record).unwrap();
    record
}

/// Scriptable in-memory [`ChainClient`].
///
/// Broadcasts return sequential synthetic hashes; receipts come from a
/// per-hash map with an optional catch-all default.
pub(crate) struct MockChain {
    pub gas_price: Mutex<u128>,
    pub estimate: Mutex<u64>,
    pub balance: Mutex<U256>,
    pub pending_nonces: Mutex<HashMap<Address, u64>>,
    pub receipts: Mutex<HashMap<B256, ReceiptInfo>>,
    pub fail_price: AtomicBool,
    pub fail_estimate: AtomicBool,
    pub fail_send: AtomicBool,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub sent_hashes: Mutex<Vec<B256>>,
    hash_counter: AtomicU64,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gas_price: Mutex::new(100),
            estimate: Mutex::new(21_000),
            balance: Mutex::new(U256::ZERO),
            pending_nonces: Mutex::new(HashMap::new()),
            receipts: Mutex::new(HashMap::new()),
            fail_price: AtomicBool::new(false),
            fail_estimate: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            sent_hashes: Mutex::new(Vec::new()),
            hash_counter: AtomicU64::new(1),
        })
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn last_hash(&self) -> Option<B256> {
        self.sent_hashes.lock().last().copied()
    }

    pub fn set_receipt(&self, hash: B256, receipt: ReceiptInfo) {
        self.receipts.lock().insert(hash, receipt);
    }

    pub fn set_pending_nonce(&self, address: Address, nonce: u64) {
        self.pending_nonces.lock().insert(address, nonce);
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn suggest_gas_price(&self) -> Result<u128, ChainError> {
        if self.fail_price.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("gas price unavailable".into()));
        }
        Ok(*self.gas_price.lock())
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> Result<u64, ChainError> {
        if self.fail_estimate.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("estimation unavailable".into()));
        }
        Ok(*self.estimate.lock())
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("broadcast rejected".into()));
        }
        let seq = self.hash_counter.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&seq.to_be_bytes());
        let hash = B256::from(bytes);

        self.sent.lock().push(raw.to_vec());
        self.sent_hashes.lock().push(hash);
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, ChainError> {
        Ok(self.receipts.lock().get(&hash).copied())
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
        Ok(self
            .pending_nonces
            .lock()
            .get(&address)
            .copied()
            .unwrap_or(0))
    }

    async fn balance(&self, _address: Address) -> Result<U256, ChainError> {
        Ok(*self.balance.lock())
    }
}
