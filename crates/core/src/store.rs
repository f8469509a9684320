//! Durable records for transactions, builders, operators and fees.
//!
//! Backed by an embedded sled database: one tree per table plus index trees
//! for the lookups the engine needs (task id, tx hash, pending-by-age,
//! fees-by-builder-and-time). Records are serde structs encoded as JSON.
//!
//! Write discipline: compound writes (row + indices) serialize on a
//! store-wide mutex; nonce allocation deliberately bypasses it and uses the
//! tree's atomic read-modify-write so the hottest path contends only on the
//! one operator row. Status transitions check the current status under the
//! lock, which makes every terminal transition conditional on the row still
//! being PENDING.

use parking_lot::Mutex;
use sled::Tree;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::types::{
    now_ms, BuilderFeeRecord, BuilderRecord, OperatorRecord, TransactionRecord, TransactionType,
    TxStatus,
};

const TREE_TRANSACTIONS: &str = "transactions";
const TREE_TX_BY_TASK: &str = "tx_by_task";
const TREE_TX_BY_HASH: &str = "tx_by_hash";
const TREE_TX_PENDING: &str = "tx_pending";
const TREE_OPERATORS: &str = "operators";
const TREE_BUILDERS: &str = "builders";
const TREE_FEES: &str = "fees";

const KEY_SEP: u8 = 0;

/// Fields supplied by the coordinator when admitting a submission.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub task_id: String,
    pub builder_api_key: String,
    pub operator_address: String,
    pub to: String,
    pub target_contract: String,
    pub calldata: String,
    pub value: String,
    pub tx_type: TransactionType,
    pub signature: Option<String>,
    pub forwarder: Option<String>,
    pub order_id: Option<String>,
    pub gas_limit: u64,
}

/// Embedded persistent store.
pub struct Store {
    db: sled::Db,
    transactions: Tree,
    tx_by_task: Tree,
    tx_by_hash: Tree,
    tx_pending: Tree,
    operators: Tree,
    builders: Tree,
    fees: Tree,
    write_lock: Mutex<()>,
}

fn be(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn ts_key(ts_ms: i64) -> [u8; 8] {
    (ts_ms.max(0) as u64).to_be_bytes()
}

fn operator_key(address: &str) -> Vec<u8> {
    address.to_lowercase().into_bytes()
}

fn task_index_key(task_id: &str, row_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(task_id.len() + 9);
    key.extend_from_slice(task_id.as_bytes());
    key.push(KEY_SEP);
    key.extend_from_slice(&be(row_id));
    key
}

fn task_index_prefix(task_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(task_id.len() + 1);
    key.extend_from_slice(task_id.as_bytes());
    key.push(KEY_SEP);
    key
}

fn pending_index_key(record: &TransactionRecord) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&ts_key(record.created_at));
    key.extend_from_slice(&be(record.row_id));
    key
}

fn fee_key(api_key: &str, created_at: i64, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(api_key.len() + 17);
    key.extend_from_slice(api_key.as_bytes());
    key.push(KEY_SEP);
    key.extend_from_slice(&ts_key(created_at));
    key.extend_from_slice(&be(seq));
    key
}

impl Store {
    /// Open (or create) the store at the given directory path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// Open an anonymous store that is discarded on drop. Test-only in
    /// spirit, but harmless to expose.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            transactions: db.open_tree(TREE_TRANSACTIONS)?,
            tx_by_task: db.open_tree(TREE_TX_BY_TASK)?,
            tx_by_hash: db.open_tree(TREE_TX_BY_HASH)?,
            tx_pending: db.open_tree(TREE_TX_PENDING)?,
            operators: db.open_tree(TREE_OPERATORS)?,
            builders: db.open_tree(TREE_BUILDERS)?,
            fees: db.open_tree(TREE_FEES)?,
            write_lock: Mutex::new(()),
            db,
        })
    }

    /// Force outstanding writes to disk. Called once at shutdown; sled
    /// flushes in the background otherwise.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn load_transaction(&self, row_id: u64) -> Result<Option<TransactionRecord>, StoreError> {
        match self.transactions.get(be(row_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_transaction(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        self.transactions
            .insert(be(record.row_id), serde_json::to_vec(record)?)?;
        Ok(())
    }

    /// Persist a freshly admitted submission as a PENDING row.
    pub fn insert_transaction(&self, new: NewTransaction) -> Result<TransactionRecord, StoreError> {
        self.insert_transaction_at(new, now_ms())
    }

    /// Insert with an explicit creation timestamp. Used by tests to age rows
    /// without sleeping.
    pub(crate) fn insert_transaction_at(
        &self,
        new: NewTransaction,
        created_at: i64,
    ) -> Result<TransactionRecord, StoreError> {
        let _guard = self.write_lock.lock();

        if self
            .tx_by_task
            .scan_prefix(task_index_prefix(&new.task_id))
            .next()
            .is_some()
        {
            return Err(StoreError::Duplicate {
                entity: "task_id",
                key: new.task_id,
            });
        }

        let record = TransactionRecord {
            row_id: self.db.generate_id()?,
            task_id: new.task_id,
            tx_hash: None,
            builder_api_key: new.builder_api_key,
            operator_address: new.operator_address,
            to: new.to,
            target_contract: new.target_contract,
            calldata: new.calldata,
            value: new.value,
            tx_type: new.tx_type,
            signature: new.signature,
            forwarder: new.forwarder,
            order_id: new.order_id,
            nonce: None,
            gas_limit: new.gas_limit,
            gas_price: "0".to_string(),
            status: TxStatus::Pending,
            block_number: None,
            gas_used: None,
            error_message: None,
            created_at,
            updated_at: created_at,
        };

        self.write_transaction(&record)?;
        self.tx_by_task
            .insert(task_index_key(&record.task_id, record.row_id), &be(record.row_id)[..])?;
        self.tx_pending
            .insert(pending_index_key(&record), &be(record.row_id)[..])?;

        Ok(record)
    }

    /// Record a successful broadcast: tx hash, nonce and the gas terms that
    /// were actually signed. The row must still be PENDING.
    pub fn record_broadcast(
        &self,
        row_id: u64,
        tx_hash: &str,
        nonce: u64,
        gas_limit: u64,
        gas_price: &str,
    ) -> Result<TransactionRecord, StoreError> {
        let _guard = self.write_lock.lock();

        let mut record = self.load_transaction(row_id)?.ok_or(StoreError::NotFound {
            entity: "transaction",
            key: row_id.to_string(),
        })?;
        if record.status != TxStatus::Pending {
            return Err(StoreError::NotPending(row_id));
        }
        if self.tx_by_hash.contains_key(tx_hash.as_bytes())? {
            return Err(StoreError::Duplicate {
                entity: "tx_hash",
                key: tx_hash.to_string(),
            });
        }

        record.tx_hash = Some(tx_hash.to_string());
        record.nonce = Some(nonce);
        record.gas_limit = gas_limit;
        record.gas_price = gas_price.to_string();
        record.updated_at = now_ms();

        self.write_transaction(&record)?;
        self.tx_by_hash.insert(tx_hash.as_bytes(), &be(row_id)[..])?;
        Ok(record)
    }

    fn terminal_transition<F>(&self, row_id: u64, apply: F) -> Result<TransactionRecord, StoreError>
    where
        F: FnOnce(&mut TransactionRecord),
    {
        let _guard = self.write_lock.lock();

        let mut record = self.load_transaction(row_id)?.ok_or(StoreError::NotFound {
            entity: "transaction",
            key: row_id.to_string(),
        })?;
        if record.status != TxStatus::Pending {
            return Err(StoreError::NotPending(row_id));
        }

        apply(&mut record);
        record.updated_at = now_ms();

        self.write_transaction(&record)?;
        self.tx_pending.remove(pending_index_key(&record))?;
        Ok(record)
    }

    /// PENDING -> MINED with inclusion data.
    pub fn mark_mined(
        &self,
        row_id: u64,
        block_number: u64,
        gas_used: u64,
    ) -> Result<TransactionRecord, StoreError> {
        self.terminal_transition(row_id, |record| {
            record.status = TxStatus::Mined;
            record.block_number = Some(block_number);
            record.gas_used = Some(gas_used);
        })
    }

    /// PENDING -> FAILED with a recorded reason.
    pub fn mark_failed(&self, row_id: u64, error: &str) -> Result<TransactionRecord, StoreError> {
        self.terminal_transition(row_id, |record| {
            record.status = TxStatus::Failed;
            record.error_message = Some(error.to_string());
        })
    }

    /// PENDING -> REPLACED plus insertion of the successor attempt, which
    /// shares the task id and nonce but carries the new hash and price.
    pub fn replace_with_successor(
        &self,
        row_id: u64,
        new_tx_hash: &str,
        new_gas_price: &str,
    ) -> Result<TransactionRecord, StoreError> {
        let _guard = self.write_lock.lock();

        let mut old = self.load_transaction(row_id)?.ok_or(StoreError::NotFound {
            entity: "transaction",
            key: row_id.to_string(),
        })?;
        if old.status != TxStatus::Pending {
            return Err(StoreError::NotPending(row_id));
        }
        if self.tx_by_hash.contains_key(new_tx_hash.as_bytes())? {
            return Err(StoreError::Duplicate {
                entity: "tx_hash",
                key: new_tx_hash.to_string(),
            });
        }

        let now = now_ms();
        let mut successor = old.clone();
        successor.row_id = self.db.generate_id()?;
        successor.tx_hash = Some(new_tx_hash.to_string());
        successor.gas_price = new_gas_price.to_string();
        successor.status = TxStatus::Pending;
        successor.created_at = now;
        successor.updated_at = now;

        old.status = TxStatus::Replaced;
        old.updated_at = now;

        self.write_transaction(&old)?;
        self.tx_pending.remove(pending_index_key(&old))?;

        self.write_transaction(&successor)?;
        self.tx_by_task.insert(
            task_index_key(&successor.task_id, successor.row_id),
            &be(successor.row_id)[..],
        )?;
        self.tx_by_hash
            .insert(new_tx_hash.as_bytes(), &be(successor.row_id)[..])?;
        self.tx_pending
            .insert(pending_index_key(&successor), &be(successor.row_id)[..])?;

        debug!(
            task_id = %successor.task_id,
            old_row = row_id,
            new_row = successor.row_id,
            "Replacement attempt recorded"
        );
        Ok(successor)
    }

    /// Up to `limit` PENDING rows, oldest first. Stale index entries left by
    /// a crash between row write and index write are cleaned as encountered.
    pub fn pending_transactions(&self, limit: usize) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut out = Vec::new();
        for entry in self.tx_pending.iter() {
            if out.len() >= limit {
                break;
            }
            let (index_key, row_ref) = entry?;
            let row_id = u64::from_be_bytes(
                row_ref
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt {
                        entity: "tx_pending",
                        key: hex::encode(&index_key),
                    })?,
            );
            match self.load_transaction(row_id)? {
                Some(record) if record.status == TxStatus::Pending => out.push(record),
                _ => {
                    warn!(row_id, "Dropping stale pending-index entry");
                    self.tx_pending.remove(index_key)?;
                }
            }
        }
        Ok(out)
    }

    /// The most recent attempt for a task, by `updated_at` (row id breaks
    /// ties, favouring the later attempt).
    pub fn latest_by_task(&self, task_id: &str) -> Result<Option<TransactionRecord>, StoreError> {
        let mut latest: Option<TransactionRecord> = None;
        for entry in self.tx_by_task.scan_prefix(task_index_prefix(task_id)) {
            let (_, row_ref) = entry?;
            let row_id = u64::from_be_bytes(row_ref.as_ref().try_into().map_err(|_| {
                StoreError::Corrupt {
                    entity: "tx_by_task",
                    key: task_id.to_string(),
                }
            })?);
            if let Some(record) = self.load_transaction(row_id)? {
                let newer = match &latest {
                    None => true,
                    Some(current) => (record.updated_at, record.row_id)
                        > (current.updated_at, current.row_id),
                };
                if newer {
                    latest = Some(record);
                }
            }
        }
        Ok(latest)
    }

    // Operators

    /// Insert or overwrite an operator record. Administration is out of
    /// band; this exists for bootstrap tooling and tests.
    pub fn put_operator(&self, record: &OperatorRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        self.operators
            .insert(operator_key(&record.address), serde_json::to_vec(record)?)?;
        Ok(())
    }

    pub fn operator(&self, address: &str) -> Result<Option<OperatorRecord>, StoreError> {
        match self.operators.get(operator_key(address))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All ACTIVE operators ordered by address.
    pub fn active_operators(&self) -> Result<Vec<OperatorRecord>, StoreError> {
        let mut out = Vec::new();
        for entry in self.operators.iter() {
            let (_, bytes) = entry?;
            let record: OperatorRecord = serde_json::from_slice(&bytes)?;
            if record.status == crate::types::AccountStatus::Active {
                out.push(record);
            }
        }
        out.sort_by(|a, b| a.address.to_lowercase().cmp(&b.address.to_lowercase()));
        Ok(out)
    }

    /// Atomically advance the operator's nonce counter and return the new
    /// value: 0 on the first allocation for a fresh address, counter + 1
    /// afterwards.
    ///
    /// Runs on the tree's compare-and-swap loop, so concurrent callers
    /// serialize on the one operator row and observe a strict sequence with
    /// no duplicates and no gaps.
    pub fn allocate_nonce(&self, address: &str) -> Result<u64, StoreError> {
        let mut corrupt = false;
        let updated = self
            .operators
            .update_and_fetch(operator_key(address), |old| {
                let bytes = old?;
                match serde_json::from_slice::<OperatorRecord>(bytes) {
                    Ok(mut record) => {
                        record.current_nonce = Some(record.current_nonce.map_or(0, |n| n + 1));
                        record.updated_at = now_ms();
                        match serde_json::to_vec(&record) {
                            Ok(encoded) => Some(encoded),
                            Err(_) => {
                                corrupt = true;
                                Some(bytes.to_vec())
                            }
                        }
                    }
                    Err(_) => {
                        corrupt = true;
                        Some(bytes.to_vec())
                    }
                }
            })?;

        if corrupt {
            return Err(StoreError::Corrupt {
                entity: "operator",
                key: address.to_string(),
            });
        }
        match updated {
            Some(bytes) => {
                let record: OperatorRecord = serde_json::from_slice(&bytes)?;
                record.current_nonce.ok_or(StoreError::Corrupt {
                    entity: "operator",
                    key: address.to_string(),
                })
            }
            None => Err(StoreError::NotFound {
                entity: "operator",
                key: address.to_string(),
            }),
        }
    }

    /// Overwrite the operator's nonce counter (chain resync). `None` means
    /// no slot has been consumed yet, so the next allocation returns 0.
    pub fn set_operator_nonce(
        &self,
        address: &str,
        counter: Option<u64>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut record = self.operator(address)?.ok_or(StoreError::NotFound {
            entity: "operator",
            key: address.to_string(),
        })?;
        record.current_nonce = counter;
        record.updated_at = now_ms();
        self.operators
            .insert(operator_key(address), serde_json::to_vec(&record)?)?;
        Ok(())
    }

    // Builders

    pub fn put_builder(&self, record: &BuilderRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        self.builders
            .insert(record.api_key.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    pub fn builder_by_api_key(&self, api_key: &str) -> Result<Option<BuilderRecord>, StoreError> {
        match self.builders.get(api_key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // Fees

    /// Append a fee attribution row.
    pub fn insert_fee(&self, record: &BuilderFeeRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let seq = self.db.generate_id()?;
        self.fees.insert(
            fee_key(&record.builder_api_key, record.created_at, seq),
            serde_json::to_vec(record)?,
        )?;
        Ok(())
    }

    /// Fee rows for one builder with `created_at` inside `[from_ms, to_ms]`.
    pub fn fees_in_range(
        &self,
        api_key: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<BuilderFeeRecord>, StoreError> {
        if from_ms > to_ms {
            return Ok(Vec::new());
        }
        let start = fee_key(api_key, from_ms, 0);
        let end = fee_key(api_key, to_ms, u64::MAX);

        let mut out = Vec::new();
        for entry in self.fees.range(start..=end) {
            let (_, bytes) = entry?;
            let record: BuilderFeeRecord = serde_json::from_slice(&bytes)?;
            if record.created_at >= from_ms && record.created_at <= to_ms {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountStatus;

    fn store() -> Store {
        Store::temporary().unwrap()
    }

    fn new_tx(task_id: &str) -> NewTransaction {
        NewTransaction {
            task_id: task_id.to_string(),
            builder_api_key: "builder-1".to_string(),
            operator_address: "0x00000000000000000000000000000000000000aa".to_string(),
            to: "0x00000000000000000000000000000000000000bb".to_string(),
            target_contract: "0x00000000000000000000000000000000000000bb".to_string(),
            calldata: "0xdeadbeef".to_string(),
            value: "0x0".to_string(),
            tx_type: TransactionType::TokenApproval,
            signature: None,
            forwarder: None,
            order_id: None,
            gas_limit: 0,
        }
    }

    fn operator(address: &str, nonce: Option<u64>) -> OperatorRecord {
        OperatorRecord {
            address: address.to_string(),
            encrypted_private_key: "opaque".to_string(),
            status: AccountStatus::Active,
            balance_threshold: "1000000000000000000".to_string(),
            current_nonce: nonce,
            created_at: now_ms(),
            updated_at: now_ms(),
        }
    }

    #[test]
    fn test_insert_and_latest_by_task() {
        let store = store();
        let record = store.insert_transaction(new_tx("task-1")).unwrap();
        assert_eq!(record.status, TxStatus::Pending);
        assert_eq!(record.gas_price, "0");
        assert!(record.tx_hash.is_none());

        let loaded = store.latest_by_task("task-1").unwrap().unwrap();
        assert_eq!(loaded.row_id, record.row_id);
        assert!(store.latest_by_task("unknown").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_task_id_rejected() {
        let store = store();
        store.insert_transaction(new_tx("task-1")).unwrap();
        let err = store.insert_transaction(new_tx("task-1")).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "task_id", .. }));
    }

    #[test]
    fn test_record_broadcast_sets_fields_once() {
        let store = store();
        let record = store.insert_transaction(new_tx("task-1")).unwrap();

        let updated = store
            .record_broadcast(record.row_id, "0xabc", 8, 25_200, "110")
            .unwrap();
        assert_eq!(updated.tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(updated.nonce, Some(8));
        assert_eq!(updated.gas_limit, 25_200);
        assert_eq!(updated.gas_price, "110");

        // Hash uniqueness
        let other = store.insert_transaction(new_tx("task-2")).unwrap();
        let err = store
            .record_broadcast(other.row_id, "0xabc", 9, 21_000, "110")
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "tx_hash", .. }));
    }

    #[test]
    fn test_terminal_transitions_are_conditional() {
        let store = store();
        let record = store.insert_transaction(new_tx("task-1")).unwrap();

        let mined = store.mark_mined(record.row_id, 42, 20_000).unwrap();
        assert_eq!(mined.status, TxStatus::Mined);
        assert_eq!(mined.block_number, Some(42));
        assert_eq!(mined.gas_used, Some(20_000));

        // Second terminal transition must be refused
        assert!(matches!(
            store.mark_failed(record.row_id, "late failure"),
            Err(StoreError::NotPending(_))
        ));
        assert!(matches!(
            store.mark_mined(record.row_id, 43, 1),
            Err(StoreError::NotPending(_))
        ));

        // And the terminal row left the pending index
        assert!(store.pending_transactions(10).unwrap().is_empty());
    }

    #[test]
    fn test_mark_failed_records_reason() {
        let store = store();
        let record = store.insert_transaction(new_tx("task-1")).unwrap();
        let failed = store.mark_failed(record.row_id, "broadcast failed: boom").unwrap();
        assert_eq!(failed.status, TxStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("broadcast failed: boom"));
    }

    #[test]
    fn test_replacement_shares_task_and_nonce() {
        let store = store();
        let record = store.insert_transaction(new_tx("task-1")).unwrap();
        store
            .record_broadcast(record.row_id, "0xaaa", 8, 21_000, "100")
            .unwrap();

        let successor = store
            .replace_with_successor(record.row_id, "0xbbb", "240")
            .unwrap();
        assert_eq!(successor.task_id, "task-1");
        assert_eq!(successor.nonce, Some(8));
        assert_eq!(successor.tx_hash.as_deref(), Some("0xbbb"));
        assert_eq!(successor.gas_price, "240");
        assert_eq!(successor.status, TxStatus::Pending);

        let old = store.load_transaction(record.row_id).unwrap().unwrap();
        assert_eq!(old.status, TxStatus::Replaced);

        // Latest attempt wins the status projection
        let latest = store.latest_by_task("task-1").unwrap().unwrap();
        assert_eq!(latest.row_id, successor.row_id);

        // Only the successor is pending
        let pending = store.pending_transactions(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].row_id, successor.row_id);
    }

    #[test]
    fn test_pending_ordering_and_limit() {
        let store = store();
        let base = now_ms();
        for i in 0..5 {
            store
                .insert_transaction_at(new_tx(&format!("task-{i}")), base - 1000 * (5 - i))
                .unwrap();
        }

        let pending = store.pending_transactions(3).unwrap();
        assert_eq!(pending.len(), 3);
        // Oldest first
        assert_eq!(pending[0].task_id, "task-0");
        assert_eq!(pending[1].task_id, "task-1");
        assert_eq!(pending[2].task_id, "task-2");
    }

    #[test]
    fn test_allocate_nonce_sequence() {
        let store = store();
        store.put_operator(&operator("0xAA", Some(7))).unwrap();

        assert_eq!(store.allocate_nonce("0xAA").unwrap(), 8);
        assert_eq!(store.allocate_nonce("0xAA").unwrap(), 9);
        assert_eq!(store.allocate_nonce("0xaa").unwrap(), 10); // case-insensitive key

        assert!(matches!(
            store.allocate_nonce("0xBB"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_allocate_nonce_fresh_operator_starts_at_zero() {
        let store = store();
        store.put_operator(&operator("0xAA", None)).unwrap();

        assert_eq!(store.allocate_nonce("0xAA").unwrap(), 0);
        assert_eq!(store.allocate_nonce("0xAA").unwrap(), 1);
    }

    #[test]
    fn test_set_operator_nonce() {
        let store = store();
        store.put_operator(&operator("0xAA", Some(7))).unwrap();
        store.set_operator_nonce("0xAA", Some(41)).unwrap();
        assert_eq!(store.allocate_nonce("0xAA").unwrap(), 42);

        // Resetting to "nothing consumed" restarts the sequence at 0
        store.set_operator_nonce("0xAA", None).unwrap();
        assert_eq!(store.allocate_nonce("0xAA").unwrap(), 0);
    }

    #[test]
    fn test_active_operators_sorted() {
        let store = store();
        store.put_operator(&operator("0xCC", None)).unwrap();
        store.put_operator(&operator("0xAA", None)).unwrap();
        let mut inactive = operator("0xBB", None);
        inactive.status = AccountStatus::Inactive;
        store.put_operator(&inactive).unwrap();

        let active = store.active_operators().unwrap();
        let addresses: Vec<_> = active.iter().map(|o| o.address.as_str()).collect();
        assert_eq!(addresses, vec!["0xAA", "0xCC"]);
    }

    #[test]
    fn test_fees_in_range() {
        let store = store();
        let t0 = 1_700_000_000_000i64;
        for (offset, cost) in [(0i64, "10"), (3_600_000, "20"), (10_800_000, "40")] {
            store
                .insert_fee(&BuilderFeeRecord {
                    builder_api_key: "builder-1".to_string(),
                    transaction_type: TransactionType::ClobOrder,
                    transaction_task_id: format!("task-{offset}"),
                    gas_used: 1,
                    gas_price: cost.to_string(),
                    total_cost: cost.to_string(),
                    created_at: t0 + offset,
                })
                .unwrap();
        }
        // Different builder, inside the window: must not leak in
        store
            .insert_fee(&BuilderFeeRecord {
                builder_api_key: "builder-2".to_string(),
                transaction_type: TransactionType::ClobOrder,
                transaction_task_id: "other".to_string(),
                gas_used: 1,
                gas_price: "99".to_string(),
                total_cost: "99".to_string(),
                created_at: t0,
            })
            .unwrap();

        let rows = store
            .fees_in_range("builder-1", t0, t0 + 7_200_000)
            .unwrap();
        assert_eq!(rows.len(), 2);

        let all = store
            .fees_in_range("builder-1", t0, t0 + 14_400_000)
            .unwrap();
        assert_eq!(all.len(), 3);

        let none = store.fees_in_range("builder-1", t0 - 10, t0 - 1).unwrap();
        assert!(none.is_empty());
    }
}
