//! Core data model: transactions, operators, builders and fee records.
//!
//! The store is the source of truth for all of these; records are plain
//! serde structs so the storage layer can encode them without bespoke
//! serializers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Current unix time in milliseconds. All record timestamps use this scale.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lifecycle state of a relayed transaction.
///
/// `Mined`, `Failed` and `Replaced` are terminal; a `Replaced` row is always
/// followed by a successor row sharing the same task id and nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Pending,
    Mined,
    Failed,
    Replaced,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Mined => "MINED",
            Self::Failed => "FAILED",
            Self::Replaced => "REPLACED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of intent being ferried on-chain. The relayer never inspects the
/// calldata; the tag exists for fee attribution and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    WalletDeployment,
    TokenApproval,
    CtfSplit,
    ClobOrder,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WalletDeployment => "WALLET_DEPLOYMENT",
            Self::TokenApproval => "TOKEN_APPROVAL",
            Self::CtfSplit => "CTF_SPLIT",
            Self::ClobOrder => "CLOB_ORDER",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative status shared by operators and builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Inactive,
}

/// One attempt of a relayed transaction.
///
/// A task id maps to a chain of rows: the original attempt plus one row per
/// replace-by-fee escalation. At most one row per task is non-terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Store-assigned row id, unique across all attempts.
    pub row_id: u64,
    /// Client-facing handle, shared across replacement attempts.
    pub task_id: String,
    /// On-chain hash, set once broadcast succeeds. Unique when set.
    pub tx_hash: Option<String>,
    /// Submitting builder, for fee attribution.
    pub builder_api_key: String,
    /// The operator wallet pinned at admission.
    pub operator_address: String,
    /// Destination address (target contract or forwarder).
    pub to: String,
    /// Target contract address.
    pub target_contract: String,
    /// Hex-encoded call payload. Opaque to the relayer.
    pub calldata: String,
    /// Hex-encoded value in wei, usually "0x0".
    pub value: String,
    pub tx_type: TransactionType,
    /// Builder-supplied intent signature, stored for audit only.
    pub signature: Option<String>,
    /// Optional trusted-forwarder contract.
    pub forwarder: Option<String>,
    /// CLOB order id, present only for `ClobOrder` submissions.
    pub order_id: Option<String>,
    /// Operator nonce, assigned at broadcast time.
    pub nonce: Option<u64>,
    pub gas_limit: u64,
    /// Decimal big-integer string; updated on replacement.
    pub gas_price: String,
    pub status: TxStatus,
    /// Set only on MINED.
    pub block_number: Option<u64>,
    /// Set only on MINED.
    pub gas_used: Option<u64>,
    /// Set only on FAILED.
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TransactionRecord {
    /// Age of this attempt relative to `now`, in milliseconds.
    pub fn age_ms(&self, now: i64) -> i64 {
        now.saturating_sub(self.created_at)
    }
}

/// Server-custodied operator wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorRecord {
    /// Checksummed 0x address, unique.
    pub address: String,
    /// Private key ciphertext, only ever decrypted for the signing call.
    pub encrypted_private_key: String,
    pub status: AccountStatus,
    /// Balance alert threshold in wei, decimal string.
    pub balance_threshold: String,
    /// Last nonce handed out, `None` until the first allocation (a fresh
    /// address must start at nonce 0); owned by the nonce allocator.
    pub current_nonce: Option<u64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Authenticated external client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderRecord {
    /// Unique API key.
    pub api_key: String,
    /// HMAC secret ciphertext.
    pub encrypted_secret: String,
    /// Passphrase ciphertext.
    pub encrypted_passphrase: String,
    pub name: String,
    pub status: AccountStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Append-only fee attribution row, inserted exactly once per mined
/// transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderFeeRecord {
    pub builder_api_key: String,
    pub transaction_type: TransactionType,
    pub transaction_task_id: String,
    pub gas_used: u64,
    /// Decimal big-integer string, the price actually paid.
    pub gas_price: String,
    /// `gas_used * gas_price` in wei, decimal big-integer string.
    pub total_cost: String,
    pub created_at: i64,
}

/// Typed submission payload.
///
/// CLOB order relays are a first-class variant rather than metadata smuggled
/// through a side field; everything else carries its transaction type tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SubmissionPayload {
    Plain { tx_type: TransactionType },
    ClobOrder { order_id: String },
}

impl SubmissionPayload {
    pub fn tx_type(&self) -> TransactionType {
        match self {
            Self::Plain { tx_type } => *tx_type,
            Self::ClobOrder { .. } => TransactionType::ClobOrder,
        }
    }

    pub fn order_id(&self) -> Option<&str> {
        match self {
            Self::Plain { .. } => None,
            Self::ClobOrder { order_id } => Some(order_id),
        }
    }
}

/// A single submission as admitted by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Destination address.
    pub to: String,
    /// Hex-encoded call payload.
    pub calldata: String,
    /// Hex-encoded value in wei; empty is treated as zero.
    pub value: String,
    /// Gas limit; zero requests estimation.
    pub gas_limit: u64,
    /// Builder-supplied intent signature, passed through for audit.
    pub signature: Option<String>,
    /// Optional trusted forwarder.
    pub forwarder: Option<String>,
    pub payload: SubmissionPayload,
}

/// Admission response: the task was accepted, not confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub task_id: String,
    pub accepted: bool,
    pub message: String,
}

/// Batch admission response, listing only the accepted task ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub task_ids: Vec<String>,
    pub accepted: bool,
    pub message: String,
}

/// Client projection of the latest attempt for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatusView {
    pub task_id: String,
    pub tx_hash: Option<String>,
    pub status: TxStatus,
    pub gas_price: String,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&TransactionRecord> for TransactionStatusView {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            task_id: record.task_id.clone(),
            tx_hash: record.tx_hash.clone(),
            status: record.status,
            gas_price: record.gas_price.clone(),
            block_number: record.block_number,
            gas_used: record.gas_used,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Operator balance in wei and whole native-token units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorBalance {
    pub address: String,
    pub wei: String,
    pub matic: String,
}

/// Per-type slice of a fee statistics report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeTypeStats {
    pub count: u64,
    pub gas_used: String,
    pub cost: String,
}

/// Aggregated fee statistics for one builder over a time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeStats {
    pub total_transactions: u64,
    pub total_gas_used: String,
    pub total_cost: String,
    pub by_type: BTreeMap<TransactionType, FeeTypeStats>,
}
