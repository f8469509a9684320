//! Transaction execution: nonce assignment, gas resolution, signing and
//! broadcast of a single attempt.
//!
//! Execution does not wait for confirmation; the monitor owns the rest of
//! the lifecycle. A nonce is spent the moment it is acquired. Rolling it
//! back on a failed broadcast would let the next submission reuse the slot
//! while the monitor may still be racing the failed attempt, so failures
//! deliberately leave a gap for chain reconciliation to close.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use tracing::info;

use relayer_chain::{sign_legacy, CallRequest, ChainClient, LegacyTxParams};

use crate::custody::KeyCustody;
use crate::error::ExecuteError;
use crate::nonce::NonceAllocator;
use crate::store::Store;
use crate::types::{OperatorRecord, TransactionRecord};

/// Safety margin applied to raw gas estimates, in percent (floor division).
const GAS_LIMIT_MARGIN_PCT: u64 = 120;

/// What a successful broadcast produced; the coordinator persists it.
#[derive(Debug, Clone)]
pub struct BroadcastOutcome {
    pub tx_hash: String,
    pub nonce: u64,
    pub gas_limit: u64,
    /// Decimal string of the price actually signed.
    pub gas_price: String,
}

pub struct Executor {
    chain: Arc<dyn ChainClient>,
    custody: Arc<dyn KeyCustody>,
    store: Arc<Store>,
    nonce: Arc<NonceAllocator>,
    chain_id: u64,
    gas_price_multiplier: u64,
}

impl Executor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        custody: Arc<dyn KeyCustody>,
        store: Arc<Store>,
        nonce: Arc<NonceAllocator>,
        chain_id: u64,
        gas_price_multiplier: u64,
    ) -> Self {
        Self {
            chain,
            custody,
            store,
            nonce,
            chain_id,
            gas_price_multiplier,
        }
    }

    /// Build, sign and broadcast one transaction for an admitted row.
    pub async fn execute(
        &self,
        record: &TransactionRecord,
        operator: &OperatorRecord,
    ) -> Result<BroadcastOutcome, ExecuteError> {
        let nonce = self
            .nonce
            .acquire(&operator.address)
            .map_err(|e| ExecuteError::Nonce(e.to_string()))?;

        let gas_limit = if record.gas_limit > 0 {
            record.gas_limit
        } else {
            self.estimate_gas(record).await?
        };
        let gas_price = self.suggest_price().await?;

        let tx_hash = self
            .sign_and_send(record, operator, nonce, gas_limit, gas_price)
            .await?;

        info!(
            task_id = %record.task_id,
            tx_hash = %tx_hash,
            operator = %operator.address,
            nonce,
            gas_limit,
            gas_price,
            "Transaction broadcast"
        );

        Ok(BroadcastOutcome {
            tx_hash,
            nonce,
            gas_limit,
            gas_price: gas_price.to_string(),
        })
    }

    /// Estimate the gas limit for a row, with the 20% safety margin applied
    /// (rounded down). The estimation origin is the first ACTIVE operator.
    pub async fn estimate_gas(&self, record: &TransactionRecord) -> Result<u64, ExecuteError> {
        let operators = self
            .store
            .active_operators()
            .map_err(|e| ExecuteError::Estimate(e.to_string()))?;
        let origin = operators.first().ok_or(ExecuteError::NoOperator)?;

        let call = CallRequest {
            from: parse_address(&origin.address).map_err(ExecuteError::Estimate)?,
            to: parse_address(&record.to).map_err(ExecuteError::Estimate)?,
            value: parse_wei_value(&record.value).map_err(ExecuteError::Estimate)?,
            input: parse_calldata(&record.calldata).map_err(ExecuteError::Estimate)?,
        };
        let raw = self
            .chain
            .estimate_gas(&call)
            .await
            .map_err(|e| ExecuteError::Estimate(e.to_string()))?;

        Ok(raw.saturating_mul(GAS_LIMIT_MARGIN_PCT) / 100)
    }

    /// Rebroadcast a stuck attempt with its existing nonce at a higher
    /// price. This is the replace-by-fee primitive: it must never allocate.
    pub async fn broadcast_replacement(
        &self,
        record: &TransactionRecord,
        operator: &OperatorRecord,
        gas_price: u128,
    ) -> Result<String, ExecuteError> {
        let nonce = record
            .nonce
            .ok_or_else(|| ExecuteError::Sign("replacement requires an assigned nonce".into()))?;

        let tx_hash = self
            .sign_and_send(record, operator, nonce, record.gas_limit, gas_price)
            .await?;

        info!(
            task_id = %record.task_id,
            replaced = record.tx_hash.as_deref().unwrap_or_default(),
            tx_hash = %tx_hash,
            nonce,
            gas_price,
            "Replacement broadcast"
        );
        Ok(tx_hash)
    }

    async fn suggest_price(&self) -> Result<u128, ExecuteError> {
        let base = self
            .chain
            .suggest_gas_price()
            .await
            .map_err(|e| ExecuteError::Price(e.to_string()))?;
        Ok(base.saturating_mul(u128::from(self.gas_price_multiplier)) / 100)
    }

    async fn sign_and_send(
        &self,
        record: &TransactionRecord,
        operator: &OperatorRecord,
        nonce: u64,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<String, ExecuteError> {
        let params = LegacyTxParams {
            chain_id: self.chain_id,
            nonce,
            to: parse_address(&record.to).map_err(ExecuteError::Sign)?,
            value: parse_wei_value(&record.value).map_err(ExecuteError::Sign)?,
            gas_limit,
            gas_price,
            input: parse_calldata(&record.calldata).map_err(ExecuteError::Sign)?,
        };

        let private_key = self
            .custody
            .decrypt(&operator.encrypted_private_key)
            .map_err(|_| ExecuteError::Key)?;
        let signed = sign_legacy(&private_key, &params).await;
        drop(private_key);
        let raw = signed.map_err(|e| ExecuteError::Sign(e.to_string()))?;

        let hash = self
            .chain
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| ExecuteError::Send(e.to_string()))?;
        Ok(hash.to_string())
    }
}

/// Parse a 0x-prefixed address field.
pub(crate) fn parse_address(value: &str) -> Result<Address, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("invalid address: {value}"))
}

/// Parse a hex big-integer value field; empty and "0x" mean zero.
pub(crate) fn parse_wei_value(value: &str) -> Result<U256, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "0x" {
        return Ok(U256::ZERO);
    }
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    U256::from_str_radix(digits, 16).map_err(|_| format!("invalid hex value: {value}"))
}

/// Parse a hex calldata field; empty and "0x" mean no payload.
pub(crate) fn parse_calldata(data: &str) -> Result<Bytes, String> {
    let trimmed = data.trim();
    if trimmed.is_empty() || trimmed == "0x" {
        return Ok(Bytes::new());
    }
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|_| "invalid hex calldata".to_string())?;
    Ok(Bytes::from(bytes))
}
