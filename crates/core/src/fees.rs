//! Gas cost attribution per builder.
//!
//! One fee row is appended per mined transaction; sums are big-integer
//! arithmetic over decimal strings, never floats.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::U256;
use tracing::debug;

use crate::error::StoreError;
use crate::store::Store;
use crate::types::{now_ms, BuilderFeeRecord, FeeStats, FeeTypeStats, TransactionRecord};

#[derive(Clone)]
pub struct FeeTracker {
    store: Arc<Store>,
}

impl FeeTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Record the fee for a freshly mined transaction.
    ///
    /// `total_cost = gas_used * gas_price`, in wei. Called exactly once per
    /// mined row: the caller's conditional MINED transition guarantees it.
    pub fn record(
        &self,
        record: &TransactionRecord,
        gas_used: u64,
    ) -> Result<BuilderFeeRecord, StoreError> {
        let gas_price = parse_decimal(&record.gas_price).ok_or(StoreError::Corrupt {
            entity: "transaction",
            key: record.task_id.clone(),
        })?;
        let total_cost = gas_price * U256::from(gas_used);

        let fee = BuilderFeeRecord {
            builder_api_key: record.builder_api_key.clone(),
            transaction_type: record.tx_type,
            transaction_task_id: record.task_id.clone(),
            gas_used,
            gas_price: record.gas_price.clone(),
            total_cost: total_cost.to_string(),
            created_at: now_ms(),
        };
        self.store.insert_fee(&fee)?;

        debug!(
            builder = %fee.builder_api_key,
            task_id = %fee.transaction_task_id,
            total_cost = %fee.total_cost,
            "Fee recorded"
        );
        Ok(fee)
    }

    /// Aggregate fee rows for a builder inside `[from_ms, to_ms]`.
    /// An empty range yields zero totals.
    pub fn stats(&self, api_key: &str, from_ms: i64, to_ms: i64) -> Result<FeeStats, StoreError> {
        let rows = self.store.fees_in_range(api_key, from_ms, to_ms)?;

        let mut total_gas = U256::ZERO;
        let mut total_cost = U256::ZERO;
        let mut by_type: BTreeMap<_, (u64, U256, U256)> = BTreeMap::new();

        for row in &rows {
            let cost = parse_decimal(&row.total_cost).ok_or(StoreError::Corrupt {
                entity: "builder_fee",
                key: row.transaction_task_id.clone(),
            })?;
            let gas = U256::from(row.gas_used);

            total_gas += gas;
            total_cost += cost;

            let slot = by_type.entry(row.transaction_type).or_default();
            slot.0 += 1;
            slot.1 += gas;
            slot.2 += cost;
        }

        Ok(FeeStats {
            total_transactions: rows.len() as u64,
            total_gas_used: total_gas.to_string(),
            total_cost: total_cost.to_string(),
            by_type: by_type
                .into_iter()
                .map(|(tx_type, (count, gas, cost))| {
                    (
                        tx_type,
                        FeeTypeStats {
                            count,
                            gas_used: gas.to_string(),
                            cost: cost.to_string(),
                        },
                    )
                })
                .collect(),
        })
    }
}

fn parse_decimal(value: &str) -> Option<U256> {
    U256::from_str_radix(value, 10).ok()
}
