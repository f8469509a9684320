//! Per-operator nonce allocation.
//!
//! Hands out a strictly monotonic sequence per operator address with no
//! duplicates and no gaps, even under concurrent callers: the increment runs
//! on the store's atomic read-modify-write over the one operator row, so
//! contention never crosses operators.
//!
//! Nonces are never handed back. A broadcast that fails after allocation
//! leaves a one-slot gap which reconciliation against the chain's pending
//! nonce later closes; until a detected divergence is resynced the allocator
//! refuses to issue for that operator.

use std::sync::Arc;

use alloy::primitives::Address;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use relayer_chain::{ChainClient, ChainError};

use crate::error::StoreError;
use crate::store::Store;
use crate::types::OperatorRecord;

/// Nonce allocation failures.
#[derive(Debug, Error)]
pub enum NonceError {
    #[error("operator {0} nonce diverged from chain, resync required")]
    Diverged(String),
    #[error("operator address {0} is not a valid address")]
    BadAddress(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("chain nonce query failed: {0}")]
    Chain(#[from] ChainError),
}

/// Allocator over the store's operator rows.
pub struct NonceAllocator {
    store: Arc<Store>,
    /// Operators currently refusing allocation, keyed by lowercase address.
    diverged: DashMap<String, ()>,
}

fn key(operator: &str) -> String {
    operator.to_lowercase()
}

impl NonceAllocator {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            diverged: DashMap::new(),
        }
    }

    /// Atomically take the next nonce for an operator.
    pub fn acquire(&self, operator: &str) -> Result<u64, NonceError> {
        if self.diverged.contains_key(&key(operator)) {
            return Err(NonceError::Diverged(operator.to_string()));
        }
        let nonce = self.store.allocate_nonce(operator)?;
        debug!(operator, nonce, "Nonce acquired");
        Ok(nonce)
    }

    /// Rollback hook. Nonces are strictly increasing and intentionally never
    /// released; kept so callers have a seam if that ever changes.
    pub fn release(&self, _operator: &str, _nonce: u64) {}

    /// The next nonce `acquire` would hand out.
    pub fn pending(&self, operator: &str) -> Result<u64, NonceError> {
        let record = self
            .store
            .operator(operator)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "operator",
                key: operator.to_string(),
            })?;
        Ok(next_nonce(&record))
    }

    /// Overwrite the counter from the chain's pending nonce and lift any
    /// divergence refusal. Used at startup and after gap detection.
    ///
    /// The counter stores the last consumed slot, so the chain's pending
    /// nonce maps to `pending - 1` — and to "nothing consumed" for an
    /// address that has never sent: the next `acquire` then returns exactly
    /// the slot the chain expects, including 0 for a fresh operator.
    pub async fn sync_from_chain(
        &self,
        chain: &dyn ChainClient,
        operator: &str,
    ) -> Result<Option<u64>, NonceError> {
        let address = parse_operator(operator)?;
        let pending = chain.pending_nonce(address).await?;
        let counter = pending.checked_sub(1);
        self.store.set_operator_nonce(operator, counter)?;
        self.diverged.remove(&key(operator));
        info!(
            operator,
            chain_pending = pending,
            counter = ?counter,
            "Nonce counter synced from chain"
        );
        Ok(counter)
    }

    /// Compare the store counter against the chain and resync when the chain
    /// has moved ahead (an externally submitted transaction consumed slots).
    /// A store counter ahead of the chain is the normal in-flight case and
    /// is left alone.
    pub async fn reconcile(
        &self,
        chain: &dyn ChainClient,
        operator: &str,
    ) -> Result<(), NonceError> {
        let record = self
            .store
            .operator(operator)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "operator",
                key: operator.to_string(),
            })?;
        let address = parse_operator(operator)?;
        let chain_pending = chain.pending_nonce(address).await?;

        if chain_pending > next_nonce(&record) {
            warn!(
                operator,
                store_counter = ?record.current_nonce,
                chain_pending,
                "Nonce gap detected, resyncing from chain"
            );
            self.mark_diverged(operator);
            self.sync_from_chain(chain, operator).await?;
        }
        Ok(())
    }

    /// Refuse further allocation for an operator until the next resync.
    pub fn mark_diverged(&self, operator: &str) {
        self.diverged.insert(key(operator), ());
    }

    /// Whether the operator is currently refusing allocation.
    pub fn is_diverged(&self, operator: &str) -> bool {
        self.diverged.contains_key(&key(operator))
    }
}

/// The next slot the store would hand out: counter + 1, or 0 when nothing
/// has been consumed yet.
fn next_nonce(record: &OperatorRecord) -> u64 {
    record.current_nonce.map_or(0, |n| n + 1)
}

fn parse_operator(operator: &str) -> Result<Address, NonceError> {
    operator
        .parse()
        .map_err(|_| NonceError::BadAddress(operator.to_string()))
}
