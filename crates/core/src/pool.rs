//! Operator selection.
//!
//! Round-robin across ACTIVE operators ordered by address. The cursor is a
//! plain atomic; selection never touches the per-operator nonce row, so
//! readers of the pool do not contend with allocation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::RelayerError;
use crate::store::Store;
use crate::types::OperatorRecord;

pub struct OperatorPool {
    store: Arc<Store>,
    cursor: AtomicUsize,
}

impl OperatorPool {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Pick one ACTIVE operator, advancing the round-robin cursor.
    pub fn select(&self) -> Result<OperatorRecord, RelayerError> {
        let operators = self.store.active_operators()?;
        if operators.is_empty() {
            return Err(RelayerError::Unavailable(
                "no active operator available".to_string(),
            ));
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % operators.len();
        let operator = operators[index].clone();
        debug!(operator = %operator.address, index, "Operator selected");
        Ok(operator)
    }
}
