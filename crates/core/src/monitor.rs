//! Background confirmation monitor.
//!
//! One long-running loop. Every tick it scans the oldest PENDING rows and
//! drives them through the state machine:
//!
//! ```text
//! PENDING --confirm-success--> MINED    (terminal, fee recorded)
//! PENDING --confirm-failure--> FAILED   (terminal)
//! PENDING --rbf-success------> REPLACED (terminal, successor PENDING)
//! PENDING --no-hash + T_dead-> FAILED   (terminal)
//! ```
//!
//! Chain errors never kill the loop; a row that could not be checked is
//! simply revisited next tick. The same loop runs nonce reconciliation on
//! its own, longer interval.

use std::sync::Arc;

use alloy::primitives::B256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relayer_chain::ChainClient;

use crate::config::MonitorSettings;
use crate::error::StoreError;
use crate::executor::Executor;
use crate::fees::FeeTracker;
use crate::nonce::NonceAllocator;
use crate::store::Store;
use crate::types::{now_ms, TransactionRecord};

/// Escalation applied to the node-suggested price on replacement, in
/// percent (floor division, like the estimate margin).
const RBF_PRICE_BUMP_PCT: u128 = 120;

pub struct Monitor {
    store: Arc<Store>,
    chain: Arc<dyn ChainClient>,
    executor: Arc<Executor>,
    fees: FeeTracker,
    nonce: Arc<NonceAllocator>,
    settings: MonitorSettings,
    shutdown: CancellationToken,
}

impl Monitor {
    pub fn new(
        store: Arc<Store>,
        chain: Arc<dyn ChainClient>,
        executor: Arc<Executor>,
        fees: FeeTracker,
        nonce: Arc<NonceAllocator>,
        settings: MonitorSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            chain,
            executor,
            fees,
            nonce,
            settings,
            shutdown,
        }
    }

    /// Run until the shutdown token fires. Exits at a tick boundary; an
    /// in-flight replacement finishes its broadcast-or-fail first.
    pub async fn run(&self) {
        info!(
            tick_secs = self.settings.tick_secs,
            rbf_threshold_secs = self.settings.rbf_threshold_secs,
            dead_threshold_secs = self.settings.dead_threshold_secs,
            "Starting transaction monitor"
        );

        let mut tick = tokio::time::interval(self.settings.tick());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut reconcile = tokio::time::interval(self.settings.reconcile_interval());
        reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Transaction monitor stopping");
                    return;
                }
                _ = tick.tick() => {
                    if let Err(e) = self.scan_pending().await {
                        error!(error = %e, "Monitor scan failed");
                    }
                }
                _ = reconcile.tick() => {
                    self.reconcile_nonces().await;
                }
            }
        }
    }

    /// One scan pass over the oldest PENDING rows.
    pub(crate) async fn scan_pending(&self) -> Result<(), StoreError> {
        let rows = self.store.pending_transactions(self.settings.batch_size)?;
        if rows.is_empty() {
            return Ok(());
        }
        debug!(count = rows.len(), "Scanning pending transactions");

        let now = now_ms();
        for row in rows {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            match row.tx_hash.clone() {
                Some(hash) => self.check_broadcast(&row, &hash, now).await,
                None => self.check_unbroadcast(&row, now),
            }
        }
        Ok(())
    }

    async fn check_broadcast(&self, row: &TransactionRecord, hash: &str, now: i64) {
        let parsed: B256 = match hash.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                error!(task_id = %row.task_id, tx_hash = hash, "Unparseable stored tx hash");
                return;
            }
        };

        match self.chain.transaction_receipt(parsed).await {
            Ok(Some(receipt)) if receipt.success => {
                match self
                    .store
                    .mark_mined(row.row_id, receipt.block_number, receipt.gas_used)
                {
                    Ok(mined) => {
                        info!(
                            task_id = %mined.task_id,
                            tx_hash = hash,
                            block = receipt.block_number,
                            gas_used = receipt.gas_used,
                            "Transaction mined"
                        );
                        if let Err(e) = self.fees.record(&mined, receipt.gas_used) {
                            error!(task_id = %mined.task_id, error = %e, "Fee recording failed");
                        }
                    }
                    Err(StoreError::NotPending(_)) => {}
                    Err(e) => error!(task_id = %row.task_id, error = %e, "MINED transition failed"),
                }
            }
            Ok(Some(_)) => {
                info!(task_id = %row.task_id, tx_hash = hash, "Transaction reverted on-chain");
                if let Err(e) = self.store.mark_failed(row.row_id, "execution reverted on-chain") {
                    if !matches!(e, StoreError::NotPending(_)) {
                        error!(task_id = %row.task_id, error = %e, "FAILED transition failed");
                    }
                }
            }
            Ok(None) => {
                if row.age_ms(now) > self.settings.rbf_threshold_ms() {
                    self.replace_by_fee(row).await;
                }
            }
            Err(e) => {
                warn!(task_id = %row.task_id, error = %e, "Receipt query failed, retrying next tick");
            }
        }
    }

    fn check_unbroadcast(&self, row: &TransactionRecord, now: i64) {
        if row.age_ms(now) <= self.settings.dead_threshold_ms() {
            return;
        }
        info!(task_id = %row.task_id, "Broadcast never completed within the dead timeout");
        if let Err(e) = self
            .store
            .mark_failed(row.row_id, "broadcast never completed within the dead timeout")
        {
            if !matches!(e, StoreError::NotPending(_)) {
                error!(task_id = %row.task_id, error = %e, "FAILED transition failed");
            }
        }
    }

    /// Reprice a stuck attempt: same nonce, same payload, higher price.
    async fn replace_by_fee(&self, row: &TransactionRecord) {
        let suggested = match self.chain.suggest_gas_price().await {
            Ok(suggested) => suggested,
            Err(e) => {
                warn!(task_id = %row.task_id, error = %e, "Gas price unavailable, skipping replacement");
                return;
            }
        };
        let new_price = suggested.saturating_mul(RBF_PRICE_BUMP_PCT) / 100;
        let current: u128 = row.gas_price.parse().unwrap_or(0);
        if new_price <= current {
            debug!(
                task_id = %row.task_id,
                current_price = current,
                new_price,
                "Replacement not worth it yet"
            );
            return;
        }

        let operator = match self.store.operator(&row.operator_address) {
            Ok(Some(operator)) => operator,
            Ok(None) => {
                error!(task_id = %row.task_id, operator = %row.operator_address, "Operator record missing");
                return;
            }
            Err(e) => {
                error!(task_id = %row.task_id, error = %e, "Operator lookup failed");
                return;
            }
        };

        match self
            .executor
            .broadcast_replacement(row, &operator, new_price)
            .await
        {
            Ok(new_hash) => {
                match self
                    .store
                    .replace_with_successor(row.row_id, &new_hash, &new_price.to_string())
                {
                    Ok(successor) => info!(
                        task_id = %successor.task_id,
                        old_hash = row.tx_hash.as_deref().unwrap_or_default(),
                        new_hash = %new_hash,
                        new_price,
                        "Transaction replaced by fee"
                    ),
                    Err(e) => error!(task_id = %row.task_id, error = %e, "REPLACED transition failed"),
                }
            }
            Err(e) => {
                // Row stays PENDING; next tick retries
                warn!(task_id = %row.task_id, error = %e, "Replacement broadcast failed");
            }
        }
    }

    pub(crate) async fn reconcile_nonces(&self) {
        let operators = match self.store.active_operators() {
            Ok(operators) => operators,
            Err(e) => {
                error!(error = %e, "Operator listing failed during reconcile");
                return;
            }
        };
        for operator in operators {
            if let Err(e) = self.nonce.reconcile(self.chain.as_ref(), &operator.address).await {
                warn!(operator = %operator.address, error = %e, "Nonce reconcile failed");
            }
        }
    }
}
