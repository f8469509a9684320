//! Coordinator: the transport-agnostic service surface.
//!
//! Admission is synchronous and bounded: authenticate, pin an operator,
//! persist the PENDING row, hand the broadcast to a per-operator worker and
//! return the task id. Everything that can touch the chain happens on the
//! worker; post-admission failures are persisted to the row and surfaced
//! through status lookups, never through the submission response.

use std::sync::Arc;

use alloy::primitives::U256;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use relayer_chain::ChainClient;

use crate::auth::{AuthBundle, Authenticator};
use crate::config::DispatchSettings;
use crate::error::{ExecuteError, RelayerError};
use crate::executor::{parse_address, parse_calldata, parse_wei_value, Executor};
use crate::fees::FeeTracker;
use crate::pool::OperatorPool;
use crate::store::{NewTransaction, Store};
use crate::types::{
    BatchReceipt, BuilderRecord, FeeStats, OperatorBalance, OperatorRecord, SubmissionPayload,
    SubmitReceipt, SubmitRequest, TransactionRecord, TransactionStatusView,
};

pub struct Coordinator {
    store: Arc<Store>,
    chain: Arc<dyn ChainClient>,
    auth: Arc<Authenticator>,
    pool: OperatorPool,
    fees: FeeTracker,
    dispatcher: Dispatcher,
}

impl Coordinator {
    pub fn new(
        store: Arc<Store>,
        chain: Arc<dyn ChainClient>,
        auth: Arc<Authenticator>,
        pool: OperatorPool,
        executor: Arc<Executor>,
        fees: FeeTracker,
        settings: DispatchSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher: Dispatcher {
                store: store.clone(),
                executor,
                queues: DashMap::new(),
                capacity: settings.queue_capacity,
                shutdown,
            },
            store,
            chain,
            auth,
            pool,
            fees,
        }
    }

    /// Admit one submission. The returned receipt means accepted, not
    /// confirmed: poll [`Coordinator::transaction_status`] for its fate.
    pub fn submit_transaction(
        &self,
        request: &SubmitRequest,
        auth: &AuthBundle,
    ) -> Result<SubmitReceipt, RelayerError> {
        let builder = self.auth.validate(auth)?;
        validate_request(request)?;
        self.admit(request, &builder)
    }

    /// Admit a batch under one authentication. Entries are admitted
    /// independently; rejected entries are skipped from the returned ids.
    pub fn submit_batch(
        &self,
        requests: &[SubmitRequest],
        auth: &AuthBundle,
    ) -> Result<BatchReceipt, RelayerError> {
        if requests.is_empty() {
            return Err(RelayerError::InvalidArgument(
                "batch contains no transactions".to_string(),
            ));
        }
        let builder = self.auth.validate(auth)?;

        let mut task_ids = Vec::with_capacity(requests.len());
        for request in requests {
            let admitted = validate_request(request).and_then(|()| self.admit(request, &builder));
            match admitted {
                Ok(receipt) => task_ids.push(receipt.task_id),
                Err(e) => warn!(error = %e, "Batch entry rejected"),
            }
        }

        let message = format!("submitted {} transactions", task_ids.len());
        Ok(BatchReceipt {
            task_ids,
            accepted: true,
            message,
        })
    }

    /// Latest state of a task, across replacements.
    pub fn transaction_status(&self, task_id: &str) -> Result<TransactionStatusView, RelayerError> {
        let record = self
            .store
            .latest_by_task(task_id)?
            .ok_or_else(|| RelayerError::NotFound(format!("task {task_id}")))?;
        Ok((&record).into())
    }

    /// Authenticated fee aggregation for the calling builder.
    pub fn builder_fee_stats(
        &self,
        auth: &AuthBundle,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<FeeStats, RelayerError> {
        let builder = self.auth.validate(auth)?;
        Ok(self.fees.stats(&builder.api_key, from_ms, to_ms)?)
    }

    /// Live balance of an operator wallet, in wei and whole tokens.
    pub async fn operator_balance(&self, address: &str) -> Result<OperatorBalance, RelayerError> {
        let parsed = parse_address(address).map_err(RelayerError::InvalidArgument)?;
        let wei = self
            .chain
            .balance(parsed)
            .await
            .map_err(|e| RelayerError::Unavailable(e.to_string()))?;
        Ok(OperatorBalance {
            address: address.to_string(),
            wei: wei.to_string(),
            matic: to_whole_units(wei),
        })
    }

    fn admit(
        &self,
        request: &SubmitRequest,
        builder: &BuilderRecord,
    ) -> Result<SubmitReceipt, RelayerError> {
        let operator = self.pool.select()?;
        let task_id = Uuid::new_v4().to_string();

        let value = if request.value.trim().is_empty() {
            "0x0".to_string()
        } else {
            request.value.clone()
        };
        let record = self.store.insert_transaction(NewTransaction {
            task_id: task_id.clone(),
            builder_api_key: builder.api_key.clone(),
            operator_address: operator.address.clone(),
            to: request.to.clone(),
            target_contract: request.to.clone(),
            calldata: request.calldata.clone(),
            value,
            tx_type: request.payload.tx_type(),
            signature: request.signature.clone(),
            forwarder: request.forwarder.clone(),
            order_id: request.payload.order_id().map(str::to_string),
            gas_limit: request.gas_limit,
        })?;

        self.dispatcher.dispatch(record, operator);

        info!(task_id = %task_id, builder = %builder.api_key, "Transaction admitted");
        Ok(SubmitReceipt {
            task_id,
            accepted: true,
            message: "transaction accepted".to_string(),
        })
    }
}

fn validate_request(request: &SubmitRequest) -> Result<(), RelayerError> {
    parse_address(&request.to).map_err(RelayerError::InvalidArgument)?;
    if let Some(forwarder) = &request.forwarder {
        parse_address(forwarder).map_err(RelayerError::InvalidArgument)?;
    }
    parse_wei_value(&request.value).map_err(RelayerError::InvalidArgument)?;
    parse_calldata(&request.calldata).map_err(RelayerError::InvalidArgument)?;
    if let SubmissionPayload::ClobOrder { order_id } = &request.payload {
        if order_id.is_empty() {
            return Err(RelayerError::InvalidArgument(
                "clob submissions require an order id".to_string(),
            ));
        }
    }
    Ok(())
}

/// Render a wei amount as a whole-token decimal string (18 decimals).
fn to_whole_units(wei: U256) -> String {
    let unit = U256::from(10).pow(U256::from(18));
    let whole = wei / unit;
    let frac = wei % unit;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac = format!("{:0>18}", frac.to_string());
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

struct DispatchJob {
    record: TransactionRecord,
    operator: OperatorRecord,
}

/// Bounded per-operator broadcast queues.
///
/// One worker task per operator consumes its queue serially, which both caps
/// concurrency against a misbehaving RPC and keeps one broadcast in flight
/// per operator. A full queue fails the admission row instead of accreting
/// unbounded waiters.
struct Dispatcher {
    store: Arc<Store>,
    executor: Arc<Executor>,
    queues: DashMap<String, mpsc::Sender<DispatchJob>>,
    capacity: usize,
    shutdown: CancellationToken,
}

impl Dispatcher {
    fn dispatch(&self, record: TransactionRecord, operator: OperatorRecord) {
        use tokio::sync::mpsc::error::TrySendError;

        let key = operator.address.to_lowercase();
        let sender = self
            .queues
            .entry(key.clone())
            .or_insert_with(|| self.spawn_worker(&operator.address))
            .clone();

        let row_id = record.row_id;
        let task_id = record.task_id.clone();
        match sender.try_send(DispatchJob { record, operator }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(task_id = %task_id, "Dispatch queue full, failing admission");
                if let Err(e) = self.store.mark_failed(row_id, "operator dispatch queue full") {
                    error!(task_id = %task_id, error = %e, "FAILED write-back failed");
                }
            }
            Err(TrySendError::Closed(job)) => {
                if self.shutdown.is_cancelled() {
                    // Shutting down: the row keeps its empty hash and the
                    // dead timeout reaps it after restart if nobody retries
                    warn!(task_id = %task_id, "Dispatcher stopped, row left pending");
                    return;
                }
                // The worker died; replace it and retry once
                self.queues.remove(&key);
                let sender = self
                    .queues
                    .entry(key)
                    .or_insert_with(|| self.spawn_worker(&job.operator.address))
                    .clone();
                if sender.try_send(job).is_err() {
                    if let Err(e) = self.store.mark_failed(row_id, "operator dispatch unavailable") {
                        error!(task_id = %task_id, error = %e, "FAILED write-back failed");
                    }
                }
            }
        }
    }

    fn spawn_worker(&self, operator: &str) -> mpsc::Sender<DispatchJob> {
        let (tx, mut rx) = mpsc::channel::<DispatchJob>(self.capacity);
        let store = Arc::clone(&self.store);
        let executor = Arc::clone(&self.executor);
        let shutdown = self.shutdown.clone();
        let operator = operator.to_string();

        tokio::spawn(async move {
            info!(operator = %operator, "Broadcast worker started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    job = rx.recv() => match job {
                        Some(job) => run_job(&store, &executor, job).await,
                        None => break,
                    }
                }
            }
            info!(operator = %operator, "Broadcast worker stopped");
        });
        tx
    }
}

async fn run_job(store: &Store, executor: &Executor, job: DispatchJob) {
    match executor.execute(&job.record, &job.operator).await {
        Ok(outcome) => {
            if let Err(e) = store.record_broadcast(
                job.record.row_id,
                &outcome.tx_hash,
                outcome.nonce,
                outcome.gas_limit,
                &outcome.gas_price,
            ) {
                error!(task_id = %job.record.task_id, error = %e, "Broadcast write-back failed");
            }
        }
        Err(ExecuteError::Send(reason)) => {
            // Broadcast failures are transient by contract: the row keeps its
            // empty hash and the monitor's dead timeout reaps it if the
            // outage persists.
            warn!(task_id = %job.record.task_id, error = %reason, "Broadcast failed, row stays pending");
        }
        Err(e) => {
            warn!(task_id = %job.record.task_id, error = %e, "Execution failed");
            if let Err(store_err) = store.mark_failed(job.record.row_id, &e.to_string()) {
                error!(task_id = %job.record.task_id, error = %store_err, "FAILED write-back failed");
            }
        }
    }
}
