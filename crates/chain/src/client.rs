//! Chain RPC client.
//! Uses Alloy providers for type-safe RPC interactions.

use std::time::Duration;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

/// Default deadline applied to every RPC call.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by the chain access layer.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The call did not complete within its deadline.
    #[error("rpc call timed out after {0:?}")]
    Timeout(Duration),
    /// Transport or node-side failure.
    #[error("rpc transport error: {0}")]
    Transport(String),
    /// The configured RPC URL could not be parsed.
    #[error("invalid rpc url: {0}")]
    InvalidUrl(String),
    /// The node reports a different chain than the one configured.
    #[error("chain id mismatch: configured {configured}, node reports {reported}")]
    ChainIdMismatch { configured: u64, reported: u64 },
}

impl ChainError {
    /// Whether the caller may see a different outcome on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

/// Minimal receipt projection used by the monitor.
#[derive(Debug, Clone, Copy)]
pub struct ReceiptInfo {
    /// Execution status flag.
    pub success: bool,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Gas actually consumed.
    pub gas_used: u64,
}

/// Call message used for gas estimation.
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
}

/// RPC surface the relayer consumes.
///
/// Implementations must be safe for concurrent callers; every method carries
/// the client's deadline.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Node-suggested gas price in wei.
    async fn suggest_gas_price(&self) -> Result<u128, ChainError>;

    /// Estimated gas limit for a call, without any safety margin.
    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, ChainError>;

    /// Broadcast a signed raw transaction, returning its hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError>;

    /// Receipt for a broadcast transaction, `None` while still pending.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, ChainError>;

    /// The account's pending nonce (next value the chain will accept).
    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError>;

    /// Native token balance in wei.
    async fn balance(&self, address: Address) -> Result<U256, ChainError>;
}

/// HTTP JSON-RPC implementation of [`ChainClient`].
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    rpc_url: String,
    timeout: Duration,
}

impl RpcChainClient {
    /// Create a client without probing the node.
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            timeout,
        }
    }

    /// Create a client and verify connectivity and chain id against the node.
    pub async fn connect(
        rpc_url: impl Into<String>,
        chain_id: u64,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        let client = Self::new(rpc_url, timeout);

        let provider = client.provider()?;
        let reported = client
            .with_deadline(provider.get_chain_id())
            .await?
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        if reported != chain_id {
            return Err(ChainError::ChainIdMismatch {
                configured: chain_id,
                reported,
            });
        }

        let block = client
            .with_deadline(provider.get_block_number())
            .await?
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        info!(chain_id, block, "Chain RPC connection verified");

        Ok(client)
    }

    /// The RPC URL this client talks to.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    fn provider(&self) -> Result<impl Provider, ChainError> {
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| ChainError::InvalidUrl(format!("{e}")))?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    async fn with_deadline<F, T>(&self, fut: F) -> Result<T, ChainError>
    where
        F: std::future::IntoFuture<Output = T>,
    {
        tokio::time::timeout(self.timeout, fut.into_future())
            .await
            .map_err(|_| ChainError::Timeout(self.timeout))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn suggest_gas_price(&self) -> Result<u128, ChainError> {
        let provider = self.provider()?;
        let price = self
            .with_deadline(provider.get_gas_price())
            .await?
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        debug!(price, "Fetched suggested gas price");
        Ok(price)
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, ChainError> {
        let provider = self.provider()?;
        let tx = TransactionRequest::default()
            .with_from(call.from)
            .with_to(call.to)
            .with_value(call.value)
            .with_input(call.input.clone());
        let gas = self
            .with_deadline(provider.estimate_gas(tx))
            .await?
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(gas)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError> {
        let provider = self.provider()?;
        let pending = self
            .with_deadline(provider.send_raw_transaction(raw))
            .await?
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let hash = *pending.tx_hash();
        debug!(tx_hash = %hash, "Raw transaction broadcast");
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, ChainError> {
        let provider = self.provider()?;
        let receipt = self
            .with_deadline(provider.get_transaction_receipt(hash))
            .await?
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        Ok(receipt.map(|r| ReceiptInfo {
            success: r.status(),
            block_number: r.block_number.unwrap_or_default(),
            gas_used: u64::try_from(r.gas_used).unwrap_or(u64::MAX),
        }))
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
        let provider = self.provider()?;
        let nonce = self
            .with_deadline(provider.get_transaction_count(address).pending())
            .await?
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(nonce)
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainError> {
        let provider = self.provider()?;
        let balance = self
            .with_deadline(provider.get_balance(address))
            .await?
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(balance)
    }
}
