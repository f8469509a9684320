//! Legacy transaction construction and signing.
//!
//! The relayer targets Polygon-class chains and broadcasts pre-EIP-1559
//! transactions with an explicit gas price.

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use thiserror::Error;

/// Signing failures. Deliberately carries no key material.
#[derive(Debug, Error)]
pub enum SignError {
    /// The decrypted operator key did not parse as a secp256k1 private key.
    #[error("invalid operator private key")]
    InvalidKey,
    /// The transaction could not be assembled and signed.
    #[error("failed to build signed transaction: {0}")]
    Build(String),
}

/// Fields of a legacy transaction, fully resolved by the caller.
#[derive(Debug, Clone)]
pub struct LegacyTxParams {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: Address,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub input: Bytes,
}

/// Sign a legacy transaction with the given hex-encoded private key and
/// return the raw EIP-2718 encoded bytes ready for broadcast.
///
/// The key is used for the signing call only and dropped immediately after.
pub async fn sign_legacy(private_key: &str, params: &LegacyTxParams) -> Result<Vec<u8>, SignError> {
    let signer: PrivateKeySigner = private_key
        .trim_start_matches("0x")
        .parse()
        .map_err(|_| SignError::InvalidKey)?;
    let wallet = EthereumWallet::from(signer);

    let tx = TransactionRequest::default()
        .with_chain_id(params.chain_id)
        .with_nonce(params.nonce)
        .with_to(params.to)
        .with_value(params.value)
        .with_gas_limit(params.gas_limit)
        .with_gas_price(params.gas_price)
        .with_input(params.input.clone());

    let envelope = tx
        .build(&wallet)
        .await
        .map_err(|e| SignError::Build(e.to_string()))?;

    Ok(envelope.encoded_2718())
}

/// Derive the operator address controlled by a hex-encoded private key.
pub fn operator_address(private_key: &str) -> Result<Address, SignError> {
    let signer: PrivateKeySigner = private_key
        .trim_start_matches("0x")
        .parse()
        .map_err(|_| SignError::InvalidKey)?;
    Ok(signer.address())
}
