//! Relayer transaction lifecycle engine.
//!
//! Builders submit signed off-chain intents; the engine admits them (HMAC
//! auth with a replay window), pins each to a server-custodied operator
//! wallet, allocates a strictly monotonic nonce, signs and broadcasts a
//! legacy transaction, tracks confirmation, escalates stuck transactions via
//! replace-by-fee and attributes gas cost back to the submitting Builder.

mod auth;
pub mod config;
mod coordinator;
pub mod custody;
mod error;
mod executor;
mod fees;
mod monitor;
mod nonce;
mod pool;
mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use auth::{AuthBundle, Authenticator};
pub use config::RelayerConfig;
pub use coordinator::Coordinator;
pub use custody::{KeyCustody, LocalKeyCustody};
pub use error::{AuthError, CustodyError, ExecuteError, RelayerError, StoreError};
pub use executor::{BroadcastOutcome, Executor};
pub use fees::FeeTracker;
pub use monitor::Monitor;
pub use nonce::{NonceAllocator, NonceError};
pub use pool::OperatorPool;
pub use store::{NewTransaction, Store};
