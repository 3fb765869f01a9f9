//! Ledger integrations.
//!
//! Defines the `LedgerClient` trait and provides implementations for:
//! - JSON-RPC nodes with node-managed signing, via alloy (`rpc`)
//! - an in-memory constant-product exchange for paper runs (`paper`)

pub mod abi;
pub mod nonce;
pub mod paper;
pub mod rpc;

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::types::{Action, Actor, AssetId, PendingTx, Receipt, Simulation, U256};

/// Abstraction over the ledger the playbook trades on.
///
/// Every call is a suspension point and may fail with
/// `LedgerError::Network`. Polling callers treat that as a failed probe;
/// fan-out callers record it as a per-actor failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Dry-run an action as `actor` without committing it.
    async fn simulate(&self, actor: &Actor, action: &Action) -> Result<Simulation, LedgerError>;

    /// Broadcast an action with an explicit sequence number.
    async fn submit(
        &self,
        actor: &Actor,
        action: &Action,
        nonce: u64,
    ) -> Result<PendingTx, LedgerError>;

    /// Wait for inclusion. A reverted transaction is a `TransactionFailure`.
    async fn confirm(&self, pending: &PendingTx) -> Result<Receipt, LedgerError>;

    /// Router allowance granted by `actor` on `asset`.
    async fn query_allowance(&self, actor: &Actor, asset: &AssetId) -> Result<U256, LedgerError>;

    /// Token balance of `actor`.
    async fn query_balance(&self, actor: &Actor, asset: &AssetId) -> Result<U256, LedgerError>;

    /// Native coin balance of `actor`.
    async fn query_native_balance(&self, actor: &Actor) -> Result<U256, LedgerError>;

    /// Next unused sequence number for `actor`, counting pending transactions.
    async fn transaction_count(&self, actor: &Actor) -> Result<u64, LedgerError>;

    /// Expected output of swapping `amount_in` along `path`.
    async fn quote(&self, path: &[AssetId], amount_in: U256) -> Result<U256, LedgerError>;

    /// Ledger name for logging.
    fn name(&self) -> &str;
}
