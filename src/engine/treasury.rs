//! Treasury operations between the main wallet and its sub-wallets.
//!
//! `distribute` funds every sub-wallet from the main wallet. Its nonces are
//! reserved in one block before any transfer is dispatched, so the
//! concurrent transfers never collide. `sweep` returns sub-wallet balances
//! to the main wallet.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info};

use crate::engine::settlement::SettlementExecutor;
use crate::error::LedgerError;
use crate::ledger::nonce::NonceManager;
use crate::ledger::LedgerClient;
use crate::types::{Action, Actor, AssetId, FailureKind, SettlementOutcome, U256};

/// Gas consumed by a plain native transfer.
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;
const GWEI: u64 = 1_000_000_000;

/// Native coin held back to pay for a sweep transfer.
pub fn native_transfer_reserve(gas_price_gwei: u64) -> U256 {
    U256::from(NATIVE_TRANSFER_GAS) * U256::from(gas_price_gwei) * U256::from(GWEI)
}

#[derive(Debug, Clone, Default)]
pub struct TreasuryReport {
    pub settled: Vec<(Actor, SettlementOutcome)>,
    /// Sub-wallets with nothing to move.
    pub skipped: Vec<Actor>,
}

impl TreasuryReport {
    pub fn succeeded(&self) -> usize {
        self.settled.iter().filter(|(_, o)| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.settled.len() - self.succeeded()
    }
}

enum SweepResult {
    Settled(SettlementOutcome),
    Skipped,
}

pub struct Treasury {
    ledger: Arc<dyn LedgerClient>,
    executor: SettlementExecutor,
    nonces: NonceManager,
    gas_price_gwei: u64,
}

impl Treasury {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        nonces: NonceManager,
        gas_price_gwei: u64,
    ) -> Self {
        let executor = SettlementExecutor::new(ledger.clone(), nonces.clone());
        Self {
            ledger,
            executor,
            nonces,
            gas_price_gwei,
        }
    }

    /// Send `amount` of `asset` (native coin when `None`) from `main` to
    /// each recipient.
    pub async fn distribute(
        &self,
        main: &Actor,
        recipients: &[Actor],
        asset: Option<&AssetId>,
        amount: U256,
    ) -> Result<TreasuryReport, LedgerError> {
        let nonces = self.nonces.reserve(main, recipients.len() as u64).await?;
        info!(
            from = %main,
            recipients = recipients.len(),
            first_nonce = nonces.first().copied().unwrap_or_default(),
            "Distributing funds"
        );

        let settled = join_all(recipients.iter().zip(nonces).map(|(to, nonce)| async move {
            let action = Action::Transfer {
                asset: asset.cloned(),
                to: to.address.clone(),
                amount,
                gas_price_gwei: self.gas_price_gwei,
            };
            let outcome = self.executor.settle_with_nonce(main, &action, nonce).await;
            (to.clone(), outcome)
        }))
        .await;

        let report = TreasuryReport {
            settled,
            skipped: Vec::new(),
        };
        info!(succeeded = report.succeeded(), failed = report.failed(), "Distribution complete");
        Ok(report)
    }

    /// Return every source's full balance of `asset` to `main`. Native
    /// sweeps keep back the gas for the transfer itself.
    pub async fn sweep(
        &self,
        main: &Actor,
        sources: &[Actor],
        asset: Option<&AssetId>,
    ) -> TreasuryReport {
        info!(to = %main, sources = sources.len(), "Sweeping balances");

        let results = join_all(sources.iter().map(|source| async move {
            (source.clone(), self.sweep_one(main, source, asset).await)
        }))
        .await;

        let mut report = TreasuryReport::default();
        for (source, result) in results {
            match result {
                SweepResult::Settled(outcome) => report.settled.push((source, outcome)),
                SweepResult::Skipped => report.skipped.push(source),
            }
        }
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped.len(),
            "Sweep complete"
        );
        report
    }

    async fn sweep_one(&self, main: &Actor, source: &Actor, asset: Option<&AssetId>) -> SweepResult {
        let balance = match asset {
            Some(asset) => self.ledger.query_balance(source, asset).await,
            None => self
                .ledger
                .query_native_balance(source)
                .await
                .map(|b| b.saturating_sub(native_transfer_reserve(self.gas_price_gwei))),
        };
        let amount = match balance {
            Ok(amount) => amount,
            Err(e) => return SweepResult::Settled(SettlementOutcome::Failed(FailureKind::from(e))),
        };
        if amount.is_zero() {
            debug!(source = %source, "Nothing to sweep");
            return SweepResult::Skipped;
        }
        let action = Action::Transfer {
            asset: asset.cloned(),
            to: main.address.clone(),
            amount,
            gas_price_gwei: self.gas_price_gwei,
        };
        SweepResult::Settled(self.executor.settle(source, &action).await)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
