//! Fan-out settlement.
//!
//! Applies one action to every actor concurrently and collects every
//! outcome, whether it succeeded or failed. An actor counts as settled only
//! once its transaction is confirmed. Outcomes come back in input order
//! whatever the completion order.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::engine::report::{ActorResult, Stage, StageReport};
use crate::error::LedgerError;
use crate::ledger::nonce::NonceManager;
use crate::ledger::LedgerClient;
use crate::types::{Action, Actor, FailureKind, Route, SettlementOutcome, Side, U256};

impl From<Side> for Stage {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => Stage::Buy,
            Side::Sell => Stage::Sell,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcomes of one fan-out, in actor order.
#[derive(Debug, Clone)]
pub struct SettlementReport {
    pub stage: Stage,
    pub outcomes: Vec<(Actor, SettlementOutcome)>,
}

impl SettlementReport {
    /// Actors whose action was confirmed.
    pub fn survivors(&self) -> Vec<Actor> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_success())
            .map(|(actor, _)| actor.clone())
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn stage_report(&self) -> StageReport {
        let actors = self
            .outcomes
            .iter()
            .map(|(actor, outcome)| match outcome {
                SettlementOutcome::Succeeded(receipt) => ActorResult::settled(actor, Some(receipt)),
                SettlementOutcome::Failed(kind) => ActorResult::failed(actor, kind),
            })
            .collect();
        StageReport::new(self.stage, actors)
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SettlementExecutor {
    ledger: Arc<dyn LedgerClient>,
    nonces: NonceManager,
}

impl SettlementExecutor {
    pub fn new(ledger: Arc<dyn LedgerClient>, nonces: NonceManager) -> Self {
        Self { ledger, nonces }
    }

    /// Run one leg across `actors`. Never short-circuits.
    pub async fn execute(
        &self,
        actors: &[Actor],
        route: &Route,
        side: Side,
        config: &RunConfig,
    ) -> SettlementReport {
        info!(
            side = %side,
            actors = actors.len(),
            route = %route.label,
            "Fanning out settlement"
        );

        let outcomes = join_all(
            actors
                .iter()
                .map(|actor| async move {
                    let outcome = self.settle_leg(actor, route, side, config).await;
                    (actor.clone(), outcome)
                }),
        )
        .await;

        let report = SettlementReport {
            stage: side.into(),
            outcomes,
        };
        info!(
            side = %side,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Settlement complete"
        );
        report
    }

    /// Build and settle the buy or sell action for one actor.
    pub async fn settle_leg(
        &self,
        actor: &Actor,
        route: &Route,
        side: Side,
        config: &RunConfig,
    ) -> SettlementOutcome {
        let action = match side {
            Side::Buy => Action::Buy {
                path: route.path.clone(),
                amount_in: config.amount_in,
                min_out: config.min_out,
                gas_price_gwei: config.gas_price_gwei,
            },
            Side::Sell => {
                let Some(target) = route.target() else {
                    return SettlementOutcome::Failed(FailureKind::Rejected("empty route".into()));
                };
                let held = match self.ledger.query_balance(actor, target).await {
                    Ok(held) => held,
                    Err(e) => return self.fail(actor, "balance query", e),
                };
                if held.is_zero() {
                    warn!(actor = %actor, "Nothing to sell");
                    return SettlementOutcome::Failed(FailureKind::EmptyPosition);
                }
                Action::Sell {
                    path: route.reversed_path(),
                    amount_in: held,
                    min_out: U256::ZERO,
                    gas_price_gwei: config.sell_gas_price_gwei,
                }
            }
        };
        self.settle(actor, &action).await
    }

    /// Submit with the next nonce and wait for confirmation.
    pub async fn settle(&self, actor: &Actor, action: &Action) -> SettlementOutcome {
        let nonce = match self.nonces.next(actor).await {
            Ok(nonce) => nonce,
            Err(e) => return self.fail(actor, "nonce", e),
        };
        self.settle_with_nonce(actor, action, nonce).await
    }

    /// Submit with a pre-allocated nonce and wait for confirmation.
    pub async fn settle_with_nonce(
        &self,
        actor: &Actor,
        action: &Action,
        nonce: u64,
    ) -> SettlementOutcome {
        let pending = match self.ledger.submit(actor, action, nonce).await {
            Ok(pending) => pending,
            Err(e) => {
                // The ledger may or may not have consumed the nonce.
                self.nonces.resync(actor).await;
                return self.fail(actor, "submit", e);
            }
        };
        debug!(actor = %actor, tx = %pending.hash, nonce, kind = %pending.kind, "Submitted");

        match self.ledger.confirm(&pending).await {
            Ok(receipt) => {
                info!(
                    actor = %actor,
                    kind = %action.kind(),
                    tx = %receipt.tx_hash,
                    block = receipt.block_number.unwrap_or_default(),
                    "Confirmed"
                );
                SettlementOutcome::Succeeded(receipt)
            }
            Err(e) => self.fail(actor, "confirm", e),
        }
    }

    fn fail(&self, actor: &Actor, step: &str, err: LedgerError) -> SettlementOutcome {
        warn!(actor = %actor, step, error = %err, "Settlement failed");
        SettlementOutcome::Failed(err.into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
