//! Approval gate: make sure the router may spend each actor's position.
//!
//! Reads the current allowance first and only submits an approval when it
//! is below the threshold, so repeated calls for an approved actor are
//! free. A failed approval removes only that actor from the sell set.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::engine::report::{ActorResult, Stage, StageReport};
use crate::engine::settlement::SettlementExecutor;
use crate::ledger::LedgerClient;
use crate::types::{Action, Actor, AssetId, FailureKind, Receipt, SettlementOutcome, U256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalStatus {
    AlreadyApproved,
    Approved(Receipt),
}

#[derive(Debug, Clone)]
pub struct ApprovalReport {
    pub outcomes: Vec<(Actor, Result<ApprovalStatus, FailureKind>)>,
}

impl ApprovalReport {
    pub fn survivors(&self) -> Vec<Actor> {
        self.outcomes
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(a, _)| a.clone())
            .collect()
    }

    pub fn stage_report(&self) -> StageReport {
        let actors = self
            .outcomes
            .iter()
            .map(|(actor, result)| match result {
                Ok(ApprovalStatus::Approved(receipt)) => ActorResult::settled(actor, Some(receipt)),
                Ok(ApprovalStatus::AlreadyApproved) => ActorResult::settled(actor, None),
                Err(kind) => ActorResult::failed(actor, kind),
            })
            .collect();
        StageReport::new(Stage::Approval, actors)
    }
}

pub struct ApprovalGate {
    ledger: Arc<dyn LedgerClient>,
    executor: SettlementExecutor,
    threshold: U256,
    gas_price_gwei: u64,
}

impl ApprovalGate {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        executor: SettlementExecutor,
        threshold: U256,
        gas_price_gwei: u64,
    ) -> Self {
        Self {
            ledger,
            executor,
            threshold,
            gas_price_gwei,
        }
    }

    pub async fn ensure(&self, actor: &Actor, asset: &AssetId) -> Result<ApprovalStatus, FailureKind> {
        let current = self.ledger.query_allowance(actor, asset).await.map_err(|e| {
            warn!(actor = %actor, error = %e, "Allowance query failed");
            FailureKind::from(e)
        })?;

        if current >= self.threshold {
            debug!(actor = %actor, asset = %asset.short(), "Allowance already sufficient");
            return Ok(ApprovalStatus::AlreadyApproved);
        }

        info!(actor = %actor, asset = %asset.short(), "Approving router");
        let action = Action::Approve {
            asset: asset.clone(),
            amount: U256::MAX,
            gas_price_gwei: self.gas_price_gwei,
        };
        match self.executor.settle(actor, &action).await {
            SettlementOutcome::Succeeded(receipt) => Ok(ApprovalStatus::Approved(receipt)),
            SettlementOutcome::Failed(kind) => Err(kind),
        }
    }

    /// Evaluate every actor concurrently, isolating failures.
    pub async fn ensure_all(&self, actors: &[Actor], asset: &AssetId) -> ApprovalReport {
        let outcomes = join_all(actors.iter().map(|actor| async move {
            (actor.clone(), self.ensure(actor, asset).await)
        }))
        .await;
        ApprovalReport { outcomes }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
