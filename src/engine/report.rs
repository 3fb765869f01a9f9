//! Run report: per-stage tallies and the termination reason.
//!
//! Built up by the orchestrator as stages complete, logged at the end of
//! the run and optionally persisted as pretty JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{Actor, Address, AssetId, FailureKind, Receipt, Route};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Buy,
    Approval,
    Sell,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Buy => write!(f, "buy"),
            Stage::Approval => write!(f, "approval"),
            Stage::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTally {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// One actor's result at one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorResult {
    pub wallet: usize,
    pub address: Address,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ActorResult {
    pub fn settled(actor: &Actor, receipt: Option<&Receipt>) -> Self {
        Self {
            wallet: actor.index,
            address: actor.address.clone(),
            succeeded: true,
            tx_hash: receipt.map(|r| r.tx_hash.clone()),
            failure: None,
        }
    }

    pub fn failed(actor: &Actor, failure: &FailureKind) -> Self {
        Self {
            wallet: actor.index,
            address: actor.address.clone(),
            succeeded: false,
            tx_hash: None,
            failure: Some(failure.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub tally: StageTally,
    pub actors: Vec<ActorResult>,
}

impl StageReport {
    pub fn new(stage: Stage, actors: Vec<ActorResult>) -> Self {
        let succeeded = actors.iter().filter(|a| a.succeeded).count();
        let tally = StageTally {
            attempted: actors.len(),
            succeeded,
            failed: actors.len() - succeeded,
        };
        Self {
            stage,
            tally,
            actors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "stage")]
pub enum Termination {
    Completed,
    NoSurvivors(Stage),
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub ledger: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub target: Option<AssetId>,
    pub instant: bool,
    pub candidates: usize,
    pub route: Option<Route>,
    /// Probe iteration on which the winning route became viable.
    pub route_iteration: Option<u64>,
    pub profit_probes: Option<u64>,
    pub stages: Vec<StageReport>,
    pub termination: Option<Termination>,
}

impl RunReport {
    pub fn new(ledger: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            ledger: ledger.into(),
            started_at: Utc::now(),
            finished_at: None,
            target: None,
            instant: false,
            candidates: 0,
            route: None,
            route_iteration: None,
            profit_probes: None,
            stages: Vec::new(),
            termination: None,
        }
    }

    pub fn record_stage(&mut self, report: StageReport) {
        info!(
            run_id = %self.run_id,
            stage = %report.stage,
            attempted = report.tally.attempted,
            succeeded = report.tally.succeeded,
            failed = report.tally.failed,
            "Stage complete"
        );
        self.stages.retain(|s| s.stage != report.stage);
        self.stages.push(report);
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Survivor count for a stage, zero if the stage never ran.
    pub fn survivors(&self, stage: Stage) -> usize {
        self.stage(stage).map_or(0, |s| s.tally.succeeded)
    }

    pub fn finish(&mut self, termination: Termination) {
        self.finished_at = Some(Utc::now());
        self.termination = Some(termination);
        self.log_summary();
    }

    pub fn log_summary(&self) {
        let route = self.route.as_ref().map(|r| r.label.as_str()).unwrap_or("-");
        match self.termination {
            Some(Termination::NoSurvivors(stage)) => warn!(
                run_id = %self.run_id,
                route,
                stage = %stage,
                "Run terminated: no survivors"
            ),
            _ => info!(
                run_id = %self.run_id,
                route,
                bought = self.survivors(Stage::Buy),
                approved = self.survivors(Stage::Approval),
                sold = self.survivors(Stage::Sell),
                "Run summary"
            ),
        }
    }

    /// Write the report as pretty JSON.
    pub fn save(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialise run report")?;
        std::fs::write(path, &json).context(format!("Failed to write run report to {path}"))?;
        debug!(path, run_id = %self.run_id, "Run report saved");
        Ok(())
    }

    pub fn load(path: &str) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .context(format!("Failed to read run report from {path}"))?;
        serde_json::from_str(&json).context(format!("Failed to parse run report from {path}"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
