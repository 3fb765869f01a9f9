//! Error taxonomy.
//!
//! Per-actor failures never surface as `RunError`; they are captured as
//! `SettlementOutcome::Failed` and aggregated. Only configuration problems,
//! exhausted retry budgets and zero-survivor stages escalate to the run.

use thiserror::Error;

use crate::engine::report::{RunReport, Stage};

/// Failure talking to, or reported by, the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("transaction {hash} failed: {reason}")]
    TransactionFailure { hash: String, reason: String },

    #[error("no receipt for {hash} within the confirmation window")]
    ConfirmationTimeout { hash: String },

    #[error("malformed ledger response: {0}")]
    Decode(String),
}

/// Run-level failure. Aborts the orchestration.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("discovery feed ended without a target: {0}")]
    Discovery(String),

    #[error("no viable route among {candidates} candidates (retry budget exhausted)")]
    NoViableRoute { candidates: usize },

    #[error("no actors survived the {stage} stage")]
    NoSurvivors { stage: Stage, report: Box<RunReport> },

    #[error("profit threshold not reached after {attempts} probes")]
    ThresholdNotReached { attempts: u64 },

    #[error("operator console closed before the sell confirmation")]
    OperatorUnavailable,
}

impl RunError {
    /// Partial report attached to a zero-survivor termination.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunError::NoSurvivors { report, .. } => Some(report),
            _ => None,
        }
    }
}
