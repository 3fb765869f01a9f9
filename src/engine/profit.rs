//! Profit threshold poller.
//!
//! Waits until selling the reference actor's whole position back along the
//! route would return at least `amount_in × enable_sell_at` of the input
//! asset. Simulate-only: nothing is submitted here.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::RunConfig;
use crate::engine::poller::{PollBudget, PollOutcome, Poller};
use crate::error::RunError;
use crate::ledger::LedgerClient;
use crate::types::{format_units, Action, Actor, AssetId, Probe, Route};

pub struct ProfitThresholdPoller {
    ledger: Arc<dyn LedgerClient>,
    interval: Duration,
    budget: PollBudget,
}

impl ProfitThresholdPoller {
    pub fn new(ledger: Arc<dyn LedgerClient>, interval: Duration, budget: PollBudget) -> Self {
        Self {
            ledger,
            interval,
            budget,
        }
    }

    /// Resolve with the probe iteration on which the exit became viable.
    pub async fn wait(
        &self,
        route: &Route,
        reference: &Actor,
        config: &RunConfig,
    ) -> Result<u64, RunError> {
        let target = config.require_target()?;
        let exit_path = route.reversed_path();
        info!(
            reference = %reference,
            multiple = %config.enable_sell_at,
            target_out = %format_units(config.sell_target_out, config.input.decimals),
            "Waiting for profit threshold"
        );

        let poller = Poller::new("profit", self.interval, self.budget);
        let outcome = poller
            .poll_until(|ctx| self.probe(ctx.iteration, reference, target, &exit_path, config))
            .await;

        match outcome {
            PollOutcome::Ready(iteration) => {
                info!(iteration, "Profit threshold reached");
                Ok(iteration)
            }
            PollOutcome::Exhausted { attempts } => Err(RunError::ThresholdNotReached { attempts }),
            PollOutcome::Cancelled => Err(RunError::ThresholdNotReached { attempts: 0 }),
        }
    }

    async fn probe(
        &self,
        iteration: u64,
        reference: &Actor,
        target: &AssetId,
        exit_path: &[AssetId],
        config: &RunConfig,
    ) -> anyhow::Result<Option<u64>> {
        let held = self.ledger.query_balance(reference, target).await?;
        if held.is_zero() {
            debug!(reference = %reference, "Reference actor holds nothing yet");
            return Ok(None);
        }
        let action = Action::Sell {
            path: exit_path.to_vec(),
            amount_in: held,
            min_out: config.sell_target_out,
            gas_price_gwei: config.sell_gas_price_gwei,
        };
        let sim = self.ledger.simulate(reference, &action).await?;
        let probe = Probe::from_simulation(iteration, sim);
        if probe.should_report() {
            let value = self
                .ledger
                .quote(exit_path, held)
                .await
                .map(|v| format_units(v, config.input.decimals))
                .unwrap_or_else(|_| "?".into());
            info!(
                iteration,
                passed = probe.passed,
                value = %value,
                "Profit probe"
            );
        }
        Ok(probe.passed.then_some(iteration))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
