//! Run orchestration: discovery, route, buy, approve, profit, confirm, sell.
//!
//! Stages run strictly in sequence; inside a stage every actor proceeds
//! independently. Only buy survivors are approved, and only approved
//! survivors are sold. A stage with zero survivors ends the run with
//! `RunError::NoSurvivors` carrying the partial report.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::catalog::RouteCatalog;
use crate::config::{PollingConfig, RunConfig};
use crate::discovery::DiscoveryFeed;
use crate::engine::approval::ApprovalGate;
use crate::engine::poller::{PollOutcome, Poller};
use crate::engine::profit::ProfitThresholdPoller;
use crate::engine::report::{RunReport, Stage, Termination};
use crate::engine::route_selector::{RouteSelection, RouteSelector};
use crate::engine::settlement::{SettlementExecutor, SettlementReport};
use crate::engine::trigger::{ManualTriggerGate, OperatorConsole};
use crate::error::RunError;
use crate::ledger::nonce::NonceManager;
use crate::ledger::LedgerClient;
use crate::types::{Action, Actor, Probe, Route, Side};

pub struct Orchestrator {
    ledger: Arc<dyn LedgerClient>,
    executor: SettlementExecutor,
    polling: PollingConfig,
}

impl Orchestrator {
    pub fn new(ledger: Arc<dyn LedgerClient>, polling: PollingConfig) -> Self {
        let nonces = NonceManager::new(ledger.clone());
        let executor = SettlementExecutor::new(ledger.clone(), nonces);
        Self {
            ledger,
            executor,
            polling,
        }
    }

    /// Execute one full run. `actors[0]` is the main wallet and probes
    /// routes on behalf of the fleet.
    pub async fn run<C: OperatorConsole>(
        &self,
        config: &RunConfig,
        actors: &[Actor],
        discovery: &mut dyn DiscoveryFeed,
        trigger: &mut ManualTriggerGate<C>,
    ) -> Result<RunReport, RunError> {
        let Some(main) = actors.first() else {
            return Err(RunError::Configuration("no actors".into()));
        };

        info!(feed = discovery.name(), "Waiting for target");
        let found = discovery.next_target().await?;
        let config = config.with_target(found.target.clone());
        let target = config.require_target()?.clone();

        let mut report = RunReport::new(self.ledger.name());
        report.target = Some(target.clone());
        report.instant = config.instant;

        let catalog = RouteCatalog::from_config(&config);
        let candidates = catalog.candidates(&target);
        report.candidates = candidates.len();
        info!(
            target = %target,
            actors = actors.len(),
            candidates = candidates.len(),
            instant = config.instant,
            "Run started"
        );

        // Route + buy
        let hinted = found
            .route_hint
            .as_deref()
            .and_then(|symbol| catalog.route_via(symbol, &target));
        let (route, buy) = match hinted {
            Some(route) if config.instant => {
                info!(route = %route.label, "Instant buy on hinted route");
                report.route = Some(route.clone());
                let buy = self.instant_buy(actors, &route, &config).await;
                (route, buy)
            }
            _ => {
                let selection = self.select_route(&candidates, main, &config).await?;
                report.route = Some(selection.route.clone());
                report.route_iteration = Some(selection.iteration);
                let buy = self
                    .executor
                    .execute(actors, &selection.route, Side::Buy, &config)
                    .await;
                (selection.route, buy)
            }
        };
        report.record_stage(buy.stage_report());
        let bought = buy.survivors();
        if bought.is_empty() {
            return Err(no_survivors(report, Stage::Buy));
        }

        // Approval
        let gate = ApprovalGate::new(
            self.ledger.clone(),
            self.executor.clone(),
            config.min_allowance,
            config.sell_gas_price_gwei,
        );
        let approvals = gate.ensure_all(&bought, &target).await;
        report.record_stage(approvals.stage_report());
        let sellers = approvals.survivors();
        if sellers.is_empty() {
            return Err(no_survivors(report, Stage::Approval));
        }

        // Profit threshold
        let profit = ProfitThresholdPoller::new(
            self.ledger.clone(),
            self.polling.profit_interval(),
            self.polling.profit_budget(),
        );
        let probes = profit.wait(&route, &sellers[0], &config).await?;
        report.profit_probes = Some(probes);

        // Operator confirmation
        trigger.wait_for_confirmation().await?;

        // Sell
        let sell = self
            .executor
            .execute(&sellers, &route, Side::Sell, &config)
            .await;
        report.record_stage(sell.stage_report());
        if sell.succeeded() == 0 {
            return Err(no_survivors(report, Stage::Sell));
        }

        report.finish(Termination::Completed);
        Ok(report)
    }

    /// Race every candidate with a simulated buy from the main wallet.
    pub async fn select_route(
        &self,
        candidates: &[Route],
        main: &Actor,
        config: &RunConfig,
    ) -> Result<RouteSelection, RunError> {
        let selector = RouteSelector::new(
            self.polling.route_interval(candidates.len()),
            self.polling.route_budget(),
        );
        selector
            .select(candidates, |route| {
                let ledger = self.ledger.clone();
                let main = main.clone();
                let action = buy_action(&route, config);
                async move { ledger.simulate(&main, &action).await }
            })
            .await
    }

    /// Buy immediately on every actor; actors whose first attempt fails
    /// probe the route until it is viable and retry once.
    async fn instant_buy(&self, actors: &[Actor], route: &Route, config: &RunConfig) -> SettlementReport {
        let outcomes = join_all(actors.iter().map(|actor| async move {
            let first = self
                .executor
                .settle_leg(actor, route, Side::Buy, config)
                .await;
            if first.is_success() {
                return (actor.clone(), first);
            }

            warn!(actor = %actor, "Instant buy failed, probing before retry");
            let action = buy_action(route, config);
            let poller = Poller::new(
                format!("retry {}", actor.label()),
                self.polling.retry_interval(),
                self.polling.retry_budget(),
            );
            let viable = poller
                .poll_until(|ctx| self.retry_probe(actor, &action, ctx.iteration))
                .await;
            match viable {
                PollOutcome::Ready(()) => {
                    let retry = self
                        .executor
                        .settle_leg(actor, route, Side::Buy, config)
                        .await;
                    (actor.clone(), retry)
                }
                PollOutcome::Exhausted { attempts } => {
                    warn!(actor = %actor, attempts, "Retry budget exhausted");
                    (actor.clone(), first)
                }
                PollOutcome::Cancelled => (actor.clone(), first),
            }
        }))
        .await;

        SettlementReport {
            stage: Stage::Buy,
            outcomes,
        }
    }

    async fn retry_probe(
        &self,
        actor: &Actor,
        action: &Action,
        iteration: u64,
    ) -> anyhow::Result<Option<()>> {
        let sim = self.ledger.simulate(actor, action).await?;
        let probe = Probe::from_simulation(iteration, sim);
        if probe.should_report() {
            info!(
                actor = %actor,
                iteration,
                diagnostic = probe.diagnostic.as_deref().unwrap_or(""),
                "Retry probe"
            );
        }
        Ok(probe.passed.then_some(()))
    }
}

fn buy_action(route: &Route, config: &RunConfig) -> Action {
    Action::Buy {
        path: route.path.clone(),
        amount_in: config.amount_in,
        min_out: config.min_out,
        gas_price_gwei: config.gas_price_gwei,
    }
}

fn no_survivors(mut report: RunReport, stage: Stage) -> RunError {
    report.finish(Termination::NoSurvivors(stage));
    RunError::NoSurvivors {
        stage,
        report: Box::new(report),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
