//! Route race.
//!
//! One poller per candidate route, all children of a single race token.
//! The first probe to succeed claims the `WinnerSlot` with a
//! compare-and-set and cancels the race; every other poller stops at its
//! next check point. A probe that succeeds after the slot is taken
//! cancels its own poller and yields nothing.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::poller::{PollBudget, PollOutcome, Poller};
use crate::error::{LedgerError, RunError};
use crate::types::{Probe, Route, Simulation};

const UNCLAIMED: usize = usize::MAX;

/// Single-assignment cell holding the index of the winning candidate.
#[derive(Debug)]
pub struct WinnerSlot {
    claimed: AtomicUsize,
}

impl Default for WinnerSlot {
    fn default() -> Self {
        Self {
            claimed: AtomicUsize::new(UNCLAIMED),
        }
    }
}

impl WinnerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `index`. Only the first claim succeeds.
    pub fn try_claim(&self, index: usize) -> bool {
        self.claimed
            .compare_exchange(UNCLAIMED, index, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn winner(&self) -> Option<usize> {
        match self.claimed.load(Ordering::Acquire) {
            UNCLAIMED => None,
            index => Some(index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSelection {
    pub route: Route,
    /// Position in the candidate list.
    pub index: usize,
    /// Probe iteration on which the route became viable.
    pub iteration: u64,
}

pub struct RouteSelector {
    interval: Duration,
    budget: PollBudget,
}

impl RouteSelector {
    pub fn new(interval: Duration, budget: PollBudget) -> Self {
        Self { interval, budget }
    }

    /// Race `test_trade` across all candidates and return the first viable
    /// route. Fails with `NoViableRoute` once every poller has exhausted
    /// its budget.
    pub async fn select<F, Fut>(
        &self,
        candidates: &[Route],
        test_trade: F,
    ) -> Result<RouteSelection, RunError>
    where
        F: Fn(Route) -> Fut,
        Fut: Future<Output = Result<Simulation, LedgerError>>,
    {
        if candidates.is_empty() {
            return Err(RunError::Configuration("no candidate routes".into()));
        }

        info!(
            candidates = candidates.len(),
            interval_ms = self.interval.as_millis() as u64,
            "Racing candidate routes"
        );

        let race = CancellationToken::new();
        let slot = WinnerSlot::new();
        let slot = &slot;
        let test_trade = &test_trade;

        let pollers = candidates.iter().enumerate().map(|(index, route)| {
            let poller = Poller::new(format!("route {}", route.label), self.interval, self.budget)
                .with_parent(&race);
            let race = race.clone();
            async move {
                poller
                    .poll_until(|ctx| {
                        let route = route.clone();
                        let race = race.clone();
                        async move {
                            if slot.winner().is_some() {
                                ctx.cancel();
                                return Ok(None);
                            }
                            let sim = match test_trade(route.clone()).await {
                                Ok(sim) => sim,
                                Err(e) => return Err(anyhow::Error::new(e)),
                            };
                            let probe = Probe::from_simulation(ctx.iteration, sim);
                            if probe.should_report() {
                                info!(
                                    route = %route.label,
                                    iteration = probe.iteration,
                                    passed = probe.passed,
                                    diagnostic = probe.diagnostic.as_deref().unwrap_or(""),
                                    "Route probe"
                                );
                            }
                            if !probe.passed {
                                return Ok(None);
                            }
                            if slot.try_claim(index) {
                                race.cancel();
                                Ok(Some(probe.iteration))
                            } else {
                                debug!(route = %route.label, "Route viable but race already won");
                                ctx.cancel();
                                Ok(None)
                            }
                        }
                    })
                    .await
            }
        });

        let outcomes = join_all(pollers).await;

        for (index, outcome) in outcomes.into_iter().enumerate() {
            if let PollOutcome::Ready(iteration) = outcome {
                let route = candidates[index].clone();
                info!(route = %route.label, iteration, "Route selected");
                return Ok(RouteSelection {
                    route,
                    index,
                    iteration,
                });
            }
        }

        Err(RunError::NoViableRoute {
            candidates: candidates.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::time::Instant;

    const TICK: Duration = Duration::from_millis(50);

    fn routes(n: usize) -> Vec<Route> {
        (0..n)
            .map(|i| {
                Route::new(
                    format!("R{i}"),
                    vec![Address::from_index(1), Address::from_index(100 + i as u64)],
                )
            })
            .collect()
    }

    /// Counts probes per route label and passes once a route has been
    /// probed `succeed_at[label]` times.
    struct Script {
        succeed_at: HashMap<String, u64>,
        calls: Mutex<HashMap<String, u64>>,
    }

    impl Script {
        fn new(succeed_at: &[(&str, u64)]) -> Self {
            Self {
                succeed_at: succeed_at.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn probe(&self, route: &Route) -> Simulation {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(route.label.clone()).or_default();
            *n += 1;
            match self.succeed_at.get(&route.label) {
                Some(at) if *n >= *at => Simulation::viable(),
                _ => Simulation::rejected("INSUFFICIENT_LIQUIDITY"),
            }
        }

        fn calls(&self, label: &str) -> u64 {
            self.calls.lock().unwrap().get(label).copied().unwrap_or(0)
        }
    }

    #[test]
    fn test_winner_slot_single_assignment() {
        let slot = WinnerSlot::new();
        assert_eq!(slot.winner(), None);
        assert!(slot.try_claim(2));
        assert!(!slot.try_claim(0));
        assert_eq!(slot.winner(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_route_wins_on_fifth_probe() {
        let script = Script::new(&[("R1", 5)]);
        let selector = RouteSelector::new(TICK, PollBudget::unbounded());
        let started = Instant::now();

        let selection = selector
            .select(&routes(3), |route| {
                let sim = script.probe(&route);
                async move { Ok(sim) }
            })
            .await
            .unwrap();

        assert_eq!(selection.index, 1);
        assert_eq!(selection.route.label, "R1");
        assert_eq!(selection.iteration, 5);
        assert_eq!(started.elapsed(), TICK * 5);
        assert!(script.calls("R0") <= 5);
        assert!(script.calls("R2") <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_losers_stop_after_win() {
        let script = Script::new(&[("R0", 3)]);
        let selector = RouteSelector::new(TICK, PollBudget::unbounded());

        selector
            .select(&routes(2), |route| {
                let sim = script.probe(&route);
                async move { Ok(sim) }
            })
            .await
            .unwrap();
        let after_win = script.calls("R1");

        tokio::time::sleep(TICK * 10).await;
        assert_eq!(script.calls("R1"), after_win);
        assert!(after_win <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_tick_claims_exactly_one_winner() {
        let script = Script::new(&[("R0", 1), ("R1", 1), ("R2", 1)]);
        let selector = RouteSelector::new(TICK, PollBudget::unbounded());

        let selection = selector
            .select(&routes(3), |route| {
                let sim = script.probe(&route);
                async move { Ok(sim) }
            })
            .await
            .unwrap();

        assert_eq!(selection.index, 0);
        assert_eq!(selection.iteration, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_candidates_yield_no_viable_route() {
        let script = Script::new(&[]);
        let selector = RouteSelector::new(TICK, PollBudget::attempts(4));

        let err = selector
            .select(&routes(2), |route| {
                let sim = script.probe(&route);
                async move { Ok(sim) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::NoViableRoute { candidates: 2 }));
        assert_eq!(script.calls("R0"), 4);
        assert_eq!(script.calls("R1"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_are_retried() {
        let calls = Mutex::new(0u64);
        let selector = RouteSelector::new(TICK, PollBudget::unbounded());

        let selection = selector
            .select(&routes(1), |_route| {
                let n = {
                    let mut c = calls.lock().unwrap();
                    *c += 1;
                    *c
                };
                async move {
                    if n < 3 {
                        Err(LedgerError::Network("connection reset".into()))
                    } else {
                        Ok(Simulation::viable())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(selection.iteration, 3);
    }

    #[tokio::test]
    async fn test_empty_candidates_is_configuration_error() {
        let selector = RouteSelector::new(TICK, PollBudget::unbounded());
        let err = selector
            .select(&[], |_| async { Ok(Simulation::viable()) })
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
    }
}
