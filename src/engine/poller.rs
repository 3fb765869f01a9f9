//! Retry-until-condition scheduler.
//!
//! A `Poller` invokes a probe on a fixed cadence until the probe yields a
//! value, the poller is cancelled, or its retry budget runs out. Probes on
//! one poller are strictly serialized: the next tick is not awaited until
//! the previous probe has resolved, and a slow probe delays (never bursts)
//! the following ticks.
//!
//! Cancellation is cooperative. Each probe receives a `PollContext` whose
//! `cancel()` stops its own poller; a parent token (e.g. a route race)
//! stops every child poller at the next check point.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Upper bounds on a polling loop. Both `None` means poll forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollBudget {
    pub max_attempts: Option<u64>,
    pub max_duration: Option<Duration>,
}

impl PollBudget {
    pub fn new(max_attempts: Option<u64>, max_duration: Option<Duration>) -> Self {
        Self {
            max_attempts,
            max_duration,
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn attempts(n: u64) -> Self {
        Self::new(Some(n), None)
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none() && self.max_duration.is_none()
    }

    fn exhausted(&self, attempts: u64, elapsed: Duration) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
            || self.max_duration.is_some_and(|max| elapsed >= max)
    }
}

// ---------------------------------------------------------------------------
// Outcome / context
// ---------------------------------------------------------------------------

/// How a polling loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The probe produced a value.
    Ready(T),
    /// The poller (or a parent) was cancelled.
    Cancelled,
    /// The retry budget ran out after `attempts` probes.
    Exhausted { attempts: u64 },
}

impl<T> PollOutcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            PollOutcome::Ready(v) => Some(v),
            _ => None,
        }
    }
}

/// Handed to every probe invocation.
#[derive(Clone)]
pub struct PollContext {
    pub iteration: u64,
    token: CancellationToken,
}

impl PollContext {
    /// Stop this poller. The current probe's result is still honoured if
    /// it returns a value; otherwise the poller resolves `Cancelled`.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl fmt::Debug for PollContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollContext")
            .field("iteration", &self.iteration)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

pub struct Poller {
    label: String,
    interval: Duration,
    budget: PollBudget,
    token: CancellationToken,
}

impl Poller {
    /// Create a standalone poller. Panics on a zero interval in debug builds.
    pub fn new(label: impl Into<String>, interval: Duration, budget: PollBudget) -> Self {
        debug_assert!(!interval.is_zero(), "poll interval must be positive");
        Self {
            label: label.into(),
            interval,
            budget,
            token: CancellationToken::new(),
        }
    }

    /// Attach to a parent token: cancelling the parent stops this poller.
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.token = parent.child_token();
        self
    }

    /// Token that cancels this poller from outside the probe.
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Probe every `interval` until the probe returns `Ok(Some(_))`.
    ///
    /// The first probe fires one interval after the call. Iterations start
    /// at 1 and increase by exactly 1 per probe. A probe error is logged
    /// and polling continues.
    pub async fn poll_until<T, F, Fut>(&self, mut probe: F) -> PollOutcome<T>
    where
        F: FnMut(PollContext) -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(started + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempts: u64 = 0;
        loop {
            if self.budget.exhausted(attempts, started.elapsed()) {
                debug!(poller = %self.label, attempts, "Retry budget exhausted");
                return PollOutcome::Exhausted { attempts };
            }

            tokio::select! {
                biased;
                _ = self.token.cancelled() => return PollOutcome::Cancelled,
                _ = ticker.tick() => {}
            }

            if self.token.is_cancelled() {
                return PollOutcome::Cancelled;
            }

            attempts += 1;
            let ctx = PollContext {
                iteration: attempts,
                token: self.token.clone(),
            };
            match probe(ctx).await {
                Ok(Some(value)) => return PollOutcome::Ready(value),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        poller = %self.label,
                        iteration = attempts,
                        error = %e,
                        "Probe failed (non-fatal), continuing"
                    );
                }
            }

            if self.token.is_cancelled() {
                return PollOutcome::Cancelled;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    const TICK: Duration = Duration::from_millis(50);

    #[tokio::test(start_paused = true)]
    async fn test_resolves_on_first_value() {
        let poller = Poller::new("t", TICK, PollBudget::unbounded());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let outcome = poller
            .poll_until(move |ctx| {
                seen2.lock().unwrap().push(ctx.iteration);
                async move { Ok((ctx.iteration == 4).then_some("done")) }
            })
            .await;

        assert_eq!(outcome, PollOutcome::Ready("done"));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_probe_waits_one_interval() {
        let poller = Poller::new("t", TICK, PollBudget::unbounded());
        let start = Instant::now();
        let outcome = poller.poll_until(|_| async { Ok(Some(())) }).await;
        assert_eq!(outcome, PollOutcome::Ready(()));
        assert_eq!(start.elapsed(), TICK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_are_not_fatal() {
        let poller = Poller::new("t", TICK, PollBudget::unbounded());
        let outcome = poller
            .poll_until(|ctx| async move {
                if ctx.iteration < 3 {
                    anyhow::bail!("node unreachable");
                }
                Ok(Some(ctx.iteration))
            })
            .await;
        assert_eq!(outcome, PollOutcome::Ready(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_from_probe_resolves_without_value() {
        let poller = Poller::new("t", TICK, PollBudget::unbounded());
        let calls = Arc::new(AtomicU64::new(0));
        let c = calls.clone();
        let outcome: PollOutcome<()> = poller
            .poll_until(move |ctx| {
                c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if ctx.iteration == 2 {
                        ctx.cancel();
                    }
                    Ok(None)
                }
            })
            .await;
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_child() {
        let parent = CancellationToken::new();
        let poller = Poller::new("t", TICK, PollBudget::unbounded()).with_parent(&parent);
        let trigger = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TICK * 3 + TICK / 2).await;
            trigger.cancel();
        });
        let calls = Arc::new(AtomicU64::new(0));
        let c = calls.clone();
        let outcome: PollOutcome<()> = poller
            .poll_until(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            })
            .await;
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget() {
        let poller = Poller::new("t", TICK, PollBudget::attempts(5));
        let outcome: PollOutcome<()> = poller.poll_until(|_| async { Ok(None) }).await;
        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 5 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_budget() {
        let budget = PollBudget::new(None, Some(Duration::from_millis(500)));
        let poller = Poller::new("t", TICK, budget);
        let outcome: PollOutcome<()> = poller.poll_until(|_| async { Ok(None) }).await;
        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 10 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_does_not_overlap() {
        let poller = Poller::new("t", TICK, PollBudget::unbounded());
        let in_flight = Arc::new(AtomicU64::new(0));
        let max_seen = Arc::new(AtomicU64::new(0));
        let (f, m) = (in_flight.clone(), max_seen.clone());
        let outcome = poller
            .poll_until(move |ctx| {
                let (f, m) = (f.clone(), m.clone());
                async move {
                    let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                    m.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(TICK * 3).await;
                    f.fetch_sub(1, Ordering::SeqCst);
                    Ok((ctx.iteration == 3).then_some(ctx.iteration))
                }
            })
            .await;
        assert_eq!(outcome, PollOutcome::Ready(3));
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
