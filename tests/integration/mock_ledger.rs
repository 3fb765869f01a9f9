//! Scripted ledger for integration testing.
//!
//! Provides a deterministic `LedgerClient` whose route viability, profit
//! timing and per-wallet failures are set from test code. Every call is
//! recorded so scenarios can assert on what the engine did and did not
//! touch.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use convoy::error::LedgerError;
use convoy::ledger::LedgerClient;
use convoy::types::*;

/// Target tokens credited per confirmed buy.
const FILL: U256 = U256::from_limbs([1_000_000, 0, 0, 0]);

#[derive(Default)]
struct MockState {
    /// Buy path -> probe number on which its simulation first passes.
    viable_from: HashMap<Vec<AssetId>, u64>,
    buy_simulations: HashMap<Vec<AssetId>, u64>,
    /// Probe number on which sell simulations start clearing the target.
    sell_viable_from: Option<u64>,
    sell_simulations: u64,
    failing_buys: HashSet<Address>,
    balances: HashMap<(Address, AssetId), U256>,
    allowances: HashMap<(Address, AssetId), U256>,
    nonces: HashMap<Address, u64>,
    pending: HashMap<String, (Address, Action)>,
    submitted: Vec<(Address, ActionKind)>,
    allowance_queries: Vec<Address>,
}

/// A mock ledger for deterministic orchestration tests.
///
/// Cloning shares state, so a test can keep a handle after handing the
/// ledger to the orchestrator.
#[derive(Clone, Default)]
pub struct MockLedger {
    state: Arc<Mutex<MockState>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buy simulations on `path` pass from the `probe`-th call onwards.
    pub fn viable_from(&self, path: Vec<AssetId>, probe: u64) {
        self.state.lock().unwrap().viable_from.insert(path, probe);
    }

    /// Sell simulations pass from the `probe`-th call onwards.
    pub fn profitable_from(&self, probe: u64) {
        self.state.lock().unwrap().sell_viable_from = Some(probe);
    }

    /// Buys from `address` are mined but revert.
    pub fn fail_buys_from(&self, address: &Address) {
        self.state
            .lock()
            .unwrap()
            .failing_buys
            .insert(address.clone());
    }

    pub fn buy_simulations(&self, path: &[AssetId]) -> u64 {
        self.state
            .lock()
            .unwrap()
            .buy_simulations
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn sell_simulations(&self) -> u64 {
        self.state.lock().unwrap().sell_simulations
    }

    pub fn allowance_queries(&self) -> Vec<Address> {
        self.state.lock().unwrap().allowance_queries.clone()
    }

    /// Wallets that submitted an action of `kind`, in submission order.
    pub fn submitters(&self, kind: ActionKind) -> Vec<Address> {
        self.state
            .lock()
            .unwrap()
            .submitted
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|(a, _)| a.clone())
            .collect()
    }

    pub fn balance(&self, owner: &Address, asset: &AssetId) -> U256 {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&(owner.clone(), asset.clone()))
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn simulate(&self, _actor: &Actor, action: &Action) -> Result<Simulation, LedgerError> {
        let mut state = self.state.lock().unwrap();
        match action {
            Action::Buy { path, .. } => {
                let count = state.buy_simulations.entry(path.clone()).or_insert(0);
                *count += 1;
                let probe = *count;
                match state.viable_from.get(path) {
                    Some(from) if probe >= *from => Ok(Simulation::viable()),
                    _ => Ok(Simulation::rejected("execution reverted: INSUFFICIENT_LIQUIDITY")),
                }
            }
            Action::Sell { .. } => {
                state.sell_simulations += 1;
                match state.sell_viable_from {
                    Some(from) if state.sell_simulations >= from => Ok(Simulation::viable()),
                    _ => Ok(Simulation::rejected("INSUFFICIENT_OUTPUT_AMOUNT")),
                }
            }
            _ => Ok(Simulation::viable()),
        }
    }

    async fn submit(
        &self,
        actor: &Actor,
        action: &Action,
        nonce: u64,
    ) -> Result<PendingTx, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let expected = state.nonces.entry(actor.address.clone()).or_insert(0);
        if nonce != *expected {
            return Err(LedgerError::Rejected(format!(
                "nonce {nonce}, expected {expected}"
            )));
        }
        *expected += 1;

        let hash = format!("0x{:064x}", state.submitted.len() + 1);
        state.submitted.push((actor.address.clone(), action.kind()));
        state
            .pending
            .insert(hash.clone(), (actor.address.clone(), action.clone()));
        Ok(PendingTx {
            hash,
            from: actor.address.clone(),
            nonce,
            kind: action.kind(),
        })
    }

    async fn confirm(&self, pending: &PendingTx) -> Result<Receipt, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let Some((owner, action)) = state.pending.remove(&pending.hash) else {
            return Err(LedgerError::Rejected(format!("unknown tx {}", pending.hash)));
        };

        match &action {
            Action::Buy { path, .. } => {
                if state.failing_buys.contains(&owner) {
                    return Err(LedgerError::TransactionFailure {
                        hash: pending.hash.clone(),
                        reason: "execution reverted".into(),
                    });
                }
                if let Some(target) = path.last() {
                    *state.balances.entry((owner, target.clone())).or_default() += FILL;
                }
            }
            Action::Sell { path, .. } => {
                if let Some(target) = path.first() {
                    state.balances.insert((owner, target.clone()), U256::ZERO);
                }
            }
            Action::Approve { asset, amount, .. } => {
                state.allowances.insert((owner, asset.clone()), *amount);
            }
            Action::Transfer { .. } => {}
        }

        Ok(Receipt {
            tx_hash: pending.hash.clone(),
            block_number: Some(1),
            gas_used: Some(21_000),
            confirmed_at: Utc::now(),
        })
    }

    async fn query_allowance(&self, actor: &Actor, asset: &AssetId) -> Result<U256, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.allowance_queries.push(actor.address.clone());
        Ok(state
            .allowances
            .get(&(actor.address.clone(), asset.clone()))
            .copied()
            .unwrap_or_default())
    }

    async fn query_balance(&self, actor: &Actor, asset: &AssetId) -> Result<U256, LedgerError> {
        Ok(self.balance(&actor.address, asset))
    }

    async fn query_native_balance(&self, _actor: &Actor) -> Result<U256, LedgerError> {
        Ok(U256::ZERO)
    }

    async fn transaction_count(&self, actor: &Actor) -> Result<u64, LedgerError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .nonces
            .get(&actor.address)
            .copied()
            .unwrap_or(0))
    }

    async fn quote(&self, _path: &[AssetId], amount_in: U256) -> Result<U256, LedgerError> {
        Ok(amount_in)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
