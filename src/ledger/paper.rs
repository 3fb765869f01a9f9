//! In-memory paper ledger.
//!
//! A constant-product exchange (0.3% fee per hop) with token balances,
//! router allowances and per-account nonces. Submitted actions execute
//! immediately; `confirm` returns the stored receipt. Gas is not charged.
//!
//! Used for `--paper` runs and as a realistic ledger in tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::LedgerClient;
use crate::config::AppConfig;
use crate::error::LedgerError;
use crate::types::{
    to_base_units, Action, Actor, Address, AssetId, PendingTx, Receipt, Simulation, U256,
};

const LEDGER_NAME: &str = "paper";
const FEE_NUMERATOR: U256 = U256::from_limbs([997, 0, 0, 0]);
const FEE_DENOMINATOR: U256 = U256::from_limbs([1000, 0, 0, 0]);

#[derive(Debug, Clone, Copy)]
struct Pool {
    reserve_lo: U256,
    reserve_hi: U256,
}

#[derive(Default)]
struct PaperState {
    balances: HashMap<(Address, AssetId), U256>,
    native: HashMap<Address, U256>,
    allowances: HashMap<(Address, AssetId), U256>,
    /// Keyed by (lower address, higher address).
    pools: HashMap<(AssetId, AssetId), Pool>,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<String, Result<Receipt, String>>,
    block: u64,
    reverting: HashSet<Address>,
    offline: bool,
}

fn pool_key(a: &AssetId, b: &AssetId) -> (AssetId, AssetId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Constant-product output for one hop. `None` when the product
/// overflows 256 bits.
fn amount_out(amount_in: U256, reserve_in: U256, reserve_out: U256) -> Option<U256> {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return Some(U256::ZERO);
    }
    let in_with_fee = amount_in.checked_mul(FEE_NUMERATOR)?;
    let numerator = in_with_fee.checked_mul(reserve_out)?;
    let denominator = reserve_in
        .checked_mul(FEE_DENOMINATOR)?
        .checked_add(in_with_fee)?;
    Some(numerator / denominator)
}

impl PaperState {
    fn reserves(&self, from: &AssetId, to: &AssetId) -> Option<(U256, U256)> {
        let pool = self.pools.get(&pool_key(from, to))?;
        if from <= to {
            Some((pool.reserve_lo, pool.reserve_hi))
        } else {
            Some((pool.reserve_hi, pool.reserve_lo))
        }
    }

    fn quote(&self, path: &[AssetId], amount_in: U256) -> Result<Vec<U256>, String> {
        if path.len() < 2 {
            return Err("INVALID_PATH".into());
        }
        let mut amounts = vec![amount_in];
        let mut current = amount_in;
        for hop in path.windows(2) {
            let (r_in, r_out) = self
                .reserves(&hop[0], &hop[1])
                .ok_or_else(|| format!("no liquidity for {} -> {}", hop[0].short(), hop[1].short()))?;
            current = amount_out(current, r_in, r_out).ok_or("ARITHMETIC_OVERFLOW")?;
            if current.is_zero() {
                return Err("INSUFFICIENT_LIQUIDITY".into());
            }
            amounts.push(current);
        }
        Ok(amounts)
    }

    fn balance(&self, owner: &Address, asset: &AssetId) -> U256 {
        self.balances
            .get(&(owner.clone(), asset.clone()))
            .copied()
            .unwrap_or_default()
    }

    fn allowance(&self, owner: &Address, asset: &AssetId) -> U256 {
        self.allowances
            .get(&(owner.clone(), asset.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Validate an action without mutating state.
    fn check(&self, owner: &Address, action: &Action) -> Result<(), String> {
        match action {
            Action::Buy {
                path,
                amount_in,
                min_out,
                ..
            }
            | Action::Sell {
                path,
                amount_in,
                min_out,
                ..
            } => {
                let input = path.first().ok_or("INVALID_PATH")?;
                if self.balance(owner, input) < *amount_in {
                    return Err("TRANSFER_FROM_FAILED: insufficient balance".into());
                }
                if self.allowance(owner, input) < *amount_in {
                    return Err("TRANSFER_FROM_FAILED: insufficient allowance".into());
                }
                let amounts = self.quote(path, *amount_in)?;
                let out = amounts.last().copied().unwrap_or_default();
                if out < *min_out {
                    return Err(format!("INSUFFICIENT_OUTPUT_AMOUNT: {out} < {min_out}"));
                }
                Ok(())
            }
            Action::Approve { .. } => Ok(()),
            Action::Transfer { asset, amount, .. } => {
                let available = match asset {
                    Some(asset) => self.balance(owner, asset),
                    None => self.native.get(owner).copied().unwrap_or_default(),
                };
                if available < *amount {
                    return Err("transfer amount exceeds balance".into());
                }
                Ok(())
            }
        }
    }

    fn execute(&mut self, owner: &Address, action: &Action) -> Result<(), String> {
        if self.reverting.contains(owner) {
            return Err("execution reverted".into());
        }
        self.check(owner, action)?;
        match action {
            Action::Buy {
                path, amount_in, ..
            }
            | Action::Sell {
                path, amount_in, ..
            } => {
                let amounts = self.quote(path, *amount_in)?;
                for (i, hop) in path.windows(2).enumerate() {
                    let key = pool_key(&hop[0], &hop[1]);
                    if let Some(pool) = self.pools.get_mut(&key) {
                        let (dx, dy) = (amounts[i], amounts[i + 1]);
                        if hop[0] <= hop[1] {
                            pool.reserve_lo += dx;
                            pool.reserve_hi -= dy;
                        } else {
                            pool.reserve_hi += dx;
                            pool.reserve_lo -= dy;
                        }
                    }
                }
                let input = &path[0];
                let output = &path[path.len() - 1];
                let out = amounts[amounts.len() - 1];
                *self.balances.entry((owner.clone(), input.clone())).or_default() -= *amount_in;
                *self.allowances.entry((owner.clone(), input.clone())).or_default() -= *amount_in;
                *self.balances.entry((owner.clone(), output.clone())).or_default() += out;
            }
            Action::Approve { asset, amount, .. } => {
                self.allowances
                    .insert((owner.clone(), asset.clone()), *amount);
            }
            Action::Transfer {
                asset, to, amount, ..
            } => match asset {
                Some(asset) => {
                    *self.balances.entry((owner.clone(), asset.clone())).or_default() -= *amount;
                    *self.balances.entry((to.clone(), asset.clone())).or_default() += *amount;
                }
                None => {
                    *self.native.entry(owner.clone()).or_default() -= *amount;
                    *self.native.entry(to.clone()).or_default() += *amount;
                }
            },
        }
        Ok(())
    }
}

fn new_tx_hash() -> String {
    format!("0x{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct PaperLedger {
    state: Mutex<PaperState>,
}

impl PaperLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger from the `[paper]` config section. Every actor gets
    /// the configured balances with the router pre-approved for them.
    pub fn seeded(app: &AppConfig, target: Option<&AssetId>, actors: &[Actor]) -> Result<Self> {
        let ledger = Self::new();
        let resolve = |name: &str| -> Result<(AssetId, u32)> {
            if name.eq_ignore_ascii_case("target") {
                let target = target.ok_or_else(|| anyhow!("paper seed references target before it is known"))?;
                return Ok((target.clone(), 18));
            }
            if let Some(token) = app.token(name) {
                return Ok((token.address, token.decimals));
            }
            let address = Address::parse(name).map_err(|e| anyhow!("paper seed token: {e}"))?;
            Ok((address, 18))
        };
        let units = |amount, decimals| {
            to_base_units(amount, decimals).ok_or_else(|| anyhow!("paper amount out of range: {amount}"))
        };

        for pool in &app.paper.pools {
            let (a, dec_a) = resolve(&pool.a)?;
            let (b, dec_b) = resolve(&pool.b)?;
            ledger.add_pool(&a, &b, units(pool.reserve_a, dec_a)?, units(pool.reserve_b, dec_b)?);
        }
        let native = units(app.paper.native_balance, 18)?;
        for actor in actors {
            ledger.credit_native(&actor.address, native);
            for balance in &app.paper.balances {
                let (asset, decimals) = resolve(&balance.token)?;
                ledger.credit(&actor.address, &asset, units(balance.amount, decimals)?);
                ledger.set_allowance(&actor.address, &asset, U256::MAX);
            }
        }
        info!(
            pools = app.paper.pools.len(),
            actors = actors.len(),
            "Paper ledger seeded"
        );
        Ok(ledger)
    }

    pub fn add_pool(&self, a: &AssetId, b: &AssetId, reserve_a: U256, reserve_b: U256) {
        let mut state = self.lock();
        let pool = if a <= b {
            Pool {
                reserve_lo: reserve_a,
                reserve_hi: reserve_b,
            }
        } else {
            Pool {
                reserve_lo: reserve_b,
                reserve_hi: reserve_a,
            }
        };
        state.pools.insert(pool_key(a, b), pool);
    }

    /// Current reserves as (reserve of `a`, reserve of `b`).
    pub fn reserves(&self, a: &AssetId, b: &AssetId) -> Option<(U256, U256)> {
        self.lock().reserves(a, b)
    }

    pub fn credit(&self, owner: &Address, asset: &AssetId, amount: U256) {
        *self
            .lock()
            .balances
            .entry((owner.clone(), asset.clone()))
            .or_default() += amount;
    }

    pub fn credit_native(&self, owner: &Address, amount: U256) {
        *self.lock().native.entry(owner.clone()).or_default() += amount;
    }

    pub fn set_allowance(&self, owner: &Address, asset: &AssetId, amount: U256) {
        self.lock()
            .allowances
            .insert((owner.clone(), asset.clone()), amount);
    }

    pub fn balance(&self, owner: &Address, asset: &AssetId) -> U256 {
        self.lock().balance(owner, asset)
    }

    pub fn native_balance(&self, owner: &Address) -> U256 {
        self.lock().native.get(owner).copied().unwrap_or_default()
    }

    /// Swap on behalf of an outside trader, moving the price.
    pub fn external_swap(&self, path: &[AssetId], amount_in: U256) -> Result<U256> {
        let trader = Address::from_index(u64::MAX);
        if path.len() < 2 {
            return Err(anyhow!("external swap needs at least two assets"));
        }
        let mut state = self.lock();
        let output = path[path.len() - 1].clone();
        state.balances.insert((trader.clone(), output.clone()), U256::ZERO);
        state.balances.insert((trader.clone(), path[0].clone()), amount_in);
        state.allowances.insert((trader.clone(), path[0].clone()), amount_in);
        state
            .execute(
                &trader,
                &Action::Buy {
                    path: path.to_vec(),
                    amount_in,
                    min_out: U256::ZERO,
                    gas_price_gwei: 0,
                },
            )
            .map_err(|e| anyhow!(e))?;
        Ok(state.balance(&trader, &output))
    }

    /// Every action submitted by `owner` from now on reverts on execution.
    /// Simulations are unaffected, as when a trade is front-run.
    pub fn revert_actions_from(&self, owner: &Address) {
        self.lock().reverting.insert(owner.clone());
    }

    /// Simulate a node outage: every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperState> {
        // A poisoned lock only means a test panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn online(&self) -> Result<std::sync::MutexGuard<'_, PaperState>, LedgerError> {
        let state = self.lock();
        if state.offline {
            return Err(LedgerError::Network("paper ledger offline".into()));
        }
        Ok(state)
    }
}

#[async_trait]
impl LedgerClient for PaperLedger {
    async fn simulate(&self, actor: &Actor, action: &Action) -> Result<Simulation, LedgerError> {
        let state = self.online()?;
        Ok(match state.check(&actor.address, action) {
            Ok(()) => Simulation::viable(),
            Err(reason) => Simulation::rejected(reason),
        })
    }

    async fn submit(
        &self,
        actor: &Actor,
        action: &Action,
        nonce: u64,
    ) -> Result<PendingTx, LedgerError> {
        let mut state = self.online()?;
        let expected = state.nonces.get(&actor.address).copied().unwrap_or(0);
        if nonce < expected {
            return Err(LedgerError::Rejected(format!(
                "nonce too low: got {nonce}, expected {expected}"
            )));
        }
        if nonce > expected {
            return Err(LedgerError::Rejected(format!(
                "nonce gap: got {nonce}, expected {expected}"
            )));
        }
        state.nonces.insert(actor.address.clone(), expected + 1);
        state.block += 1;

        let hash = new_tx_hash();
        let result = state.execute(&actor.address, action).map(|()| Receipt {
            tx_hash: hash.clone(),
            block_number: Some(state.block),
            gas_used: None,
            confirmed_at: Utc::now(),
        });
        debug!(
            actor = %actor,
            nonce,
            kind = %action.kind(),
            ok = result.is_ok(),
            "Paper transaction executed"
        );
        state.receipts.insert(hash.clone(), result);

        Ok(PendingTx {
            hash,
            from: actor.address.clone(),
            nonce,
            kind: action.kind(),
        })
    }

    async fn confirm(&self, pending: &PendingTx) -> Result<Receipt, LedgerError> {
        let state = self.online()?;
        match state.receipts.get(&pending.hash) {
            Some(Ok(receipt)) => Ok(receipt.clone()),
            Some(Err(reason)) => Err(LedgerError::TransactionFailure {
                hash: pending.hash.clone(),
                reason: reason.clone(),
            }),
            None => Err(LedgerError::Rejected(format!(
                "unknown transaction {}",
                pending.hash
            ))),
        }
    }

    async fn query_allowance(&self, actor: &Actor, asset: &AssetId) -> Result<U256, LedgerError> {
        Ok(self.online()?.allowance(&actor.address, asset))
    }

    async fn query_balance(&self, actor: &Actor, asset: &AssetId) -> Result<U256, LedgerError> {
        Ok(self.online()?.balance(&actor.address, asset))
    }

    async fn query_native_balance(&self, actor: &Actor) -> Result<U256, LedgerError> {
        Ok(self.online()?.native.get(&actor.address).copied().unwrap_or_default())
    }

    async fn transaction_count(&self, actor: &Actor) -> Result<u64, LedgerError> {
        Ok(self
            .online()?
            .nonces
            .get(&actor.address)
            .copied()
            .unwrap_or(0))
    }

    async fn quote(&self, path: &[AssetId], amount_in: U256) -> Result<U256, LedgerError> {
        let state = self.online()?;
        state
            .quote(path, amount_in)
            .map(|amounts| amounts.last().copied().unwrap_or_default())
            .map_err(LedgerError::Rejected)
    }

    fn name(&self) -> &str {
        LEDGER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
