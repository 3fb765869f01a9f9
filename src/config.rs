//! Configuration loading.
//!
//! Two layers:
//! - `AppConfig`, the environment file (`config.toml`): ledger endpoint, router,
//!   token catalog, wallet addresses, polling cadence and retry budgets.
//! - `RunFile`, one campaign playbook (JSON or TOML): which token to buy
//!   with, candidate pairs, amounts, profit multiple.
//!
//! Both are validated into an immutable `RunConfig` before orchestration
//! starts. Secrets (the RPC URL usually embeds an API key) are referenced
//! by env-var name and resolved at runtime.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::engine::poller::PollBudget;
use crate::error::RunError;
use crate::types::{to_base_units, Address, AssetId, Token, U256};

// ---------------------------------------------------------------------------
// Application config (config.toml)
// ---------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub network: NetworkConfig,
    #[serde(default)]
    pub tokens: BTreeMap<String, TokenConfig>,
    #[serde(default)]
    pub wallets: WalletsConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub paper: PaperConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Name of the env var holding the JSON-RPC endpoint.
    pub rpc_url_env: String,
    /// Exchange router contract (swap target and approval spender).
    pub router: Address,
    pub chain_id: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    /// Block explorer base for transaction links, e.g. `https://bscscan.com`.
    #[serde(default)]
    pub explorer_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    pub address: Address,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WalletsConfig {
    /// Actor addresses, main wallet first. Signing is node-managed.
    #[serde(default)]
    pub addresses: Vec<Address>,
}

/// Poll cadence and retry budgets. `None` bounds mean unbounded.
#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    /// Base route-probe interval; multiplied by the number of candidates.
    #[serde(default = "default_route_interval_ms")]
    pub route_interval_ms: u64,
    #[serde(default = "default_profit_interval_ms")]
    pub profit_interval_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_route_max_secs")]
    pub route_max_secs: Option<u64>,
    #[serde(default = "default_profit_max_secs")]
    pub profit_max_secs: Option<u64>,
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            route_interval_ms: default_route_interval_ms(),
            profit_interval_ms: default_profit_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            route_max_secs: default_route_max_secs(),
            profit_max_secs: default_profit_max_secs(),
            retry_max_secs: default_retry_max_secs(),
            max_attempts: None,
        }
    }
}

impl PollingConfig {
    /// Interval for each candidate poller, scaled so the aggregate probe
    /// rate stays constant as candidates are added.
    pub fn route_interval(&self, candidates: usize) -> Duration {
        Duration::from_millis(self.route_interval_ms.max(1) * candidates.max(1) as u64)
    }

    pub fn profit_interval(&self) -> Duration {
        Duration::from_millis(self.profit_interval_ms.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }

    pub fn route_budget(&self) -> PollBudget {
        self.budget(self.route_max_secs)
    }

    pub fn profit_budget(&self) -> PollBudget {
        self.budget(self.profit_max_secs)
    }

    pub fn retry_budget(&self) -> PollBudget {
        self.budget(self.retry_max_secs)
    }

    // A bound of 0 in the file means "no bound".
    fn budget(&self, max_secs: Option<u64>) -> PollBudget {
        PollBudget::new(
            self.max_attempts.filter(|n| *n > 0),
            max_secs.filter(|s| *s > 0).map(Duration::from_secs),
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    /// Allowance at or above which an actor counts as approved, in target
    /// token units. Unset means "effectively unlimited" (half of `U256::MAX`).
    #[serde(default)]
    pub min_allowance: Option<Decimal>,
    #[serde(default = "default_multi_hop_gas")]
    pub multi_hop_gas_limit: u64,
    #[serde(default = "default_direct_gas")]
    pub direct_gas_limit: u64,
    #[serde(default = "default_deadline_secs")]
    pub swap_deadline_secs: i64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_allowance: None,
            multi_hop_gas_limit: default_multi_hop_gas(),
            direct_gas_limit: default_direct_gas(),
            swap_deadline_secs: default_deadline_secs(),
        }
    }
}

/// Seed state for the in-memory paper ledger.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PaperConfig {
    /// Native coin per wallet, human units.
    #[serde(default)]
    pub native_balance: Decimal,
    #[serde(default)]
    pub balances: Vec<PaperBalance>,
    #[serde(default)]
    pub pools: Vec<PaperPool>,
}

/// Per-wallet token balance. `token` is a catalog symbol, an address, or
/// `target`.
#[derive(Debug, Deserialize, Clone)]
pub struct PaperBalance {
    pub token: String,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaperPool {
    pub a: String,
    pub b: String,
    pub reserve_a: Decimal,
    pub reserve_b: Decimal,
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}
fn default_receipt_poll_ms() -> u64 {
    1_000
}
fn default_decimals() -> u32 {
    18
}
fn default_route_interval_ms() -> u64 {
    50
}
fn default_profit_interval_ms() -> u64 {
    100
}
fn default_retry_interval_ms() -> u64 {
    100
}
fn default_route_max_secs() -> Option<u64> {
    Some(60 * 60)
}
fn default_profit_max_secs() -> Option<u64> {
    Some(24 * 60 * 60)
}
fn default_retry_max_secs() -> Option<u64> {
    Some(10 * 60)
}
fn default_multi_hop_gas() -> u64 {
    400_000
}
fn default_direct_gas() -> u64 {
    200_000
}
fn default_deadline_secs() -> i64 {
    5 * 60
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The JSON-RPC endpoint, kept secret because it usually embeds a key.
    pub fn rpc_url(&self) -> Result<SecretString> {
        Self::resolve_env(&self.network.rpc_url_env).map(SecretString::new)
    }

    /// Look up a catalog token by symbol (case-insensitive).
    pub fn token(&self, symbol: &str) -> Option<Token> {
        self.tokens
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(symbol))
            .map(|(s, t)| Token {
                symbol: s.clone(),
                address: t.address.clone(),
                decimals: t.decimals,
            })
    }

    /// Symbol for a catalog address, if known.
    pub fn symbol_of(&self, address: &AssetId) -> Option<&str> {
        self.tokens
            .iter()
            .find(|(_, t)| &t.address == address)
            .map(|(s, _)| s.as_str())
    }
}

// ---------------------------------------------------------------------------
// Playbook (per-run file)
// ---------------------------------------------------------------------------

/// One campaign. Field aliases accept the camelCase playbooks produced
/// by older tooling (`inToken`, `posiblePairs`, ...).
#[derive(Debug, Deserialize, Clone)]
pub struct RunFile {
    #[serde(alias = "inToken")]
    pub in_token: String,
    #[serde(alias = "possiblePairs", alias = "posiblePairs")]
    pub possible_pairs: Vec<String>,
    /// Target token address. Absent when it will come from discovery.
    #[serde(default)]
    pub contract: Option<String>,
    pub wallets: usize,
    #[serde(alias = "amountToBuy")]
    pub amount_to_buy: Decimal,
    #[serde(alias = "minAmountOut")]
    pub min_amount_out: Decimal,
    #[serde(alias = "enableSellAt")]
    pub enable_sell_at: Decimal,
    #[serde(default = "default_gas_price", alias = "gasPrice")]
    pub gas_price_gwei: u64,
    #[serde(default)]
    pub sell_gas_price_gwei: Option<u64>,
    #[serde(default, alias = "instaBuy")]
    pub instant: bool,
    #[serde(default = "default_decimals")]
    pub target_decimals: u32,
}

fn default_gas_price() -> u64 {
    5
}

impl RunFile {
    /// Load a playbook; `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read playbook: {path}"))?;
        let is_json = Path::new(path)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let file = if is_json {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse playbook: {path}"))?
        } else {
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse playbook: {path}"))?
        };
        Ok(file)
    }
}

// ---------------------------------------------------------------------------
// Validated run parameters
// ---------------------------------------------------------------------------

/// Immutable parameters for one orchestration run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: Token,
    /// Set up-front or after discovery via `with_target`.
    pub target: Option<AssetId>,
    pub target_decimals: u32,
    /// Candidate intermediate tokens, in playbook order.
    pub pairs: Vec<Token>,
    pub wallets: usize,
    /// Committed amount per actor, input-token base units.
    pub amount_in: U256,
    /// Minimum acceptable buy output, target-token base units.
    pub min_out: U256,
    /// `amount_to_buy × enable_sell_at`, input-token base units.
    pub sell_target_out: U256,
    pub enable_sell_at: Decimal,
    pub gas_price_gwei: u64,
    pub sell_gas_price_gwei: u64,
    pub instant: bool,
    pub min_allowance: U256,
}

impl RunConfig {
    /// Validate a playbook against the catalog.
    pub fn build(app: &AppConfig, file: &RunFile) -> Result<Self, RunError> {
        let input = app.token(&file.in_token).ok_or_else(|| {
            RunError::Configuration(format!("unknown input token: {}", file.in_token))
        })?;

        if file.possible_pairs.is_empty() {
            return Err(RunError::Configuration("no candidate pairs".into()));
        }
        let pairs = file
            .possible_pairs
            .iter()
            .map(|symbol| {
                app.token(symbol).ok_or_else(|| {
                    RunError::Configuration(format!("unknown pair token: {symbol}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if file.wallets == 0 {
            return Err(RunError::Configuration("wallet count must be at least 1".into()));
        }
        if file.amount_to_buy <= Decimal::ZERO {
            return Err(RunError::Configuration("amount_to_buy must be positive".into()));
        }
        if file.enable_sell_at <= Decimal::ZERO {
            return Err(RunError::Configuration("enable_sell_at must be positive".into()));
        }

        let target = match file.contract.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(
                Address::parse(raw)
                    .map_err(|e| RunError::Configuration(format!("bad target contract: {e}")))?,
            ),
            _ => None,
        };

        let units = |amount: Decimal, decimals: u32, what: &str| {
            to_base_units(amount, decimals)
                .ok_or_else(|| RunError::Configuration(format!("{what} out of range: {amount}")))
        };

        let amount_in = units(file.amount_to_buy, input.decimals, "amount_to_buy")?;
        let min_out = units(file.min_amount_out, file.target_decimals, "min_amount_out")?;
        let sell_target = file
            .amount_to_buy
            .checked_mul(file.enable_sell_at)
            .ok_or_else(|| {
                RunError::Configuration(format!(
                    "sell target out of range: {} × {}",
                    file.amount_to_buy, file.enable_sell_at
                ))
            })?;
        let sell_target_out = units(sell_target, input.decimals, "sell target")?;
        let min_allowance = match app.execution.min_allowance {
            Some(amount) => units(amount, file.target_decimals, "min_allowance")?,
            None => U256::MAX / U256::from(2),
        };

        Ok(Self {
            input,
            target,
            target_decimals: file.target_decimals,
            pairs,
            wallets: file.wallets,
            amount_in,
            min_out,
            sell_target_out,
            enable_sell_at: file.enable_sell_at,
            gas_price_gwei: file.gas_price_gwei,
            sell_gas_price_gwei: file.sell_gas_price_gwei.unwrap_or(file.gas_price_gwei),
            instant: file.instant,
            min_allowance,
        })
    }

    /// Same parameters with the discovered target filled in.
    pub fn with_target(&self, target: AssetId) -> Self {
        Self {
            target: Some(target),
            ..self.clone()
        }
    }

    /// The target asset, required before any stage runs.
    pub fn require_target(&self) -> Result<&AssetId, RunError> {
        self.target
            .as_ref()
            .ok_or_else(|| RunError::Configuration("no target asset".into()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
