//! Shared types for the CONVOY runner.
//!
//! These types form the data model used across the ledger, engine and
//! discovery modules. They carry no behaviour beyond formatting and
//! small conversions so that every layer can depend on them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

pub use alloy::primitives::U256;

// ---------------------------------------------------------------------------
// Addresses and assets
// ---------------------------------------------------------------------------

/// A 20-byte ledger address, displayed as lowercase `0x`-prefixed hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(alloy::primitives::Address);

impl Address {
    /// Parse and normalise an address. Accepts mixed case.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| format!("address must start with 0x: {trimmed}"))?;
        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("address must be 40 hex digits: {trimmed}"));
        }
        hex.parse::<alloy::primitives::Address>()
            .map(Self)
            .map_err(|e| format!("{trimmed}: {e}"))
    }

    /// Address whose low bytes encode `n`. Used for paper-ledger wallets.
    pub fn from_index(n: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&n.to_be_bytes());
        Self(alloy::primitives::Address::from(bytes))
    }

    /// The EVM address this wraps.
    pub fn evm(&self) -> alloy::primitives::Address {
        self.0
    }

    /// Short form for log lines: `0x1234…abcd`.
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}…{}", &full[..6], &full[38..])
    }
}

impl From<alloy::primitives::Address> for Address {
    fn from(value: alloy::primitives::Address) -> Self {
        Self(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", alloy::primitives::hex::encode(self.0.as_slice()))
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

/// Assets are identified by their token contract address.
pub type AssetId = Address;

/// A catalog token: symbol, contract address and decimal precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub address: AssetId,
    pub decimals: u32,
}

// ---------------------------------------------------------------------------
// Actors
// ---------------------------------------------------------------------------

/// An independently signing participant (a wallet).
///
/// Index 0 is the main wallet; sub-wallets follow in derivation order.
/// Signing happens on the ledger side, so the core only needs the address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub index: usize,
    pub address: Address,
}

impl Actor {
    pub fn new(index: usize, address: Address) -> Self {
        Self { index, address }
    }

    /// Human-facing 1-based label, "wallet 1" being the main wallet.
    pub fn label(&self) -> String {
        format!("wallet {}", self.index + 1)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.address.short())
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// An ordered conversion path from the input asset to the target asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub label: String,
    pub path: Vec<AssetId>,
}

impl Route {
    pub fn new(label: impl Into<String>, path: Vec<AssetId>) -> Self {
        Self {
            label: label.into(),
            path,
        }
    }

    /// The path the sell leg travels: target back to input.
    pub fn reversed_path(&self) -> Vec<AssetId> {
        self.path.iter().rev().cloned().collect()
    }

    pub fn input(&self) -> Option<&AssetId> {
        self.path.first()
    }

    pub fn target(&self) -> Option<&AssetId> {
        self.path.last()
    }

    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.label)
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Which leg of the playbook a fan-out executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// A single ledger action, fully parameterised.
///
/// Amounts are integer base units. An `Approve` amount of `U256::MAX`
/// is the conventional "unlimited" allowance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Buy {
        path: Vec<AssetId>,
        amount_in: U256,
        min_out: U256,
        gas_price_gwei: u64,
    },
    Sell {
        path: Vec<AssetId>,
        amount_in: U256,
        min_out: U256,
        gas_price_gwei: u64,
    },
    Approve {
        asset: AssetId,
        amount: U256,
        gas_price_gwei: u64,
    },
    /// `asset: None` moves the native coin.
    Transfer {
        asset: Option<AssetId>,
        to: Address,
        amount: U256,
        gas_price_gwei: u64,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Buy { .. } => ActionKind::Buy,
            Action::Sell { .. } => ActionKind::Sell,
            Action::Approve { .. } => ActionKind::Approve,
            Action::Transfer { .. } => ActionKind::Transfer,
        }
    }

    pub fn gas_price_gwei(&self) -> u64 {
        match self {
            Action::Buy { gas_price_gwei, .. }
            | Action::Sell { gas_price_gwei, .. }
            | Action::Approve { gas_price_gwei, .. }
            | Action::Transfer { gas_price_gwei, .. } => *gas_price_gwei,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Buy,
    Sell,
    Approve,
    Transfer,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Buy => "buy",
            ActionKind::Sell => "sell",
            ActionKind::Approve => "approve",
            ActionKind::Transfer => "transfer",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Ledger results
// ---------------------------------------------------------------------------

/// Result of a simulate-only call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simulation {
    pub viable: bool,
    pub diagnostic: Option<String>,
}

impl Simulation {
    pub fn viable() -> Self {
        Self {
            viable: true,
            diagnostic: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            viable: false,
            diagnostic: Some(reason.into()),
        }
    }
}

/// One evaluation of "would this action currently succeed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub iteration: u64,
    pub passed: bool,
    pub diagnostic: Option<String>,
}

impl Probe {
    pub fn from_simulation(iteration: u64, sim: Simulation) -> Self {
        Self {
            iteration,
            passed: sim.viable,
            diagnostic: sim.diagnostic,
        }
    }

    /// Progress is reported on the first attempt and every 100th after.
    pub fn should_report(&self) -> bool {
        self.iteration == 1 || self.iteration % 100 == 0
    }
}

/// Handle for a submitted but not yet confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx {
    pub hash: String,
    pub from: Address,
    pub nonce: u64,
    pub kind: ActionKind,
}

/// Confirmation that a transaction was included and succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub confirmed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Settlement outcomes
// ---------------------------------------------------------------------------

/// Why a real action failed for one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Transport failure talking to the ledger.
    Network(String),
    /// Ledger refused the submission (bad nonce, insufficient gas...).
    Rejected(String),
    /// Included but reverted.
    Reverted(String),
    /// Submitted but no receipt within the confirmation window.
    Unconfirmed(String),
    /// Nothing to act on (zero balance on the sell leg).
    EmptyPosition,
}

impl From<LedgerError> for FailureKind {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Network(msg) | LedgerError::Decode(msg) => FailureKind::Network(msg),
            LedgerError::Rejected(msg) => FailureKind::Rejected(msg),
            LedgerError::TransactionFailure { hash, reason } => {
                FailureKind::Reverted(format!("{hash}: {reason}"))
            }
            LedgerError::ConfirmationTimeout { hash } => FailureKind::Unconfirmed(hash),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Network(m) => write!(f, "network: {m}"),
            FailureKind::Rejected(m) => write!(f, "rejected: {m}"),
            FailureKind::Reverted(m) => write!(f, "reverted: {m}"),
            FailureKind::Unconfirmed(h) => write!(f, "unconfirmed: {h}"),
            FailureKind::EmptyPosition => write!(f, "empty position"),
        }
    }
}

/// Per-actor result of one settlement stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementOutcome {
    Succeeded(Receipt),
    Failed(FailureKind),
}

impl SettlementOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SettlementOutcome::Succeeded(_))
    }
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// Convert a human amount to integer base units (`parseUnits`).
///
/// Digits beyond `decimals` are truncated. Returns `None` for negative
/// amounts or results that overflow 256 bits.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Option<U256> {
    if amount.is_sign_negative() {
        return None;
    }
    let truncated = amount.trunc_with_scale(decimals.min(28));
    if truncated.is_zero() {
        return Some(U256::ZERO);
    }
    let mantissa = U256::from(u128::try_from(truncated.mantissa()).ok()?);
    let scale = truncated.scale();
    if scale > decimals {
        return None;
    }
    let factor = U256::from(10u8).checked_pow(U256::from(decimals - scale))?;
    mantissa.checked_mul(factor)
}

/// Convert base units back to a human amount.
///
/// `None` when the value does not fit a `Decimal`: more than 96 bits of
/// mantissa or more than 28 decimals.
pub fn from_base_units(units: U256, decimals: u32) -> Option<Decimal> {
    if decimals > 28 {
        return None;
    }
    let mantissa = i128::try_from(u128::try_from(units).ok()?).ok()?;
    Decimal::try_from_i128_with_scale(mantissa, decimals).ok()
}

/// Human amount for log lines, falling back to raw base units.
pub fn format_units(units: U256, decimals: u32) -> String {
    match from_base_units(units, decimals) {
        Some(amount) => amount.to_string(),
        None => format!("{units} base units"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
