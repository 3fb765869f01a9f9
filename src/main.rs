//! CONVOY: multi-wallet buy-then-sell trade runner.
//!
//! Entry point. Loads configuration, initialises structured logging and
//! dispatches the CLI subcommand: a full playbook run, a standalone
//! approval, or moving funds between the main wallet and its sub-wallets.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use convoy::actors;
use convoy::config::{AppConfig, RunConfig, RunFile};
use convoy::discovery::{DiscoveryFeed, MessageFeed, StaticDiscovery};
use convoy::engine::approval::ApprovalGate;
use convoy::engine::orchestrator::Orchestrator;
use convoy::engine::report::RunReport;
use convoy::engine::settlement::SettlementExecutor;
use convoy::engine::treasury::{Treasury, TreasuryReport};
use convoy::engine::trigger::{LineConsole, ManualTriggerGate};
use convoy::ledger::nonce::NonceManager;
use convoy::ledger::paper::PaperLedger;
use convoy::ledger::rpc::RpcLedger;
use convoy::ledger::LedgerClient;
use convoy::types::{to_base_units, Actor, AssetId};

const BANNER: &str = r#"
  ____ ___  _   ___     _____   __
 / ___/ _ \| \ | \ \   / / _ \ \ / /
| |  | | | |  \| |\ \ / / | | \ V /
| |__| |_| | |\  | \ V /| |_| || |
 \____\___/|_| \_|  \_/  \___/ |_|

  Multi-wallet playbook runner
  v0.1.0
"#;

const NATIVE_DECIMALS: u32 = 18;

#[derive(Parser, Debug)]
#[command(name = "convoy")]
#[command(version = "0.1.0")]
#[command(about = "Buy-then-sell playbooks across a fleet of wallets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    /// Trade against the in-memory paper ledger instead of the node
    #[arg(long, global = true)]
    paper: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a playbook: race routes, buy, approve, wait for profit, sell
    Run {
        /// Playbook file (JSON or TOML)
        #[arg(short, long)]
        file: String,
        /// Announcement feed to discover the target from (`-` for stdin),
        /// used when the playbook has no contract
        #[arg(long)]
        feed: Option<String>,
        /// Write the run report as JSON to this path
        #[arg(long)]
        report: Option<String>,
    },

    /// Approve the router to spend a catalog token for every wallet
    Approve {
        /// Playbook file; provides the wallet count and gas price
        #[arg(short, long)]
        file: String,
        /// Catalog token symbol
        #[arg(short, long)]
        token: String,
    },

    /// Send an amount from the main wallet to each sub-wallet
    Fund {
        /// Amount per sub-wallet, human units
        #[arg(short, long)]
        amount: Decimal,
        /// Catalog token symbol; native coin when omitted
        #[arg(short, long)]
        token: Option<String>,
        /// Number of sub-wallets
        #[arg(short, long)]
        wallets: usize,
        #[arg(long, default_value = "5")]
        gas_price_gwei: u64,
    },

    /// Return sub-wallet balances to the main wallet
    Sweep {
        /// Catalog token symbol; native coin when omitted
        #[arg(short, long)]
        token: Option<String>,
        /// Number of sub-wallets
        #[arg(short, long)]
        wallets: usize,
        #[arg(long, default_value = "5")]
        gas_price_gwei: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    init_logging();

    let cfg = AppConfig::load(&cli.config)?;

    println!("{BANNER}");
    info!(
        config = %cli.config,
        chain_id = cfg.network.chain_id,
        paper = cli.paper,
        tokens = cfg.tokens.len(),
        "CONVOY starting up"
    );

    match cli.command {
        Commands::Run { file, feed, report } => {
            run_playbook(&cfg, cli.paper, &file, feed.as_deref(), report.as_deref()).await
        }
        Commands::Approve { file, token } => approve(&cfg, cli.paper, &file, &token).await,
        Commands::Fund {
            amount,
            token,
            wallets,
            gas_price_gwei,
        } => fund(&cfg, cli.paper, amount, token.as_deref(), wallets, gas_price_gwei).await,
        Commands::Sweep {
            token,
            wallets,
            gas_price_gwei,
        } => sweep(&cfg, cli.paper, token.as_deref(), wallets, gas_price_gwei).await,
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn run_playbook(
    cfg: &AppConfig,
    paper: bool,
    path: &str,
    feed: Option<&str>,
    report_path: Option<&str>,
) -> Result<()> {
    let file = RunFile::load(path)?;
    let run = RunConfig::build(cfg, &file)?;
    let actors = actors::enumerate(cfg, run.wallets, paper)?;
    info!(
        playbook = path,
        input = %run.input.symbol,
        pairs = run.pairs.len(),
        wallets = actors.len(),
        "Playbook loaded"
    );

    let symbols: Vec<String> = run.pairs.iter().map(|p| p.symbol.clone()).collect();
    let (mut discovery, console): (Box<dyn DiscoveryFeed>, _) = match (&run.target, feed) {
        (Some(target), _) => (
            Box::new(StaticDiscovery::new(target.clone(), None)),
            LineConsole::stdio(),
        ),
        (None, Some("-")) => {
            // discovery and the sell confirmation share stdin
            let mut messages = MessageFeed::new(BufReader::new(tokio::io::stdin()), symbols);
            let found = messages.next_target().await?;
            let console = LineConsole::new(messages.into_inner(), tokio::io::stdout());
            (
                Box::new(StaticDiscovery::new(found.target, found.route_hint)),
                console,
            )
        }
        (None, Some(feed_path)) => {
            let handle = tokio::fs::File::open(feed_path)
                .await
                .with_context(|| format!("Failed to open feed: {feed_path}"))?;
            (
                Box::new(MessageFeed::new(BufReader::new(handle), symbols)),
                LineConsole::stdio(),
            )
        }
        (None, None) => bail!("playbook {path} has no contract and no --feed was given"),
    };

    let ledger = build_ledger(cfg, paper, run.target.as_ref(), &actors)?;
    let orchestrator = Orchestrator::new(ledger, cfg.polling.clone());
    let mut trigger = ManualTriggerGate::new(console);

    let result = tokio::select! {
        result = orchestrator.run(&run, &actors, discovery.as_mut(), &mut trigger) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Shutdown signal received, abandoning run");
            return Ok(());
        }
    };

    match result {
        Ok(report) => {
            log_transactions(cfg, &report);
            save_report(&report, report_path);
            info!(run_id = %report.run_id, "CONVOY finished cleanly.");
            Ok(())
        }
        Err(e) => {
            if let Some(report) = e.report() {
                log_transactions(cfg, report);
                save_report(report, report_path);
            }
            error!(error = %e, "Run failed");
            Err(e.into())
        }
    }
}

async fn approve(cfg: &AppConfig, paper: bool, path: &str, symbol: &str) -> Result<()> {
    let file = RunFile::load(path)?;
    let run = RunConfig::build(cfg, &file)?;
    let token = cfg
        .token(symbol)
        .ok_or_else(|| anyhow!("unknown token: {symbol}"))?;
    let actors = actors::enumerate(cfg, run.wallets, paper)?;
    let ledger = build_ledger(cfg, paper, run.target.as_ref(), &actors)?;

    let executor = SettlementExecutor::new(ledger.clone(), NonceManager::new(ledger.clone()));
    let gate = ApprovalGate::new(ledger, executor, run.min_allowance, run.gas_price_gwei);
    let report = gate.ensure_all(&actors, &token.address).await;

    let tally = report.stage_report().tally;
    info!(
        token = %token.symbol,
        approved = tally.succeeded,
        failed = tally.failed,
        "Approval complete"
    );
    if tally.failed > 0 {
        bail!("{} of {} wallets failed to approve", tally.failed, tally.attempted);
    }
    Ok(())
}

async fn fund(
    cfg: &AppConfig,
    paper: bool,
    amount: Decimal,
    symbol: Option<&str>,
    wallets: usize,
    gas_price_gwei: u64,
) -> Result<()> {
    let (asset, decimals) = resolve_asset(cfg, symbol)?;
    let units = to_base_units(amount, decimals)
        .ok_or_else(|| anyhow!("amount out of range: {amount}"))?;
    let actors = actors::enumerate(cfg, wallets + 1, paper)?;
    let ledger = build_ledger(cfg, paper, None, &actors)?;

    let treasury = Treasury::new(ledger.clone(), NonceManager::new(ledger), gas_price_gwei);
    let report = treasury
        .distribute(&actors[0], &actors[1..], asset.as_ref(), units)
        .await?;
    finish_treasury("fund", &report)
}

async fn sweep(
    cfg: &AppConfig,
    paper: bool,
    symbol: Option<&str>,
    wallets: usize,
    gas_price_gwei: u64,
) -> Result<()> {
    let (asset, _) = resolve_asset(cfg, symbol)?;
    let actors = actors::enumerate(cfg, wallets + 1, paper)?;
    let ledger = build_ledger(cfg, paper, None, &actors)?;

    let treasury = Treasury::new(ledger.clone(), NonceManager::new(ledger), gas_price_gwei);
    let report = treasury.sweep(&actors[0], &actors[1..], asset.as_ref()).await;
    finish_treasury("sweep", &report)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_ledger(
    cfg: &AppConfig,
    paper: bool,
    target: Option<&AssetId>,
    actors: &[Actor],
) -> Result<Arc<dyn LedgerClient>> {
    if paper {
        info!("Using paper ledger");
        return Ok(Arc::new(PaperLedger::seeded(cfg, target, actors)?));
    }
    let url = cfg.rpc_url()?;
    info!(router = %cfg.network.router, "Using JSON-RPC ledger");
    Ok(Arc::new(RpcLedger::new(url, cfg)?))
}

/// Catalog token address and decimals, or the native coin for `None`.
fn resolve_asset(cfg: &AppConfig, symbol: Option<&str>) -> Result<(Option<AssetId>, u32)> {
    match symbol {
        Some(symbol) => {
            let token = cfg
                .token(symbol)
                .ok_or_else(|| anyhow!("unknown token: {symbol}"))?;
            Ok((Some(token.address), token.decimals))
        }
        None => Ok((None, NATIVE_DECIMALS)),
    }
}

fn finish_treasury(operation: &str, report: &TreasuryReport) -> Result<()> {
    for (actor, outcome) in &report.settled {
        if !outcome.is_success() {
            warn!(operation, actor = %actor, outcome = ?outcome, "Transfer failed");
        }
    }
    info!(
        operation,
        succeeded = report.succeeded(),
        failed = report.failed(),
        skipped = report.skipped.len(),
        "Treasury operation complete"
    );
    if report.failed() > 0 {
        bail!("{operation}: {} transfers failed", report.failed());
    }
    Ok(())
}

/// Log an explorer link for every confirmed transaction.
fn log_transactions(cfg: &AppConfig, report: &RunReport) {
    let Some(explorer) = cfg.network.explorer_url.as_deref() else {
        return;
    };
    let explorer = explorer.trim_end_matches('/');
    for stage in &report.stages {
        for actor in &stage.actors {
            if let Some(hash) = &actor.tx_hash {
                info!(
                    stage = %stage.stage,
                    wallet = actor.wallet + 1,
                    "{explorer}/tx/{hash}"
                );
            }
        }
    }
}

fn save_report(report: &RunReport, path: Option<&str>) {
    let Some(path) = path else {
        return;
    };
    if let Err(e) = report.save(path) {
        error!(error = %e, "Failed to save run report");
    } else {
        info!(path, "Run report written");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("convoy=info"));

    let json_logging = std::env::var("CONVOY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
