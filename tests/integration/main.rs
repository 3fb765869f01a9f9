//! End-to-end orchestration scenarios.
//!
//! Configuration is loaded from TOML/JSON text the same way the binary
//! loads it, then driven against either the scripted `MockLedger` or the
//! paper exchange seeded from the `[paper]` section.

mod mock_ledger;

use std::sync::Arc;
use tokio::io::BufReader;

use convoy::actors;
use convoy::config::{AppConfig, RunConfig, RunFile};
use convoy::discovery::{MessageFeed, StaticDiscovery};
use convoy::engine::orchestrator::Orchestrator;
use convoy::engine::report::{RunReport, Stage, Termination};
use convoy::engine::treasury::Treasury;
use convoy::engine::trigger::{LineConsole, ManualTriggerGate};
use convoy::error::RunError;
use convoy::ledger::nonce::NonceManager;
use convoy::ledger::paper::PaperLedger;
use convoy::types::{ActionKind, Actor, Address, AssetId, FailureKind, SettlementOutcome, U256};

use mock_ledger::MockLedger;

const TARGET: &str = "0x00000000000000000000000000000000000000ff";

const CONFIG: &str = r#"
    [network]
    rpc_url_env = "CONVOY_TEST_RPC_URL"
    router = "0x000000000000000000000000000000000000beef"
    chain_id = 56
    explorer_url = "https://bscscan.com"

    [tokens.WBNB]
    address = "0x00000000000000000000000000000000000000b0"

    [tokens.BUSD]
    address = "0x00000000000000000000000000000000000000b1"

    [tokens.USDT]
    address = "0x00000000000000000000000000000000000000b2"
    decimals = 18

    [polling]
    route_interval_ms = 10
    profit_interval_ms = 10
    retry_interval_ms = 10
    route_max_secs = 5
    profit_max_secs = 5
    retry_max_secs = 5

    [paper]
    native_balance = 1
    balances = [{ token = "WBNB", amount = 10 }]
    pools = [
        { a = "WBNB", b = "BUSD", reserve_a = 1000, reserve_b = 300000 },
        { a = "BUSD", b = "target", reserve_a = 300000, reserve_b = 1000000 },
    ]
"#;

fn app() -> AppConfig {
    toml::from_str(CONFIG).unwrap()
}

fn playbook(wallets: usize, contract: Option<&str>) -> RunFile {
    let contract = contract.map(|c| format!(r#""contract": "{c}","#)).unwrap_or_default();
    let json = format!(
        r#"{{
            "inToken": "WBNB",
            "posiblePairs": ["WBNB", "BUSD", "USDT"],
            {contract}
            "wallets": {wallets},
            "amountToBuy": 1,
            "minAmountOut": 0,
            "enableSellAt": 0.5,
            "gasPrice": 5
        }}"#
    );
    serde_json::from_str(&json).unwrap()
}

fn asset(symbol: &str) -> AssetId {
    app().token(symbol).unwrap().address
}

fn target() -> AssetId {
    Address::parse(TARGET).unwrap()
}

fn setup(wallets: usize) -> (AppConfig, RunConfig, Vec<Actor>) {
    let app = app();
    let run = RunConfig::build(&app, &playbook(wallets, Some(TARGET))).unwrap();
    let actors = actors::enumerate(&app, wallets, true).unwrap();
    (app, run, actors)
}

type TestGate = ManualTriggerGate<LineConsole<BufReader<&'static [u8]>, Vec<u8>>>;

fn trigger(input: &'static [u8]) -> TestGate {
    ManualTriggerGate::new(LineConsole::new(BufReader::new(input), Vec::new()))
}

async fn run_mock(ledger: &MockLedger, wallets: usize) -> (Vec<Actor>, Result<RunReport, RunError>) {
    let (app, run, actors) = setup(wallets);
    let orchestrator = Orchestrator::new(Arc::new(ledger.clone()), app.polling.clone());
    let mut discovery = StaticDiscovery::new(target(), None);
    let mut gate = trigger(b"sell\n");
    let result = orchestrator
        .run(&run, &actors, &mut discovery, &mut gate)
        .await;
    (actors, result)
}

// ---------------------------------------------------------------------------
// Scripted ledger
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_second_route_wins_race_on_fifth_probe() {
    let ledger = MockLedger::new();
    let direct = vec![asset("WBNB"), target()];
    let via_busd = vec![asset("WBNB"), asset("BUSD"), target()];
    let via_usdt = vec![asset("WBNB"), asset("USDT"), target()];
    ledger.viable_from(via_busd.clone(), 5);
    ledger.profitable_from(3);

    let started = tokio::time::Instant::now();
    let (actors, result) = run_mock(&ledger, 2).await;
    let report = result.unwrap();

    assert_eq!(report.route.as_ref().unwrap().path, via_busd);
    assert_eq!(report.route_iteration, Some(5));
    assert_eq!(report.candidates, 3);
    assert_eq!(report.profit_probes, Some(3));
    assert_eq!(report.termination, Some(Termination::Completed));

    // losers stop probing once the race is decided
    assert!(ledger.buy_simulations(&direct) <= 5);
    assert!(ledger.buy_simulations(&via_usdt) <= 5);

    // route race ran at 3 × 10ms per candidate
    assert!(started.elapsed() >= std::time::Duration::from_millis(4 * 30));

    let sellers = ledger.submitters(ActionKind::Sell);
    assert_eq!(sellers.len(), 2);
    for actor in &actors {
        assert!(sellers.contains(&actor.address));
        assert!(ledger.balance(&actor.address, &target()).is_zero());
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_buyer_is_excluded_from_sell() {
    let ledger = MockLedger::new();
    ledger.viable_from(vec![asset("WBNB"), target()], 1);
    ledger.profitable_from(1);
    let (_, run, actors) = setup(2);
    ledger.fail_buys_from(&actors[1].address);

    let (actors, result) = run_mock(&ledger, run.wallets).await;
    let report = result.unwrap();

    let buy = report.stage(Stage::Buy).unwrap();
    assert_eq!(buy.tally.succeeded, 1);
    assert_eq!(buy.tally.failed, 1);
    assert!(!buy.actors[1].succeeded);

    assert_eq!(ledger.allowance_queries(), vec![actors[0].address.clone()]);
    assert_eq!(
        ledger.submitters(ActionKind::Sell),
        vec![actors[0].address.clone()]
    );
    assert_eq!(report.survivors(Stage::Sell), 1);
    assert!(ledger.balance(&actors[1].address, &target()).is_zero());
}

#[tokio::test(start_paused = true)]
async fn test_no_buy_survivors_skips_later_stages() {
    let ledger = MockLedger::new();
    ledger.viable_from(vec![asset("WBNB"), target()], 1);
    ledger.profitable_from(1);
    let (_, _, actors) = setup(3);
    for actor in &actors {
        ledger.fail_buys_from(&actor.address);
    }

    let (_, result) = run_mock(&ledger, 3).await;
    let err = result.unwrap_err();

    assert!(matches!(err, RunError::NoSurvivors { stage: Stage::Buy, .. }));
    let report = err.report().unwrap();
    assert_eq!(report.stage(Stage::Buy).unwrap().tally.failed, 3);
    assert!(report.stage(Stage::Approval).is_none());
    assert!(report.finished_at.is_some());

    assert!(ledger.allowance_queries().is_empty());
    assert_eq!(ledger.sell_simulations(), 0);
    assert!(ledger.submitters(ActionKind::Approve).is_empty());
    assert!(ledger.submitters(ActionKind::Sell).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_viable_route_exhausts_budget() {
    let ledger = MockLedger::new();
    let (_, result) = run_mock(&ledger, 1).await;

    assert!(matches!(
        result,
        Err(RunError::NoViableRoute { candidates: 3 })
    ));
    assert!(ledger.submitters(ActionKind::Buy).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_report_survives_save_and_load() {
    let ledger = MockLedger::new();
    ledger.viable_from(vec![asset("WBNB"), target()], 2);
    ledger.profitable_from(1);
    let (_, result) = run_mock(&ledger, 1).await;
    let report = result.unwrap();

    let path = std::env::temp_dir().join(format!("convoy_report_{}.json", report.run_id));
    let path = path.to_str().unwrap();
    report.save(path).unwrap();
    let loaded = RunReport::load(path).unwrap();
    std::fs::remove_file(path).ok();

    assert_eq!(loaded.run_id, report.run_id);
    assert_eq!(loaded.route, report.route);
    assert_eq!(loaded.stages.len(), 3);
    assert_eq!(loaded.stage(Stage::Buy).unwrap().actors[0].tx_hash.as_ref().map(|h| h.len()), Some(66));
}

// ---------------------------------------------------------------------------
// Paper exchange
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_paper_run_from_announcement_feed() {
    let app = app();
    let run = RunConfig::build(&app, &playbook(3, None)).unwrap();
    let actors = actors::enumerate(&app, run.wallets, true).unwrap();
    let ledger = Arc::new(PaperLedger::seeded(&app, Some(&target()), &actors).unwrap());

    let feed = format!("gm\nstealth launch, CA {TARGET}\n");
    let symbols = run.pairs.iter().map(|p| p.symbol.clone()).collect();
    let mut discovery = MessageFeed::new(BufReader::new(feed.as_bytes()), symbols);
    let mut gate = trigger(b"wait\nsell\n");

    let orchestrator = Orchestrator::new(ledger.clone(), app.polling.clone());
    let report = orchestrator
        .run(&run, &actors, &mut discovery, &mut gate)
        .await
        .unwrap();

    assert_eq!(report.target, Some(target()));
    assert_eq!(
        report.route.as_ref().unwrap().path,
        vec![asset("WBNB"), asset("BUSD"), target()]
    );
    assert_eq!(report.survivors(Stage::Sell), 3);
    for actor in &actors {
        assert!(ledger.balance(&actor.address, &target()).is_zero());
        assert!(!ledger.balance(&actor.address, &asset("WBNB")).is_zero());
    }
}

#[tokio::test]
async fn test_paper_fund_then_sweep() {
    let app = app();
    let actors = actors::enumerate(&app, 4, true).unwrap();
    let ledger = Arc::new(PaperLedger::seeded(&app, Some(&target()), &actors).unwrap());
    let busd = asset("BUSD");
    ledger.credit(&actors[0].address, &busd, U256::from(90));

    let treasury = Treasury::new(ledger.clone(), NonceManager::new(ledger.clone()), 5);
    let funded = treasury
        .distribute(&actors[0], &actors[1..], Some(&busd), U256::from(30))
        .await
        .unwrap();
    assert_eq!(funded.succeeded(), 3);
    assert!(ledger.balance(&actors[0].address, &busd).is_zero());

    let swept = treasury.sweep(&actors[0], &actors[1..], Some(&busd)).await;
    assert_eq!(swept.succeeded(), 3);
    assert_eq!(ledger.balance(&actors[0].address, &busd), U256::from(90));
    for actor in &actors[1..] {
        assert!(ledger.balance(&actor.address, &busd).is_zero());
    }
}

#[tokio::test]
async fn test_fund_beyond_balance_fails_per_wallet() {
    let app = app();
    let actors = actors::enumerate(&app, 3, true).unwrap();
    let ledger = Arc::new(PaperLedger::seeded(&app, Some(&target()), &actors).unwrap());
    let busd = asset("BUSD");
    ledger.credit(&actors[0].address, &busd, U256::from(50));

    let treasury = Treasury::new(ledger.clone(), NonceManager::new(ledger.clone()), 5);
    let report = treasury
        .distribute(&actors[0], &actors[1..], Some(&busd), U256::from(30))
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    let failure = report
        .settled
        .iter()
        .find_map(|(_, outcome)| match outcome {
            SettlementOutcome::Failed(kind) => Some(kind.clone()),
            _ => None,
        })
        .unwrap();
    assert!(matches!(failure, FailureKind::Reverted(_)));
}
