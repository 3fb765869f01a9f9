//! Actor enumeration.
//!
//! Actors are the configured wallet addresses, main wallet first; signing
//! stays with the node. Paper runs without configured addresses get
//! deterministic placeholder addresses.

use tracing::info;

use crate::config::AppConfig;
use crate::error::RunError;
use crate::types::{Actor, Address};

/// First address used for derived paper wallets.
const PAPER_ADDRESS_BASE: u64 = 0x1000;

/// The first `count` actors for this run.
pub fn enumerate(app: &AppConfig, count: usize, paper: bool) -> Result<Vec<Actor>, RunError> {
    if count == 0 {
        return Err(RunError::Configuration("no actors requested".into()));
    }

    let configured = &app.wallets.addresses;
    let actors: Vec<Actor> = if configured.is_empty() && paper {
        (0..count)
            .map(|i| Actor::new(i, Address::from_index(PAPER_ADDRESS_BASE + i as u64)))
            .collect()
    } else if configured.len() < count {
        return Err(RunError::Configuration(format!(
            "{count} wallets requested but only {} configured",
            configured.len()
        )));
    } else {
        configured
            .iter()
            .take(count)
            .enumerate()
            .map(|(i, address)| Actor::new(i, address.clone()))
            .collect()
    };

    info!(
        actors = actors.len(),
        main = %actors[0].address,
        derived = configured.is_empty(),
        "Actors enumerated"
    );
    Ok(actors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ExecutionConfig, NetworkConfig, PaperConfig, PollingConfig, WalletsConfig,
    };

    fn app(addresses: Vec<Address>) -> AppConfig {
        AppConfig {
            network: NetworkConfig {
                rpc_url_env: "CONVOY_RPC_URL".into(),
                router: Address::from_index(0xbeef),
                chain_id: 56,
                confirmation_timeout_secs: 120,
                receipt_poll_ms: 1_000,
                explorer_url: None,
            },
            tokens: Default::default(),
            wallets: WalletsConfig { addresses },
            polling: PollingConfig::default(),
            execution: ExecutionConfig::default(),
            paper: PaperConfig::default(),
        }
    }

    #[test]
    fn test_configured_addresses_in_order() {
        let cfg = app((1..=4).map(Address::from_index).collect());
        let actors = enumerate(&cfg, 3, false).unwrap();
        assert_eq!(actors.len(), 3);
        assert_eq!(actors[0].address, Address::from_index(1));
        assert_eq!(actors[2].index, 2);
    }

    #[test]
    fn test_too_few_addresses() {
        let cfg = app(vec![Address::from_index(1)]);
        assert!(matches!(
            enumerate(&cfg, 2, false),
            Err(RunError::Configuration(_))
        ));
        assert!(enumerate(&cfg, 2, true).is_err());
    }

    #[test]
    fn test_paper_derives_addresses() {
        let cfg = app(vec![]);
        let actors = enumerate(&cfg, 3, true).unwrap();
        assert_eq!(actors[1].address, Address::from_index(PAPER_ADDRESS_BASE + 1));
        assert!(enumerate(&cfg, 3, false).is_err());
    }
}
