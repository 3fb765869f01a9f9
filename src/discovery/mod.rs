//! Target discovery.
//!
//! A run needs its target asset before the route race starts. It either
//! comes straight from the playbook (`StaticDiscovery`) or is scraped from
//! announcement messages (`MessageFeed`), e.g. a relayed channel log
//! piped in line by line.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::{debug, info};

use crate::error::RunError;
use crate::types::{Address, AssetId};

const ADDRESS_HEX_LEN: usize = 40;

/// A discovered target plus an optional pair symbol to route through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub target: AssetId,
    pub route_hint: Option<String>,
}

#[async_trait]
pub trait DiscoveryFeed: Send {
    /// Wait for the next target. Consumed once per run.
    async fn next_target(&mut self) -> Result<Discovery, RunError>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Static
// ---------------------------------------------------------------------------

/// Target supplied up-front.
pub struct StaticDiscovery {
    discovery: Option<Discovery>,
}

impl StaticDiscovery {
    pub fn new(target: AssetId, route_hint: Option<String>) -> Self {
        Self {
            discovery: Some(Discovery { target, route_hint }),
        }
    }
}

#[async_trait]
impl DiscoveryFeed for StaticDiscovery {
    async fn next_target(&mut self) -> Result<Discovery, RunError> {
        self.discovery
            .take()
            .ok_or_else(|| RunError::Discovery("static target already consumed".into()))
    }

    fn name(&self) -> &str {
        "static"
    }
}

// ---------------------------------------------------------------------------
// Message feed
// ---------------------------------------------------------------------------

/// Reads announcements line by line until one names a contract address.
pub struct MessageFeed<R> {
    lines: Lines<R>,
    symbols: Vec<String>,
}

impl<R: AsyncBufRead + Unpin + Send> MessageFeed<R> {
    /// `symbols` are the catalog pairs a message may suggest routing through.
    pub fn new(reader: R, symbols: Vec<String>) -> Self {
        Self {
            lines: reader.lines(),
            symbols,
        }
    }

    pub fn into_inner(self) -> R {
        self.lines.into_inner()
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> DiscoveryFeed for MessageFeed<R> {
    async fn next_target(&mut self) -> Result<Discovery, RunError> {
        let mut seen = 0u64;
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| RunError::Discovery(e.to_string()))?;
            let Some(line) = line else {
                return Err(RunError::Discovery(format!(
                    "feed closed after {seen} messages"
                )));
            };
            seen += 1;

            if let Some(found) = parse_announcement(&line, &self.symbols) {
                info!(
                    target = %found.target,
                    hint = found.route_hint.as_deref().unwrap_or("-"),
                    messages = seen,
                    "Target discovered"
                );
                return Ok(found);
            }
            debug!(message = seen, "No contract address in message");
        }
    }

    fn name(&self) -> &str {
        "messages"
    }
}

/// Extract the first contract address (`0x` + 40 hex digits, not part of a
/// longer hex run) and the first word naming a known pair symbol.
pub fn parse_announcement(text: &str, symbols: &[String]) -> Option<Discovery> {
    let target = find_address(text)?;
    let route_hint = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .find_map(|word| symbols.iter().find(|s| s.eq_ignore_ascii_case(word)))
        .cloned();
    Some(Discovery { target, route_hint })
}

fn find_address(text: &str) -> Option<Address> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 2 + ADDRESS_HEX_LEN <= bytes.len() {
        let boundary_before = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
        if boundary_before && bytes[i] == b'0' && (bytes[i + 1] == b'x' || bytes[i + 1] == b'X') {
            let start = i + 2;
            let run = bytes[start..]
                .iter()
                .take_while(|b| b.is_ascii_hexdigit())
                .count();
            if run == ADDRESS_HEX_LEN {
                let candidate = &text[i..start + ADDRESS_HEX_LEN];
                if let Ok(address) = Address::parse(candidate) {
                    return Some(address);
                }
            }
            i = start + run.max(1);
            continue;
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn symbols() -> Vec<String> {
        vec!["WBNB".into(), "BUSD".into()]
    }

    const CA: &str = "0xfa57ff4670f9016069e799A51a3186d03991E431";

    #[test]
    fn test_parse_address_and_hint() {
        let msg = format!("🚀 New launch! CA: {CA} pair busd, LP locked");
        let found = parse_announcement(&msg, &symbols()).unwrap();
        assert_eq!(found.target, Address::parse(CA).unwrap());
        assert_eq!(found.route_hint.as_deref(), Some("BUSD"));
    }

    #[test]
    fn test_parse_without_hint() {
        let found = parse_announcement(CA, &symbols()).unwrap();
        assert_eq!(found.route_hint, None);
    }

    #[test]
    fn test_ignores_transaction_hashes() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert!(parse_announcement(&format!("tx {hash}"), &symbols()).is_none());
        let msg = format!("tx {hash} token {CA}");
        assert_eq!(
            parse_announcement(&msg, &symbols()).unwrap().target,
            Address::parse(CA).unwrap()
        );
    }

    #[test]
    fn test_no_address() {
        assert!(parse_announcement("launching soon, stay tuned", &symbols()).is_none());
        assert!(parse_announcement("", &symbols()).is_none());
    }

    #[tokio::test]
    async fn test_message_feed_skips_noise() {
        let input = format!("gm\nlaunch in 5 minutes\n{CA} WBNB\nlater message\n");
        let mut feed = MessageFeed::new(BufReader::new(input.as_bytes()), symbols());
        let found = feed.next_target().await.unwrap();
        assert_eq!(found.route_hint.as_deref(), Some("WBNB"));
    }

    #[tokio::test]
    async fn test_message_feed_closed() {
        let mut feed = MessageFeed::new(BufReader::new(&b"nothing here\n"[..]), symbols());
        assert!(matches!(
            feed.next_target().await,
            Err(RunError::Discovery(_))
        ));
    }

    #[tokio::test]
    async fn test_static_yields_once() {
        let mut feed = StaticDiscovery::new(Address::from_index(7), None);
        assert_eq!(feed.next_target().await.unwrap().target, Address::from_index(7));
        assert!(feed.next_target().await.is_err());
    }
}
