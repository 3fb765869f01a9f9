use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::LedgerClient;
use crate::error::LedgerError;
use crate::types::{Actor, Address};

/// Per-actor sequence numbers for concurrently dispatched actions.
///
/// The first allocation for an actor reads the ledger's pending count;
/// later allocations increment a local cache, so two actions dispatched
/// together from the same actor never share a nonce. The map lock is
/// never held across a ledger call: seeding one actor does not stall
/// allocations for the others.
#[derive(Clone)]
pub struct NonceManager {
    ledger: Arc<dyn LedgerClient>,
    local: Arc<Mutex<HashMap<Address, u64>>>,
}

impl NonceManager {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            local: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn next(&self, actor: &Actor) -> Result<u64, LedgerError> {
        self.allocate(actor, 1).await
    }

    /// Allocate `count` consecutive nonces.
    pub async fn reserve(&self, actor: &Actor, count: u64) -> Result<Vec<u64>, LedgerError> {
        let start = self.allocate(actor, count).await?;
        Ok((start..start + count).collect())
    }

    /// Hand out `count` nonces and return the first.
    async fn allocate(&self, actor: &Actor, count: u64) -> Result<u64, LedgerError> {
        if let Some(start) = Self::advance(&mut *self.local.lock().await, &actor.address, count) {
            return Ok(start);
        }

        let on_chain = self.ledger.transaction_count(actor).await?;
        let mut guard = self.local.lock().await;
        // A concurrent seeder may have won; its cached value takes precedence.
        let seeded = !guard.contains_key(&actor.address);
        let next = guard.entry(actor.address.clone()).or_insert(on_chain);
        let start = *next;
        *next += count;
        if seeded {
            debug!(actor = %actor, nonce = on_chain, "Nonce seeded from ledger");
        }
        Ok(start)
    }

    fn advance(cache: &mut HashMap<Address, u64>, address: &Address, count: u64) -> Option<u64> {
        let next = cache.get_mut(address)?;
        let start = *next;
        *next += count;
        Some(start)
    }

    /// Drop the cached value so the next allocation re-reads the ledger.
    /// Called after any failed submission, since the ledger may or may not
    /// have consumed the nonce.
    pub async fn resync(&self, actor: &Actor) {
        if self.local.lock().await.remove(&actor.address).is_some() {
            info!(actor = %actor, "Nonce cache cleared, will resync from ledger");
        }
    }
}
