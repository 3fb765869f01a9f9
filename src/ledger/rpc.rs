//! JSON-RPC ledger client.
//!
//! Talks to an EVM-compatible node through an alloy `RootProvider`.
//! Transactions are signed by the node (`eth_sendTransaction` from
//! unlocked or remote-signer accounts); this client only assembles
//! calldata, assigns nonces passed in by the caller, and polls for
//! receipts.
//!
//! Simulation is an `eth_call` against the pending block: a revert is a
//! non-viable simulation, not an error.

use alloy::eips::BlockId;
use alloy::network::Ethereum;
use alloy::primitives::{hex, Bytes, TxKind, B256, U64};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::eth::{TransactionInput, TransactionRequest};
use alloy::sol_types::SolCall;
use alloy::transports::http::Http;
use alloy::transports::{RpcError, TransportError};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::abi::{self, IUniswapV2Router, IERC20};
use super::LedgerClient;
use crate::config::{AppConfig, ExecutionConfig};
use crate::error::LedgerError;
use crate::types::{Action, Actor, Address, AssetId, PendingTx, Receipt, Simulation, U256};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const LEDGER_NAME: &str = "rpc";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const NATIVE_TRANSFER_GAS: u64 = 21_000;
const TOKEN_CALL_GAS: u64 = 100_000;
const GWEI: u128 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// The receipt fields the runner reads. Quantities decode from node hex.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    #[serde(default)]
    block_number: Option<U64>,
    #[serde(default)]
    gas_used: Option<U64>,
    #[serde(default)]
    status: Option<U64>,
}

/// Error object returned by the node vs. transport trouble.
fn classify(method: &str, err: TransportError) -> LedgerError {
    match err {
        RpcError::ErrorResp(payload) => LedgerError::Rejected(payload.message.to_string()),
        RpcError::DeserError { err, .. } => LedgerError::Decode(format!("{method}: {err}")),
        other => LedgerError::Network(format!("{method}: {other}")),
    }
}

fn hash_hex(hash: &B256) -> String {
    format!("0x{}", hex::encode(hash))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct RpcLedger {
    provider: RootProvider<Ethereum>,
    router: Address,
    chain_id: u64,
    execution: ExecutionConfig,
    confirmation_timeout: Duration,
    receipt_poll: Duration,
}

impl RpcLedger {
    pub fn new(url: SecretString, app: &AppConfig) -> anyhow::Result<Self> {
        let url: reqwest::Url = url
            .expose_secret()
            .parse()
            .context("RPC URL is not a valid URL")?;
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let client = RpcClient::new(Http::with_client(http, url), false);
        Ok(Self {
            provider: RootProvider::new(client),
            router: app.network.router.clone(),
            chain_id: app.network.chain_id,
            execution: app.execution.clone(),
            confirmation_timeout: Duration::from_secs(app.network.confirmation_timeout_secs),
            receipt_poll: Duration::from_millis(app.network.receipt_poll_ms.max(1)),
        })
    }

    async fn read_contract(&self, to: &Address, data: Vec<u8>) -> Result<Bytes, LedgerError> {
        let tx = TransactionRequest {
            to: Some(TxKind::Call(to.evm())),
            input: TransactionInput::new(data.into()),
            ..Default::default()
        };
        self.provider
            .call(tx)
            .await
            .map_err(|e| classify("eth_call", e))
    }

    fn swap_gas(&self, path: &[AssetId]) -> u64 {
        if path.len() > 2 {
            self.execution.multi_hop_gas_limit
        } else {
            self.execution.direct_gas_limit
        }
    }

    fn deadline(&self) -> U256 {
        let ts = Utc::now().timestamp() + self.execution.swap_deadline_secs;
        U256::from(u64::try_from(ts).unwrap_or(0))
    }

    /// Build the transaction request for an action.
    fn transaction(&self, actor: &Actor, action: &Action, nonce: Option<u64>) -> TransactionRequest {
        let (to, data, value, gas) = match action {
            Action::Buy {
                path,
                amount_in,
                min_out,
                ..
            } => {
                let call = IUniswapV2Router::swapExactTokensForTokensCall {
                    amountIn: *amount_in,
                    amountOutMin: *min_out,
                    path: abi::evm_path(path),
                    to: actor.address.evm(),
                    deadline: self.deadline(),
                };
                (self.router.clone(), Some(call.abi_encode()), None, self.swap_gas(path))
            }
            Action::Sell {
                path,
                amount_in,
                min_out,
                ..
            } => {
                let call =
                    IUniswapV2Router::swapExactTokensForTokensSupportingFeeOnTransferTokensCall {
                        amountIn: *amount_in,
                        amountOutMin: *min_out,
                        path: abi::evm_path(path),
                        to: actor.address.evm(),
                        deadline: self.deadline(),
                    };
                (self.router.clone(), Some(call.abi_encode()), None, self.swap_gas(path))
            }
            Action::Approve { asset, amount, .. } => {
                let call = IERC20::approveCall {
                    spender: self.router.evm(),
                    amount: *amount,
                };
                (asset.clone(), Some(call.abi_encode()), None, TOKEN_CALL_GAS)
            }
            Action::Transfer {
                asset: Some(asset),
                to,
                amount,
                ..
            } => {
                let call = IERC20::transferCall {
                    to: to.evm(),
                    amount: *amount,
                };
                (asset.clone(), Some(call.abi_encode()), None, TOKEN_CALL_GAS)
            }
            Action::Transfer {
                asset: None,
                to,
                amount,
                ..
            } => (to.clone(), None, Some(*amount), NATIVE_TRANSFER_GAS),
        };

        TransactionRequest {
            from: Some(actor.address.evm()),
            to: Some(TxKind::Call(to.evm())),
            gas: Some(gas),
            gas_price: Some(u128::from(action.gas_price_gwei()) * GWEI),
            value,
            nonce,
            chain_id: Some(self.chain_id),
            input: data
                .map(|d| TransactionInput::new(d.into()))
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    fn parse_receipt(raw: RpcReceipt) -> Result<Receipt, LedgerError> {
        let tx_hash = hash_hex(&raw.transaction_hash);
        if raw.status == Some(U64::ZERO) {
            return Err(LedgerError::TransactionFailure {
                hash: tx_hash,
                reason: "reverted (status 0)".into(),
            });
        }
        Ok(Receipt {
            block_number: raw.block_number.map(|n| n.to::<u64>()),
            gas_used: raw.gas_used.map(|n| n.to::<u64>()),
            tx_hash,
            confirmed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn simulate(&self, actor: &Actor, action: &Action) -> Result<Simulation, LedgerError> {
        let tx = self.transaction(actor, action, None);
        match self.provider.call(tx).block(BlockId::pending()).await {
            Ok(_) => Ok(Simulation::viable()),
            Err(RpcError::ErrorResp(payload)) => Ok(Simulation::rejected(payload.message.to_string())),
            Err(e) => Err(LedgerError::Network(format!("eth_call: {e}"))),
        }
    }

    async fn submit(
        &self,
        actor: &Actor,
        action: &Action,
        nonce: u64,
    ) -> Result<PendingTx, LedgerError> {
        let tx = self.transaction(actor, action, Some(nonce));
        let sent = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| classify("eth_sendTransaction", e))?;
        let hash = hash_hex(sent.tx_hash());
        debug!(actor = %actor, nonce, kind = %action.kind(), tx = %hash, "Transaction submitted");
        Ok(PendingTx {
            hash,
            from: actor.address.clone(),
            nonce,
            kind: action.kind(),
        })
    }

    async fn confirm(&self, pending: &PendingTx) -> Result<Receipt, LedgerError> {
        let deadline = Instant::now() + self.confirmation_timeout;
        loop {
            let polled = self
                .provider
                .raw_request::<_, Option<RpcReceipt>>(
                    "eth_getTransactionReceipt".into(),
                    (pending.hash.clone(),),
                )
                .await
                .map_err(|e| classify("eth_getTransactionReceipt", e));
            match polled {
                Ok(Some(raw)) => return Self::parse_receipt(raw),
                Ok(None) => {}
                // Transient transport errors should not abandon a broadcast tx.
                Err(LedgerError::Network(message)) => {
                    warn!(tx = %pending.hash, error = %message, "Receipt poll failed, retrying");
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(LedgerError::ConfirmationTimeout {
                    hash: pending.hash.clone(),
                });
            }
            tokio::time::sleep(self.receipt_poll).await;
        }
    }

    async fn query_allowance(&self, actor: &Actor, asset: &AssetId) -> Result<U256, LedgerError> {
        let call = IERC20::allowanceCall {
            owner: actor.address.evm(),
            spender: self.router.evm(),
        };
        let data = self.read_contract(asset, call.abi_encode()).await?;
        abi::decode_returns::<IERC20::allowanceCall>(&data)
    }

    async fn query_balance(&self, actor: &Actor, asset: &AssetId) -> Result<U256, LedgerError> {
        let call = IERC20::balanceOfCall {
            owner: actor.address.evm(),
        };
        let data = self.read_contract(asset, call.abi_encode()).await?;
        abi::decode_returns::<IERC20::balanceOfCall>(&data)
    }

    async fn query_native_balance(&self, actor: &Actor) -> Result<U256, LedgerError> {
        self.provider
            .get_balance(actor.address.evm())
            .await
            .map_err(|e| classify("eth_getBalance", e))
    }

    async fn transaction_count(&self, actor: &Actor) -> Result<u64, LedgerError> {
        self.provider
            .get_transaction_count(actor.address.evm())
            .pending()
            .await
            .map_err(|e| classify("eth_getTransactionCount", e))
    }

    async fn quote(&self, path: &[AssetId], amount_in: U256) -> Result<U256, LedgerError> {
        let call = IUniswapV2Router::getAmountsOutCall {
            amountIn: amount_in,
            path: abi::evm_path(path),
        };
        let data = self.read_contract(&self.router, call.abi_encode()).await?;
        let amounts = abi::decode_returns::<IUniswapV2Router::getAmountsOutCall>(&data)?;
        amounts
            .last()
            .copied()
            .ok_or_else(|| LedgerError::Decode("empty amounts array".into()))
    }

    fn name(&self) -> &str {
        LEDGER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
