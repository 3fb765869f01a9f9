//! Candidate routes for a run.
//!
//! Each candidate pair P yields `[input, P, target]`, or `[input, target]`
//! when P is the input token itself. Labels read like `WBNB -> BUSD -> 0xfa57…e431`.

use crate::config::RunConfig;
use crate::types::{AssetId, Route, Token};

#[derive(Debug, Clone)]
pub struct RouteCatalog {
    input: Token,
    pairs: Vec<Token>,
}

impl RouteCatalog {
    pub fn new(input: Token, pairs: Vec<Token>) -> Self {
        Self { input, pairs }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.input.clone(), config.pairs.clone())
    }

    /// Candidates in playbook order.
    pub fn candidates(&self, target: &AssetId) -> Vec<Route> {
        self.pairs
            .iter()
            .map(|pair| self.route_for(pair, target))
            .collect()
    }

    /// Route through the named pair, if it is one of the candidates.
    pub fn route_via(&self, symbol: &str, target: &AssetId) -> Option<Route> {
        self.pairs
            .iter()
            .find(|p| p.symbol.eq_ignore_ascii_case(symbol))
            .map(|pair| self.route_for(pair, target))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|p| p.symbol.as_str())
    }

    fn route_for(&self, pair: &Token, target: &AssetId) -> Route {
        let target_label = target.short();
        if pair.address == self.input.address {
            Route::new(
                format!("{} -> {target_label}", self.input.symbol),
                vec![self.input.address.clone(), target.clone()],
            )
        } else {
            Route::new(
                format!("{} -> {} -> {target_label}", self.input.symbol, pair.symbol),
                vec![
                    self.input.address.clone(),
                    pair.address.clone(),
                    target.clone(),
                ],
            )
        }
    }
}
