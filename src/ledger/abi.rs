//! Router and ERC-20 call declarations.
//!
//! Calldata is encoded and return data decoded through alloy's `sol!`
//! bindings, so amounts stay full-width `U256` end to end.

use alloy::sol;
use alloy::sol_types::SolCall;

use crate::error::LedgerError;
use crate::types::AssetId;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IUniswapV2Router {
        function swapExactTokensForTokens(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external returns (uint256[] memory amounts);

        /// Sell leg: freshly launched tokens frequently tax transfers.
        function swapExactTokensForTokensSupportingFeeOnTransferTokens(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external;

        function getAmountsOut(uint256 amountIn, address[] calldata path)
            external
            view
            returns (uint256[] memory amounts);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address owner) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

/// A swap path as EVM addresses.
pub fn evm_path(path: &[AssetId]) -> Vec<alloy::primitives::Address> {
    path.iter().map(|asset| asset.evm()).collect()
}

/// Decode the return data of `C`, mapping ABI errors to `LedgerError::Decode`.
pub fn decode_returns<C: SolCall>(data: &[u8]) -> Result<C::Return, LedgerError> {
    C::abi_decode_returns(data).map_err(|e| LedgerError::Decode(format!("{}: {e}", C::SIGNATURE)))
}
