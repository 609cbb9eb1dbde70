// =============================================================================
// Contract ABI surface
// =============================================================================
//
// The fixed-point-price prediction-round ABI fragment named in the external-
// interfaces contract: round metadata, wallet ledger entries, the two bet
// calls, and the three events the chain client filters for.
// =============================================================================

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IPredictionRound {
        function currentEpoch() external view returns (uint256);

        function bufferSeconds() external view returns (uint256);

        function rounds(uint256 epoch) external view returns (
            uint256 epoch,
            uint256 startTimestamp,
            uint256 lockTimestamp,
            uint256 closeTimestamp,
            int256 lockPrice,
            int256 closePrice,
            uint256 lockOracleId,
            uint256 closeOracleId,
            uint256 totalAmount,
            uint256 bullAmount,
            uint256 bearAmount,
            uint256 rewardBaseCalAmount,
            uint256 rewardAmount,
            bool oracleCalled
        );

        function ledger(uint256 epoch, address user) external view returns (
            uint8 position,
            uint256 amount,
            bool claimed
        );

        function betBull(uint256 epoch) external payable;

        function betBear(uint256 epoch) external payable;

        event BetBull(address indexed sender, uint256 indexed epoch, uint256 amount);
        event BetBear(address indexed sender, uint256 indexed epoch, uint256 amount);
        event Claim(address indexed sender, uint256 epoch, uint256 amount);
    }
}

/// Price values are fixed-point with 8 decimals on chain.
pub const PRICE_SCALE: u32 = 8;

/// Bet/claim amount values are fixed-point with 18 decimals on chain (native
/// token units).
pub const AMOUNT_SCALE: u32 = 18;
