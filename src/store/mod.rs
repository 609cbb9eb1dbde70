pub mod gateway;
pub mod rows;

pub use gateway::{EpochSyncCounts, EpochSyncInput, MultiClaim, ParsedBet, ParsedClaim, StoreGateway};
pub use rows::EpochBoundaries;
