pub mod client;
pub mod contract;
pub mod convert;

pub use client::{BetEvent, ChainClient, ClaimEvent, LedgerEntry, RoundData, TaggedBetEvent};
