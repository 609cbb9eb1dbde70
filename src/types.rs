// =============================================================================
// Shared types used across the epoch-sentinel ingestion/reconciliation/
// prediction/trading pipeline
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bet direction / round result. Rounds resolve `Up` iff `close_price > lock_price`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Up,
    Down,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            Self::Up => 1.0,
            Self::Down => -1.0,
        }
    }

    /// `Up` for positive/zero, `Down` for negative.
    pub fn of_sign(x: f64) -> Self {
        if x >= 0.0 {
            Self::Up
        } else {
            Self::Down
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            other => anyhow::bail!("invalid side: {other}"),
        }
    }
}

/// Confidence tier of a live prediction. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl FromStr for Confidence {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => anyhow::bail!("invalid confidence: {other}"),
        }
    }
}

/// Side filter for the trader — `Any` accepts both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideFilter {
    Up,
    Down,
    Any,
}

impl SideFilter {
    pub fn accepts(self, side: Side) -> bool {
        match self {
            Self::Any => true,
            Self::Up => side == Side::Up,
            Self::Down => side == Side::Down,
        }
    }
}

impl FromStr for SideFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            "ANY" => Ok(Self::Any),
            other => anyhow::bail!("invalid side filter: {other}"),
        }
    }
}

/// Lower-cased, hex-validated wallet address. Construction is the only place
/// the `wallet_address = lower(wallet_address)` invariant needs enforcing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
        anyhow::ensure!(
            trimmed.len() == 40 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()),
            "not a 40-hex address: {raw}"
        );
        Ok(Self(format!("0x{}", trimmed.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lower-cased, hex-validated transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(String);

impl TxHash {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
        anyhow::ensure!(
            trimmed.len() == 64 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()),
            "not a 32-byte tx hash: {raw}"
        );
        Ok(Self(format!("0x{}", trimmed.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TxHash {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TxHash> for String {
    fn from(value: TxHash) -> Self {
        value.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round lifecycle status broadcast on `round_update_channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    Live,
    Locked,
    Ended,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "LIVE"),
            Self::Locked => write!(f, "LOCKED"),
            Self::Ended => write!(f, "ENDED"),
        }
    }
}

/// A single wallet bet, chain-observed or store-persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub epoch: i64,
    pub bet_time: chrono::DateTime<chrono::Utc>,
    pub wallet_address: WalletAddress,
    pub direction: Side,
    pub amount: rust_decimal::Decimal,
    pub block_number: i64,
    pub tx_hash: TxHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_address_lowercases() {
        let a = WalletAddress::parse("0xABCDEF0123456789ABCDEF0123456789ABCDEF01").unwrap();
        assert_eq!(a.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn wallet_address_rejects_bad_length() {
        assert!(WalletAddress::parse("0xabc").is_err());
    }

    #[test]
    fn side_round_trips_through_display_and_fromstr() {
        assert_eq!("UP".parse::<Side>().unwrap(), Side::Up);
        assert_eq!(Side::Down.to_string(), "DOWN");
    }

    #[test]
    fn side_filter_any_accepts_both() {
        assert!(SideFilter::Any.accepts(Side::Up));
        assert!(SideFilter::Any.accepts(Side::Down));
        assert!(SideFilter::Up.accepts(Side::Up));
        assert!(!SideFilter::Up.accepts(Side::Down));
    }
}
