// =============================================================================
// Fixed-point chain value conversion
// =============================================================================
//
// Every numeric value crossing the chain boundary is fixed-point; converting
// through `f64` would lose the precision the totals invariant depends on, so
// everything round-trips through `rust_decimal::Decimal` instead.
// =============================================================================

use alloy::primitives::{I256, U256};
use anyhow::{Context, Result};
use rust_decimal::Decimal;

pub fn u256_to_decimal(value: U256, scale: u32) -> Result<Decimal> {
    anyhow::ensure!(scale <= 28, "scale {scale} exceeds Decimal's maximum");
    let as_u128: u128 = value
        .try_into()
        .context("chain value exceeds u128, cannot represent as Decimal")?;
    Ok(Decimal::from_i128_with_scale(as_u128 as i128, scale))
}

pub fn i256_to_decimal(value: I256, scale: u32) -> Result<Decimal> {
    anyhow::ensure!(scale <= 28, "scale {scale} exceeds Decimal's maximum");
    let as_i128: i128 = value
        .try_into()
        .context("chain value exceeds i128, cannot represent as Decimal")?;
    Ok(Decimal::from_i128_with_scale(as_i128, scale))
}

pub fn decimal_to_u256(value: Decimal, scale: u32) -> Result<U256> {
    anyhow::ensure!(value >= Decimal::ZERO, "cannot convert negative decimal to U256");
    let scaled = value
        .checked_mul(Decimal::from(10u64.pow(scale)))
        .context("decimal scaling overflow")?
        .trunc();
    let as_u128: u128 = scaled.try_into().context("scaled decimal exceeds u128")?;
    Ok(U256::from(as_u128))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_round_trips_through_decimal() {
        let wei = U256::from(1_500_000_000_000_000_000u128);
        let d = u256_to_decimal(wei, 18).unwrap();
        assert_eq!(d, Decimal::new(15, 1));
    }

    #[test]
    fn decimal_to_u256_rejects_negative() {
        assert!(decimal_to_u256(Decimal::new(-1, 0), 18).is_err());
    }
}
