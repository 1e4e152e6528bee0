//! Raw amount to decimal volume conversion and pool prices.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use super::error::{IndexerError, IndexerResult};
use super::utxo::Quantity;

/// Convert a raw integer amount to a decimal volume.
///
/// The exact decimal text is parsed, so the result is the correctly
/// rounded quotient `raw / 10^decimals` for any raw amount.
pub fn to_volume(raw: Quantity, decimals: u32) -> f64 {
    let digits = raw.to_string();
    let places = decimals as usize;
    let text = if places == 0 {
        digits
    } else if digits.len() > places {
        let (whole, frac) = digits.split_at(digits.len() - places);
        format!("{whole}.{frac}")
    } else {
        format!("0.{digits:0>places$}")
    };
    text.parse().unwrap_or(f64::INFINITY)
}

/// Strict floor check: `raw / 10^decimals > floor`, compared exactly.
///
/// The floor is taken as the decimal it was written as (`5.0` is `5`,
/// `0.1` is `1/10`), then both sides are scaled to integers.
pub fn clears_floor(raw: Quantity, decimals: u32, floor: f64) -> bool {
    let Some(floor) = Decimal::from_f64(floor).map(|d| d.normalize()) else {
        return to_volume(raw, decimals) > floor;
    };
    if floor < Decimal::ZERO {
        return true;
    }
    let mantissa = floor.mantissa().unsigned_abs();
    let scale = floor.scale();
    if scale >= decimals {
        // raw * 10^(scale - decimals) > mantissa
        10u128
            .checked_pow(scale - decimals)
            .and_then(|factor| raw.checked_mul(factor))
            .is_none_or(|lhs| lhs > mantissa)
    } else {
        // raw > mantissa * 10^(decimals - scale)
        10u128
            .checked_pow(decimals - scale)
            .and_then(|factor| mantissa.checked_mul(factor))
            .is_some_and(|rhs| raw > rhs)
    }
}

/// Price of a pool computed from both leg amounts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolQuote {
    pub token1_amount: Quantity,
    pub token2_amount: Quantity,
    pub token1_decimals: u32,
    pub token2_decimals: u32,
    pub token1_volume: f64,
    pub token2_volume: f64,
    /// token2 volume / token1 volume.
    pub price: f64,
}

impl PoolQuote {
    /// Quote a pool from raw leg amounts.
    ///
    /// # Errors
    /// A zero amount on either leg is a [`IndexerError::Data`].
    pub fn from_amounts(
        token1_amount: Quantity,
        token1_decimals: u32,
        token2_amount: Quantity,
        token2_decimals: u32,
    ) -> IndexerResult<Self> {
        if token1_amount == 0 || token2_amount == 0 {
            return Err(IndexerError::Data(format!(
                "zero leg amount: token1={token1_amount} token2={token2_amount}"
            )));
        }
        let token1_volume = to_volume(token1_amount, token1_decimals);
        let token2_volume = to_volume(token2_amount, token2_decimals);
        Ok(Self {
            token1_amount,
            token2_amount,
            token1_decimals,
            token2_decimals,
            token1_volume,
            token2_volume,
            price: token2_volume / token1_volume,
        })
    }

    /// Both legs clear the minimum volume floor.
    pub fn clears_floor(&self, floor: f64) -> bool {
        clears_floor(self.token1_amount, self.token1_decimals, floor)
            && clears_floor(self.token2_amount, self.token2_decimals, floor)
    }
}
