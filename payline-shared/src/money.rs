use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places kept on every stored amount
pub const MONEY_DECIMALS: u32 = 2;

/// Round an amount to cents, half away from zero.
///
/// The result always carries a scale of two so that `25` and `25.00`
/// serialize the same way.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_DECIMALS, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_DECIMALS);
    rounded
}

/// Convert an amount to integer minor units (cents) for gateways that expect them
pub fn to_minor_units(value: Decimal) -> Option<i64> {
    (round_money(value) * Decimal::ONE_HUNDRED).to_i64()
}
