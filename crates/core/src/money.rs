//! Exact decimal helpers for every cost, price, discount and margin figure.
//!
//! Amounts stay unrounded through intermediate steps; [`round_currency`] is only
//! applied where a figure is stored on a row or shown to a user.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places money is stored and displayed with.
pub const CURRENCY_SCALE: u32 = 2;

pub fn round_currency(amount: Decimal) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(CURRENCY_SCALE);
    rounded
}

/// Exact `quantity × unit` product.
///
/// # Panics
///
/// Panics on decimal overflow. A money figure that cannot be represented is a
/// bug upstream and must not be silently truncated.
pub fn line_amount(quantity: Decimal, unit: Decimal) -> Decimal {
    quantity * unit
}

/// `numerator / denominator`, or `None` when the ratio is undefined.
pub fn ratio(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    if denominator.is_zero() {
        return None;
    }
    numerator.checked_div(denominator)
}

/// Rate on the ×10 "折" scale, e.g. `0.85` -> `8.5`.
pub fn as_fold(rate: Decimal) -> Decimal {
    (rate * Decimal::TEN).round_dp(2).normalize()
}

/// Rate on the ×100 scale, e.g. `0.153` -> `15.3`.
pub fn as_percent(rate: Decimal) -> Decimal {
    (rate * Decimal::ONE_HUNDRED).round_dp(2).normalize()
}

/// `value` and the `bound` it fell below on the same display scale. The value
/// rounds down and the bound rounds up, so the shortfall never prints as a tie.
pub fn shortfall_pair(value: Decimal, bound: Decimal, scale: Decimal) -> (Decimal, Decimal) {
    let shown = |amount: Decimal, strategy: RoundingStrategy| {
        (amount * scale).round_dp_with_strategy(2, strategy).normalize()
    };
    (
        shown(value, RoundingStrategy::ToNegativeInfinity),
        shown(bound, RoundingStrategy::ToPositiveInfinity),
    )
}
