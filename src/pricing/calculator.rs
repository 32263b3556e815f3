use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::engine::EngineError;
use crate::model::*;

use super::rates::{price_for, TierLengths};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Decimal places of a currency's minor unit (ISO 4217).
pub fn currency_minor_units(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" => 0,
        "BHD" | "KWD" | "OMR" | "JOD" | "TND" | "LYD" | "IQD" => 3,
        _ => 2,
    }
}

/// Round to the currency's minor unit, halves away from zero.
pub fn round_money(amount: Decimal, currency: &str) -> Decimal {
    amount.round_dp_with_strategy(
        currency_minor_units(currency),
        RoundingStrategy::MidpointAwayFromZero,
    )
}

/// Surcharges and discounts that `adjustments` produce on `base`.
///
/// All surcharges are added first; percent discounts then apply to the
/// surcharged amount. The discount total never exceeds that amount.
pub fn apply_adjustments(base: Decimal, adjustments: &[Adjustment]) -> (Decimal, Decimal) {
    let amount_of = |adj: &Adjustment, on: Decimal| match adj.amount {
        AdjustmentAmount::Flat(v) => v,
        AdjustmentAmount::Percent(p) => on * p / HUNDRED,
    };

    let surcharges: Decimal = adjustments
        .iter()
        .filter(|a| a.kind == AdjustmentKind::Surcharge)
        .map(|a| amount_of(a, base).max(Decimal::ZERO))
        .sum();
    let surcharged = base + surcharges;
    let discounts: Decimal = adjustments
        .iter()
        .filter(|a| a.kind == AdjustmentKind::Discount)
        .map(|a| amount_of(a, surcharged).max(Decimal::ZERO))
        .sum();
    (surcharges, discounts.min(surcharged.max(Decimal::ZERO)))
}

/// Price one quote line: the unit price for the rental duration times `qty`,
/// then the item's own surcharges and discounts. Only the line total is
/// rounded.
pub fn compute_line(
    item: &Item,
    identity: &str,
    qty: u32,
    start: NaiveDate,
    end: NaiveDate,
    currency: &str,
    tiers: &TierLengths,
) -> Result<QuoteLine, EngineError> {
    let span = Span::checked(start, end).ok_or(EngineError::InvalidInterval)?;
    let rental_days = span.days();
    let breakdown = price_for(item, rental_days, tiers)?;

    let base_amount = breakdown.total * Decimal::from(qty);
    let (surcharges, discounts) = apply_adjustments(base_amount, &item.adjustments);
    let line_total = round_money(base_amount + surcharges - discounts, currency);

    Ok(QuoteLine {
        identity: identity.to_string(),
        qty,
        rental_days,
        breakdown: Some(breakdown),
        base_amount,
        surcharges,
        discounts,
        line_total,
        error: None,
    })
}
