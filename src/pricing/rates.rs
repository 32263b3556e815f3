use rust_decimal::Decimal;

use crate::engine::EngineError;
use crate::model::{Item, RateBreakdown, Rates};

/// Block lengths for the monthly and weekly tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLengths {
    pub month_days: u32,
    pub week_days: u32,
}

impl Default for TierLengths {
    fn default() -> Self {
        Self {
            month_days: 30,
            week_days: 7,
        }
    }
}

impl TierLengths {
    /// `None` unless `0 < week_days < month_days`.
    pub fn new(month_days: u32, week_days: u32) -> Option<Self> {
        (week_days > 0 && month_days > week_days).then_some(Self {
            month_days,
            week_days,
        })
    }
}

/// Unit price of `item` for `days`, or `PricingUnavailable` when the item has
/// no rate tier at all.
pub fn price_for(
    item: &Item,
    days: u32,
    tiers: &TierLengths,
) -> Result<RateBreakdown, EngineError> {
    cheapest(&item.rates, days, tiers)
        .ok_or_else(|| EngineError::PricingUnavailable(item.code.clone()))
}

/// Cheapest month/week/day composition covering `days`.
///
/// Every month count and, for each, every week count up to full coverage is
/// tried; whatever is left is priced per day. A missing tier is never used,
/// so without a daily rate only compositions that cover the whole duration
/// with months and weeks qualify. Covering more days than rented is allowed
/// when it is cheaper. Ties keep the composition with fewer months, then
/// fewer weeks.
pub fn cheapest(rates: &Rates, days: u32, tiers: &TierLengths) -> Option<RateBreakdown> {
    if rates.is_empty() {
        return None;
    }
    let max_months = match rates.monthly {
        Some(_) => days.div_ceil(tiers.month_days),
        None => 0,
    };

    let mut best: Option<RateBreakdown> = None;
    for months in 0..=max_months {
        let after_months = days.saturating_sub(months * tiers.month_days);
        let max_weeks = match rates.weekly {
            Some(_) => after_months.div_ceil(tiers.week_days),
            None => 0,
        };
        for weeks in 0..=max_weeks {
            let left = after_months.saturating_sub(weeks * tiers.week_days);
            let Some(candidate) = compose(rates, months, weeks, left) else {
                continue;
            };
            if best.as_ref().is_none_or(|b| candidate.total < b.total) {
                best = Some(candidate);
            }
            if left == 0 {
                break;
            }
        }
    }
    best
}

fn compose(rates: &Rates, months: u32, weeks: u32, days: u32) -> Option<RateBreakdown> {
    let tier = |count: u32, rate: Option<Decimal>| -> Option<Decimal> {
        match (count, rate) {
            (0, _) => Some(Decimal::ZERO),
            (n, Some(rate)) => Some(rate * Decimal::from(n)),
            (_, None) => None,
        }
    };
    let months_amount = tier(months, rates.monthly)?;
    let weeks_amount = tier(weeks, rates.weekly)?;
    let days_amount = tier(days, rates.daily)?;
    Some(RateBreakdown {
        months,
        weeks,
        days,
        months_amount,
        weeks_amount,
        days_amount,
        total: months_amount + weeks_amount + days_amount,
    })
}
