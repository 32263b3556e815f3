mod calculator;
mod rates;

pub use calculator::{apply_adjustments, compute_line, currency_minor_units, round_money};
pub use rates::{cheapest, price_for, TierLengths};
