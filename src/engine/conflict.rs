use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{check_pooled, check_serialized};
use super::EngineError;

pub(crate) fn validate_span(start: NaiveDate, end: NaiveDate) -> Result<Span, EngineError> {
    let span = Span::checked(start, end).ok_or(EngineError::InvalidInterval)?;
    if span.days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("interval too wide"));
    }
    Ok(span)
}

/// Where an identity resolves to: the item, and a serial when one was named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolved {
    pub item_code: String,
    pub serial_no: Option<String>,
}

/// Availability of `requested` units of a resolved identity against the item's
/// current reservations.
pub(crate) fn evaluate(
    state: &ItemState,
    serial: Option<&str>,
    query: &Span,
    requested: u32,
    policy: BoundaryPolicy,
) -> AvailabilityResult {
    match &state.item.tracking {
        Tracking::Pooled { stock } => check_pooled(state, *stock, query, requested, policy),
        Tracking::Serialized { units } => {
            check_serialized(state, units, query, requested, policy, serial)
        }
    }
}

/// Reject a blocking reservation that would overbook. `exclude` skips the
/// reservation being rescheduled.
pub(crate) fn check_no_conflict(
    state: &ItemState,
    serial: Option<&str>,
    span: &Span,
    qty: u32,
    policy: BoundaryPolicy,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let result = match exclude {
        Some(id) => {
            let mut without = state.clone();
            without.remove_reservation(id);
            evaluate(&without, serial, span, qty, policy)
        }
        None => evaluate(state, serial, span, qty, policy),
    };
    if result.available {
        return Ok(());
    }

    match &state.item.tracking {
        Tracking::Serialized { .. } => {
            let others: Vec<&Reservation> = state
                .blocking(span, policy)
                .filter(|r| exclude != Some(r.id))
                .collect();
            let holder = others
                .iter()
                .find(|r| serial.is_some() && r.serial_no.as_deref() == serial)
                .or_else(|| others.iter().find(|r| r.serial_no.is_none()))
                .or_else(|| others.first())
                .map(|r| r.source.reference.clone())
                .unwrap_or_else(|| state.item.code.clone());
            Err(EngineError::Conflict(holder))
        }
        Tracking::Pooled { .. } => Err(EngineError::CapacityExceeded {
            item: state.item.code.clone(),
            requested: qty,
            free: result.free_units.unwrap_or(0),
        }),
    }
}
