use chrono::NaiveDate;

use crate::model::*;

/// References named in an unavailability reason before eliding the rest.
const MAX_REASON_REFERENCES: usize = 5;

/// A reservation's occupancy on the day timeline: half-open `[from, until)` plus units held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Load {
    pub from: Day,
    pub until: Day,
    pub qty: u32,
}

impl Load {
    pub fn of(reservation: &Reservation, policy: BoundaryPolicy) -> Self {
        let (from, until) = reservation.span.occupancy(policy);
        Self {
            from,
            until,
            qty: reservation.qty,
        }
    }
}

/// Highest simultaneous load inside a window, and the first day it occurs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Peak {
    pub units: u32,
    pub at: Option<Day>,
}

// ── Sweep line ───────────────────────────────────────────────────

/// Sweep-line max overlap: +qty at each start, -qty at each release, releases
/// first on equal days (half-open). Loads are clamped to `window` first.
pub fn max_concurrent_overlap(loads: &[Load], window: (Day, Day)) -> Peak {
    let (w_from, w_until) = window;
    let mut events: Vec<(Day, i64)> = Vec::with_capacity(loads.len() * 2);
    for l in loads {
        let from = l.from.max(w_from);
        let until = l.until.min(w_until);
        if from < until && l.qty > 0 {
            events.push((from, l.qty as i64));
            events.push((until, -(l.qty as i64)));
        }
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut peak = Peak::default();
    let mut count: i64 = 0;
    for (day, delta) in &events {
        count += delta;
        if count > peak.units as i64 {
            peak.units = count as u32;
            peak.at = Some(*day);
        }
    }
    peak
}

/// Units held on each day of `window`, via a difference array.
pub fn daily_load(loads: &[Load], window: (Day, Day)) -> Vec<u32> {
    let (w_from, w_until) = window;
    if w_until <= w_from {
        return Vec::new();
    }
    let len = (w_until - w_from) as usize;
    let mut diff = vec![0i64; len + 1];
    for l in loads {
        let from = l.from.max(w_from);
        let until = l.until.min(w_until);
        if from < until {
            diff[(from - w_from) as usize] += l.qty as i64;
            diff[(until - w_from) as usize] -= l.qty as i64;
        }
    }
    let mut running = 0i64;
    diff[..len]
        .iter()
        .map(|d| {
            running += d;
            running.max(0) as u32
        })
        .collect()
}

// ── Per-item checks ──────────────────────────────────────────────

/// Pooled items: available iff `stock - peak >= requested`.
pub fn check_pooled(
    state: &ItemState,
    stock: u32,
    query: &Span,
    requested: u32,
    policy: BoundaryPolicy,
) -> AvailabilityResult {
    let blocking: Vec<&Reservation> = state.blocking(query, policy).collect();
    let loads: Vec<Load> = blocking.iter().map(|r| Load::of(r, policy)).collect();
    let peak = max_concurrent_overlap(&loads, query.occupancy(policy));
    let free = stock.saturating_sub(peak.units);

    if free >= requested {
        return AvailabilityResult {
            available: true,
            reason: None,
            free_units: Some(free),
        };
    }

    let mut reason = format!(
        "{free} of {stock} units free (peak {} reserved{})",
        peak.units,
        peak.at.and_then(day_to_date).map(|d| format!(" on {d}")).unwrap_or_default(),
    );
    append_references(&mut reason, &blocking);
    AvailabilityResult {
        available: false,
        reason: Some(reason),
        free_units: Some(free),
    }
}

/// Serialized items: available iff at least `requested` serial units have no
/// blocking overlap. Reservations without a serial draw from the remaining
/// free units, so a named serial is only available while one free unit is
/// left after those holds. `only_serial` restricts the check to one unit.
pub fn check_serialized(
    state: &ItemState,
    units: &[String],
    query: &Span,
    requested: u32,
    policy: BoundaryPolicy,
    only_serial: Option<&str>,
) -> AvailabilityResult {
    let blocking: Vec<&Reservation> = state.blocking(query, policy).collect();
    let held_serial = |unit: &str| blocking.iter().any(|r| r.serial_no.as_deref() == Some(unit));

    let free_serials: Vec<&String> = units.iter().filter(|u| !held_serial(u)).collect();
    let unassigned: Vec<&Reservation> = blocking
        .iter()
        .copied()
        .filter(|r| r.serial_no.is_none())
        .collect();
    let loads: Vec<Load> = unassigned.iter().map(|r| Load::of(r, policy)).collect();
    let unassigned_peak = max_concurrent_overlap(&loads, query.occupancy(policy)).units;
    let pool_free = (free_serials.len() as u32).saturating_sub(unassigned_peak);

    let free = match only_serial {
        Some(serial) if free_serials.iter().any(|u| u.as_str() == serial) => pool_free.min(1),
        Some(_) => 0,
        None => pool_free,
    };

    if free >= requested {
        return AvailabilityResult {
            available: true,
            reason: None,
            free_units: Some(free),
        };
    }

    let (mut reason, mut holders): (String, Vec<&Reservation>) = match only_serial {
        Some(serial) if requested > 1 && free == 1 => {
            (format!("{serial} is a single unit; requested {requested}"), Vec::new())
        }
        Some(serial) if held_serial(serial) => (
            format!("{serial} is reserved"),
            blocking
                .iter()
                .copied()
                .filter(|r| r.serial_no.as_deref() == Some(serial))
                .collect(),
        ),
        Some(serial) if units.iter().any(|u| u.as_str() == serial) => (
            format!("{serial} is needed for item-level reservations"),
            Vec::new(),
        ),
        Some(serial) => (format!("{serial} is not a unit of {}", state.item.code), Vec::new()),
        None => (
            format!("{free} of {} serial units free", units.len()),
            blocking
                .iter()
                .copied()
                .filter(|r| r.serial_no.is_some())
                .collect(),
        ),
    };
    holders.extend(unassigned);
    append_references(&mut reason, &holders);
    AvailabilityResult {
        available: false,
        reason: Some(reason),
        free_units: Some(free),
    }
}

fn append_references(reason: &mut String, blocking: &[&Reservation]) {
    let mut refs: Vec<String> = Vec::new();
    for r in blocking {
        let label = match &r.serial_no {
            Some(serial) => format!(
                "{} ({serial} {}..{})",
                r.source.reference, r.span.start, r.span.end
            ),
            None => format!("{} ({}..{})", r.source.reference, r.span.start, r.span.end),
        };
        if !refs.contains(&label) {
            refs.push(label);
        }
    }
    if refs.is_empty() {
        return;
    }
    let extra = refs.len().saturating_sub(MAX_REASON_REFERENCES);
    refs.truncate(MAX_REASON_REFERENCES);
    reason.push_str("; blocked by ");
    reason.push_str(&refs.join(", "));
    if extra > 0 {
        reason.push_str(&format!(" and {extra} more"));
    }
}

pub fn day_to_date(day: Day) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, day).unwrap()
    }

    fn span(a: u32, b: u32) -> Span {
        Span::new(d(a), d(b))
    }

    fn load(a: u32, b: u32, qty: u32) -> Load {
        let (from, until) = span(a, b).occupancy(BoundaryPolicy::Strict);
        Load { from, until, qty }
    }

    fn reserved(span: Span, qty: u32, serial: Option<&str>, reference: &str) -> Reservation {
        Reservation {
            id: Ulid::new(),
            item_code: "X".into(),
            serial_no: serial.map(str::to_string),
            span,
            qty,
            source: SourceRef::job(reference),
            status: ReservationStatus::Reserved,
        }
    }

    fn state_with(item: Item, reservations: Vec<Reservation>) -> ItemState {
        let mut state = ItemState::new(item);
        for r in reservations {
            state.insert_reservation(r);
        }
        state
    }

    // ── max_concurrent_overlap ────────────────────────────

    #[test]
    fn peak_empty() {
        let peak = max_concurrent_overlap(&[], span(1, 10).occupancy(BoundaryPolicy::Strict));
        assert_eq!(peak, Peak::default());
    }

    #[test]
    fn peak_stacked_overlap() {
        let loads = vec![load(1, 5, 3), load(3, 7, 2)];
        let peak = max_concurrent_overlap(&loads, span(1, 10).occupancy(BoundaryPolicy::Strict));
        assert_eq!(peak.units, 5);
        assert_eq!(peak.at.and_then(day_to_date), Some(d(3)));
    }

    #[test]
    fn peak_nested() {
        let loads = vec![load(1, 20, 1), load(5, 15, 1), load(8, 9, 1), load(12, 13, 1)];
        let peak = max_concurrent_overlap(&loads, span(1, 31).occupancy(BoundaryPolicy::Strict));
        assert_eq!(peak.units, 3);
    }

    #[test]
    fn peak_adjacent_strict_vs_turnaround() {
        let a = span(1, 5);
        let b = span(5, 9);
        let strict: Vec<Load> = [a, b]
            .iter()
            .map(|s| {
                let (from, until) = s.occupancy(BoundaryPolicy::Strict);
                Load { from, until, qty: 1 }
            })
            .collect();
        let turnaround: Vec<Load> = [a, b]
            .iter()
            .map(|s| {
                let (from, until) = s.occupancy(BoundaryPolicy::Turnaround);
                Load { from, until, qty: 1 }
            })
            .collect();
        let window = span(1, 10);
        assert_eq!(
            max_concurrent_overlap(&strict, window.occupancy(BoundaryPolicy::Strict)).units,
            2
        );
        assert_eq!(
            max_concurrent_overlap(&turnaround, window.occupancy(BoundaryPolicy::Turnaround)).units,
            1
        );
    }

    #[test]
    fn peak_clamped_to_window() {
        // Overlap of 2 exists only on day 3, outside the window 4..10.
        let loads = vec![load(1, 3, 1), load(3, 8, 1)];
        let peak = max_concurrent_overlap(&loads, span(4, 10).occupancy(BoundaryPolicy::Strict));
        assert_eq!(peak.units, 1);
    }

    // ── daily_load ────────────────────────────────────────

    #[test]
    fn daily_load_counts_each_day() {
        let loads = vec![load(1, 2, 1), load(2, 3, 2)];
        let per_day = daily_load(&loads, span(1, 4).occupancy(BoundaryPolicy::Strict));
        assert_eq!(per_day, vec![1, 3, 2, 0]);
    }

    // ── check_pooled ──────────────────────────────────────

    #[test]
    fn pooled_over_capacity_unavailable() {
        let state = state_with(
            Item::pooled("GEN", 4, Rates::default()),
            vec![
                reserved(span(1, 5), 3, None, "JOB-1"),
                reserved(span(3, 7), 2, None, "JOB-2"),
            ],
        );
        let result = check_pooled(&state, 4, &span(1, 10), 2, BoundaryPolicy::Strict);
        assert!(!result.available);
        assert_eq!(result.free_units, Some(0));
        let reason = result.reason.unwrap();
        assert!(reason.contains("peak 5 reserved"), "{reason}");
        assert!(reason.contains("JOB-1") && reason.contains("JOB-2"), "{reason}");
    }

    #[test]
    fn pooled_partial_pool_available() {
        let state = state_with(
            Item::pooled("GEN", 5, Rates::default()),
            vec![reserved(span(1, 5), 3, None, "JOB-1")],
        );
        let result = check_pooled(&state, 5, &span(4, 6), 2, BoundaryPolicy::Strict);
        assert!(result.available);
        assert_eq!(result.free_units, Some(2));
        let result = check_pooled(&state, 5, &span(4, 6), 3, BoundaryPolicy::Strict);
        assert!(!result.available);
    }

    #[test]
    fn pooled_ignores_non_blocking() {
        let mut cancelled = reserved(span(1, 5), 5, None, "JOB-1");
        cancelled.status = ReservationStatus::Cancelled;
        let state = state_with(Item::pooled("GEN", 5, Rates::default()), vec![cancelled]);
        let result = check_pooled(&state, 5, &span(1, 5), 5, BoundaryPolicy::Strict);
        assert!(result.available);
    }

    // ── check_serialized ──────────────────────────────────

    #[test]
    fn serialized_specific_unit_same_day_touch() {
        let units = vec!["CAM-001".to_string(), "CAM-002".to_string()];
        let state = state_with(
            Item::serialized("CAM", units.clone(), Rates::default()),
            vec![reserved(span(10, 10), 1, Some("CAM-001"), "JOB-7")],
        );
        let result = check_serialized(
            &state,
            &units,
            &span(10, 12),
            1,
            BoundaryPolicy::Strict,
            Some("CAM-001"),
        );
        assert!(!result.available);
        assert!(result.reason.unwrap().contains("JOB-7"));

        // Another serial of the same item is still free.
        let other = check_serialized(
            &state,
            &units,
            &span(10, 12),
            1,
            BoundaryPolicy::Strict,
            Some("CAM-002"),
        );
        assert!(other.available);
    }

    #[test]
    fn serialized_counts_distinct_free_units() {
        let units: Vec<String> = (1..=3).map(|i| format!("CAM-00{i}")).collect();
        let state = state_with(
            Item::serialized("CAM", units.clone(), Rates::default()),
            vec![
                reserved(span(1, 4), 1, Some("CAM-001"), "JOB-1"),
                reserved(span(6, 8), 1, Some("CAM-002"), "JOB-2"),
            ],
        );
        let result = check_serialized(&state, &units, &span(3, 7), 1, BoundaryPolicy::Strict, None);
        assert!(result.available);
        assert_eq!(result.free_units, Some(1));
        let result = check_serialized(&state, &units, &span(3, 7), 2, BoundaryPolicy::Strict, None);
        assert!(!result.available);
    }

    #[test]
    fn serialized_unassigned_reservations_consume_free_units() {
        let units: Vec<String> = (1..=3).map(|i| format!("CAM-00{i}")).collect();
        let state = state_with(
            Item::serialized("CAM", units.clone(), Rates::default()),
            vec![reserved(span(1, 4), 2, None, "JOB-9")],
        );
        let result = check_serialized(&state, &units, &span(2, 3), 2, BoundaryPolicy::Strict, None);
        assert!(!result.available);
        assert_eq!(result.free_units, Some(1));
    }

    #[test]
    fn serialized_named_unit_yields_to_item_level_holds() {
        let units = vec!["CAM-001".to_string(), "CAM-002".to_string()];
        let named = |state: &ItemState, serial: &str| {
            check_serialized(state, &units, &span(2, 4), 1, BoundaryPolicy::Strict, Some(serial))
        };
        let state = state_with(
            Item::serialized("CAM", units.clone(), Rates::default()),
            vec![reserved(span(1, 5), 1, None, "JOB-1")],
        );
        assert!(named(&state, "CAM-001").available);

        let state = state_with(
            Item::serialized("CAM", units.clone(), Rates::default()),
            vec![
                reserved(span(1, 5), 1, None, "JOB-1"),
                reserved(span(3, 3), 1, Some("CAM-002"), "JOB-2"),
            ],
        );
        let result = named(&state, "CAM-001");
        assert!(!result.available);
        assert_eq!(result.free_units, Some(0));
        let reason = result.reason.unwrap();
        assert!(reason.contains("item-level reservations"), "{reason}");
        assert!(reason.contains("JOB-1"), "{reason}");
    }

    #[test]
    fn serialized_single_unit_cannot_satisfy_two() {
        let units = vec!["CAM-001".to_string()];
        let state = state_with(Item::serialized("CAM", units.clone(), Rates::default()), vec![]);
        let result = check_serialized(
            &state,
            &units,
            &span(1, 2),
            2,
            BoundaryPolicy::Strict,
            Some("CAM-001"),
        );
        assert!(!result.available);
        assert!(result.reason.unwrap().contains("single unit"));
    }
}
