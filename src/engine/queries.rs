use std::collections::BTreeMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{daily_load, max_concurrent_overlap, Load, Peak};
use super::conflict::{evaluate, validate_span};
use super::{Engine, EngineError};

/// Filter for the reservation calendar feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub item_code: Option<String>,
    pub group: Option<String>,
    pub source_kind: Option<SourceKind>,
    /// Also return draft, completed and cancelled reservations.
    pub include_non_blocking: bool,
}

/// Availability per identity plus the items they resolved to, keyed by the
/// requested identity. Unknown identities have a result but no item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckedBatch {
    pub results: BTreeMap<String, AvailabilityResult>,
    pub items: BTreeMap<String, Item>,
}

/// One catalog item annotated with its availability for a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub item: Item,
    pub availability: AvailabilityResult,
}

impl Engine {
    /// Blocking reservations for an item code (all units) or a single serial
    /// that overlap `[start, end]` under the configured boundary policy.
    pub async fn overlaps(
        &self,
        identity: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        let query = validate_span(start, end)?;
        let resolved = self
            .resolve(identity)
            .ok_or_else(|| EngineError::UnknownItem(identity.to_string()))?;
        let state = self
            .get_item_state(&resolved.item_code)
            .ok_or_else(|| EngineError::UnknownItem(identity.to_string()))?;
        let guard = state.read().await;
        Ok(guard
            .blocking(&query, self.policy())
            .filter(|r| resolved.serial_no.is_none() || r.serial_no == resolved.serial_no)
            .cloned()
            .collect())
    }

    /// Peak number of units held at once within `[start, end]`.
    pub async fn max_concurrent_overlap(
        &self,
        identity: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Peak, EngineError> {
        let query = validate_span(start, end)?;
        let overlapping = self.overlaps(identity, start, end).await?;
        let loads: Vec<Load> = overlapping
            .iter()
            .map(|r| Load::of(r, self.policy()))
            .collect();
        Ok(max_concurrent_overlap(&loads, query.occupancy(self.policy())))
    }

    /// Batch availability for `identity → requested qty`, evaluated against
    /// one consistent snapshot. Unknown identities are reported per item.
    pub async fn check_availability(
        &self,
        items: &BTreeMap<String, u32>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, AvailabilityResult>, EngineError> {
        Ok(self.check_with_catalog(items, start, end).await?.results)
    }

    /// Like `check_availability`, also returning the catalog item each known
    /// identity resolved to, read under the same snapshot as the results.
    pub async fn check_with_catalog(
        &self,
        items: &BTreeMap<String, u32>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CheckedBatch, EngineError> {
        let query = validate_span(start, end)?;
        if items.len() > MAX_ITEMS_PER_REQUEST {
            return Err(EngineError::LimitExceeded("too many items in request"));
        }
        metrics::counter!(crate::observability::AVAILABILITY_CHECKS_TOTAL).increment(1);

        let resolved: Vec<(&String, u32, Option<_>)> = items
            .iter()
            .map(|(identity, qty)| (identity, *qty, self.resolve(identity)))
            .collect();
        let codes: Vec<String> = resolved
            .iter()
            .filter_map(|(_, _, r)| r.as_ref().map(|r| r.item_code.clone()))
            .collect();
        let snapshot = self.read_snapshot(&codes).await;

        let mut batch = CheckedBatch::default();
        for (identity, qty, target) in resolved {
            let state = target.as_ref().and_then(|t| {
                snapshot
                    .iter()
                    .find(|(code, _)| *code == t.item_code)
                    .map(|(_, guard)| (t, guard))
            });
            let result = match state {
                Some((t, guard)) => {
                    batch.items.insert(identity.clone(), guard.item.clone());
                    evaluate(guard, t.serial_no.as_deref(), &query, qty, self.policy())
                }
                None => AvailabilityResult::unknown_item(),
            };
            batch.results.insert(identity.clone(), result);
        }
        Ok(batch)
    }

    /// Bulk mode for the catalog: every item (optionally one group) checked
    /// for a single unit. Sorted by item code.
    pub async fn catalog_availability(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        group: Option<&str>,
    ) -> Result<Vec<CatalogEntry>, EngineError> {
        let query = validate_span(start, end)?;
        let codes: Vec<String> = self.items.iter().map(|e| e.key().clone()).collect();
        let snapshot = self.read_snapshot(&codes).await;
        metrics::counter!(crate::observability::AVAILABILITY_CHECKS_TOTAL).increment(1);

        Ok(snapshot
            .iter()
            .filter(|(_, guard)| group.is_none() || guard.item.group.as_deref() == group)
            .map(|(_, guard)| CatalogEntry {
                item: guard.item.clone(),
                availability: evaluate(guard, None, &query, 1, self.policy()),
            })
            .collect())
    }

    /// Free units per calendar day of `[start, end]`.
    pub async fn daily_free_units(
        &self,
        identity: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, u32)>, EngineError> {
        let query = validate_span(start, end)?;
        let resolved = self
            .resolve(identity)
            .ok_or_else(|| EngineError::UnknownItem(identity.to_string()))?;
        let state = self
            .get_item_state(&resolved.item_code)
            .ok_or_else(|| EngineError::UnknownItem(identity.to_string()))?;
        let guard = state.read().await;
        let policy = self.policy();

        if let (Tracking::Pooled { stock }, None) = (&guard.item.tracking, &resolved.serial_no) {
            // Select over every calendar day; each load keeps the policy's shape.
            let loads: Vec<Load> = guard
                .blocking(&query, BoundaryPolicy::Strict)
                .map(|r| Load::of(r, policy))
                .collect();
            let (from, until) = query.occupancy(BoundaryPolicy::Strict);
            let held = daily_load(&loads, (from, until));
            return Ok(query
                .iter_days()
                .zip(held)
                .map(|(day, held)| (day, stock.saturating_sub(held)))
                .collect());
        }

        Ok(query
            .iter_days()
            .map(|day| {
                let single = Span::new(day, day);
                let free = evaluate(&guard, resolved.serial_no.as_deref(), &single, 0, policy)
                    .free_units
                    .unwrap_or(0);
                (day, free)
            })
            .collect())
    }

    /// Calendar feed: reservations overlapping the window, sorted by start
    /// date then item code.
    pub async fn reservations_in_window(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        let query = validate_span(start, end)?;
        let codes: Vec<String> = match &filter.item_code {
            Some(code) => vec![code.clone()],
            None => self.items.iter().map(|e| e.key().clone()).collect(),
        };
        let snapshot = self.read_snapshot(&codes).await;

        let mut found: Vec<Reservation> = Vec::new();
        for (_, guard) in &snapshot {
            if filter.group.is_some() && guard.item.group != filter.group {
                continue;
            }
            found.extend(
                guard
                    .overlapping(&query, self.policy())
                    .filter(|r| filter.include_non_blocking || r.is_blocking())
                    .filter(|r| filter.source_kind.is_none_or(|k| r.source.kind == k))
                    .cloned(),
            );
        }
        found.sort_by(|a, b| {
            a.span
                .start
                .cmp(&b.span.start)
                .then_with(|| a.item_code.cmp(&b.item_code))
        });
        Ok(found)
    }

    pub async fn get_item(&self, code: &str) -> Option<Item> {
        let state = self.get_item_state(code)?;
        let guard = state.read().await;
        Some(guard.item.clone())
    }

    /// All catalog items, sorted by code.
    pub async fn list_items(&self) -> Vec<Item> {
        let codes: Vec<String> = self.items.iter().map(|e| e.key().clone()).collect();
        self.read_snapshot(&codes)
            .await
            .iter()
            .map(|(_, guard)| guard.item.clone())
            .collect()
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let code = self.get_item_for_reservation(&id)?;
        let state = self.get_item_state(&code)?;
        let guard = state.read().await;
        guard.get_reservation(id).cloned()
    }

    pub async fn reservations_for(&self, code: &str) -> Result<Vec<Reservation>, EngineError> {
        let state = self
            .get_item_state(code)
            .ok_or_else(|| EngineError::UnknownItem(code.to_string()))?;
        let guard = state.read().await;
        Ok(guard.reservations.clone())
    }
}
