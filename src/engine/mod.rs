mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{
    check_pooled, check_serialized, daily_load, day_to_date, max_concurrent_overlap, Load, Peak,
};
pub use error::EngineError;
pub use queries::{CatalogEntry, CheckedBatch, ReservationFilter};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;

use conflict::Resolved;

pub type SharedItemState = Arc<RwLock<ItemState>>;

/// The reservation index: per-item state behind its own lock, plus lookups
/// from serial numbers and reservation ids back to the owning item.
pub struct Engine {
    pub(super) items: DashMap<String, SharedItemState>,
    /// Serial number → item code.
    pub(super) serial_to_item: DashMap<String, String>,
    /// Reservation id → item code.
    pub(super) reservation_to_item: DashMap<Ulid, String>,
    pub notify: Arc<NotifyHub<String, IndexEvent>>,
    policy: BoundaryPolicy,
}

/// Apply an event directly to an ItemState (no locking; caller holds the lock).
fn apply_to_item(
    state: &mut ItemState,
    event: &IndexEvent,
    reservation_map: &DashMap<Ulid, String>,
) {
    match event {
        IndexEvent::ItemUpdated { item } => {
            state.item = item.clone();
        }
        IndexEvent::ReservationCommitted { reservation } => {
            reservation_map.insert(reservation.id, reservation.item_code.clone());
            state.insert_reservation(reservation.clone());
        }
        IndexEvent::ReservationStatusChanged { id, status, .. } => {
            if let Some(pos) = state.reservations.iter().position(|r| r.id == *id) {
                state.reservations[pos].status = *status;
            }
        }
        IndexEvent::ReservationRescheduled { id, span, .. } => {
            if let Some(mut reservation) = state.remove_reservation(*id) {
                reservation.span = *span;
                state.insert_reservation(reservation);
            }
        }
        IndexEvent::ReservationReleased { id, .. } => {
            state.remove_reservation(*id);
            reservation_map.remove(id);
        }
        // Registration/removal are handled at the DashMap level, not here
        IndexEvent::ItemRegistered { .. } | IndexEvent::ItemRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(policy: BoundaryPolicy) -> Self {
        Self {
            items: DashMap::new(),
            serial_to_item: DashMap::new(),
            reservation_to_item: DashMap::new(),
            notify: Arc::new(NotifyHub::new()),
            policy,
        }
    }

    pub fn policy(&self) -> BoundaryPolicy {
        self.policy
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn get_item_state(&self, code: &str) -> Option<SharedItemState> {
        self.items.get(code).map(|e| e.value().clone())
    }

    /// True while `state` is still the catalog entry for `code`. Checked
    /// after taking an item lock that may have waited behind a removal.
    pub(super) fn is_live(&self, code: &str, state: &SharedItemState) -> bool {
        self.items
            .get(code)
            .is_some_and(|e| Arc::ptr_eq(e.value(), state))
    }

    pub fn get_item_for_reservation(&self, id: &Ulid) -> Option<String> {
        self.reservation_to_item.get(id).map(|e| e.value().clone())
    }

    /// An identity is an item code or a serial number.
    pub(super) fn resolve(&self, identity: &str) -> Option<Resolved> {
        if self.items.contains_key(identity) {
            return Some(Resolved {
                item_code: identity.to_string(),
                serial_no: None,
            });
        }
        self.serial_to_item.get(identity).map(|code| Resolved {
            item_code: code.value().clone(),
            serial_no: Some(identity.to_string()),
        })
    }

    /// Apply + notify in one call.
    pub(super) fn apply_and_notify(&self, code: &str, state: &mut ItemState, event: &IndexEvent) {
        apply_to_item(state, event, &self.reservation_to_item);
        self.notify.send(&code.to_string(), event);
    }

    /// Lookup reservation → item, acquire the item's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<(String, OwnedRwLockWriteGuard<ItemState>), EngineError> {
        let code = self
            .get_item_for_reservation(id)
            .ok_or(EngineError::NotFound(*id))?;
        let state = self.get_item_state(&code).ok_or(EngineError::NotFound(*id))?;
        let guard = state.clone().write_owned().await;
        if !self.is_live(&code, &state) {
            return Err(EngineError::NotFound(*id));
        }
        Ok((code, guard))
    }

    /// Read guards for several items held together, acquired in sorted code
    /// order. Gives one consistent view across a batch; writers only ever hold
    /// one item lock, so sorted acquisition cannot deadlock.
    pub(super) async fn read_snapshot(
        &self,
        codes: &[String],
    ) -> Vec<(String, OwnedRwLockReadGuard<ItemState>)> {
        let mut sorted: Vec<&String> = codes.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for code in sorted {
            if let Some(state) = self.get_item_state(code) {
                guards.push((code.clone(), state.read_owned().await));
            }
        }
        guards
    }
}
