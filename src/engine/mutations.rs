use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::{Engine, EngineError};

impl Engine {
    pub async fn register_item(&self, item: Item) -> Result<(), EngineError> {
        self.validate_item(&item)?;
        if self.serial_to_item.contains_key(&item.code) {
            return Err(EngineError::AlreadyExists(item.code));
        }
        self.check_serials_free(&item, None)?;

        let code = item.code.clone();
        match self.items.entry(code.clone()) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(code)),
            Entry::Vacant(slot) => {
                if let Tracking::Serialized { units } = &item.tracking {
                    for unit in units {
                        self.serial_to_item.insert(unit.clone(), code.clone());
                    }
                }
                let event = IndexEvent::ItemRegistered { item: item.clone() };
                slot.insert(Arc::new(RwLock::new(ItemState::new(item))));
                self.notify.send(&code, &event);
            }
        }
        debug!("registered item {code}");
        Ok(())
    }

    /// Replace an item's catalog data. Reservations are kept; serial units
    /// still referenced by a blocking reservation cannot be dropped.
    pub async fn update_item(&self, item: Item) -> Result<(), EngineError> {
        self.validate_item(&item)?;
        let state = self
            .get_item_state(&item.code)
            .ok_or_else(|| EngineError::UnknownItem(item.code.clone()))?;
        let mut guard = state.write().await;
        if !self.is_live(&item.code, &state) {
            return Err(EngineError::UnknownItem(item.code));
        }
        self.check_serials_free(&item, Some(&item.code))?;

        let new_units: Vec<String> = match &item.tracking {
            Tracking::Serialized { units } => units.clone(),
            Tracking::Pooled { .. } => Vec::new(),
        };
        if let Some(r) = guard.reservations.iter().find(|r| {
            r.is_blocking()
                && r.serial_no
                    .as_ref()
                    .is_some_and(|s| !new_units.contains(s))
        }) {
            return Err(EngineError::InvalidRequest(format!(
                "serial {} is held by {}",
                r.serial_no.as_deref().unwrap_or_default(),
                r.source.reference
            )));
        }

        if let Tracking::Serialized { units } = &guard.item.tracking {
            for unit in units {
                self.serial_to_item.remove(unit);
            }
        }
        for unit in &new_units {
            self.serial_to_item.insert(unit.clone(), item.code.clone());
        }

        let code = item.code.clone();
        let event = IndexEvent::ItemUpdated { item };
        self.apply_and_notify(&code, &mut guard, &event);
        Ok(())
    }

    /// Remove an item from the catalog. Refused while it has blocking reservations.
    pub async fn remove_item(&self, code: &str) -> Result<(), EngineError> {
        let state = self
            .get_item_state(code)
            .ok_or_else(|| EngineError::UnknownItem(code.to_string()))?;
        let guard = state.write().await;
        if !self.is_live(code, &state) {
            return Err(EngineError::UnknownItem(code.to_string()));
        }
        if let Some(r) = guard.reservations.iter().find(|r| r.is_blocking()) {
            return Err(EngineError::InvalidRequest(format!(
                "{code} has active reservation for {}",
                r.source.reference
            )));
        }

        // Unlink while the lock is held so a waiting writer finds the item gone.
        self.items.remove_if(code, |_, live| Arc::ptr_eq(live, &state));
        if let Tracking::Serialized { units } = &guard.item.tracking {
            for unit in units {
                self.serial_to_item.remove(unit);
            }
        }
        for r in &guard.reservations {
            self.reservation_to_item.remove(&r.id);
        }
        drop(guard);

        let code = code.to_string();
        self.notify.send(&code, &IndexEvent::ItemRemoved { code: code.clone() });
        self.notify.remove(&code);
        info!("removed item {code}");
        Ok(())
    }

    /// Record a reservation. Blocking reservations that would overbook are
    /// rejected with `Conflict` (serialized) or `CapacityExceeded` (pooled).
    pub async fn commit_reservation(
        &self,
        new: NewReservation,
    ) -> Result<Reservation, EngineError> {
        self.commit(new, None).await
    }

    /// Record a blocking reservation even when it overbooks.
    pub async fn commit_reservation_override(
        &self,
        new: NewReservation,
        reason: &str,
    ) -> Result<Reservation, EngineError> {
        if reason.trim().is_empty() {
            return Err(EngineError::InvalidRequest("override reason is required".into()));
        }
        if reason.len() > MAX_OVERRIDE_REASON_LEN {
            return Err(EngineError::LimitExceeded("override reason too long"));
        }
        self.commit(new, Some(reason)).await
    }

    async fn commit(
        &self,
        new: NewReservation,
        override_reason: Option<&str>,
    ) -> Result<Reservation, EngineError> {
        let span = validate_span(new.span.start, new.span.end)?;
        if new.qty == 0 {
            return Err(EngineError::InvalidRequest("quantity must be positive".into()));
        }
        if new.qty > MAX_QTY_PER_LINE {
            return Err(EngineError::LimitExceeded("quantity too large"));
        }
        if new.source.reference.len() > MAX_REFERENCE_LEN {
            return Err(EngineError::LimitExceeded("reference too long"));
        }
        if self.reservation_to_item.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id.to_string()));
        }
        let resolved = self
            .resolve(&new.identity)
            .ok_or_else(|| EngineError::UnknownItem(new.identity.clone()))?;
        if resolved.serial_no.is_some() && new.qty != 1 {
            return Err(EngineError::InvalidRequest(format!(
                "{} is a single serial unit",
                new.identity
            )));
        }

        let state = self
            .get_item_state(&resolved.item_code)
            .ok_or_else(|| EngineError::UnknownItem(new.identity.clone()))?;
        let mut guard = state.write().await;
        if !self.is_live(&resolved.item_code, &state) {
            return Err(EngineError::UnknownItem(new.identity.clone()));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many reservations on item"));
        }

        if new.status.is_blocking() {
            let checked = check_no_conflict(
                &guard,
                resolved.serial_no.as_deref(),
                &span,
                new.qty,
                self.policy(),
                None,
            );
            match (checked, override_reason) {
                (Ok(()), _) => {}
                (Err(e), Some(reason)) => {
                    warn!(
                        "override: reserving {} for {} despite {e}; reason: {reason}",
                        new.identity, new.source.reference
                    );
                }
                (Err(e), None) => return Err(e),
            }
        }

        let reservation = Reservation {
            id: new.id,
            item_code: resolved.item_code.clone(),
            serial_no: resolved.serial_no,
            span,
            qty: new.qty,
            source: new.source,
            status: new.status,
        };
        let event = IndexEvent::ReservationCommitted {
            reservation: reservation.clone(),
        };
        self.apply_and_notify(&resolved.item_code, &mut guard, &event);
        if reservation.is_blocking() {
            metrics::gauge!(crate::observability::RESERVATIONS_ACTIVE).increment(1.0);
        }
        info!(
            "reserved {} x{} for {} ({}..{})",
            new.identity, reservation.qty, reservation.source.reference, span.start, span.end
        );
        Ok(reservation)
    }

    /// Move a reservation through its lifecycle: dispatch (InUse), return
    /// (Completed), cancel. Closed reservations cannot be reopened.
    pub async fn set_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let (code, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard
            .get_reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if current.status == status {
            return Ok(current);
        }
        if matches!(
            current.status,
            ReservationStatus::Completed | ReservationStatus::Cancelled
        ) {
            return Err(EngineError::InvalidRequest(format!(
                "reservation {id} is closed"
            )));
        }
        if status.is_blocking() && !current.is_blocking() {
            check_no_conflict(
                &guard,
                current.serial_no.as_deref(),
                &current.span,
                current.qty,
                self.policy(),
                Some(id),
            )?;
        }

        let event = IndexEvent::ReservationStatusChanged {
            id,
            item_code: code.clone(),
            status,
        };
        self.apply_and_notify(&code, &mut guard, &event);
        let active = metrics::gauge!(crate::observability::RESERVATIONS_ACTIVE);
        match (current.is_blocking(), status.is_blocking()) {
            (false, true) => active.increment(1.0),
            (true, false) => active.decrement(1.0),
            _ => {}
        }
        debug!("reservation {id} on {code}: {:?} -> {status:?}", current.status);
        Ok(Reservation { status, ..current })
    }

    pub async fn reschedule_reservation(
        &self,
        id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        let span = validate_span(start, end)?;
        let (code, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard
            .get_reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if current.is_blocking() {
            check_no_conflict(
                &guard,
                current.serial_no.as_deref(),
                &span,
                current.qty,
                self.policy(),
                Some(id),
            )?;
        }
        let event = IndexEvent::ReservationRescheduled {
            id,
            item_code: code.clone(),
            span,
        };
        self.apply_and_notify(&code, &mut guard, &event);
        Ok(Reservation { span, ..current })
    }

    /// Drop a reservation from the index entirely.
    pub async fn release_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (code, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard
            .get_reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        let event = IndexEvent::ReservationReleased {
            id,
            item_code: code.clone(),
        };
        self.apply_and_notify(&code, &mut guard, &event);
        if current.is_blocking() {
            metrics::gauge!(crate::observability::RESERVATIONS_ACTIVE).decrement(1.0);
        }
        info!("released reservation {id} on {code}");
        Ok(current)
    }

    fn validate_item(&self, item: &Item) -> Result<(), EngineError> {
        if item.code.is_empty() {
            return Err(EngineError::InvalidRequest("item code is required".into()));
        }
        if item.code.len() > MAX_CODE_LEN {
            return Err(EngineError::LimitExceeded("item code too long"));
        }
        if let Tracking::Serialized { units } = &item.tracking {
            if units.len() > MAX_UNITS_PER_ITEM {
                return Err(EngineError::LimitExceeded("too many serial units"));
            }
            let mut seen = std::collections::HashSet::new();
            for unit in units {
                if unit.is_empty() || unit.len() > MAX_CODE_LEN {
                    return Err(EngineError::InvalidRequest(format!("bad serial number {unit:?}")));
                }
                if !seen.insert(unit.as_str()) {
                    return Err(EngineError::AlreadyExists(unit.clone()));
                }
            }
        }
        Ok(())
    }

    /// Serials must not collide with item codes or with another item's serials.
    fn check_serials_free(&self, item: &Item, owner: Option<&str>) -> Result<(), EngineError> {
        let Tracking::Serialized { units } = &item.tracking else {
            return Ok(());
        };
        for unit in units {
            if self.items.contains_key(unit) {
                return Err(EngineError::AlreadyExists(unit.clone()));
            }
            if let Some(existing) = self.serial_to_item.get(unit)
                && Some(existing.value().as_str()) != owner
            {
                return Err(EngineError::AlreadyExists(unit.clone()));
            }
        }
        Ok(())
    }
}
