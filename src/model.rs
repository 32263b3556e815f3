use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Day ordinal (days since 0001-01-01, CE). The sweep runs on this timeline.
pub type Day = i32;

/// How two reservations that touch on a single calendar day are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    /// Every shared calendar day is a conflict, including the handover day.
    #[default]
    Strict,
    /// A reservation ending on day D and another starting on day D may share
    /// it (same-day return and dispatch). Single-day reservations still
    /// occupy their whole day.
    Turnaround,
}

/// Inclusive calendar-day interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Span {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    /// `None` when `start > end`.
    pub fn checked(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Rental days: `end - start + 1`.
    pub fn days(&self) -> u32 {
        ((self.end - self.start).num_days() + 1) as u32
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Half-open `[from, until)` day ordinals this span occupies under `policy`.
    ///
    /// Strict releases the unit the day after `end`. Turnaround releases it
    /// on `end` itself so a dispatch can start that day, unless the span is a
    /// single day.
    pub fn occupancy(&self, policy: BoundaryPolicy) -> (Day, Day) {
        let from = self.start.num_days_from_ce();
        let last = self.end.num_days_from_ce();
        let until = match policy {
            BoundaryPolicy::Turnaround if last > from => last,
            _ => last + 1,
        };
        (from, until)
    }

    pub fn overlaps(&self, other: &Span, policy: BoundaryPolicy) -> bool {
        let (a_from, a_until) = self.occupancy(policy);
        let (b_from, b_until) = other.occupancy(policy);
        a_from < b_until && b_from < a_until
    }

    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

// ── Catalog ──────────────────────────────────────────────────────

/// Tiered rates. A `None` tier is skipped when optimizing a price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rates {
    pub daily: Option<Decimal>,
    pub weekly: Option<Decimal>,
    pub monthly: Option<Decimal>,
}

impl Rates {
    pub fn daily(rate: Decimal) -> Self {
        Self {
            daily: Some(rate),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.daily.is_none() && self.weekly.is_none() && self.monthly.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Tracking {
    /// Interchangeable units, up to `stock` out at once.
    Pooled { stock: u32 },
    /// Individually tracked units by serial number.
    Serialized { units: Vec<String> },
}

impl Tracking {
    pub fn total_units(&self) -> u32 {
        match self {
            Tracking::Pooled { stock } => *stock,
            Tracking::Serialized { units } => units.len() as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Surcharge,
    Discount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentAmount {
    Flat(Decimal),
    /// Percent of the running amount, e.g. `10` for 10%.
    Percent(Decimal),
}

/// A surcharge or discount rule at item or booking level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub label: String,
    pub kind: AdjustmentKind,
    pub amount: AdjustmentAmount,
}

impl Adjustment {
    pub fn surcharge(label: impl Into<String>, amount: AdjustmentAmount) -> Self {
        Self {
            label: label.into(),
            kind: AdjustmentKind::Surcharge,
            amount,
        }
    }

    pub fn discount(label: impl Into<String>, amount: AdjustmentAmount) -> Self {
        Self {
            label: label.into(),
            kind: AdjustmentKind::Discount,
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub code: String,
    pub name: Option<String>,
    pub group: Option<String>,
    pub rates: Rates,
    pub tracking: Tracking,
    #[serde(default)]
    pub adjustments: Vec<Adjustment>,
}

impl Item {
    pub fn pooled(code: impl Into<String>, stock: u32, rates: Rates) -> Self {
        Self {
            code: code.into(),
            name: None,
            group: None,
            rates,
            tracking: Tracking::Pooled { stock },
            adjustments: Vec::new(),
        }
    }

    pub fn serialized(code: impl Into<String>, units: Vec<String>, rates: Rates) -> Self {
        Self {
            code: code.into(),
            name: None,
            group: None,
            rates,
            tracking: Tracking::Serialized { units },
            adjustments: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_adjustment(mut self, adjustment: Adjustment) -> Self {
        self.adjustments.push(adjustment);
        self
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    RentalJob,
    MaintenanceTask,
    Quotation,
}

/// The document a reservation was created for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub reference: String,
}

impl SourceRef {
    pub fn job(reference: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::RentalJob,
            reference: reference.into(),
        }
    }

    pub fn maintenance(reference: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::MaintenanceTask,
            reference: reference.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Draft,
    Reserved,
    InUse,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    /// Only reserved and dispatched reservations hold equipment.
    pub fn is_blocking(self) -> bool {
        matches!(self, ReservationStatus::Reserved | ReservationStatus::InUse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub item_code: String,
    /// Set for serialized items; `None` draws from the pool.
    pub serial_no: Option<String>,
    pub span: Span,
    pub qty: u32,
    pub source: SourceRef,
    pub status: ReservationStatus,
}

impl Reservation {
    pub fn is_blocking(&self) -> bool {
        self.status.is_blocking()
    }
}

/// Input for committing a reservation; the engine resolves the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Ulid,
    /// Item code or serial number.
    pub identity: String,
    pub span: Span,
    pub qty: u32,
    pub source: SourceRef,
    pub status: ReservationStatus,
}

impl NewReservation {
    pub fn reserved(identity: impl Into<String>, span: Span, qty: u32, source: SourceRef) -> Self {
        Self {
            id: Ulid::new(),
            identity: identity.into(),
            span,
            qty,
            source,
            status: ReservationStatus::Reserved,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ItemState {
    pub item: Item,
    /// All reservations on this item (any status), sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl ItemState {
    pub fn new(item: Item) -> Self {
        Self {
            item,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get_reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations (any status) whose occupancy overlaps `query` under `policy`.
    /// Uses binary search to skip reservations starting after the query is released.
    pub fn overlapping(
        &self,
        query: &Span,
        policy: BoundaryPolicy,
    ) -> impl Iterator<Item = &Reservation> {
        let (q_from, q_until) = query.occupancy(policy);
        // Everything at index >= right_bound starts at or after q_until → can't overlap.
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start.num_days_from_ce() < q_until);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.occupancy(policy).1 > q_from)
    }

    /// Blocking reservations overlapping `query`.
    pub fn blocking(
        &self,
        query: &Span,
        policy: BoundaryPolicy,
    ) -> impl Iterator<Item = &Reservation> {
        self.overlapping(query, policy).filter(|r| r.is_blocking())
    }
}

/// Index mutations, flat with no nesting. Applied under the item's write lock
/// and broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexEvent {
    ItemRegistered {
        item: Item,
    },
    ItemUpdated {
        item: Item,
    },
    ItemRemoved {
        code: String,
    },
    ReservationCommitted {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        item_code: String,
        status: ReservationStatus,
    },
    ReservationRescheduled {
        id: Ulid,
        item_code: String,
        span: Span,
    },
    ReservationReleased {
        id: Ulid,
        item_code: String,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub available: bool,
    pub reason: Option<String>,
    /// Free units over the whole window (pooled: stock minus peak; serialized:
    /// conflict-free serials). `None` for unknown items.
    pub free_units: Option<u32>,
}

impl AvailabilityResult {
    pub fn unknown_item() -> Self {
        Self {
            available: false,
            reason: Some("unknown item".into()),
            free_units: None,
        }
    }
}

/// How a single unit's price was composed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBreakdown {
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
    pub months_amount: Decimal,
    pub weeks_amount: Decimal,
    pub days_amount: Decimal,
    /// Unit price, unrounded.
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum LineError {
    UnknownItem,
    Unavailable(String),
    PricingUnavailable,
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineError::UnknownItem => write!(f, "unknown item"),
            LineError::Unavailable(reason) => write!(f, "unavailable: {reason}"),
            LineError::PricingUnavailable => write!(f, "pricing unavailable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub identity: String,
    pub qty: u32,
    pub rental_days: u32,
    pub breakdown: Option<RateBreakdown>,
    /// `unit price × qty`, unrounded.
    pub base_amount: Decimal,
    pub surcharges: Decimal,
    pub discounts: Decimal,
    /// Rounded to the currency's minor unit. Zero when `error` is set.
    pub line_total: Decimal,
    pub error: Option<LineError>,
}

impl QuoteLine {
    pub fn failed(
        identity: impl Into<String>,
        qty: u32,
        rental_days: u32,
        error: LineError,
    ) -> Self {
        Self {
            identity: identity.into(),
            qty,
            rental_days,
            breakdown: None,
            base_amount: Decimal::ZERO,
            surcharges: Decimal::ZERO,
            discounts: Decimal::ZERO,
            line_total: Decimal::ZERO,
            error: Some(error),
        }
    }

    pub fn is_priced(&self) -> bool {
        self.error.is_none()
    }
}

/// Ephemeral quote; recomputed on every request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimate {
    pub lines: Vec<QuoteLine>,
    pub rental_days: u32,
    /// Sum of priced line totals.
    pub subtotal: Decimal,
    /// Line-level plus booking-level surcharges.
    pub total_surcharges: Decimal,
    /// Line-level plus booking-level discounts.
    pub total_discounts: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub grand_total: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub currency: Option<String>,
    /// Percent discount on the booking subtotal.
    pub discount_percent: Option<Decimal>,
    /// Percent; falls back to the configured default.
    pub tax_rate: Option<Decimal>,
    #[serde(default)]
    pub tax_exempt: bool,
}

impl Customer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

// ── Ledger sync ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NotSynced,
    InProgress,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn label(self) -> &'static str {
        match self {
            SyncStatus::NotSynced => "not_synced",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAttempt {
    pub at: DateTime<Utc>,
    pub status: SyncStatus,
    pub error: Option<String>,
}

/// Sync state of one invoice. Last state is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub invoice_id: String,
    pub external_id: Option<String>,
    pub status: SyncStatus,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub attempts: u32,
    /// Most recent attempts, oldest first; bounded.
    pub history: Vec<SyncAttempt>,
}

impl SyncRecord {
    pub fn new(invoice_id: impl Into<String>) -> Self {
        Self {
            invoice_id: invoice_id.into(),
            external_id: None,
            status: SyncStatus::NotSynced,
            last_attempt: None,
            last_error: None,
            attempts: 0,
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    pub qty: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTax {
    pub description: String,
    pub amount: Decimal,
}

/// A submitted sales invoice as seen by the ledger sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub customer_name: String,
    pub currency: String,
    pub posting_date: NaiveDate,
    pub due_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    #[serde(default)]
    pub taxes: Vec<InvoiceTax>,
}
