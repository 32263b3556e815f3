/// Items (lines) accepted in one availability or quote request.
pub const MAX_ITEMS_PER_REQUEST: usize = 500;

/// Widest request/query window, in days (ten years).
pub const MAX_QUERY_WINDOW_DAYS: u32 = 3_660;

/// Reservations stored per item, across all statuses.
pub const MAX_RESERVATIONS_PER_ITEM: usize = 50_000;

/// Units requested on a single line.
pub const MAX_QTY_PER_LINE: u32 = 100_000;

/// Serial units registered on one item.
pub const MAX_UNITS_PER_ITEM: usize = 10_000;

pub const MAX_CODE_LEN: usize = 140;
pub const MAX_REFERENCE_LEN: usize = 140;
pub const MAX_OVERRIDE_REASON_LEN: usize = 1_000;
