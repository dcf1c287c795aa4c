use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single availability window or booking may not exceed one year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
/// Range reads (`availability`, `open_windows`) are capped at two years.
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 366 * 24 * 3_600_000;

pub const MAX_SPOTS: usize = 1_000_000;
pub const MAX_SLOTS_PER_SPOT: usize = 10_000;
pub const MAX_BOOKINGS_PER_SPOT: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_COMMENT_LEN: usize = 4_096;
pub const MAX_AMENITIES: usize = 64;
pub const MAX_REFERENCE_LEN: usize = 255;

/// Upper bound for prices, in cents.
pub const MAX_PRICE_CENTS: i64 = 100_000_000;
