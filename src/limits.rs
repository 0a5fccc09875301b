//! Hard limits enforced by the engine and the tenant manager.

use chrono::NaiveDate;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_HOTELS_PER_TENANT: usize = 10_000;
pub const MAX_ROOMS_PER_TENANT: usize = 100_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 50_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ROOM_NUMBER_LEN: usize = 32;
pub const MAX_GUEST_LEN: usize = 256;
pub const MAX_RATING: u8 = 5;

pub const MAX_BATCH_SIZE: usize = 1000;

/// Longest hold a pending booking may get by default.
pub const MAX_PENDING_TTL_SECS: u64 = 7 * 24 * 3600;

/// Longest stay accepted in a single booking.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Widest window an availability query may scan.
pub const MAX_AVAILABILITY_WINDOW_DAYS: i64 = 3 * 366;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

pub fn min_valid_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

pub fn max_valid_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2200, 1, 1).unwrap_or(NaiveDate::MAX)
}
