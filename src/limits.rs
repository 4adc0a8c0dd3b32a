use crate::model::{DAY_MS, Ms};

pub const MAX_AIRFIELDS: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_INFO_LEN: usize = 2_048;
pub const MAX_AIRCRAFT_ID_LEN: usize = 32;
pub const MAX_PHONE_LEN: usize = 64;

/// Timeslots + reservations held by a single airfield.
pub const MAX_INTERVALS_PER_AIRFIELD: usize = 200_000;

pub const MAX_GRANULARITY_MINUTES: u32 = 1_440;
pub const MAX_CONCURRENT_FLIGHTS: u32 = 10_000;
pub const MAX_BOOKING_DAYS: u32 = 3_650;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;
pub const MAX_PERIOD_OCCURRENCES: usize = 400;

/// Longest accepted command line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
