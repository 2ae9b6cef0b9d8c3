//! Operational caps. Inputs beyond these bounds are rejected up front so a
//! single caller cannot degrade the whole process.

use crate::model::Ms;

/// Earliest instant the engine accepts: 2000-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// Latest instant the engine accepts: 3000-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 32_503_680_000_000;

/// Longest single reservation: one full day.
pub const MAX_RESERVATION_DURATION_MIN: u32 = 24 * 60;

/// Widest range accepted by reservation listings.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_PROVIDERS: usize = 100_000;
pub const MAX_WINDOWS_PER_PROVIDER: usize = 4_096;
pub const MAX_SERVICES_PER_PROVIDER: usize = 1_024;
pub const MAX_RESERVATIONS_PER_PROVIDER: usize = 65_536;

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_NOTE_LEN: usize = 512;

/// Minute offsets within a civil day live in `0..=MINUTES_PER_DAY`.
pub const MINUTES_PER_DAY: u32 = 1440;

/// Slot granularity used when the operator does not override it.
pub const DEFAULT_SLOT_STEP_MIN: u32 = 15;
