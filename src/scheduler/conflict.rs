use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::{Ms, Reservation, TimeInterval};

use super::SchedulerError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// The one predicate deciding whether an existing reservation makes an
/// interval unbookable. Slot marking and booking admission both route
/// through here, so a slot shown as available cannot then be refused as
/// a conflict against the same ledger. Touching intervals do not block:
/// `[a, b)` and `[b, c)` coexist.
pub(crate) fn blocks(candidate: &TimeInterval, existing: &Reservation) -> bool {
    existing.status.is_active() && existing.interval().overlaps(candidate)
}

pub(crate) fn validate_start(start: Ms) -> Result<(), SchedulerError> {
    if start < MIN_VALID_TIMESTAMP_MS || start > MAX_VALID_TIMESTAMP_MS {
        return Err(SchedulerError::Validation("start timestamp out of range"));
    }
    Ok(())
}
