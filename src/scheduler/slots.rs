use crate::model::{day_start, minutes_ms, AvailabilityWindow, Reservation, Slot, TimeInterval};

use super::conflict::blocks;

/// Enumerate one day's slot grid.
///
/// Each non-blocked window is stepped from its opening minute; a start
/// qualifies only while the whole duration still fits inside that window,
/// so a 60-minute service in a window closing at 18:00 offers 17:00 as
/// its last start. Taken slots stay in the grid marked unavailable.
/// Overlapping windows can propose the same start twice; the grid is
/// sorted and deduplicated by start.
pub(super) fn enumerate(
    windows: &[AvailabilityWindow],
    reservations: &[Reservation],
    duration_min: u32,
    step_min: u32,
) -> Vec<Slot> {
    debug_assert!(duration_min > 0 && step_min > 0);
    let mut grid: Vec<Slot> = Vec::new();
    for window in windows {
        if window.blocked {
            continue;
        }
        let base = day_start(window.date);
        let mut cursor = window.start_min;
        while cursor + duration_min <= window.end_min {
            let start = base + minutes_ms(cursor);
            let candidate = TimeInterval::new(start, start + minutes_ms(duration_min));
            let available = !reservations.iter().any(|r| blocks(&candidate, r));
            grid.push(Slot { start, end: candidate.end, available });
            cursor += step_min;
        }
    }
    grid.sort_by_key(|s| s.start);
    grid.dedup_by_key(|s| s.start);
    grid
}
