use super::*;
use super::conflict::blocks;

use std::path::PathBuf;

use crate::limits::*;
use crate::notify::EventHub;
use crate::store::MemoryStore;

fn test_journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("reserva_test_scheduler");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

async fn open_store(name: &str) -> Arc<MemoryStore> {
    let hub = Arc::new(EventHub::new());
    Arc::new(MemoryStore::open(&test_journal_path(name), hub).unwrap())
}

/// Far-future date so bookings pass the past-start check.
fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2100, 6, 15).unwrap()
}

fn at(date: NaiveDate, minute: u32) -> Ms {
    day_start(date) + minutes_ms(minute)
}

/// One provider offering one service, no windows yet.
async fn salon(store: &Arc<MemoryStore>, duration_min: u32) -> (Ulid, Ulid) {
    let provider = store.register_provider("salon").await.unwrap();
    let service = store
        .list_service(provider, "haircut", duration_min, 4_500)
        .await
        .unwrap();
    (provider, service)
}

// ── Slot grid ────────────────────────────────────────────────────

#[tokio::test]
async fn grid_steps_through_window() {
    let store = open_store("grid_steps.journal").await;
    let (provider, service) = salon(&store, 60).await;
    store.publish_window(provider, day(), 540, 1080, false).await.unwrap();
    let scheduler = Scheduler::over(store, 15);

    let grid = scheduler.generate_slots(provider, service, day()).await.unwrap();
    // Starts 09:00 through 17:00 inclusive, every 15 minutes.
    assert_eq!(grid.len(), 33);
    assert_eq!(grid[0].start, at(day(), 540));
    assert_eq!(grid[0].end, at(day(), 600));
    assert_eq!(grid.last().unwrap().start, at(day(), 1020));
    assert!(grid.iter().all(|s| s.available));
}

#[tokio::test]
async fn grid_last_start_leaves_room_for_duration() {
    let store = open_store("grid_last_start.journal").await;
    let (provider, service) = salon(&store, 60).await;
    store.publish_window(provider, day(), 540, 600, false).await.unwrap();
    let scheduler = Scheduler::over(store, 15);

    // Exactly one fit: [09:00, 10:00) inside a one-hour window.
    let grid = scheduler.generate_slots(provider, service, day()).await.unwrap();
    assert_eq!(grid.len(), 1);
    assert_eq!(grid[0].start, at(day(), 540));
}

#[tokio::test]
async fn grid_duration_longer_than_window_is_empty() {
    let store = open_store("grid_too_long.journal").await;
    let (provider, service) = salon(&store, 90).await;
    store.publish_window(provider, day(), 540, 600, false).await.unwrap();
    let scheduler = Scheduler::over(store, 15);

    let grid = scheduler.generate_slots(provider, service, day()).await.unwrap();
    assert!(grid.is_empty());
}

#[tokio::test]
async fn grid_no_windows_is_empty_not_error() {
    let store = open_store("grid_no_windows.journal").await;
    let (provider, service) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store, 15);

    let grid = scheduler.generate_slots(provider, service, day()).await.unwrap();
    assert!(grid.is_empty());
}

#[tokio::test]
async fn grid_skips_blocked_windows() {
    let store = open_store("grid_blocked.journal").await;
    let (provider, service) = salon(&store, 60).await;
    store.publish_window(provider, day(), 540, 720, true).await.unwrap();
    store.publish_window(provider, day(), 840, 960, false).await.unwrap();
    let scheduler = Scheduler::over(store, 15);

    let grid = scheduler.generate_slots(provider, service, day()).await.unwrap();
    // Only the afternoon window contributes: 14:00 through 15:00.
    assert_eq!(grid.len(), 5);
    assert_eq!(grid[0].start, at(day(), 840));
    assert_eq!(grid.last().unwrap().start, at(day(), 900));
}

#[tokio::test]
async fn grid_overlapping_windows_deduplicate() {
    let store = open_store("grid_overlap_dedup.journal").await;
    let (provider, service) = salon(&store, 60).await;
    store.publish_window(provider, day(), 540, 720, false).await.unwrap();
    store.publish_window(provider, day(), 600, 780, false).await.unwrap();
    let scheduler = Scheduler::over(store, 15);

    let grid = scheduler.generate_slots(provider, service, day()).await.unwrap();
    // Union of starts 09:00..=11:00 and 10:00..=12:00, each start once.
    assert_eq!(grid.len(), 13);
    let mut starts: Vec<Ms> = grid.iter().map(|s| s.start).collect();
    starts.dedup();
    assert_eq!(starts.len(), grid.len());
}

#[tokio::test]
async fn grid_respects_configured_step() {
    let store = open_store("grid_step_30.journal").await;
    let (provider, service) = salon(&store, 60).await;
    store.publish_window(provider, day(), 540, 720, false).await.unwrap();
    let scheduler = Scheduler::over(store, 30);

    let grid = scheduler.generate_slots(provider, service, day()).await.unwrap();
    assert_eq!(grid.len(), 5);
    assert_eq!(grid[1].start - grid[0].start, minutes_ms(30));
}

#[tokio::test]
async fn grid_marks_taken_slots_unavailable() {
    let store = open_store("grid_taken.journal").await;
    let (provider, service) = salon(&store, 60).await;
    store.publish_window(provider, day(), 540, 1080, false).await.unwrap();
    let scheduler = Scheduler::over(store.clone(), 15);

    // Take [10:00, 11:00).
    scheduler
        .book(provider, Ulid::new(), service, at(day(), 600), None, None)
        .await
        .unwrap();

    let grid = scheduler.generate_slots(provider, service, day()).await.unwrap();
    let avail = |minute: u32| {
        grid.iter()
            .find(|s| s.start == at(day(), minute))
            .unwrap()
            .available
    };
    assert!(avail(540)); // [09:00, 10:00) touches, does not overlap
    assert!(!avail(555)); // [09:15, 10:15) overlaps
    assert!(!avail(570));
    assert!(!avail(585));
    assert!(!avail(600)); // the reservation itself
    assert!(!avail(645)); // [10:45, 11:45) overlaps
    assert!(avail(660)); // [11:00, 12:00) touches, does not overlap
}

#[tokio::test]
async fn grid_generation_is_idempotent() {
    let store = open_store("grid_idempotent.journal").await;
    let (provider, service) = salon(&store, 60).await;
    store.publish_window(provider, day(), 540, 1080, false).await.unwrap();
    let scheduler = Scheduler::over(store.clone(), 15);

    scheduler
        .book(provider, Ulid::new(), service, at(day(), 600), None, None)
        .await
        .unwrap();

    let first = scheduler.generate_slots(provider, service, day()).await.unwrap();
    let second = scheduler.generate_slots(provider, service, day()).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn grid_unknown_service_is_unavailable() {
    let store = open_store("grid_unknown_service.journal").await;
    let (provider, _) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store, 15);

    let result = scheduler.generate_slots(provider, Ulid::new(), day()).await;
    assert!(matches!(result, Err(SchedulerError::ServiceUnavailable(_))));
}

#[tokio::test]
async fn grid_delisted_service_is_unavailable() {
    let store = open_store("grid_delisted_service.journal").await;
    let (provider, service) = salon(&store, 60).await;
    store.publish_window(provider, day(), 540, 1080, false).await.unwrap();
    store.delist_service(service).await.unwrap();
    let scheduler = Scheduler::over(store, 15);

    let result = scheduler.generate_slots(provider, service, day()).await;
    assert!(matches!(result, Err(SchedulerError::ServiceUnavailable(_))));
}

#[tokio::test]
async fn grid_foreign_service_rejected() {
    let store = open_store("grid_foreign_service.journal").await;
    let (provider, _) = salon(&store, 60).await;
    let other = store.register_provider("barber").await.unwrap();
    let foreign = store.list_service(other, "shave", 30, 2_000).await.unwrap();
    let scheduler = Scheduler::over(store, 15);

    let result = scheduler.generate_slots(provider, foreign, day()).await;
    assert!(matches!(result, Err(SchedulerError::Validation(_))));
}

// ── Booking admission ────────────────────────────────────────────

#[tokio::test]
async fn booking_overlap_rejected_and_state_unchanged() {
    let store = open_store("booking_overlap.journal").await;
    let (provider, service) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store.clone(), 15);

    scheduler
        .book(provider, Ulid::new(), service, at(day(), 600), None, None)
        .await
        .unwrap();
    let result = scheduler
        .book(provider, Ulid::new(), service, at(day(), 630), None, None)
        .await;
    assert!(matches!(result, Err(SchedulerError::Conflict(_))));

    let active = store.list_active(provider, day_interval(day())).await.unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn booking_touching_intervals_coexist() {
    let store = open_store("booking_touching.journal").await;
    let (provider, service) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store.clone(), 15);

    scheduler
        .book(provider, Ulid::new(), service, at(day(), 600), None, None)
        .await
        .unwrap();
    // [11:00, 12:00) and [09:00, 10:00) share boundaries with [10:00, 11:00).
    scheduler
        .book(provider, Ulid::new(), service, at(day(), 660), None, None)
        .await
        .unwrap();
    scheduler
        .book(provider, Ulid::new(), service, at(day(), 540), None, None)
        .await
        .unwrap();

    let active = store.list_active(provider, day_interval(day())).await.unwrap();
    assert_eq!(active.len(), 3);
}

#[tokio::test]
async fn booking_needs_no_window() {
    // Windows drive the advertised grid only; admission is conflict-based.
    let store = open_store("booking_no_window.journal").await;
    let (provider, service) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store.clone(), 15);

    scheduler
        .book(provider, Ulid::new(), service, at(day(), 600), None, None)
        .await
        .unwrap();
    let active = store.list_active(provider, day_interval(day())).await.unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn booking_cancelled_slot_reopens() {
    let store = open_store("booking_cancel_reopen.journal").await;
    let (provider, service) = salon(&store, 60).await;
    store.publish_window(provider, day(), 540, 1080, false).await.unwrap();
    let scheduler = Scheduler::over(store.clone(), 15);

    let first = scheduler
        .book(provider, Ulid::new(), service, at(day(), 600), None, None)
        .await
        .unwrap();
    store.cancel_reservation(first.id).await.unwrap();

    let grid = scheduler.generate_slots(provider, service, day()).await.unwrap();
    assert!(grid.iter().all(|s| s.available));

    // The freed interval can be taken again.
    scheduler
        .book(provider, Ulid::new(), service, at(day(), 600), None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn booking_confirmed_still_blocks() {
    let store = open_store("booking_confirmed_blocks.journal").await;
    let (provider, service) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store.clone(), 15);

    let first = scheduler
        .book(provider, Ulid::new(), service, at(day(), 600), None, None)
        .await
        .unwrap();
    let confirmed = store.confirm_reservation(first.id).await.unwrap();
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);

    let result = scheduler
        .book(provider, Ulid::new(), service, at(day(), 600), None, None)
        .await;
    assert!(matches!(result, Err(SchedulerError::Conflict(_))));
}

#[tokio::test]
async fn booking_unknown_service_unavailable() {
    let store = open_store("booking_unknown_service.journal").await;
    let (provider, _) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store, 15);

    let result = scheduler
        .book(provider, Ulid::new(), Ulid::new(), at(day(), 600), None, None)
        .await;
    assert!(matches!(result, Err(SchedulerError::ServiceUnavailable(_))));
}

#[tokio::test]
async fn booking_foreign_service_rejected() {
    let store = open_store("booking_foreign_service.journal").await;
    let (provider, _) = salon(&store, 60).await;
    let other = store.register_provider("barber").await.unwrap();
    let foreign = store.list_service(other, "shave", 30, 2_000).await.unwrap();
    let scheduler = Scheduler::over(store, 15);

    let result = scheduler
        .book(provider, Ulid::new(), foreign, at(day(), 600), None, None)
        .await;
    assert!(matches!(result, Err(SchedulerError::Validation(_))));
}

#[tokio::test]
async fn booking_past_start_rejected() {
    let store = open_store("booking_past.journal").await;
    let (provider, service) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store, 15);

    let past = NaiveDate::from_ymd_opt(2020, 5, 5).unwrap();
    let result = scheduler
        .book(provider, Ulid::new(), service, at(past, 600), None, None)
        .await;
    assert!(matches!(result, Err(SchedulerError::Validation(m)) if m.contains("past")));
}

#[tokio::test]
async fn booking_start_outside_valid_range_rejected() {
    let store = open_store("booking_range.journal").await;
    let (provider, service) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store, 15);

    for start in [0, MIN_VALID_TIMESTAMP_MS - 1, MAX_VALID_TIMESTAMP_MS + 1] {
        let result = scheduler
            .book(provider, Ulid::new(), service, start, None, None)
            .await;
        assert!(matches!(result, Err(SchedulerError::Validation(m)) if m.contains("range")));
    }
}

#[tokio::test]
async fn booking_note_too_long_rejected() {
    let store = open_store("booking_note_len.journal").await;
    let (provider, service) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store, 15);

    let note = "x".repeat(MAX_NOTE_LEN + 1);
    let result = scheduler
        .book(provider, Ulid::new(), service, at(day(), 600), Some(note), None)
        .await;
    assert!(matches!(result, Err(SchedulerError::Validation(_))));
}

#[tokio::test]
async fn booking_provider_mismatch_rejected() {
    let store = open_store("booking_provider_mismatch.journal").await;
    let (_provider, service) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store.clone(), 15);

    // The service resolves, but the booking names a provider that does
    // not offer it, so the ownership check fires.
    let result = scheduler
        .book(Ulid::new(), Ulid::new(), service, at(day(), 600), None, None)
        .await;
    assert!(matches!(result, Err(SchedulerError::Validation(_))));
}

// ── Idempotency keys ─────────────────────────────────────────────

#[tokio::test]
async fn idempotency_key_replays_same_reservation() {
    let store = open_store("idem_replay.journal").await;
    let (provider, service) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store.clone(), 15);

    let key = Ulid::new();
    let client = Ulid::new();
    let first = scheduler
        .book(provider, client, service, at(day(), 600), None, Some(key))
        .await
        .unwrap();
    let second = scheduler
        .book(provider, client, service, at(day(), 600), None, Some(key))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.id, key);

    let active = store.list_active(provider, day_interval(day())).await.unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn idempotency_key_reuse_with_different_fields_rejected() {
    let store = open_store("idem_reuse.journal").await;
    let (provider, service) = salon(&store, 60).await;
    let scheduler = Scheduler::over(store, 15);

    let key = Ulid::new();
    let client = Ulid::new();
    scheduler
        .book(provider, client, service, at(day(), 600), None, Some(key))
        .await
        .unwrap();
    // Same key, different start.
    let result = scheduler
        .book(provider, client, service, at(day(), 720), None, Some(key))
        .await;
    assert!(matches!(result, Err(SchedulerError::Validation(_))));
}

// ── Concurrency ──────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_bookings_single_winner() {
    let store = open_store("race_single_winner.journal").await;
    let (provider, service) = salon(&store, 60).await;
    let scheduler = Arc::new(Scheduler::over(store.clone(), 15));

    let start = at(day(), 600);
    let mut handles = Vec::new();
    for _ in 0..16 {
        let scheduler = scheduler.clone();
        handles.push(tokio::spawn(async move {
            scheduler
                .book(provider, Ulid::new(), service, start, None, None)
                .await
        }));
    }

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(SchedulerError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 1);

    let active = store.list_active(provider, day_interval(day())).await.unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn concurrent_disjoint_bookings_all_win() {
    let store = open_store("race_disjoint.journal").await;
    let (provider, service) = salon(&store, 60).await;
    let scheduler = Arc::new(Scheduler::over(store.clone(), 15));

    let mut handles = Vec::new();
    for i in 0..8u32 {
        let scheduler = scheduler.clone();
        let start = at(day(), 540 + i * 60);
        handles.push(tokio::spawn(async move {
            scheduler
                .book(provider, Ulid::new(), service, start, None, None)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let active = store.list_active(provider, day_interval(day())).await.unwrap();
    assert_eq!(active.len(), 8);
}

// ── Durability ───────────────────────────────────────────────────

#[tokio::test]
async fn journal_replay_restores_grid_and_ledger() {
    let path = test_journal_path("scheduler_replay.journal");
    let hub = Arc::new(EventHub::new());

    let (provider, service, taken) = {
        let store = Arc::new(MemoryStore::open(&path, hub.clone()).unwrap());
        let (provider, service) = salon(&store, 60).await;
        store.publish_window(provider, day(), 540, 1080, false).await.unwrap();
        let scheduler = Scheduler::over(store.clone(), 15);
        let r = scheduler
            .book(provider, Ulid::new(), service, at(day(), 600), None, None)
            .await
            .unwrap();
        (provider, service, r)
    };

    let store = Arc::new(MemoryStore::open(&path, hub).unwrap());
    let scheduler = Scheduler::over(store.clone(), 15);

    let active = store.list_active(provider, day_interval(day())).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, taken.id);

    let grid = scheduler.generate_slots(provider, service, day()).await.unwrap();
    let slot = grid.iter().find(|s| s.start == taken.start).unwrap();
    assert!(!slot.available);

    // Replayed state still rejects the same interval.
    let result = scheduler
        .book(provider, Ulid::new(), service, at(day(), 630), None, None)
        .await;
    assert!(matches!(result, Err(SchedulerError::Conflict(_))));
}

// ══════════════════════════════════════════════════════════════
// Pure predicate and grid edge cases
// ══════════════════════════════════════════════════════════════

fn window(date: NaiveDate, start_min: u32, end_min: u32, blocked: bool) -> AvailabilityWindow {
    AvailabilityWindow {
        id: Ulid::new(),
        provider: Ulid::new(),
        date,
        start_min,
        end_min,
        blocked,
    }
}

fn reservation(date: NaiveDate, start_min: u32, duration_min: u32, status: ReservationStatus) -> Reservation {
    Reservation {
        id: Ulid::new(),
        provider: Ulid::new(),
        client: Ulid::new(),
        service: Ulid::new(),
        start: at(date, start_min),
        duration_min,
        status,
        note: None,
    }
}

#[test]
fn blocks_ignores_cancelled() {
    let candidate = TimeInterval::new(at(day(), 600), at(day(), 660));
    let active = reservation(day(), 630, 60, ReservationStatus::Booked);
    let cancelled = reservation(day(), 630, 60, ReservationStatus::Cancelled);
    assert!(blocks(&candidate, &active));
    assert!(!blocks(&candidate, &cancelled));
}

#[test]
fn blocks_half_open_boundary() {
    let candidate = TimeInterval::new(at(day(), 600), at(day(), 660));
    let touching = reservation(day(), 660, 60, ReservationStatus::Booked);
    let one_minute_in = reservation(day(), 659, 60, ReservationStatus::Booked);
    assert!(!blocks(&candidate, &touching));
    assert!(blocks(&candidate, &one_minute_in));
}

#[test]
fn enumerate_skips_zero_fit_window() {
    let grid = slots::enumerate(&[window(day(), 540, 570, false)], &[], 60, 15);
    assert!(grid.is_empty());
}

#[test]
fn enumerate_exact_fit_window() {
    let grid = slots::enumerate(&[window(day(), 540, 600, false)], &[], 60, 15);
    assert_eq!(grid.len(), 1);
    assert_eq!(grid[0].start, at(day(), 540));
    assert_eq!(grid[0].end, at(day(), 600));
}

#[test]
fn enumerate_marks_against_cancelled_as_free() {
    let taken = reservation(day(), 600, 60, ReservationStatus::Cancelled);
    let grid = slots::enumerate(&[window(day(), 540, 720, false)], &[taken], 60, 15);
    assert!(grid.iter().all(|s| s.available));
}

#[test]
fn enumerate_sorts_across_windows() {
    let grid = slots::enumerate(
        &[window(day(), 840, 960, false), window(day(), 540, 660, false)],
        &[],
        60,
        15,
    );
    assert!(grid.windows(2).all(|pair| pair[0].start < pair[1].start));
}

// ══════════════════════════════════════════════════════════════
// Integration vertical: one salon's day
// ══════════════════════════════════════════════════════════════

#[tokio::test]
async fn vertical_salon_day() {
    let store = open_store("vertical_salon.journal").await;
    let provider = store.register_provider("annas salon").await.unwrap();
    let haircut = store.list_service(provider, "haircut", 60, 4_500).await.unwrap();
    let trim = store.list_service(provider, "beard trim", 30, 1_500).await.unwrap();

    // Split day: morning and afternoon, lunch unpublished.
    store.publish_window(provider, day(), 540, 780, false).await.unwrap();
    store.publish_window(provider, day(), 840, 1080, false).await.unwrap();

    let scheduler = Scheduler::over(store.clone(), 15);

    // No haircut start can straddle the lunch gap.
    let grid = scheduler.generate_slots(provider, haircut, day()).await.unwrap();
    assert!(grid.iter().all(|s| {
        (s.start >= at(day(), 540) && s.end <= at(day(), 780))
            || (s.start >= at(day(), 840) && s.end <= at(day(), 1080))
    }));

    // Morning haircut at 10:00, afternoon trim at 14:30.
    let cut = scheduler
        .book(provider, Ulid::new(), haircut, at(day(), 600), Some("regular".into()), None)
        .await
        .unwrap();
    scheduler
        .book(provider, Ulid::new(), trim, at(day(), 870), None, None)
        .await
        .unwrap();

    // The trim grid steps over both reservations, regardless of service.
    let trim_grid = scheduler.generate_slots(provider, trim, day()).await.unwrap();
    let avail = |minute: u32| {
        trim_grid
            .iter()
            .find(|s| s.start == at(day(), minute))
            .unwrap()
            .available
    };
    assert!(!avail(630)); // inside the haircut
    assert!(avail(660)); // right after it
    assert!(!avail(885)); // overlaps the trim
    assert!(avail(900)); // right after the trim

    // Client cancels the haircut; the morning reopens.
    store.cancel_reservation(cut.id).await.unwrap();
    let reopened = scheduler.generate_slots(provider, haircut, day()).await.unwrap();
    assert!(reopened
        .iter()
        .filter(|s| s.end <= at(day(), 780))
        .all(|s| s.available));

    // Ledger keeps the cancelled visit, active view drops it.
    let all = store.list_reservations(provider, day_interval(day())).await.unwrap();
    assert_eq!(all.len(), 2);
    let active = store.list_active(provider, day_interval(day())).await.unwrap();
    assert_eq!(active.len(), 1);
}
