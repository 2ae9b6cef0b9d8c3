use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix epoch milliseconds, the only instant type.
pub type Ms = i64;

pub const MS_PER_MINUTE: Ms = 60_000;
pub const MS_PER_DAY: Ms = 86_400_000;

/// Convert a whole-minute duration or day offset to milliseconds.
pub fn minutes_ms(min: u32) -> Ms {
    min as Ms * MS_PER_MINUTE
}

/// Instant of civil midnight for `date`, pinned to UTC. Availability
/// windows carry day-relative minute offsets; this is the one place the
/// civil-date-to-instant mapping happens.
pub fn day_start(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// The whole civil day `[00:00, 24:00)` as a concrete interval.
pub fn day_interval(date: NaiveDate) -> TimeInterval {
    let start = day_start(date);
    TimeInterval::new(start, start + MS_PER_DAY)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: Ms,
    pub end: Ms,
}

impl TimeInterval {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "interval start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// True when the two intervals share any instant. Touching boundaries
    /// (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &TimeInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// A provider-declared open (or blocked) range on one civil day, in
/// day-relative minutes: `0 <= start_min < end_min <= 1440`. Windows for a
/// date may overlap each other; nothing here assumes disjointness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub provider: Ulid,
    pub date: NaiveDate,
    pub start_min: u32,
    pub end_min: u32,
    /// Blocked windows are listed but never produce slots.
    pub blocked: bool,
}

impl AvailabilityWindow {
    /// The window's concrete instant range on its day.
    pub fn interval(&self) -> TimeInterval {
        let day = day_start(self.date);
        TimeInterval::new(day + minutes_ms(self.start_min), day + minutes_ms(self.end_min))
    }
}

/// A bookable offering of one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub provider: Ulid,
    pub name: String,
    pub duration_min: u32,
    /// Price in minor currency units; informational, never computed on.
    pub price_minor: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Booked,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    /// Active reservations occupy time; cancelled ones never conflict.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Booked | ReservationStatus::Confirmed)
    }
}

/// A client's claim on a provider's time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub provider: Ulid,
    pub client: Ulid,
    pub service: Ulid,
    pub start: Ms,
    pub duration_min: u32,
    pub status: ReservationStatus,
    pub note: Option<String>,
}

impl Reservation {
    /// End is derived; it is never stored independently.
    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start, self.start + minutes_ms(self.duration_min))
    }
}

/// A candidate reservation interval, derived on demand. Slots have no
/// identity and are never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: Ms,
    pub end: Ms,
    pub available: bool,
}

/// Directory view of a provider, without its books.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub id: Ulid,
    pub name: String,
}

/// The event types — flat, no nesting. This is the journal record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProviderRegistered {
        id: Ulid,
        name: String,
    },
    WindowPublished {
        id: Ulid,
        provider: Ulid,
        date: NaiveDate,
        start_min: u32,
        end_min: u32,
        blocked: bool,
    },
    WindowWithdrawn {
        id: Ulid,
        provider: Ulid,
    },
    ServiceListed {
        id: Ulid,
        provider: Ulid,
        name: String,
        duration_min: u32,
        price_minor: i64,
    },
    ServiceDelisted {
        id: Ulid,
        provider: Ulid,
    },
    ReservationBooked {
        id: Ulid,
        provider: Ulid,
        client: Ulid,
        service: Ulid,
        start: Ms,
        duration_min: u32,
        note: Option<String>,
    },
    ReservationConfirmed {
        id: Ulid,
        provider: Ulid,
    },
    ReservationCancelled {
        id: Ulid,
        provider: Ulid,
    },
}

/// Everything one provider owns: windows, services, and reservations.
/// Reservations stay sorted by `start` so conflict scans can binary-search.
#[derive(Debug, Clone)]
pub struct ProviderBook {
    pub id: Ulid,
    pub name: String,
    pub windows: Vec<AvailabilityWindow>,
    pub services: Vec<Service>,
    pub reservations: Vec<Reservation>,
}

impl ProviderBook {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            windows: Vec::new(),
            services: Vec::new(),
            reservations: Vec::new(),
        }
    }

    /// Insert keeping sort order by start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.start, |r| r.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Status transitions mutate in place; `start` never changes, so the
    /// sort order survives.
    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations whose interval overlaps the query window, cancelled ones
    /// included. Binary search skips everything starting at or after
    /// `query.end`; callers filter by status.
    pub fn overlapping(&self, query: &TimeInterval) -> impl Iterator<Item = &Reservation> {
        let right_bound = self.reservations.partition_point(|r| r.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.interval().end > query.start)
    }

    pub fn window(&self, id: Ulid) -> Option<&AvailabilityWindow> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn remove_window(&mut self, id: Ulid) -> Option<AvailabilityWindow> {
        if let Some(pos) = self.windows.iter().position(|w| w.id == id) {
            Some(self.windows.remove(pos))
        } else {
            None
        }
    }

    pub fn windows_on(&self, date: NaiveDate) -> impl Iterator<Item = &AvailabilityWindow> {
        self.windows.iter().filter(move |w| w.date == date)
    }

    pub fn service(&self, id: Ulid) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn service_mut(&mut self, id: Ulid) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.id == id)
    }
}
