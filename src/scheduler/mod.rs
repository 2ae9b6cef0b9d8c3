mod conflict;
mod error;
mod slots;
#[cfg(test)]
mod tests;

pub use error::SchedulerError;

use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_NOTE_LEN;
use crate::model::*;
use crate::observability;
use crate::store::{AvailabilityStore, ReservationStore, ServiceCatalog};

/// The booking front door: slot enumeration and reservation admission on
/// top of whatever implements the three store roles. Every availability
/// decision goes through [`conflict::blocks`].
pub struct Scheduler {
    availability: Arc<dyn AvailabilityStore>,
    reservations: Arc<dyn ReservationStore>,
    services: Arc<dyn ServiceCatalog>,
    step_min: u32,
}

impl Scheduler {
    pub fn new(
        availability: Arc<dyn AvailabilityStore>,
        reservations: Arc<dyn ReservationStore>,
        services: Arc<dyn ServiceCatalog>,
        step_min: u32,
    ) -> Self {
        Self {
            availability,
            reservations,
            services,
            step_min: step_min.max(1),
        }
    }

    /// One store playing all three roles, the usual wiring.
    pub fn over<S>(store: Arc<S>, step_min: u32) -> Self
    where
        S: AvailabilityStore + ReservationStore + ServiceCatalog + 'static,
    {
        Self::new(store.clone(), store.clone(), store, step_min)
    }

    /// Resolve a service and check it is offered by `provider`.
    async fn bookable_service(
        &self,
        provider: Ulid,
        service: Ulid,
    ) -> Result<Service, SchedulerError> {
        let svc = self
            .services
            .get_active_service(service)
            .await?
            .ok_or(SchedulerError::ServiceUnavailable(service))?;
        if svc.provider != provider {
            return Err(SchedulerError::Validation("service does not belong to provider"));
        }
        Ok(svc)
    }

    /// The day's slot grid for one service: every candidate start from the
    /// provider's windows, marked available or taken.
    pub async fn generate_slots(
        &self,
        provider: Ulid,
        service: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, SchedulerError> {
        let svc = self.bookable_service(provider, service).await?;
        let windows = self.availability.list_windows(provider, date).await?;
        let reservations = self
            .reservations
            .list_active(provider, day_interval(date))
            .await?;
        let grid = slots::enumerate(&windows, &reservations, svc.duration_min, self.step_min);
        metrics::counter!(observability::SLOT_QUERIES_TOTAL).increment(1);
        Ok(grid)
    }

    /// Admit one reservation unless an active one overlaps its interval.
    ///
    /// Passing `key` makes the call retry-safe: the same key with the same
    /// fields returns the reservation already admitted instead of
    /// conflicting with itself.
    pub async fn book(
        &self,
        provider: Ulid,
        client: Ulid,
        service: Ulid,
        start: Ms,
        note: Option<String>,
        key: Option<Ulid>,
    ) -> Result<Reservation, SchedulerError> {
        let svc = self.bookable_service(provider, service).await?;
        if let Some(ref n) = note
            && n.len() > MAX_NOTE_LEN {
                return Err(SchedulerError::Validation("note too long"));
            }
        conflict::validate_start(start)?;
        if start < conflict::now_ms() {
            return Err(SchedulerError::Validation("start is in the past"));
        }
        let requested = TimeInterval::new(start, start + minutes_ms(svc.duration_min));

        let reservation = Reservation {
            id: key.unwrap_or_else(Ulid::new),
            provider,
            client,
            service,
            start,
            duration_min: svc.duration_min,
            status: ReservationStatus::Booked,
            note,
        };
        let began = std::time::Instant::now();
        let admitted = self
            .reservations
            .insert_if_no_conflict(reservation, &|existing| conflict::blocks(&requested, existing))
            .await?;
        metrics::counter!(observability::BOOKINGS_TOTAL).increment(1);
        metrics::histogram!(observability::BOOKING_DURATION_SECONDS)
            .record(began.elapsed().as_secs_f64());
        Ok(admitted)
    }
}
