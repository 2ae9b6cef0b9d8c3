//! Storage seams the scheduler core talks through. The concrete
//! journal-backed implementation lives in [`memory`]; anything that honors
//! these contracts (notably the atomicity of `insert_if_no_conflict`) can
//! stand in for it.

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{AvailabilityWindow, Reservation, Service, TimeInterval};

pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    ProviderNotFound(Ulid),
    NotFound(Ulid),
    /// An active reservation blocks the insert; carries its id.
    Conflict(Ulid),
    /// The reservation id exists with different fields.
    KeyReuse(Ulid),
    Invalid(&'static str),
    LimitExceeded(&'static str),
    Io(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::ProviderNotFound(id) => write!(f, "provider not found: {id}"),
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            StoreError::KeyReuse(id) => write!(f, "reservation id reused with different fields: {id}"),
            StoreError::Invalid(what) => write!(f, "invalid input: {what}"),
            StoreError::LimitExceeded(what) => write!(f, "limit exceeded: {what}"),
            StoreError::Io(msg) => write!(f, "storage i/o: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Read side of provider availability.
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    /// Every window the provider declared for `date`, blocked ones included.
    /// A provider with no windows that day yields an empty list, not an
    /// error.
    async fn list_windows(
        &self,
        provider: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, StoreError>;
}

/// Reservation reads plus the one guarded write the booking path needs.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Active (booked or confirmed) reservations whose start lies inside
    /// `range`.
    async fn list_active(
        &self,
        provider: Ulid,
        range: TimeInterval,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Admit `reservation` unless an existing reservation of the same
    /// provider matches `conflicts_with`. Scan and insert form one atomic
    /// unit per provider: of concurrent overlapping requests exactly one
    /// wins and the rest observe [`StoreError::Conflict`] carrying the
    /// winner's id.
    ///
    /// If `reservation.id` already exists with identical fields the stored
    /// reservation is returned unchanged (idempotent replay); if the fields
    /// differ the insert fails with [`StoreError::KeyReuse`].
    async fn insert_if_no_conflict(
        &self,
        reservation: Reservation,
        conflicts_with: &(dyn for<'a> Fn(&'a Reservation) -> bool + Send + Sync),
    ) -> Result<Reservation, StoreError>;
}

/// Service lookup for the booking and slot paths.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// `None` when the service does not exist or is not active; the caller
    /// does not learn which.
    async fn get_active_service(&self, id: Ulid) -> Result<Option<Service>, StoreError>;
}
