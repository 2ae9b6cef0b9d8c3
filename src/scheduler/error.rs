use ulid::Ulid;

use crate::store::StoreError;

#[derive(Debug)]
pub enum SchedulerError {
    Validation(&'static str),
    NotFound(Ulid),
    ServiceUnavailable(Ulid),
    Conflict(Ulid),
    Storage(String),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::Validation(msg) => write!(f, "invalid request: {msg}"),
            SchedulerError::NotFound(id) => write!(f, "not found: {id}"),
            SchedulerError::ServiceUnavailable(id) => {
                write!(f, "service not found or inactive: {id}")
            }
            SchedulerError::Conflict(id) => {
                write!(f, "slot already booked: conflicts with reservation {id}")
            }
            SchedulerError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<StoreError> for SchedulerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ProviderNotFound(id) | StoreError::NotFound(id) => {
                SchedulerError::NotFound(id)
            }
            StoreError::Conflict(id) => SchedulerError::Conflict(id),
            StoreError::KeyReuse(_) => {
                SchedulerError::Validation("idempotency key reused with different fields")
            }
            StoreError::Invalid(msg) | StoreError::LimitExceeded(msg) => {
                SchedulerError::Validation(msg)
            }
            StoreError::Io(e) => SchedulerError::Storage(e),
        }
    }
}
