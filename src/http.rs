use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use ulid::Ulid;

use crate::model::{
    day_start, AvailabilityWindow, Ms, ProviderInfo, Reservation, Service, Slot, TimeInterval,
    MS_PER_DAY,
};
use crate::observability;
use crate::ratelimit::RateLimit;
use crate::scheduler::{Scheduler, SchedulerError};
use crate::store::{AvailabilityStore, MemoryStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub scheduler: Arc<Scheduler>,
    pub limiter: Arc<dyn RateLimit>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/providers", post(register_provider).get(list_providers))
        .route("/providers/{id}", get(get_provider))
        .route("/providers/{id}/windows", post(publish_window).get(list_windows))
        .route("/providers/{id}/services", post(list_service).get(list_services))
        .route("/providers/{id}/reservations", get(provider_reservations))
        .route("/windows/{id}", delete(withdraw_window))
        .route("/services/{id}", delete(delist_service))
        .route("/slots", get(slots))
        .route("/bookings", post(book))
        .route("/reservations/{id}/confirm", post(confirm_reservation))
        .route("/reservations/{id}/cancel", post(cancel_reservation))
        .route("/me/reservations", get(my_reservations))
        .with_state(state)
}

// ── Error mapping ────────────────────────────────────────────────

pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        let status = match &e {
            SchedulerError::Validation(_) => StatusCode::BAD_REQUEST,
            SchedulerError::NotFound(_) | SchedulerError::ServiceUnavailable(_) => {
                StatusCode::NOT_FOUND
            }
            SchedulerError::Conflict(_) => StatusCode::CONFLICT,
            SchedulerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::Invalid(_) | StoreError::LimitExceeded(_) | StoreError::KeyReuse(_) => {
                StatusCode::BAD_REQUEST
            }
            StoreError::ProviderNotFound(_) | StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

/// Caller identity. Verification happens upstream; the header is trusted.
fn client_id(headers: &HeaderMap) -> Result<Ulid, ApiError> {
    let raw = headers
        .get("x-client-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing x-client-id header"))?;
    Ulid::from_string(raw)
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "malformed x-client-id header"))
}

fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

// ── Request bodies ───────────────────────────────────────────────

#[derive(Deserialize)]
struct RegisterProviderBody {
    name: String,
}

#[derive(Deserialize)]
struct PublishWindowBody {
    date: NaiveDate,
    start_min: u32,
    end_min: u32,
    #[serde(default)]
    blocked: bool,
}

#[derive(Deserialize)]
struct ListServiceBody {
    name: String,
    duration_min: u32,
    price_minor: i64,
}

#[derive(Deserialize)]
struct BookingBody {
    provider: Ulid,
    service: Ulid,
    start_ms: Ms,
    note: Option<String>,
    idempotency_key: Option<Ulid>,
}

#[derive(Deserialize)]
struct SlotsQuery {
    provider: Ulid,
    service: Ulid,
    date: NaiveDate,
}

#[derive(Deserialize)]
struct WindowsQuery {
    date: NaiveDate,
}

#[derive(Deserialize)]
struct LedgerQuery {
    from: NaiveDate,
    to: NaiveDate,
}

// ── Handlers ─────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn register_provider(
    State(state): State<AppState>,
    Json(body): Json<RegisterProviderBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.store.register_provider(&body.name).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    Json(state.store.list_providers().await)
}

async fn get_provider(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<ProviderInfo>, ApiError> {
    state
        .store
        .provider_info(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("not found: {id}")))
}

async fn publish_window(
    State(state): State<AppState>,
    Path(provider): Path<Ulid>,
    Json(body): Json<PublishWindowBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state
        .store
        .publish_window(provider, body.date, body.start_min, body.end_min, body.blocked)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn list_windows(
    State(state): State<AppState>,
    Path(provider): Path<Ulid>,
    Query(q): Query<WindowsQuery>,
) -> Result<Json<Vec<AvailabilityWindow>>, ApiError> {
    Ok(Json(state.store.list_windows(provider, q.date).await?))
}

async fn withdraw_window(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    state.store.withdraw_window(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_service(
    State(state): State<AppState>,
    Path(provider): Path<Ulid>,
    Json(body): Json<ListServiceBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state
        .store
        .list_service(provider, &body.name, body.duration_min, body.price_minor)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn list_services(
    State(state): State<AppState>,
    Path(provider): Path<Ulid>,
) -> Result<Json<Vec<Service>>, ApiError> {
    Ok(Json(state.store.list_services(provider).await?))
}

async fn delist_service(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    state.store.delist_service(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn slots(
    State(state): State<AppState>,
    Query(q): Query<SlotsQuery>,
) -> Result<Json<Vec<Slot>>, ApiError> {
    let grid = state.scheduler.generate_slots(q.provider, q.service, q.date).await?;
    Ok(Json(grid))
}

async fn book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BookingBody>,
) -> Result<impl IntoResponse, ApiError> {
    let client = client_id(&headers)?;
    if !state.limiter.check(&client.to_string(), now_ms()) {
        metrics::counter!(observability::RATE_LIMITED_TOTAL).increment(1);
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "too many booking attempts, retry later",
        ));
    }
    let reservation = state
        .scheduler
        .book(
            body.provider,
            client,
            body.service,
            body.start_ms,
            body.note,
            body.idempotency_key,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

async fn confirm_reservation(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<Reservation>, ApiError> {
    Ok(Json(state.store.confirm_reservation(id).await?))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<Reservation>, ApiError> {
    Ok(Json(state.store.cancel_reservation(id).await?))
}

/// Ledger rows whose start falls on `from..=to`, every status included.
async fn provider_reservations(
    State(state): State<AppState>,
    Path(provider): Path<Ulid>,
    Query(q): Query<LedgerQuery>,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    if q.to < q.from {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "'to' date precedes 'from'"));
    }
    let range = TimeInterval::new(day_start(q.from), day_start(q.to) + MS_PER_DAY);
    Ok(Json(state.store.list_reservations(provider, range).await?))
}

async fn my_reservations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    let client = client_id(&headers)?;
    Ok(Json(state.store.list_for_client(client).await))
}
