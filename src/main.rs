use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use reserva::http::{self, AppState};
use reserva::limits::DEFAULT_SLOT_STEP_MIN;
use reserva::notify::EventHub;
use reserva::ratelimit::{FixedWindowLimiter, RateLimit};
use reserva::scheduler::Scheduler;
use reserva::store::MemoryStore;
use reserva::sweeper::run_sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("RESERVA_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    reserva::observability::init(metrics_port);

    let port = std::env::var("RESERVA_PORT").unwrap_or_else(|_| "8080".into());
    let bind = std::env::var("RESERVA_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("RESERVA_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let slot_step_min: u32 = std::env::var("RESERVA_SLOT_STEP_MIN")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_SLOT_STEP_MIN);
    let compact_threshold: u64 = std::env::var("RESERVA_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let rate_window_ms: i64 = std::env::var("RESERVA_RATE_LIMIT_WINDOW_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60_000);
    let rate_max: u32 = std::env::var("RESERVA_RATE_LIMIT_MAX")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;
    let journal_path = PathBuf::from(&data_dir).join("reserva.journal");

    let hub = Arc::new(EventHub::new());
    let store = Arc::new(MemoryStore::open(&journal_path, hub)?);
    let scheduler = Arc::new(Scheduler::over(store.clone(), slot_step_min));
    let limiter: Arc<dyn RateLimit> = Arc::new(FixedWindowLimiter::new(rate_window_ms, rate_max));

    tokio::spawn(run_sweeper(store.clone(), limiter.clone(), compact_threshold));

    let app = http::router(AppState { store, scheduler, limiter });

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("reserva listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  slot_step_min: {slot_step_min}");
    info!("  rate_limit: {rate_max} per {rate_window_ms}ms");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received, draining requests");
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("reserva stopped");
    Ok(())
}
