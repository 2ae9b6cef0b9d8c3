use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::model::Ms;
use crate::ratelimit::RateLimit;
use crate::store::MemoryStore;

/// Background upkeep task: drops expired limiter buckets every tick and
/// compacts the journal once enough appends have accumulated.
pub async fn run_sweeper(
    store: Arc<MemoryStore>,
    limiter: Arc<dyn RateLimit>,
    compact_threshold: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as Ms;
        sweep_once(&store, limiter.as_ref(), compact_threshold, now).await;
    }
}

/// One upkeep pass, split out so tests can drive it without the timer.
async fn sweep_once(store: &MemoryStore, limiter: &dyn RateLimit, compact_threshold: u64, now: Ms) {
    limiter.sweep(now);
    let appends = store.journal_appends_since_compact().await;
    if appends < compact_threshold {
        return;
    }
    match store.compact_journal().await {
        Ok(true) => info!("journal compacted after {appends} appends"),
        Ok(false) => tracing::debug!("compaction skipped: store busy"),
        Err(e) => tracing::warn!("compaction failed: {e}"),
    }
}
