use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::repo::EntryStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const STALE_REASON: &str = "processing timed out";

/// Moves entries stuck in `processing` for longer than `max_age` to `error`.
pub async fn sweep_once(store: &dyn EntryStore, max_age: Duration) -> anyhow::Result<Vec<Uuid>> {
    let older_than = time::Duration::try_from(max_age)?;
    let swept = store.sweep_stale(older_than, STALE_REASON).await?;
    for entry_id in &swept {
        warn!(%entry_id, "stale entry moved to error");
    }
    Ok(swept)
}

/// Runs [`sweep_once`] every minute. `None` when `stale_minutes` is 0.
pub fn spawn_sweeper(store: Arc<dyn EntryStore>, stale_minutes: u64) -> Option<JoinHandle<()>> {
    if stale_minutes == 0 {
        info!("stale entry sweep disabled");
        return None;
    }
    let max_age = Duration::from_secs(stale_minutes * 60);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep_once(store.as_ref(), max_age).await {
                Ok(swept) if !swept.is_empty() => info!(count = swept.len(), "stale sweep"),
                Ok(_) => {}
                Err(e) => error!(error = %format!("{e:#}"), "stale sweep failed"),
            }
        }
    }))
}
