//! Background maintenance task.
//!
//! Periodically evicts idle per-IP limiter entries and empty chat windows
//! so neither table grows with every address or session ever seen.

use crate::config::CleanupConfig;
use crate::server::Relay;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn the maintenance task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(relay: Arc<Relay>, config: CleanupConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;
            run_once(&relay);
        }
    })
}

/// One maintenance pass.
pub fn run_once(relay: &Relay) {
    let limits = relay.rate_limits();
    let before = (limits.connection_keys_count(), limits.chat_window_count());
    limits.shrink();
    let after = (limits.connection_keys_count(), limits.chat_window_count());

    if before != after {
        tracing::info!(
            "Cleanup: limiter keys {} -> {}, chat windows {} -> {}",
            before.0,
            after.0,
            before.1,
            after.1
        );
    } else {
        tracing::debug!("Cleanup: nothing to evict");
    }
}
