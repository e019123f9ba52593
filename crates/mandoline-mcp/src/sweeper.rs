use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::SessionRegistry;

/// Evicts idle sessions every `period` until `cancel` fires.
/// The first sweep runs one full period after start.
pub fn spawn_expiry_sweeper(
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = registry.evict_idle(idle_timeout);
                    if evicted > 0 {
                        debug!(evicted, remaining = registry.len(), "cleaned up expired sessions");
                    }
                }
            }
        }
        info!("session sweeper stopped");
    })
}
