use std::sync::Arc;

use super::Engine;
use crate::scheduler::spawn_detached;

impl Engine {
    /// Restart the schedule: one immediate refresh of the counter, the
    /// unread cache and the saved cache, then recurring timers.
    ///
    /// The counter timer runs only with counter display on; the feed timer
    /// only when something consumes live feed data between popup opens.
    pub async fn start_schedule(self: &Arc<Self>) {
        let config = self.config().await;
        let period = config.update_period();

        // Held until the timers are armed; a concurrent stop waits for them.
        let mut scheduler = self.scheduler.lock().await;
        scheduler.stop();

        self.spawn_full_refresh();

        if config.show_counter {
            scheduler.every("counter", period, Arc::downgrade(self), |engine: Arc<Engine>| async move {
                if let Err(err) = engine.update_counter().await {
                    tracing::debug!(error = %err, "Scheduled counter update failed");
                }
            });
        }
        if config.needs_live_feeds() {
            scheduler.every("feeds", period, Arc::downgrade(self), |engine: Arc<Engine>| async move {
                if let Err(err) = engine.update_feeds(false).await {
                    tracing::debug!(error = %err, "Scheduled feed update failed");
                }
            });
        }

        tracing::info!(
            interval_minutes = config.update_interval(),
            timers = scheduler.len(),
            "Schedule started"
        );
    }

    /// Cancel future timer firings. Work already in flight completes.
    pub async fn stop_schedule(&self) {
        self.scheduler.lock().await.stop();
    }

    /// Number of armed timers.
    pub async fn scheduled_timers(&self) -> usize {
        self.scheduler.lock().await.len()
    }

    fn spawn_full_refresh(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        spawn_detached("refresh", async move {
            let (counter, feeds, saved) = tokio::join!(
                engine.update_counter(),
                engine.update_feeds(false),
                engine.update_saved_feeds()
            );
            for (what, result) in [
                ("counter", counter.map(|_| ())),
                ("feeds", feeds),
                ("saved feeds", saved),
            ] {
                if let Err(err) = result {
                    tracing::debug!(refresh = what, error = %err, "Refresh failed");
                }
            }
        });
    }
}
