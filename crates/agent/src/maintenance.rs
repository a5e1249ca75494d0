use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use tabula_data::DataAccessLayer;

use crate::conversation::ConversationManager;
use crate::metrics::MetricsCollector;

/// Periodic lazy-expiry sweep of the data cache, idle conversation sessions
/// and agent run metrics past their retention. Dropping the handle without `shutdown` leaves the task running
/// until the runtime stops.
pub struct MaintenanceHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub fn spawn(
        data: Arc<DataAccessLayer>,
        conversations: Arc<ConversationManager>,
        metrics: Arc<MetricsCollector>,
        every: Duration,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut timer = interval(every.max(Duration::from_secs(1)));
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let expired = data.sweep_expired().await;
                        let idle = conversations.sweep_idle().await;
                        let metrics_pruned = metrics.prune();
                        debug!(
                            event_name = "maintenance.sweep.completed",
                            expired,
                            idle,
                            metrics_pruned,
                            "maintenance sweep"
                        );
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(event_name = "maintenance.stopped", "maintenance task stopped");
        });

        Self { stop, task }
    }

    /// Stops the sweep loop and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::MaintenanceHandle;
    use crate::conversation::ConversationManager;
    use crate::metrics::{AgentRun, MetricsCollector};
    use tabula_core::clock::ManualClock;
    use tabula_core::domain::agent::AgentKind;
    use tabula_core::config::AppConfig;
    use tabula_core::domain::query::{IntentEntities, IntentType};
    use tabula_core::schema::SchemaRegistry;
    use tabula_data::{demo_source, DataAccessLayer, GetRequest};

    #[tokio::test(start_paused = true)]
    async fn sweeps_expired_entries_idle_sessions_and_old_metrics_until_shut_down() {
        let today = NaiveDate::from_ymd_opt(2025, 11, 20).expect("date");
        let clock = ManualClock::at_midnight(today);
        let config = AppConfig::default();
        let data = Arc::new(DataAccessLayer::from_config(
            Arc::new(demo_source(today)),
            SchemaRegistry::standard(),
            Arc::new(clock.clone()),
            &config.data,
        ));
        let conversations = Arc::new(ConversationManager::new(Arc::new(clock.clone()), &config.conversation));

        data.get(&GetRequest::new("order")).await.expect("rows");
        conversations.analyze_and_update("s1", "hello", IntentType::GeneralQuery, &IntentEntities::default()).await;
        assert_eq!(data.cache_stats().await.entries, 1);

        let metrics = Arc::new(MetricsCollector::with_limits(Arc::new(clock.clone()), 100, chrono::Duration::hours(1)));
        metrics.record(AgentRun::succeeded(AgentKind::DataAnalyst, "flow.step", Duration::from_millis(20), 3));
        assert_eq!(metrics.len(), 1);

        let handle =
            MaintenanceHandle::spawn(data.clone(), conversations.clone(), metrics.clone(), Duration::from_secs(60));
        clock.advance(chrono::Duration::hours(2));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(data.cache_stats().await.entries, 0);
        assert_eq!(conversations.session_count().await, 0);
        assert!(metrics.is_empty());
        handle.shutdown().await;
    }
}
