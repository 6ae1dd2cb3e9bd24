//! Expiration Task
//!
//! Background task that removes cache entries once their deadline passes.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};

use crate::cache::WeakCache;

/// Spawns the expiration task of one cache instance.
///
/// The task sweeps expired entries, then sleeps until the nearest remaining
/// deadline (plus `slack`) or until `wake` is notified, whichever comes first.
/// It holds the cache weakly and stops once the cache is gone; the cache also
/// aborts it on drop.
///
/// # Arguments
/// * `runtime` - Runtime the task is spawned on
/// * `cache` - Weak reference to the owning cache
/// * `wake` - Notified whenever a deadline is added or moved
/// * `slack` - Extra delay added to every wake-up
pub(crate) fn spawn_expiration_task<V>(
    runtime: &Handle,
    cache: WeakCache<V>,
    wake: Arc<Notify>,
    slack: Duration,
) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    runtime.spawn(async move {
        info!(
            "Starting expiration task with slack of {} ms",
            slack.as_millis()
        );

        loop {
            let next_deadline = {
                let Some(cache) = cache.upgrade() else {
                    break;
                };

                let removed = cache.sweep_expired();
                if removed > 0 {
                    info!("Expiration: removed {} expired entries", removed);
                } else {
                    debug!("Expiration: no expired entries found");
                }
                cache.next_deadline()
            };

            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = time::sleep_until(deadline + slack) => {}
                        _ = wake.notified() => {}
                    }
                }
                None => wake.notified().await,
            }
        }

        debug!("Expiration task stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::time::sleep;

    use crate::cache::{Cache, CacheOptions, RemovalReason, RemovedItem};
    use crate::config::CacheConfig;

    use super::*;

    fn opts() -> CacheOptions<&'static str> {
        CacheOptions::new()
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_task_removes_expired_entries() {
        let cache = Cache::new();
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let reasons_clone = Arc::clone(&reasons);
        cache
            .item_removed()
            .add(move |item: &RemovedItem<&'static str>| {
                reasons_clone.lock().unwrap().push(item.reason);
            });

        cache
            .set("expire_soon", "value", opts().sliding_expiration_msec(1_000))
            .unwrap();

        sleep(Duration::from_millis(1_100)).await;

        // Removed by the task, no lookup needed to discover it
        assert_eq!(cache.size(), 0);
        assert_eq!(*reasons.lock().unwrap(), vec![RemovalReason::Expired]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_task_preserves_valid_entries() {
        let cache = Cache::new();
        cache
            .set("long_lived", "value", opts().sliding_expiration_msec(3_600_000))
            .unwrap();
        cache.set("forever", "value", opts()).unwrap();

        sleep(Duration::from_millis(1_500)).await;

        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get("long_lived").unwrap(), Some("value"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_never_early() {
        let cache = Cache::new();
        cache
            .set("a", "value", opts().sliding_expiration_msec(1_000))
            .unwrap();

        sleep(Duration::from_millis(999)).await;
        assert_eq!(cache.size(), 1);

        sleep(Duration::from_millis(2)).await;
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slack_delays_removal() {
        let config = CacheConfig {
            max_size: None,
            expiration_slack_ms: 500,
        };
        let cache = Cache::from_config(&config).unwrap();
        cache
            .set("a", "value", opts().sliding_expiration_msec(1_000))
            .unwrap();

        sleep(Duration::from_millis(1_200)).await;
        // Past the deadline: still stored, but lookups no longer see it
        assert_eq!(cache.size(), 1);
        assert!(!cache.has("a").unwrap());
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_deadline_reschedules_task() {
        let cache = Cache::new();
        cache
            .set("late", "value", opts().sliding_expiration_msec(10_000))
            .unwrap();
        sleep(Duration::from_millis(10)).await;

        cache
            .set("early", "value", opts().sliding_expiration_msec(100))
            .unwrap();
        sleep(Duration::from_millis(200)).await;

        assert_eq!(cache.size(), 1);
        assert!(cache.has("late").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_stops_when_cache_dropped() {
        let cache = Cache::new();
        cache
            .set("a", "value", opts().sliding_expiration_msec(60_000))
            .unwrap();
        let weak = cache.downgrade();
        sleep(Duration::from_millis(10)).await;

        drop(cache);
        sleep(Duration::from_millis(10)).await;

        assert!(weak.upgrade().is_none());
    }
}
