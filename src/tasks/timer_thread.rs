//! Expiration Thread
//!
//! Expiration driver used when a cache is scheduled outside any tokio
//! runtime: a dedicated OS thread that waits on a condition variable until
//! the nearest deadline.

use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::WeakCache;
use crate::hub::lock;

// == Thread Wake ==
/// Wake-up signal shared between a cache and its expiration thread.
#[derive(Default)]
pub(crate) struct ThreadWake {
    state: Mutex<WakeState>,
    cond: Condvar,
}

#[derive(Default)]
struct WakeState {
    notified: bool,
    shutdown: bool,
}

impl ThreadWake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the pending or next wait return early.
    pub fn notify(&self) {
        lock(&self.state).notified = true;
        self.cond.notify_one();
    }

    /// Makes every wait return false from now on.
    pub fn shutdown(&self) {
        lock(&self.state).shutdown = true;
        self.cond.notify_one();
    }

    /// Blocks until `deadline` passes or a notification arrives. Waits for a
    /// notification only when there is no deadline.
    ///
    /// Returns false once shut down.
    pub fn wait(&self, deadline: Option<Instant>) -> bool {
        let mut state = lock(&self.state);
        loop {
            if state.shutdown {
                return false;
            }
            if state.notified {
                state.notified = false;
                return true;
            }
            state = match deadline {
                None => self
                    .cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

/// Spawns the expiration thread of one cache instance.
///
/// Same loop as the runtime task: sweep, then wait for the nearest deadline
/// plus `slack` or a wake. The thread holds the cache weakly and exits when
/// the cache is gone or `wake` is shut down.
pub(crate) fn spawn_expiration_thread<V>(
    cache: WeakCache<V>,
    wake: Arc<ThreadWake>,
    slack: Duration,
) -> io::Result<JoinHandle<()>>
where
    V: Clone + Send + Sync + 'static,
{
    thread::Builder::new()
        .name("keyed-cache-expiration".to_string())
        .spawn(move || {
            info!(
                "Starting expiration thread with slack of {} ms",
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
                    }
                    cache.next_deadline()
                };

                if !wake.wait(next_deadline.map(|deadline| deadline + slack)) {
                    break;
                }
            }

            debug!("Expiration thread stopped");
        })
}
