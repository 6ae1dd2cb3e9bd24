//! Expiration Driver
//!
//! Whatever keeps a cache's expirations running: a task on the caller's
//! tokio runtime, or a dedicated thread when there is none.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::cache::WeakCache;
use crate::tasks::expiration::spawn_expiration_task;
use crate::tasks::timer_thread::{spawn_expiration_thread, ThreadWake};

pub(crate) enum ExpirationDriver {
    Task {
        handle: JoinHandle<()>,
        wake: Arc<Notify>,
    },
    Thread {
        handle: thread::JoinHandle<()>,
        wake: Arc<ThreadWake>,
    },
}

impl ExpirationDriver {
    /// Starts a driver for `cache`, on the current tokio runtime if there is
    /// one, on a new thread otherwise.
    pub fn start<V>(cache: WeakCache<V>, slack: Duration) -> io::Result<Self>
    where
        V: Clone + Send + Sync + 'static,
    {
        match Handle::try_current() {
            Ok(runtime) => {
                let wake = Arc::new(Notify::new());
                let handle = spawn_expiration_task(&runtime, cache, Arc::clone(&wake), slack);
                Ok(ExpirationDriver::Task { handle, wake })
            }
            Err(_) => {
                let wake = Arc::new(ThreadWake::new());
                let handle = spawn_expiration_thread(cache, Arc::clone(&wake), slack)?;
                Ok(ExpirationDriver::Thread { handle, wake })
            }
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            ExpirationDriver::Task { handle, .. } => !handle.is_finished(),
            ExpirationDriver::Thread { handle, .. } => !handle.is_finished(),
        }
    }

    /// Asks the driver to re-read the nearest deadline.
    pub fn wake(&self) {
        match self {
            ExpirationDriver::Task { wake, .. } => wake.notify_one(),
            ExpirationDriver::Thread { wake, .. } => wake.notify(),
        }
    }

    /// Stops the driver without waiting for it.
    pub fn stop(self) {
        match self {
            ExpirationDriver::Task { handle, .. } => handle.abort(),
            ExpirationDriver::Thread { wake, .. } => wake.shutdown(),
        }
    }
}
