//! Notification Hub Module
//!
//! Synchronous publish/subscribe channel used for the cache-wide removal
//! broadcast and for each dependency's trigger broadcast.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

/// Handler invoked with a reference to the dispatched arguments.
pub type Handler<A> = Arc<dyn Fn(&A) + Send + Sync>;

// == Subscription Id ==
/// Token returned by [`NotificationHub::add`], used to unregister a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription<A> {
    id: SubscriptionId,
    once: bool,
    handler: Handler<A>,
}

// == Notification Hub ==
/// A synchronous multi-subscriber event channel.
///
/// Handlers run on the dispatching call, in registration order, without any
/// internal lock held, so they may freely add or remove subscriptions
/// (including their own) or dispatch again.
pub struct NotificationHub<A> {
    subscriptions: Mutex<Vec<Subscription<A>>>,
    next_id: AtomicU64,
}

impl<A> NotificationHub<A> {
    // == Constructor ==
    /// Creates a hub with no subscribers.
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    // == Add ==
    /// Registers a persistent handler.
    pub fn add<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.register(Arc::new(handler), false)
    }

    // == Add Once ==
    /// Registers a handler that is unregistered right before its first invocation.
    pub fn add_once<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.register(Arc::new(handler), true)
    }

    // == Remove ==
    /// Unregisters a handler. Returns false if it was not registered.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = lock(&self.subscriptions);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Returns true if the handler is still registered.
    pub fn contains(&self, id: SubscriptionId) -> bool {
        lock(&self.subscriptions).iter().any(|s| s.id == id)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.subscriptions).is_empty()
    }

    // == Dispatch ==
    /// Invokes every handler registered when the dispatch started.
    ///
    /// A handler removed by an earlier handler of the same dispatch is skipped.
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, args: &A) -> usize {
        let snapshot: Vec<SubscriptionId> =
            lock(&self.subscriptions).iter().map(|s| s.id).collect();
        let mut invoked = 0;

        for id in snapshot {
            let handler = {
                let mut subscriptions = lock(&self.subscriptions);
                let Some(index) = subscriptions.iter().position(|s| s.id == id) else {
                    continue;
                };
                if subscriptions[index].once {
                    subscriptions.remove(index).handler
                } else {
                    Arc::clone(&subscriptions[index].handler)
                }
            };

            handler(args);
            invoked += 1;
        }

        trace!(invoked, "Dispatched notification");
        invoked
    }

    fn register(&self, handler: Handler<A>, once: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscriptions).push(Subscription { id, once, handler });
        id
    }
}

impl<A> Default for NotificationHub<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for NotificationHub<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationHub")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// No lock in this crate is held while caller code runs, so a poisoned lock
/// never guards half-updated state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Handler<u32>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |name: &str| -> Handler<u32> {
            let log = Arc::clone(&log_clone);
            let name = name.to_string();
            Arc::new(move |value: &u32| log.lock().unwrap().push(format!("{name}:{value}")))
        };
        (log, make)
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let hub = NotificationHub::<u32>::new();
        let (log, make) = recorder();

        let a = make("a");
        let b = make("b");
        hub.add(move |v| a(v));
        hub.add(move |v| b(v));

        assert_eq!(hub.dispatch(&7), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:7", "b:7"]);
    }

    #[test]
    fn test_add_once_fires_once() {
        let hub = NotificationHub::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let id = hub.add_once(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(hub.contains(id));

        hub.dispatch(&1);
        hub.dispatch(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!hub.contains(id));
        assert!(hub.is_empty());
    }

    #[test]
    fn test_remove() {
        let hub = NotificationHub::<u32>::new();
        let id = hub.add(|_| panic!("removed handler must not run"));

        assert!(hub.remove(id));
        assert!(!hub.remove(id));
        assert_eq!(hub.dispatch(&1), 0);
    }

    #[test]
    fn test_handler_removed_during_dispatch_is_skipped() {
        let hub = Arc::new(NotificationHub::<u32>::new());
        let (log, make) = recorder();

        let victim_slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let hub_clone = Arc::clone(&hub);
        let slot_clone = Arc::clone(&victim_slot);
        let first = make("first");
        hub.add(move |v| {
            first(v);
            if let Some(id) = slot_clone.lock().unwrap().take() {
                hub_clone.remove(id);
            }
        });
        let victim = make("victim");
        let victim_id = hub.add(move |v| victim(v));
        *victim_slot.lock().unwrap() = Some(victim_id);
        let last = make("last");
        hub.add(move |v| last(v));

        assert_eq!(hub.dispatch(&1), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first:1", "last:1"]);
    }

    #[test]
    fn test_handler_added_during_dispatch_waits_for_next() {
        let hub = Arc::new(NotificationHub::<u32>::new());
        let (log, make) = recorder();

        let hub_clone = Arc::clone(&hub);
        let late = make("late");
        hub.add_once(move |_| {
            let late = Arc::clone(&late);
            hub_clone.add(move |v| late(v));
        });

        assert_eq!(hub.dispatch(&1), 1);
        assert!(log.lock().unwrap().is_empty());

        assert_eq!(hub.dispatch(&2), 1);
        assert_eq!(*log.lock().unwrap(), vec!["late:2"]);
    }

    #[test]
    fn test_self_removal_does_not_skip_neighbours() {
        let hub = Arc::new(NotificationHub::<u32>::new());
        let (log, make) = recorder();

        let own_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let hub_clone = Arc::clone(&hub);
        let own_clone = Arc::clone(&own_id);
        let selfish = make("self");
        let id = hub.add(move |v| {
            selfish(v);
            if let Some(id) = *own_clone.lock().unwrap() {
                hub_clone.remove(id);
            }
        });
        *own_id.lock().unwrap() = Some(id);
        let next = make("next");
        hub.add(move |v| next(v));

        hub.dispatch(&1);
        hub.dispatch(&2);

        assert_eq!(*log.lock().unwrap(), vec!["self:1", "next:1", "next:2"]);
    }
}
