//! Synchronous change notification.
//!
//! The store holds subscribers weakly: subscribing does not keep an observer alive,
//! and observers that have been dropped are pruned on the next notification.
//! Callbacks run on the writer's thread, outside the subscriber lock, and carry no
//! indication of which channel changed.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Receives "something changed" callbacks from the shared state.
///
/// Implemented for every `Fn() + Send + Sync` closure.
pub trait StateObserver: Send + Sync {
    /// Called after each write.
    fn state_changed(&self);
}

impl<F> StateObserver for F
where
    F: Fn() + Send + Sync,
{
    fn state_changed(&self) {
        self()
    }
}

/// Handle returned by subscribe, used to unsubscribe explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct ObserverSet {
    next_id: AtomicU64,
    observers: RwLock<Vec<(SubscriptionId, Weak<dyn StateObserver>)>>,
}

impl ObserverSet {
    pub(crate) fn subscribe(&self, observer: &Arc<dyn StateObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::downgrade(observer)));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub(crate) fn notify(&self) {
        let (live, dead) = {
            let observers = self.observers.read();
            let live: Vec<Arc<dyn StateObserver>> =
                observers.iter().filter_map(|(_, weak)| weak.upgrade()).collect();
            let dead = live.len() != observers.len();
            (live, dead)
        };

        for observer in &live {
            observer.state_changed();
        }

        if dead {
            self.observers
                .write()
                .retain(|(_, weak)| weak.strong_count() > 0);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.read().len()
    }
}
