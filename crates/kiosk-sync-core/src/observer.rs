//! Synchronous observer lists
//!
//! Used for connectivity transitions and inbound push messages. Dispatch
//! iterates over a snapshot, so a callback may unsubscribe itself (or
//! anyone else) without disturbing the current notification round.

use std::sync::{Arc, Mutex, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Ordered list of subscribers for values of type `T`
pub struct Observers<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Observers<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Observers<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a callback, returning the token that removes it
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push((id, Arc::new(callback)));

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
                    registry.entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Call every current subscriber with `value`, in subscription order
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            callback(value);
        }
    }

    /// Number of live subscribers
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unsubscribe token returned by [`Observers::subscribe`]
///
/// Dropping the token keeps the subscription alive; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_in_subscription_order() {
        let observers = Observers::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            let _ = observers.subscribe(move |value| seen.lock().unwrap().push((tag, *value)));
        }

        observers.notify(&7);

        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7), ("c", 7)]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let observers = Observers::<u32>::new();
        let count = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&count);
        let sub = observers.subscribe(move |_| *counter.lock().unwrap() += 1);

        observers.notify(&1);
        sub.unsubscribe();
        observers.notify(&2);

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(observers.is_empty());
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let observers = Observers::<u32>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));

        let inner_slot = Arc::clone(&slot);
        let inner_calls = Arc::clone(&calls);
        let sub = observers.subscribe(move |_| {
            *inner_calls.lock().unwrap() += 1;
            if let Some(sub) = inner_slot.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        let later = Arc::new(Mutex::new(0));
        let later_count = Arc::clone(&later);
        let _ = observers.subscribe(move |_| *later_count.lock().unwrap() += 1);

        observers.notify(&1);
        observers.notify(&2);

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(*later.lock().unwrap(), 2);
    }

    #[test]
    fn test_unsubscribe_after_list_dropped() {
        let observers = Observers::<u32>::new();
        let sub = observers.subscribe(|_| {});
        drop(observers);
        sub.unsubscribe();
    }
}
