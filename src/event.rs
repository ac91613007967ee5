//! Observer primitive with opaque subscription handles
//!
//! Used by query nodes for change propagation. Subscribing, unsubscribing,
//! or invoking while the same event is firing is a reentrancy error.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{EcsError, Result};

/// Opaque handle returned by [`Event::subscribe`], consumed by unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<A> = Box<dyn Fn(&A) + Send + Sync>;

struct Listeners<A> {
    next_id: u64,
    callbacks: Vec<(SubscriptionId, Callback<A>)>,
}

/// Multicast callback list with reentrancy detection.
///
/// Callbacks are invoked in an unspecified order. The `firing` flag is
/// checked before the listener lock is taken, so a callback that reaches
/// back into the same event fails instead of deadlocking.
pub struct Event<A = ()> {
    listeners: Mutex<Listeners<A>>,
    firing: AtomicBool,
}

/// Clears the firing flag even if a callback panics.
struct FiringGuard<'a>(&'a AtomicBool);

impl Drop for FiringGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<A> Event<A> {
    /// Create an event with no subscribers
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Listeners {
                next_id: 0,
                callbacks: Vec::new(),
            }),
            firing: AtomicBool::new(false),
        }
    }

    fn check_not_firing(&self) -> Result<()> {
        if self.firing.load(Ordering::Acquire) {
            return Err(EcsError::EventReentrancy);
        }
        Ok(())
    }

    /// Register a callback and return its handle.
    pub fn subscribe<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.check_not_firing()?;
        let mut listeners = self.listeners.lock();
        let id = SubscriptionId(listeners.next_id);
        listeners.next_id += 1;
        listeners.callbacks.push((id, Box::new(callback)));
        Ok(id)
    }

    /// Remove a callback by handle. Unknown handles are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.check_not_firing()?;
        self.listeners.lock().callbacks.retain(|(sub, _)| *sub != id);
        Ok(())
    }

    /// Whether the handle still refers to a registered callback
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.listeners.lock().callbacks.iter().any(|(sub, _)| *sub == id)
    }

    /// Number of registered callbacks
    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().callbacks.len()
    }

    /// Drop every registered callback.
    pub fn clear(&self) -> Result<()> {
        self.check_not_firing()?;
        self.listeners.lock().callbacks.clear();
        Ok(())
    }

    /// Call every registered callback with `arg`.
    ///
    /// Fails with [`EcsError::EventReentrancy`] when called from inside one
    /// of its own callbacks. Panics from callbacks propagate to the caller.
    pub fn invoke(&self, arg: &A) -> Result<()> {
        if self.firing.swap(true, Ordering::AcqRel) {
            return Err(EcsError::EventReentrancy);
        }
        let _guard = FiringGuard(&self.firing);

        let listeners = self.listeners.lock();
        for (_, callback) in listeners.callbacks.iter() {
            callback(arg);
        }
        Ok(())
    }
}

impl<A> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_invoke_calls_all_subscribers() {
        let event = Event::<u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            event
                .subscribe(move |value| {
                    seen.fetch_add(*value as usize, Ordering::SeqCst);
                })
                .unwrap();
        }

        event.invoke(&5).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_unsubscribe_by_handle() {
        let event = Event::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_a = Arc::clone(&hits);
        let a = event.subscribe(move |_: &()| {
            hits_a.fetch_add(1, Ordering::SeqCst);
        });
        let a = a.unwrap();
        let hits_b = Arc::clone(&hits);
        event
            .subscribe(move |_: &()| {
                hits_b.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(event.is_subscribed(a));
        event.unsubscribe(a).unwrap();
        assert!(!event.is_subscribed(a));

        event.invoke(&()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(event.subscriber_count(), 1);

        // Unknown handle is a no-op
        event.unsubscribe(a).unwrap();
    }

    #[test]
    fn test_reentrant_invoke_fails() {
        let event = Arc::new(Event::new());
        let inner_result = Arc::new(Mutex::new(None));

        let reentrant = Arc::clone(&event);
        let slot = Arc::clone(&inner_result);
        event
            .subscribe(move |_: &()| {
                *slot.lock() = Some(reentrant.invoke(&()));
            })
            .unwrap();

        event.invoke(&()).unwrap();
        assert_eq!(
            inner_result.lock().take(),
            Some(Err(EcsError::EventReentrancy))
        );

        // Flag resets afterwards, the event stays usable.
        event.invoke(&()).unwrap();
    }

    #[test]
    fn test_subscribe_during_invoke_fails() {
        let event = Arc::new(Event::new());
        let inner_result = Arc::new(Mutex::new(None));

        let reentrant = Arc::clone(&event);
        let slot = Arc::clone(&inner_result);
        event
            .subscribe(move |_: &()| {
                *slot.lock() = Some(reentrant.subscribe(|_: &()| {}).err());
            })
            .unwrap();

        event.invoke(&()).unwrap();
        assert_eq!(inner_result.lock().take(), Some(Some(EcsError::EventReentrancy)));
        assert_eq!(event.subscriber_count(), 1);
    }
}
