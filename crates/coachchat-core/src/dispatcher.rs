//! Event fan-out to registered listeners.
//!
//! The [`EventDispatcher`] owns its listener registry. Dispatch is
//! synchronous and follows registration order. Every listener runs inside an
//! isolating boundary: an `Err` or a panic from one listener is logged and
//! does not stop the remaining listeners, nor does it reach the caller.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
};

use crate::error::ListenerError;

/// Handle returned by [`EventDispatcher::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener<E> = Box<dyn FnMut(&E) -> Result<(), ListenerError> + Send>;

/// Result of a single [`EventDispatcher::dispatch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Listeners that returned `Ok`.
    pub delivered: usize,
    /// Listeners that returned `Err` or panicked.
    pub failed: usize,
}

/// Fan-out of events to an arbitrary number of listeners.
pub struct EventDispatcher<E> {
    listeners: Vec<(ListenerId, Listener<E>)>,
    next_id: u64,
}

impl<E> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventDispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher").field("listeners", &self.listeners.len()).finish()
    }
}

impl<E> EventDispatcher<E> {
    /// Create a dispatcher with no listeners.
    pub fn new() -> Self {
        Self { listeners: Vec::new(), next_id: 0 }
    }

    /// Register a listener.
    ///
    /// Registering the same closure twice yields two independent
    /// registrations, each receiving every event.
    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&E) -> Result<(), ListenerError> + Send + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a registration. Returns `false` if `id` was not registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(registered, _)| *registered != id);
        before != self.listeners.len()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Check if no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver `event` to every listener in registration order.
    pub fn dispatch(&mut self, event: &E) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for (id, listener) in &mut self.listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => outcome.delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(listener = ?id, error = %e, "event listener failed");
                    outcome.failed += 1;
                },
                Err(_) => {
                    tracing::warn!(listener = ?id, "event listener panicked");
                    outcome.failed += 1;
                },
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl FnMut(&u32) -> Result<(), ListenerError> + Send)
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |event: &u32| {
            sink.lock().unwrap().push(*event);
            Ok(())
        })
    }

    #[test]
    fn dispatch_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            dispatcher.add_listener(move |_: &u32| {
                order.lock().unwrap().push(tag);
                Ok(())
            });
        }

        let outcome = dispatcher.dispatch(&1);
        assert_eq!(outcome, DispatchOutcome { delivered: 3, failed: 0 });
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let (seen, listener) = recorder();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_listener(|_: &u32| Err(ListenerError::new("boom")));
        dispatcher.add_listener(listener);

        let outcome = dispatcher.dispatch(&7);

        assert_eq!(outcome, DispatchOutcome { delivered: 1, failed: 1 });
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn panicking_listener_is_contained() {
        let (seen, listener) = recorder();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_listener(|_: &u32| -> Result<(), ListenerError> {
            panic!("listener bug");
        });
        dispatcher.add_listener(listener);

        let outcome = dispatcher.dispatch(&3);

        assert_eq!(outcome.failed, 1);
        assert_eq!(*seen.lock().unwrap(), vec![3]);

        // Dispatcher stays usable after a panic
        dispatcher.dispatch(&4);
        assert_eq!(*seen.lock().unwrap(), vec![3, 4]);
    }

    #[test]
    fn double_registration_delivers_twice() {
        let seen = Arc::new(Mutex::new(0));
        let mut dispatcher = EventDispatcher::new();

        let make = || {
            let seen = Arc::clone(&seen);
            move |_: &u32| {
                *seen.lock().unwrap() += 1;
                Ok(())
            }
        };
        let first = dispatcher.add_listener(make());
        let second = dispatcher.add_listener(make());
        assert_ne!(first, second);

        dispatcher.dispatch(&0);
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn remove_listener() {
        let (seen, listener) = recorder();
        let mut dispatcher = EventDispatcher::new();
        let id = dispatcher.add_listener(listener);

        assert!(dispatcher.remove_listener(id));
        assert!(!dispatcher.remove_listener(id));
        assert!(dispatcher.is_empty());

        dispatcher.dispatch(&1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn empty_dispatcher_is_noop() {
        let mut dispatcher: EventDispatcher<u32> = EventDispatcher::default();
        assert_eq!(dispatcher.dispatch(&1), DispatchOutcome::default());
    }
}
