//! Synchronous callback lists.

use std::cell::RefCell;
use std::rc::Rc;

/// Handle returned by [`Event::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(usize);

/// An ordered list of handlers invoked synchronously on every `emit`.
///
/// # Example
/// ```rust,no_run
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use rampart::attack::Event;
///
/// let seen = Rc::new(Cell::new(0));
/// let event = Event::new();
/// let counter = Rc::clone(&seen);
/// event.subscribe(move |v: &i32| counter.set(counter.get() + v));
/// event.emit(&3);
/// assert_eq!(seen.get(), 3);
/// ```
pub struct Event<T> {
    handlers: RefCell<Vec<(HandlerId, Rc<dyn Fn(&T)>)>>,
    next_id: std::cell::Cell<usize>,
}

impl<T> Event<T> {
    /// Create an event without handlers.
    pub fn new() -> Self {
        Self {
            handlers: RefCell::new(Vec::new()),
            next_id: std::cell::Cell::new(0),
        }
    }

    /// Register a handler; handlers run in subscription order.
    pub fn subscribe(&self, handler: impl Fn(&T) + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.handlers.borrow_mut().push((id, Rc::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    /// Invoke every handler with `payload`.
    ///
    /// Handlers subscribed while emitting run from the next `emit` on.
    pub fn emit(&self, payload: &T) {
        let snapshot: Vec<Rc<dyn Fn(&T)>> =
            self.handlers.borrow().iter().map(|(_, h)| Rc::clone(h)).collect();
        for handler in snapshot {
            handler(payload);
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("handlers", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_handlers_run_in_order_and_unsubscribe() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let event = Event::new();
        let (a, b) = (Rc::clone(&log), Rc::clone(&log));
        let first = event.subscribe(move |v: &u8| a.borrow_mut().push(("a", *v)));
        event.subscribe(move |v: &u8| b.borrow_mut().push(("b", *v)));
        event.emit(&1);
        assert!(event.unsubscribe(first));
        assert!(!event.unsubscribe(first));
        event.emit(&2);
        assert_eq!(*log.borrow(), vec![("a", 1), ("b", 1), ("b", 2)]);
    }

    #[test]
    fn test_subscribe_during_emit() {
        let event = Rc::new(Event::<()>::new());
        let inner = Rc::clone(&event);
        event.subscribe(move |_| {
            inner.subscribe(|_| {});
        });
        event.emit(&());
        assert_eq!(event.len(), 2);
    }
}
