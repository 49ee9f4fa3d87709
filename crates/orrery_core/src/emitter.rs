//! Typed event emitter for scene objects
//!
//! Controllers announce `change`/`start`/`end` through an [`Emitter`];
//! bindings subscribe to forward those into the render context.

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

new_key_type! {
    /// Handle for unsubscribing from an emitter
    pub struct SubscriptionKey;
}

/// Synchronous multi-subscriber emitter
pub struct Emitter<E> {
    subscribers: RefCell<SlotMap<SubscriptionKey, Rc<dyn Fn(&E)>>>,
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Self {
            subscribers: RefCell::new(SlotMap::with_key()),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self, callback: impl Fn(&E) + 'static) -> SubscriptionKey {
        self.subscribers.borrow_mut().insert(Rc::new(callback))
    }

    /// Unsubscribe; returns false if the key was already removed
    pub fn unsubscribe(&self, key: SubscriptionKey) -> bool {
        self.subscribers.borrow_mut().remove(key).is_some()
    }

    /// Notify every subscriber in subscription order
    ///
    /// Subscribers removed by an earlier subscriber during the same emit are
    /// skipped.
    pub fn emit(&self, event: &E) {
        let subscribers: SmallVec<[(SubscriptionKey, Rc<dyn Fn(&E)>); 4]> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(key, callback)| (key, Rc::clone(callback)))
            .collect();
        for (key, callback) in subscribers {
            if self.subscribers.borrow().contains_key(key) {
                callback(event);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.borrow().is_empty()
    }

    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.subscribers.borrow_mut());
        drop(removed);
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("subscribers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_emit_and_unsubscribe() {
        let emitter = Emitter::<u32>::new();
        let total = Rc::new(Cell::new(0));

        let sum = total.clone();
        let key = emitter.subscribe(move |value| sum.set(sum.get() + value));

        emitter.emit(&2);
        assert!(emitter.unsubscribe(key));
        assert!(!emitter.unsubscribe(key));
        emitter.emit(&5);

        assert_eq!(total.get(), 2);
        assert!(emitter.is_empty());
    }
}
