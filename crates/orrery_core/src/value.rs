//! Props that may be static or reactive
//!
//! Component props accept either a literal, a [`State`] signal, or a closure
//! computing the value from other reactive reads. Reading through
//! [`Value::get`] inside an effect subscribes the effect to the underlying
//! signals; [`Value::get_untracked`] is a one-time read.

use crate::reactive::State;
use std::fmt;
use std::rc::Rc;

/// A value that can be resolved at effect time
pub enum Value<T> {
    /// A value that never changes
    Static(T),
    /// A value backed by a signal
    Signal(State<T>),
    /// A value computed from other reactive reads
    Derived(Rc<dyn Fn() -> T>),
}

impl<T: Clone + Default + 'static> Value<T> {
    /// Resolve the current value, tracking reactive reads
    pub fn get(&self) -> T {
        match self {
            Value::Static(value) => value.clone(),
            Value::Signal(state) => state.get(),
            Value::Derived(compute) => compute(),
        }
    }

    /// Resolve the current value without tracking
    pub fn get_untracked(&self) -> T {
        match self {
            Value::Static(value) => value.clone(),
            Value::Signal(state) => state.get_untracked().unwrap_or_default(),
            Value::Derived(compute) => compute(),
        }
    }

    /// Check if this is a static value (never changes)
    pub fn is_static(&self) -> bool {
        matches!(self, Value::Static(_))
    }

    /// Wrap a closure as a derived value
    pub fn derived(compute: impl Fn() -> T + 'static) -> Self {
        Value::Derived(Rc::new(compute))
    }
}

impl<T: Clone> Clone for Value<T> {
    fn clone(&self) -> Self {
        match self {
            Value::Static(value) => Value::Static(value.clone()),
            Value::Signal(state) => Value::Signal(state.clone()),
            Value::Derived(compute) => Value::Derived(Rc::clone(compute)),
        }
    }
}

impl<T: Default> Default for Value<T> {
    fn default() -> Self {
        Value::Static(T::default())
    }
}

impl<T> From<T> for Value<T> {
    fn from(value: T) -> Self {
        Value::Static(value)
    }
}

impl<T> From<State<T>> for Value<T> {
    fn from(state: State<T>) -> Self {
        Value::Signal(state)
    }
}

impl<T: fmt::Debug> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Value::Signal(state) => f.debug_tuple("Signal").field(state).finish(),
            Value::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ReactiveGraph;
    use std::cell::Cell;

    #[test]
    fn test_signal_value_is_tracked() {
        let graph = ReactiveGraph::new();
        let scope = graph.create_scope();
        let state = scope.create_state(false);
        let prop: Value<bool> = state.clone().into();
        let runs = Rc::new(Cell::new(0));

        let counter = runs.clone();
        scope.create_effect(move |_| {
            let _ = prop.get();
            counter.set(counter.get() + 1);
        });

        state.set(true);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_static_value() {
        let prop: Value<u8> = 3.into();
        assert!(prop.is_static());
        assert_eq!(prop.get(), 3);
        assert_eq!(prop.get_untracked(), 3);
    }
}
