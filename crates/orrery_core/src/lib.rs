//! Orrery Core Runtime
//!
//! This crate provides the foundational primitives the rest of Orrery builds on:
//!
//! - **Reactive Signals**: fine-grained signals, derived values and effects
//! - **Owner Scopes**: construct/teardown pairs with guaranteed cleanup order
//! - **Context**: values provided by a scope to all of its descendants
//! - **Input Surface**: an event target fed by the host, plus a listener set
//!   that unbinds everything it bound in one call
//! - **Math**: small vector/quaternion types used by the controllers
//!
//! # Example
//!
//! ```rust
//! use orrery_core::reactive::ReactiveGraph;
//!
//! let graph = ReactiveGraph::new();
//!
//! let count = graph.create_signal(0i32);
//! let doubled = graph.create_derived(move |g| g.get(count).unwrap_or(0) * 2);
//!
//! graph.set(count, 5);
//! assert_eq!(graph.get_derived(doubled), Some(10));
//! ```

pub mod emitter;
pub mod error;
pub mod input;
pub mod math;
pub mod reactive;
pub mod value;

pub use emitter::{Emitter, SubscriptionKey};
pub use error::{CoreError, Result};
pub use input::{
    Element, EventKind, InputEvent, KeyEvent, ListenerId, ListenerSet, Modifiers, PointerButton,
    PointerEvent, WeakElement, WheelEvent,
};
pub use math::{Quat, Size, Spherical, Vec2, Vec3};
pub use reactive::{
    Derived, DerivedId, Effect, EffectId, Owner, ReactiveGraph, ReactiveStats, Scope, ScopeId,
    Signal, SignalId, State,
};
pub use value::Value;
