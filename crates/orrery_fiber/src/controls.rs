//! The controller interface seen by the render context
//!
//! Concrete controllers live in `orrery_helpers`; the render context only
//! needs to hold "the active controller" and let consumers such as
//! transform gizmos toggle it.

use orrery_core::{Element, Emitter};
use std::any::Any;
use std::rc::Rc;

/// Events a controller announces to its listeners
#[derive(Clone, Debug, PartialEq)]
pub enum ControlsEvent {
    /// The controlled camera or object moved
    Change,
    /// An interaction began
    Start,
    /// An interaction ended
    End,
    /// A transform gizmo started or stopped dragging
    DraggingChanged(bool),
    /// Pointer lock acquired
    Lock,
    /// Pointer lock released
    Unlock,
}

/// An interactive controller bound to an input surface
///
/// Methods take `&self`; implementations keep their state behind interior
/// mutability so a handle can be shared between the binding, the render
/// context and user code.
pub trait Controls {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// Attach input listeners to `element`
    fn connect(&self, element: &Element);

    /// Detach every input listener; safe to call when not connected
    fn disconnect(&self);

    /// Advance damping/inertia by `delta` seconds
    fn update(&self, delta: f32);

    /// Release all resources; the controller is unusable afterwards
    fn dispose(&self);

    fn events(&self) -> &Emitter<ControlsEvent>;

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a controller
pub type ControlsHandle = Rc<dyn Controls>;

/// Identity comparison of two controller handles
pub fn same_controls(a: &ControlsHandle, b: &ControlsHandle) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}
