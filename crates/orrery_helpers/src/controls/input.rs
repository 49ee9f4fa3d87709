//! Shared input plumbing for controllers
//!
//! Every controller owns a [`ControlsCore`]: the enabled flag, the event
//! emitter and the set of element listeners it bound. Listener closures
//! hold only weak references to controller state and release their borrow
//! before emitting, so subscribers may freely call back into the controller.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use orrery_core::{Element, Emitter, EventKind, InputEvent, ListenerSet, PointerButton, Vec2, Vec3};
use orrery_fiber::ControlsEvent;
use smallvec::SmallVec;

/// Events a handler wants emitted once its borrow is released
pub(crate) type Emitted = SmallVec<[ControlsEvent; 2]>;

pub(crate) fn emitted(events: &[ControlsEvent]) -> Emitted {
    events.iter().cloned().collect()
}

/// State common to every controller
pub(crate) struct ControlsCore {
    kind: &'static str,
    enabled: Rc<Cell<bool>>,
    events: Rc<Emitter<ControlsEvent>>,
    listeners: RefCell<ListenerSet>,
    disposed: Cell<bool>,
}

impl ControlsCore {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            enabled: Rc::new(Cell::new(true)),
            events: Rc::new(Emitter::new()),
            listeners: RefCell::new(ListenerSet::new()),
            disposed: Cell::new(false),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    pub fn events(&self) -> &Emitter<ControlsEvent> {
        &self.events
    }

    pub fn emit(&self, event: ControlsEvent) {
        self.events.emit(&event);
    }

    /// Element the listeners are bound to
    pub fn element(&self) -> Option<Element> {
        self.listeners.borrow().element()
    }

    /// Start a fresh connection: drop listeners bound to any element
    ///
    /// Returns false once disposed.
    pub fn begin_connect(&self) -> bool {
        if self.disposed.get() {
            tracing::warn!(kind = self.kind, "connect on disposed controls ignored");
            return false;
        }
        self.disconnect();
        true
    }

    /// Bind `handler` for events of `kind` on `element`
    ///
    /// The handler runs with the controller state mutably borrowed and only
    /// while the controller is enabled; the events it returns are emitted
    /// afterwards. Releases (pointer up or cancel, key up) are delivered even
    /// while disabled so a drag or held key begun before disabling still ends.
    pub fn listen<S: 'static>(
        &self,
        element: &Element,
        kind: EventKind,
        state: &Rc<RefCell<S>>,
        handler: impl Fn(&mut S, &InputEvent, &Element) -> Emitted + 'static,
    ) {
        let state = Rc::downgrade(state);
        let enabled = Rc::downgrade(&self.enabled);
        let events = Rc::downgrade(&self.events);
        let target = element.downgrade();

        self.listeners.borrow_mut().bind(element, kind, move |event| {
            let (Some(state), Some(enabled), Some(events), Some(element)) = (
                state.upgrade(),
                enabled.upgrade(),
                events.upgrade(),
                target.upgrade(),
            ) else {
                return;
            };
            if !enabled.get() && !is_release(event) {
                return;
            }
            let out = {
                let Ok(mut state) = state.try_borrow_mut() else {
                    return;
                };
                handler(&mut state, event, &element)
            };
            for event in out {
                events.emit(&event);
            }
        });
    }

    /// Remove every element listener; returns how many were removed
    pub fn disconnect(&self) -> usize {
        self.listeners.borrow_mut().unbind_all()
    }

    /// Disconnect and drop all subscribers; returns false if already disposed
    pub fn dispose(&self) -> bool {
        if self.disposed.replace(true) {
            return false;
        }
        self.disconnect();
        self.events.clear();
        true
    }
}

fn is_release(event: &InputEvent) -> bool {
    matches!(
        event,
        InputEvent::PointerUp(_) | InputEvent::PointerCancel(_) | InputEvent::KeyUp(_)
    )
}

/// Tracks the active drag of one pointer
#[derive(Clone, Copy, Debug)]
pub(crate) struct PointerDrag<M> {
    pub mode: Option<M>,
    pub pointer_id: u32,
    pub last: Vec2,
}

impl<M> Default for PointerDrag<M> {
    fn default() -> Self {
        Self {
            mode: None,
            pointer_id: 0,
            last: Vec2::ZERO,
        }
    }
}

impl<M: Copy> PointerDrag<M> {
    pub fn begin(&mut self, mode: M, pointer_id: u32, at: Vec2, element: &Element) {
        self.mode = Some(mode);
        self.pointer_id = pointer_id;
        self.last = at;
        element.set_pointer_capture(pointer_id);
    }

    /// Movement since the previous position, if this pointer is dragging
    pub fn movement(&mut self, pointer_id: u32, at: Vec2) -> Option<(M, Vec2)> {
        let mode = self.mode?;
        if pointer_id != self.pointer_id {
            return None;
        }
        let delta = at - self.last;
        self.last = at;
        Some((mode, delta))
    }

    /// End the drag; returns whether one was active
    pub fn end(&mut self, pointer_id: u32, element: &Element) -> bool {
        if self.mode.is_none() || pointer_id != self.pointer_id {
            return false;
        }
        self.mode = None;
        element.release_pointer_capture(pointer_id);
        true
    }

    /// Drop the drag without touching pointer capture; returns whether one was active
    pub fn cancel(&mut self) -> bool {
        self.mode.take().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.mode.is_some()
    }
}

/// Which pointer buttons map to which action
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MouseButtons<A> {
    pub primary: Option<A>,
    pub middle: Option<A>,
    pub secondary: Option<A>,
}

impl<A: Copy> MouseButtons<A> {
    pub fn action(&self, button: PointerButton) -> Option<A> {
        match button {
            PointerButton::Primary => self.primary,
            PointerButton::Middle => self.middle,
            PointerButton::Secondary => self.secondary,
        }
    }
}

/// Held movement keys
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MoveKeys {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub roll_left: bool,
    pub roll_right: bool,
    pub pitch_up: bool,
    pub pitch_down: bool,
    pub yaw_left: bool,
    pub yaw_right: bool,
    /// Fine movement (shift)
    pub slow: bool,
}

impl MoveKeys {
    /// Apply a key transition; returns false for unmapped keys
    pub fn apply(&mut self, code: &str, pressed: bool) -> bool {
        let slot = match code {
            "KeyW" => &mut self.forward,
            "KeyS" => &mut self.backward,
            "KeyA" => &mut self.left,
            "KeyD" => &mut self.right,
            "KeyR" => &mut self.up,
            "KeyF" => &mut self.down,
            "KeyQ" => &mut self.roll_left,
            "KeyE" => &mut self.roll_right,
            "ArrowUp" => &mut self.pitch_up,
            "ArrowDown" => &mut self.pitch_down,
            "ArrowLeft" => &mut self.yaw_left,
            "ArrowRight" => &mut self.yaw_right,
            "ShiftLeft" | "ShiftRight" => &mut self.slow,
            _ => return false,
        };
        *slot = pressed;
        true
    }

    /// Translation direction in camera space, unnormalized
    pub fn movement(&self) -> Vec3 {
        let axis = |neg: bool, pos: bool| (pos as i8 - neg as i8) as f32;
        Vec3::new(
            axis(self.left, self.right),
            axis(self.down, self.up),
            axis(self.forward, self.backward),
        )
    }

    /// Rotation rates (pitch, yaw, roll) in camera space, unnormalized
    pub fn rotation(&self) -> Vec3 {
        let axis = |neg: bool, pos: bool| (pos as i8 - neg as i8) as f32;
        Vec3::new(
            axis(self.pitch_down, self.pitch_up),
            axis(self.yaw_right, self.yaw_left),
            axis(self.roll_right, self.roll_left),
        )
    }

    pub fn any(&self) -> bool {
        self.movement() != Vec3::ZERO || self.rotation() != Vec3::ZERO
    }
}

/// Event kinds every pointer-driven controller listens to
pub(crate) const POINTER_KINDS: [EventKind; 4] = [
    EventKind::PointerDown,
    EventKind::PointerMove,
    EventKind::PointerUp,
    EventKind::PointerCancel,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_keys_axes() {
        let mut keys = MoveKeys::default();
        assert!(keys.apply("KeyW", true));
        assert!(keys.apply("KeyD", true));
        assert!(!keys.apply("KeyZ", true));
        assert_eq!(keys.movement(), Vec3::new(1.0, 0.0, -1.0));

        keys.apply("KeyW", false);
        keys.apply("KeyD", false);
        assert!(!keys.any());
    }

    #[test]
    fn test_listener_skips_when_disabled_and_after_dispose() {
        let core = ControlsCore::new("test");
        let element = Element::new("canvas");
        let state = Rc::new(RefCell::new(0u32));
        let changes = Rc::new(Cell::new(0));

        let counter = changes.clone();
        core.events().subscribe(move |_| counter.set(counter.get() + 1));
        core.listen(&element, EventKind::PointerDown, &state, |count, _, _| {
            *count += 1;
            emitted(&[ControlsEvent::Change])
        });

        core.listen(&element, EventKind::PointerUp, &state, |count, _, _| {
            *count += 10;
            Emitted::new()
        });

        let down = InputEvent::PointerDown(Default::default());
        element.dispatch(&down);
        core.set_enabled(false);
        element.dispatch(&down);
        assert_eq!(*state.borrow(), 1);
        assert_eq!(changes.get(), 1);

        // Releases still arrive while disabled
        element.dispatch(&InputEvent::PointerUp(Default::default()));
        assert_eq!(*state.borrow(), 11);

        core.set_enabled(true);
        assert!(core.dispose());
        assert!(!core.dispose());
        element.dispatch(&down);
        assert_eq!(*state.borrow(), 11);
        assert_eq!(element.listener_count(), 0);
    }

    #[test]
    fn test_pointer_drag_tracks_one_pointer() {
        let element = Element::new("canvas");
        let mut drag = PointerDrag::<u8>::default();
        drag.begin(1, 7, Vec2::new(10.0, 10.0), &element);
        assert!(element.has_pointer_capture(7));

        assert_eq!(drag.movement(3, Vec2::new(50.0, 50.0)), None);
        assert_eq!(
            drag.movement(7, Vec2::new(15.0, 5.0)),
            Some((1, Vec2::new(5.0, -5.0)))
        );
        assert!(drag.end(7, &element));
        assert!(!drag.end(7, &element));
        assert!(!element.has_pointer_capture(7));
    }
}
