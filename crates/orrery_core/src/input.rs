//! Input surface
//!
//! [`Element`] stands in for the render surface a host window or canvas
//! exposes: controllers register listeners on it and the host feeds it
//! pointer, wheel and keyboard events through [`Element::dispatch`].
//!
//! [`ListenerSet`] is the one bind-and-auto-unbind utility every controller
//! uses: listeners bound through it are removed together on
//! [`ListenerSet::unbind_all`] or when the set is dropped.

use crate::math::{Size, Vec2};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

new_key_type! {
    /// Handle to a listener registered on an [`Element`]
    pub struct ListenerId;
}

/// Event categories a listener can subscribe to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    PointerDown,
    PointerMove,
    PointerUp,
    PointerCancel,
    Wheel,
    KeyDown,
    KeyUp,
    ContextMenu,
    PointerLockChange,
}

/// Mouse/pen/touch button
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PointerButton {
    #[default]
    Primary,
    Middle,
    Secondary,
}

/// Keyboard modifier state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

/// Pointer event payload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointerEvent {
    pub pointer_id: u32,
    pub button: PointerButton,
    /// Position relative to the element, in CSS pixels
    pub position: Vec2,
    /// Movement since the previous event (meaningful under pointer lock)
    pub movement: Vec2,
    pub modifiers: Modifiers,
}

impl PointerEvent {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            position: Vec2::new(x, y),
            ..Default::default()
        }
    }

    pub fn with_button(mut self, button: PointerButton) -> Self {
        self.button = button;
        self
    }

    pub fn with_pointer_id(mut self, pointer_id: u32) -> Self {
        self.pointer_id = pointer_id;
        self
    }

    pub fn with_movement(mut self, dx: f32, dy: f32) -> Self {
        self.movement = Vec2::new(dx, dy);
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// Wheel event payload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WheelEvent {
    /// Positive values scroll away from the user
    pub delta_y: f32,
    pub position: Vec2,
}

/// Keyboard event payload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyEvent {
    /// Physical key code, e.g. `KeyW`, `ArrowUp`, `ShiftLeft`
    pub code: String,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            modifiers: Modifiers::default(),
        }
    }
}

/// An input event delivered to an [`Element`]
#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    PointerDown(PointerEvent),
    PointerMove(PointerEvent),
    PointerUp(PointerEvent),
    PointerCancel(PointerEvent),
    Wheel(WheelEvent),
    KeyDown(KeyEvent),
    KeyUp(KeyEvent),
    ContextMenu,
    PointerLockChange { locked: bool },
}

impl InputEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InputEvent::PointerDown(_) => EventKind::PointerDown,
            InputEvent::PointerMove(_) => EventKind::PointerMove,
            InputEvent::PointerUp(_) => EventKind::PointerUp,
            InputEvent::PointerCancel(_) => EventKind::PointerCancel,
            InputEvent::Wheel(_) => EventKind::Wheel,
            InputEvent::KeyDown(_) => EventKind::KeyDown,
            InputEvent::KeyUp(_) => EventKind::KeyUp,
            InputEvent::ContextMenu => EventKind::ContextMenu,
            InputEvent::PointerLockChange { .. } => EventKind::PointerLockChange,
        }
    }

    pub fn pointer(&self) -> Option<&PointerEvent> {
        match self {
            InputEvent::PointerDown(p)
            | InputEvent::PointerMove(p)
            | InputEvent::PointerUp(p)
            | InputEvent::PointerCancel(p) => Some(p),
            _ => None,
        }
    }
}

type ListenerFn = Rc<dyn Fn(&InputEvent)>;

struct ListenerEntry {
    kind: EventKind,
    callback: ListenerFn,
}

struct ElementInner {
    label: String,
    listeners: RefCell<SlotMap<ListenerId, ListenerEntry>>,
    client_size: Cell<Size>,
    pointer_locked: Cell<bool>,
    captured_pointers: RefCell<SmallVec<[u32; 4]>>,
}

/// A render surface that receives input events
///
/// Cloning yields another handle to the same element; equality is identity.
#[derive(Clone)]
pub struct Element {
    inner: Rc<ElementInner>,
}

impl Element {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_size(label, Size::new(300.0, 150.0))
    }

    pub fn with_size(label: impl Into<String>, size: Size) -> Self {
        Self {
            inner: Rc::new(ElementInner {
                label: label.into(),
                listeners: RefCell::new(SlotMap::with_key()),
                client_size: Cell::new(size),
                pointer_locked: Cell::new(false),
                captured_pointers: RefCell::new(SmallVec::new()),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn client_size(&self) -> Size {
        self.inner.client_size.get()
    }

    pub fn set_client_size(&self, size: Size) {
        self.inner.client_size.set(size);
    }

    /// Register a listener for one event kind
    pub fn add_listener(&self, kind: EventKind, callback: impl Fn(&InputEvent) + 'static) -> ListenerId {
        self.inner.listeners.borrow_mut().insert(ListenerEntry {
            kind,
            callback: Rc::new(callback),
        })
    }

    /// Remove a listener; returns false if it was already removed
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.borrow_mut().remove(id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    pub fn listener_count_for(&self, kind: EventKind) -> usize {
        self.inner
            .listeners
            .borrow()
            .values()
            .filter(|entry| entry.kind == kind)
            .count()
    }

    /// Deliver an event to every listener of its kind
    ///
    /// Listeners may add or remove listeners while the event is delivered;
    /// the set of receivers is fixed when dispatch starts, and listeners
    /// removed during delivery are skipped. Returns the number of listeners
    /// invoked.
    pub fn dispatch(&self, event: &InputEvent) -> usize {
        let kind = event.kind();
        let receivers: SmallVec<[(ListenerId, ListenerFn); 8]> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .map(|(id, entry)| (id, Rc::clone(&entry.callback)))
            .collect();

        let mut delivered = 0;
        for (id, callback) in receivers {
            if !self.inner.listeners.borrow().contains_key(id) {
                continue;
            }
            callback(event);
            delivered += 1;
        }
        delivered
    }

    pub fn set_pointer_capture(&self, pointer_id: u32) {
        let mut captured = self.inner.captured_pointers.borrow_mut();
        if !captured.contains(&pointer_id) {
            captured.push(pointer_id);
        }
    }

    pub fn release_pointer_capture(&self, pointer_id: u32) {
        self.inner
            .captured_pointers
            .borrow_mut()
            .retain(|id| *id != pointer_id);
    }

    pub fn has_pointer_capture(&self, pointer_id: u32) -> bool {
        self.inner.captured_pointers.borrow().contains(&pointer_id)
    }

    pub fn is_pointer_locked(&self) -> bool {
        self.inner.pointer_locked.get()
    }

    /// Lock the pointer to this element and notify listeners
    pub fn request_pointer_lock(&self) {
        if !self.inner.pointer_locked.replace(true) {
            self.dispatch(&InputEvent::PointerLockChange { locked: true });
        }
    }

    /// Release a pointer lock and notify listeners
    pub fn exit_pointer_lock(&self) {
        if self.inner.pointer_locked.replace(false) {
            self.dispatch(&InputEvent::PointerLockChange { locked: false });
        }
    }

    pub fn downgrade(&self) -> WeakElement {
        WeakElement {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Element) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Element {}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("label", &self.inner.label)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Non-owning element handle
#[derive(Clone)]
pub struct WeakElement {
    inner: Weak<ElementInner>,
}

impl WeakElement {
    pub fn upgrade(&self) -> Option<Element> {
        self.inner.upgrade().map(|inner| Element { inner })
    }
}

impl fmt::Debug for WeakElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakElement")
    }
}

/// Listeners bound to one element, removed together
///
/// Binding to a different element first unbinds everything bound to the
/// previous one, so a set never straddles two elements.
#[derive(Default)]
pub struct ListenerSet {
    element: Option<WeakElement>,
    ids: SmallVec<[ListenerId; 8]>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a listener, remembering it for later removal
    pub fn bind(
        &mut self,
        element: &Element,
        kind: EventKind,
        callback: impl Fn(&InputEvent) + 'static,
    ) -> ListenerId {
        let same_element = self
            .element
            .as_ref()
            .and_then(WeakElement::upgrade)
            .is_some_and(|bound| bound.ptr_eq(element));
        if !same_element {
            self.unbind_all();
            self.element = Some(element.downgrade());
        }
        let id = element.add_listener(kind, callback);
        self.ids.push(id);
        id
    }

    /// Remove every listener this set bound
    ///
    /// Safe to call repeatedly; returns how many listeners were removed.
    pub fn unbind_all(&mut self) -> usize {
        let ids = std::mem::take(&mut self.ids);
        let Some(element) = self.element.take().and_then(|weak| weak.upgrade()) else {
            return 0;
        };
        ids.into_iter()
            .filter(|id| element.remove_listener(*id))
            .count()
    }

    /// The element listeners are currently bound to
    pub fn element(&self) -> Option<Element> {
        self.element.as_ref().and_then(WeakElement::upgrade)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Drop for ListenerSet {
    fn drop(&mut self) {
        self.unbind_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_filters_by_kind() {
        let element = Element::new("canvas");
        let hits = Rc::new(Cell::new(0));

        let counter = hits.clone();
        element.add_listener(EventKind::PointerDown, move |_| counter.set(counter.get() + 1));

        element.dispatch(&InputEvent::PointerDown(PointerEvent::at(1.0, 1.0)));
        element.dispatch(&InputEvent::PointerUp(PointerEvent::at(1.0, 1.0)));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_listener_removed_during_dispatch_is_skipped() {
        let element = Element::new("canvas");
        let hits = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(None));

        let el = element.clone();
        let victim = second.clone();
        element.add_listener(EventKind::Wheel, move |_| {
            if let Some(id) = victim.get() {
                el.remove_listener(id);
            }
        });
        let counter = hits.clone();
        second.set(Some(
            element.add_listener(EventKind::Wheel, move |_| counter.set(counter.get() + 1)),
        ));

        assert_eq!(element.dispatch(&InputEvent::Wheel(WheelEvent::default())), 1);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_listener_set_unbinds_on_drop() {
        let element = Element::new("canvas");
        {
            let mut set = ListenerSet::new();
            set.bind(&element, EventKind::PointerDown, |_| {});
            set.bind(&element, EventKind::PointerUp, |_| {});
            assert_eq!(element.listener_count(), 2);
        }
        assert_eq!(element.listener_count(), 0);
    }

    #[test]
    fn test_listener_set_rebinds_to_new_element() {
        let first = Element::new("first");
        let second = Element::new("second");
        let mut set = ListenerSet::new();

        set.bind(&first, EventKind::KeyDown, |_| {});
        set.bind(&second, EventKind::KeyDown, |_| {});

        assert_eq!(first.listener_count(), 0);
        assert_eq!(second.listener_count(), 1);
        assert_eq!(set.unbind_all(), 1);
        assert_eq!(set.unbind_all(), 0);
    }

    #[test]
    fn test_pointer_lock_notifies_once() {
        let element = Element::new("canvas");
        let changes = Rc::new(RefCell::new(Vec::new()));
        let sink = changes.clone();
        element.add_listener(EventKind::PointerLockChange, move |event| {
            if let InputEvent::PointerLockChange { locked } = event {
                sink.borrow_mut().push(*locked);
            }
        });

        element.request_pointer_lock();
        element.request_pointer_lock();
        element.exit_pointer_lock();
        assert_eq!(*changes.borrow(), vec![true, false]);
    }
}
