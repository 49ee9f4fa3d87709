//! The render context store
//!
//! One [`RenderContext`] exists per [`Root`](crate::Root). Every field lives
//! in its own signal, so an effect that reads the camera is not re-run when
//! the pixel ratio changes. Writes go through [`RenderContext::set`], a
//! shallow merge applied inside one reactive batch.
//!
//! The context also arbitrates the *default slot*: the one controller other
//! components should treat as "the" controls of the scene. Claims form a
//! stack; releasing any claim restores the most recent remaining claim, or
//! the value the slot held before the first claim.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use orrery_core::{Element, PointerEvent, ReactiveGraph, Signal, Size, Vec2, Vec3};

use crate::config::DprRange;
use crate::controls::{same_controls, ControlsHandle};
use crate::error::{FiberError, Result};
use crate::frameloop::{FrameRequests, Frameloop};
use crate::performance::{Performance, Regression};
use crate::scene::{Camera, CameraHandle, Projection, RendererHandle, SceneHandle};
use crate::scheduler::FrameScheduler;

// ============================================================================
// Field types
// ============================================================================

/// Visible world extent at the camera's focus distance
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    /// World units across the output
    pub width: f32,
    /// World units from bottom to top of the output
    pub height: f32,
    /// Pixels per world unit
    pub factor: f32,
    /// Distance from camera to the focus point
    pub distance: f32,
    pub aspect: f32,
    pub dpr: f32,
}

impl Viewport {
    /// Compute the viewport of `camera` looking at `target`
    pub fn compute(camera: &Camera, size: Size, dpr: f32, target: Vec3) -> Self {
        let aspect = size.aspect();
        let distance = camera.position.distance(target);
        match camera.projection {
            Projection::Perspective { fov, .. } => {
                let height = 2.0 * (fov.to_radians() / 2.0).tan() * distance;
                let width = height * aspect;
                let factor = if width > 0.0 { size.width / width } else { 0.0 };
                Self {
                    width,
                    height,
                    factor,
                    distance,
                    aspect,
                    dpr,
                }
            }
            Projection::Orthographic { .. } => {
                let zoom = if camera.zoom > 0.0 { camera.zoom } else { 1.0 };
                Self {
                    width: size.width / zoom,
                    height: size.height / zoom,
                    factor: 1.0,
                    distance,
                    aspect,
                    dpr,
                }
            }
        }
    }
}

/// Maps a pointer position to normalized device coordinates
pub type EventCompute = Rc<dyn Fn(&PointerEvent, Size) -> Vec2>;

fn default_event_compute(event: &PointerEvent, size: Size) -> Vec2 {
    if size.width <= 0.0 || size.height <= 0.0 {
        return Vec2::ZERO;
    }
    Vec2::new(
        event.position.x / size.width * 2.0 - 1.0,
        -(event.position.y / size.height) * 2.0 + 1.0,
    )
}

/// Pointer-event routing state
#[derive(Clone)]
pub struct EventsState {
    /// Whether scene objects receive raycast pointer events
    pub enabled: bool,
    /// Priority of this root's event layer
    pub priority: i32,
    /// Element the event layer listens on
    pub connected: Option<Element>,
    pub compute: EventCompute,
}

impl EventsState {
    pub fn new(enabled: bool, connected: Option<Element>) -> Self {
        Self {
            enabled,
            priority: 1,
            connected,
            compute: Rc::new(default_event_compute),
        }
    }

    /// Pointer position in normalized device coordinates
    pub fn pointer_ndc(&self, event: &PointerEvent, size: Size) -> Vec2 {
        (self.compute)(event, size)
    }
}

impl PartialEq for EventsState {
    fn eq(&self, other: &Self) -> bool {
        self.enabled == other.enabled
            && self.priority == other.priority
            && self.connected == other.connected
            && Rc::ptr_eq(&self.compute, &other.compute)
    }
}

impl std::fmt::Debug for EventsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventsState")
            .field("enabled", &self.enabled)
            .field("priority", &self.priority)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Patches
// ============================================================================

/// Partial update of the render context; absent fields are left untouched
#[derive(Clone, Default)]
pub struct RenderContextPatch {
    pub camera: Option<CameraHandle>,
    pub dom_element: Option<Element>,
    pub size: Option<Size>,
    pub viewport: Option<Viewport>,
    pub dpr: Option<f32>,
    pub performance: Option<Performance>,
    /// `Some(None)` clears the active controller
    pub controls: Option<Option<ControlsHandle>>,
    pub events: Option<EventsState>,
    pub frameloop: Option<Frameloop>,
}

impl RenderContextPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera(mut self, camera: CameraHandle) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn dom_element(mut self, element: Element) -> Self {
        self.dom_element = Some(element);
        self
    }

    pub fn size(mut self, size: Size) -> Self {
        self.size = Some(size);
        self
    }

    pub fn viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn dpr(mut self, dpr: f32) -> Self {
        self.dpr = Some(dpr);
        self
    }

    pub fn performance(mut self, performance: Performance) -> Self {
        self.performance = Some(performance);
        self
    }

    pub fn controls(mut self, controls: Option<ControlsHandle>) -> Self {
        self.controls = Some(controls);
        self
    }

    pub fn events(mut self, events: EventsState) -> Self {
        self.events = Some(events);
        self
    }

    pub fn frameloop(mut self, frameloop: Frameloop) -> Self {
        self.frameloop = Some(frameloop);
        self
    }
}

/// Partial update of [`EventsState`]
#[derive(Clone, Default)]
pub struct EventsPatch {
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
    pub connected: Option<Option<Element>>,
    pub compute: Option<EventCompute>,
}

impl EventsPatch {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    fn apply(self, mut events: EventsState) -> EventsState {
        if let Some(enabled) = self.enabled {
            events.enabled = enabled;
        }
        if let Some(priority) = self.priority {
            events.priority = priority;
        }
        if let Some(connected) = self.connected {
            events.connected = connected;
        }
        if let Some(compute) = self.compute {
            events.compute = compute;
        }
        events
    }
}

/// Untracked copy of every context field
#[derive(Clone)]
pub struct ContextSnapshot {
    pub camera: CameraHandle,
    pub dom_element: Element,
    pub size: Size,
    pub viewport: Viewport,
    pub dpr: f32,
    pub performance: Performance,
    pub controls: Option<ControlsHandle>,
    pub events: EventsState,
    pub frameloop: Frameloop,
}

// ============================================================================
// Render context
// ============================================================================

/// Values needed to create a context
pub(crate) struct ContextInit {
    pub renderer: RendererHandle,
    pub scene: SceneHandle,
    pub scheduler: FrameScheduler,
    pub camera: CameraHandle,
    pub element: Element,
    pub size: Size,
    pub dpr: f32,
    pub dpr_range: DprRange,
    pub performance: Performance,
    pub recovery_rate: f32,
    pub events_enabled: bool,
    pub frameloop: Frameloop,
}

#[derive(Default)]
struct DefaultSlot {
    claims: Vec<(u64, ControlsHandle)>,
    /// Slot value before the first outstanding claim
    base: Option<Option<ControlsHandle>>,
    next_id: u64,
}

struct ContextInner {
    graph: ReactiveGraph,
    alive: Cell<bool>,
    renderer: RendererHandle,
    scene: SceneHandle,
    scheduler: FrameScheduler,
    dpr_range: DprRange,
    frames: FrameRequests,
    regression: Regression,
    default_slot: RefCell<DefaultSlot>,

    camera: Signal<CameraHandle>,
    dom_element: Signal<Element>,
    size: Signal<Size>,
    viewport: Signal<Viewport>,
    dpr: Signal<f32>,
    performance: Signal<Performance>,
    controls: Signal<Option<ControlsHandle>>,
    events: Signal<EventsState>,
    frameloop: Signal<Frameloop>,
}

impl ContextInner {
    fn dispose_signals(&self) {
        let graph = &self.graph;
        graph.dispose_signal(self.camera.id());
        graph.dispose_signal(self.dom_element.id());
        graph.dispose_signal(self.size.id());
        graph.dispose_signal(self.viewport.id());
        graph.dispose_signal(self.dpr.id());
        graph.dispose_signal(self.performance.id());
        graph.dispose_signal(self.controls.id());
        graph.dispose_signal(self.events.id());
        graph.dispose_signal(self.frameloop.id());
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.dispose_signals();
    }
}

/// Shared, lifecycle-scoped state of one render root
///
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct RenderContext {
    inner: Rc<ContextInner>,
}

impl RenderContext {
    pub(crate) fn new(graph: &ReactiveGraph, init: ContextInit) -> Self {
        let viewport = Viewport::compute(&init.camera.borrow(), init.size, init.dpr, Vec3::ZERO);
        let events = EventsState::new(init.events_enabled, Some(init.element.clone()));

        // The signals belong to the context, not to whichever scope is current
        let inner = graph.with_owner(None, || ContextInner {
            graph: graph.clone(),
            alive: Cell::new(true),
            renderer: init.renderer,
            scene: init.scene,
            scheduler: init.scheduler,
            dpr_range: init.dpr_range,
            frames: FrameRequests::new(),
            regression: Regression::new(init.recovery_rate),
            default_slot: RefCell::new(DefaultSlot::default()),
            camera: graph.create_signal(init.camera),
            dom_element: graph.create_signal(init.element),
            size: graph.create_signal(init.size),
            viewport: graph.create_signal(viewport),
            dpr: graph.create_signal(init.dpr),
            performance: graph.create_signal(init.performance),
            controls: graph.create_signal(None),
            events: graph.create_signal(events),
            frameloop: graph.create_signal(init.frameloop),
        });

        Self {
            inner: Rc::new(inner),
        }
    }

    /// The reactive graph the context's signals live in
    pub fn graph(&self) -> &ReactiveGraph {
        &self.inner.graph
    }

    /// Whether the owning root is still alive
    pub fn is_alive(&self) -> bool {
        self.inner.alive.get()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(FiberError::ContextDestroyed)
        }
    }

    fn read<T: Clone + 'static>(&self, signal: Signal<T>) -> Result<T> {
        self.ensure_alive()?;
        self.inner
            .graph
            .get(signal)
            .ok_or(FiberError::ContextDestroyed)
    }

    fn read_untracked<T: Clone + 'static>(&self, signal: Signal<T>) -> Result<T> {
        self.ensure_alive()?;
        self.inner
            .graph
            .get_untracked(signal)
            .ok_or(FiberError::ContextDestroyed)
    }

    pub fn renderer(&self) -> Result<RendererHandle> {
        self.ensure_alive()?;
        Ok(Rc::clone(&self.inner.renderer))
    }

    pub fn scene(&self) -> Result<SceneHandle> {
        self.ensure_alive()?;
        Ok(Rc::clone(&self.inner.scene))
    }

    pub fn scheduler(&self) -> Result<FrameScheduler> {
        self.ensure_alive()?;
        Ok(self.inner.scheduler.clone())
    }

    // ------------------------------------------------------------------
    // Tracked field readers
    // ------------------------------------------------------------------

    pub fn camera(&self) -> Result<CameraHandle> {
        self.read(self.inner.camera)
    }

    pub fn dom_element(&self) -> Result<Element> {
        self.read(self.inner.dom_element)
    }

    pub fn size(&self) -> Result<Size> {
        self.read(self.inner.size)
    }

    pub fn viewport(&self) -> Result<Viewport> {
        self.read(self.inner.viewport)
    }

    pub fn dpr(&self) -> Result<f32> {
        self.read(self.inner.dpr)
    }

    pub fn performance(&self) -> Result<Performance> {
        self.read(self.inner.performance)
    }

    /// The controller currently holding the default slot
    pub fn controls(&self) -> Result<Option<ControlsHandle>> {
        self.read(self.inner.controls)
    }

    pub fn events(&self) -> Result<EventsState> {
        self.read(self.inner.events)
    }

    pub fn frameloop(&self) -> Result<Frameloop> {
        self.read(self.inner.frameloop)
    }

    /// Copy of every field, without registering dependencies
    pub fn snapshot(&self) -> Result<ContextSnapshot> {
        let inner = &self.inner;
        Ok(ContextSnapshot {
            camera: self.read_untracked(inner.camera)?,
            dom_element: self.read_untracked(inner.dom_element)?,
            size: self.read_untracked(inner.size)?,
            viewport: self.read_untracked(inner.viewport)?,
            dpr: self.read_untracked(inner.dpr)?,
            performance: self.read_untracked(inner.performance)?,
            controls: self.read_untracked(inner.controls)?,
            events: self.read_untracked(inner.events)?,
            frameloop: self.read_untracked(inner.frameloop)?,
        })
    }

    // ------------------------------------------------------------------
    // Writers
    // ------------------------------------------------------------------

    /// Merge `patch` into the context
    ///
    /// Only fields present in the patch are written, and only fields whose
    /// value actually changes notify their readers. All writes land in one
    /// batch.
    pub fn set(&self, patch: RenderContextPatch) -> Result<()> {
        self.ensure_alive()?;
        let inner = &self.inner;
        inner.graph.batch(|graph| {
            if let Some(camera) = patch.camera {
                let same = graph
                    .get_untracked(inner.camera)
                    .is_some_and(|current| Rc::ptr_eq(&current, &camera));
                if !same {
                    graph.set(inner.camera, camera);
                }
            }
            if let Some(element) = patch.dom_element {
                graph.set_if_changed(inner.dom_element, element);
            }
            if let Some(size) = patch.size {
                graph.set_if_changed(inner.size, size);
            }
            if let Some(viewport) = patch.viewport {
                graph.set_if_changed(inner.viewport, viewport);
            }
            if let Some(dpr) = patch.dpr {
                graph.set_if_changed(inner.dpr, dpr);
            }
            if let Some(performance) = patch.performance {
                graph.set_if_changed(inner.performance, performance);
            }
            if let Some(controls) = patch.controls {
                let current = graph.get_untracked(inner.controls).flatten();
                let same = match (&current, &controls) {
                    (Some(a), Some(b)) => same_controls(a, b),
                    (None, None) => true,
                    _ => false,
                };
                drop(current);
                if !same {
                    graph.set(inner.controls, controls);
                }
            }
            if let Some(events) = patch.events {
                graph.set_if_changed(inner.events, events);
            }
            if let Some(frameloop) = patch.frameloop {
                graph.set_if_changed(inner.frameloop, frameloop);
            }
        });
        Ok(())
    }

    /// Set the pixel ratio, clamped to the configured range
    pub fn set_dpr(&self, dpr: f32) -> Result<()> {
        let dpr = self.inner.dpr_range.clamp(dpr);
        let viewport = Viewport {
            dpr,
            ..self.read_untracked(self.inner.viewport)?
        };
        self.set(RenderContextPatch::new().dpr(dpr).viewport(viewport))
    }

    /// The range [`set_dpr`](Self::set_dpr) clamps to
    pub fn dpr_range(&self) -> DprRange {
        self.inner.dpr_range
    }

    /// Set the output size and recompute the viewport
    pub fn set_size(&self, size: Size) -> Result<()> {
        let camera = self.read_untracked(self.inner.camera)?;
        let dpr = self.read_untracked(self.inner.dpr)?;
        let viewport = Viewport::compute(&camera.borrow(), size, dpr, Vec3::ZERO);
        self.set(RenderContextPatch::new().size(size).viewport(viewport))
    }

    /// Merge into the pointer-event routing state
    pub fn set_events(&self, patch: EventsPatch) -> Result<()> {
        let events = patch.apply(self.read_untracked(self.inner.events)?);
        self.set(RenderContextPatch::new().events(events))
    }

    // ------------------------------------------------------------------
    // Invalidation & regression
    // ------------------------------------------------------------------

    /// Request another frame; any number of calls before it renders
    /// produce one frame
    pub fn invalidate(&self) {
        if self.is_alive() {
            self.inner.frames.request();
        }
    }

    /// Drop fidelity to the floor for a while
    pub fn regress(&self) {
        if !self.is_alive() {
            return;
        }
        if let Ok(performance) = self.read_untracked(self.inner.performance) {
            if performance.current > performance.min {
                self.inner
                    .graph
                    .set(self.inner.performance, performance.with_current(performance.min));
            }
        }
        self.inner.regression.mark();
        self.inner.frames.request();
    }

    pub(crate) fn frame_requests(&self) -> &FrameRequests {
        &self.inner.frames
    }

    pub(crate) fn regression(&self) -> &Regression {
        &self.inner.regression
    }

    /// Number of regressions recorded since the root was created
    pub fn regress_count(&self) -> u64 {
        self.inner.regression.count()
    }

    /// Total `invalidate` requests received, before coalescing
    pub fn invalidate_count(&self) -> u64 {
        self.inner.frames.received()
    }

    // ------------------------------------------------------------------
    // Default slot
    // ------------------------------------------------------------------

    /// Make `controls` the default controller until the claim is released
    pub fn claim_default(&self, controls: ControlsHandle) -> Result<DefaultClaim> {
        self.ensure_alive()?;
        let previous = self.read_untracked(self.inner.controls)?;

        let (id, held) = {
            let mut slot = self.inner.default_slot.borrow_mut();
            if slot.claims.is_empty() {
                slot.base = Some(previous);
            }
            let id = slot.next_id;
            slot.next_id += 1;
            slot.claims.push((id, Rc::clone(&controls)));
            (id, slot.claims.len())
        };

        if held > 1 {
            tracing::warn!(
                held,
                kind = controls.kind(),
                "multiple controllers claim the default slot; the latest wins"
            );
        } else {
            tracing::debug!(kind = controls.kind(), "default slot claimed");
        }

        self.set(RenderContextPatch::new().controls(Some(controls)))?;
        Ok(DefaultClaim {
            context: self.downgrade(),
            id: Some(id),
        })
    }

    /// Number of outstanding default-slot claims
    pub fn default_claims(&self) -> usize {
        self.inner.default_slot.borrow().claims.len()
    }

    fn release_default(&self, id: u64) -> Result<()> {
        self.ensure_alive()?;
        let restore = {
            let mut slot = self.inner.default_slot.borrow_mut();
            let Some(index) = slot.claims.iter().position(|(claim, _)| *claim == id) else {
                return Ok(());
            };
            slot.claims.remove(index);
            match slot.claims.last() {
                Some((_, top)) => Some(Rc::clone(top)),
                None => slot.base.take().flatten(),
            }
        };
        tracing::debug!(
            restored = restore.as_ref().map(|c| c.kind()),
            "default slot released"
        );
        self.set(RenderContextPatch::new().controls(restore))
    }

    // ------------------------------------------------------------------
    // Lifetime
    // ------------------------------------------------------------------

    /// Mark the context destroyed and release its signals
    pub(crate) fn destroy(&self) {
        if !self.inner.alive.replace(false) {
            return;
        }
        let slot = std::mem::take(&mut *self.inner.default_slot.borrow_mut());
        drop(slot);
        self.inner.dispose_signals();
    }

    pub fn downgrade(&self) -> WeakRenderContext {
        WeakRenderContext {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &RenderContext) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("alive", &self.is_alive())
            .field("default_claims", &self.default_claims())
            .finish_non_exhaustive()
    }
}

/// Non-owning handle to a render context
#[derive(Clone)]
pub struct WeakRenderContext {
    inner: Weak<ContextInner>,
}

impl WeakRenderContext {
    pub fn upgrade(&self) -> Option<RenderContext> {
        self.inner.upgrade().map(|inner| RenderContext { inner })
    }
}

/// An outstanding default-slot claim; released explicitly or on drop
#[must_use = "dropping a DefaultClaim releases it immediately"]
pub struct DefaultClaim {
    context: WeakRenderContext,
    id: Option<u64>,
}

impl DefaultClaim {
    /// Give the slot back; the slot falls back to the previous claim
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };
        match self.context.upgrade() {
            Some(context) => context.release_default(id),
            None => Ok(()),
        }
    }
}

impl Drop for DefaultClaim {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            tracing::debug!(error = %err, "default slot claim dropped after root teardown");
        }
    }
}

impl std::fmt::Debug for DefaultClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultClaim").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{Controls, ControlsEvent};
    use crate::headless::HeadlessRenderer;
    use crate::root::{Root, RootDescriptor};
    use crate::scene::Camera;
    use orrery_core::Emitter;
    use std::any::Any;

    struct Dummy {
        name: &'static str,
        events: Emitter<ControlsEvent>,
    }

    impl Controls for Dummy {
        fn kind(&self) -> &'static str {
            self.name
        }
        fn is_enabled(&self) -> bool {
            true
        }
        fn set_enabled(&self, _enabled: bool) {}
        fn connect(&self, _element: &Element) {}
        fn disconnect(&self) {}
        fn update(&self, _delta: f32) {}
        fn dispose(&self) {}
        fn events(&self) -> &Emitter<ControlsEvent> {
            &self.events
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn dummy(name: &'static str) -> ControlsHandle {
        Rc::new(Dummy {
            name,
            events: Emitter::new(),
        })
    }

    fn root(graph: &ReactiveGraph) -> Root {
        let element = Element::with_size("canvas", Size::new(800.0, 600.0));
        let (_, renderer) = HeadlessRenderer::shared(element);
        Root::create(graph, RootDescriptor::new(renderer)).unwrap()
    }

    fn active(ctx: &RenderContext) -> Option<&'static str> {
        ctx.snapshot().unwrap().controls.map(|c| c.kind())
    }

    #[test]
    fn test_patch_only_notifies_touched_fields() {
        let graph = ReactiveGraph::new();
        let root = root(&graph);
        let ctx = root.context().clone();

        let camera_runs = Rc::new(Cell::new(0));
        let runs = camera_runs.clone();
        let reader = ctx.clone();
        root.scope().create_effect(move |_| {
            let _ = reader.camera();
            runs.set(runs.get() + 1);
        });
        assert_eq!(camera_runs.get(), 1);

        ctx.set(RenderContextPatch::new().dpr(1.5)).unwrap();
        ctx.set_events(EventsPatch::enabled(false)).unwrap();
        assert_eq!(camera_runs.get(), 1);

        ctx.set(RenderContextPatch::new().camera(Camera::default().into_handle()))
            .unwrap();
        assert_eq!(camera_runs.get(), 2);
        assert!(!ctx.snapshot().unwrap().events.enabled);
    }

    #[test]
    fn test_set_dpr_clamps_to_range() {
        let graph = ReactiveGraph::new();
        let root = root(&graph);
        let ctx = root.context();

        ctx.set_dpr(5.0).unwrap();
        assert_eq!(ctx.dpr().unwrap(), 2.0);
        assert_eq!(ctx.viewport().unwrap().dpr, 2.0);
        ctx.set_dpr(0.1).unwrap();
        assert_eq!(ctx.dpr().unwrap(), 1.0);
    }

    #[test]
    fn test_set_size_recomputes_viewport() {
        let graph = ReactiveGraph::new();
        let root = root(&graph);
        let ctx = root.context();

        ctx.set_size(Size::new(400.0, 400.0)).unwrap();
        let viewport = ctx.viewport().unwrap();
        assert_eq!(viewport.aspect, 1.0);
        assert!((viewport.width - viewport.height).abs() < 1e-4);
        assert!(viewport.distance > 0.0);
    }

    #[test]
    fn test_pointer_ndc_default_mapping() {
        let events = EventsState::new(true, None);
        let ndc = events.pointer_ndc(&PointerEvent::at(400.0, 0.0), Size::new(800.0, 600.0));
        assert_eq!(ndc, Vec2::new(0.0, 1.0));
    }

    #[test]
    fn test_claims_restore_in_any_order() {
        let graph = ReactiveGraph::new();
        let root = root(&graph);
        let ctx = root.context();

        let a = ctx.claim_default(dummy("a")).unwrap();
        let b = ctx.claim_default(dummy("b")).unwrap();
        assert_eq!(active(ctx), Some("b"));
        assert_eq!(ctx.default_claims(), 2);

        // Releasing the older claim first keeps the newer one active
        a.release().unwrap();
        assert_eq!(active(ctx), Some("b"));

        b.release().unwrap();
        assert_eq!(active(ctx), None);
        assert_eq!(ctx.default_claims(), 0);
    }

    #[test]
    fn test_claim_restores_value_set_before_first_claim() {
        let graph = ReactiveGraph::new();
        let root = root(&graph);
        let ctx = root.context();

        ctx.set(RenderContextPatch::new().controls(Some(dummy("external"))))
            .unwrap();
        {
            let _claim = ctx.claim_default(dummy("mine")).unwrap();
            assert_eq!(active(ctx), Some("mine"));
        }
        assert_eq!(active(ctx), Some("external"));
    }

    #[test]
    fn test_accessors_fail_after_destroy() {
        let graph = ReactiveGraph::new();
        let root = root(&graph);
        let ctx = root.context().clone();
        let claim = ctx.claim_default(dummy("late")).unwrap();

        root.destroy();
        assert!(matches!(ctx.camera(), Err(FiberError::ContextDestroyed)));
        assert!(matches!(
            ctx.set(RenderContextPatch::new().dpr(1.0)),
            Err(FiberError::ContextDestroyed)
        ));
        assert!(claim.release().is_err());
        ctx.invalidate();
        ctx.regress();
        assert_eq!(ctx.regress_count(), 0);
    }
}
