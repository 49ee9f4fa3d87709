//! Controller lifecycle binding
//!
//! Mounts one controller under a scope and keeps it in step with its
//! reactive inputs:
//!
//! - **Construct** whenever the camera changes: build the controller,
//!   connect it to the input element, forward its events, schedule its
//!   per-frame update and optionally claim the default slot
//! - **Reconnect** when only the element changes; the controller survives
//! - **Teardown** before every rebuild and when the scope is disposed:
//!   unschedule, detach listeners, dispose, release the claim. Every step
//!   runs even if an earlier one fails.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use orrery_core::{Element, Scope, State, SubscriptionKey, Value};
use orrery_fiber::{
    use_three, CameraHandle, Controls, ControlsEvent, ControlsHandle, DefaultClaim,
    FrameSubscription, RenderContext, WeakRenderContext,
};
use smallvec::SmallVec;

use crate::error::{HelperError, Result};

/// Priority controllers update at, ahead of the render pass
pub const CONTROLS_PRIORITY: i32 = -1;

/// Callback for forwarded controller events
pub type EventCallback = Rc<dyn Fn(&ControlsEvent)>;

/// Inputs shared by every controller component
#[derive(Clone)]
pub struct ControlsProps {
    /// Claim the render context's default slot while mounted
    pub make_default: Value<bool>,
    /// Camera to drive instead of the context camera
    pub camera: Value<Option<CameraHandle>>,
    /// Element to listen on instead of the context's event target
    pub dom_element: Value<Option<Element>>,
    pub enabled: Value<bool>,
    /// Regress performance on every change
    pub regress: bool,
    pub on_change: Option<EventCallback>,
    pub on_start: Option<EventCallback>,
    pub on_end: Option<EventCallback>,
}

impl Default for ControlsProps {
    fn default() -> Self {
        Self {
            make_default: Value::Static(false),
            camera: Value::Static(None),
            dom_element: Value::Static(None),
            enabled: Value::Static(true),
            regress: false,
            on_change: None,
            on_start: None,
            on_end: None,
        }
    }
}

impl ControlsProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_default(mut self, make_default: impl Into<Value<bool>>) -> Self {
        self.make_default = make_default.into();
        self
    }

    pub fn camera(mut self, camera: impl Into<Value<Option<CameraHandle>>>) -> Self {
        self.camera = camera.into();
        self
    }

    pub fn dom_element(mut self, element: impl Into<Value<Option<Element>>>) -> Self {
        self.dom_element = element.into();
        self
    }

    pub fn enabled(mut self, enabled: impl Into<Value<bool>>) -> Self {
        self.enabled = enabled.into();
        self
    }

    pub fn regress(mut self, regress: bool) -> Self {
        self.regress = regress;
        self
    }

    pub fn on_change(mut self, callback: impl Fn(&ControlsEvent) + 'static) -> Self {
        self.on_change = Some(Rc::new(callback));
        self
    }

    pub fn on_start(mut self, callback: impl Fn(&ControlsEvent) + 'static) -> Self {
        self.on_start = Some(Rc::new(callback));
        self
    }

    pub fn on_end(mut self, callback: impl Fn(&ControlsEvent) + 'static) -> Self {
        self.on_end = Some(Rc::new(callback));
        self
    }
}

impl fmt::Debug for ControlsProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlsProps")
            .field("make_default", &self.make_default)
            .field("enabled", &self.enabled)
            .field("regress", &self.regress)
            .finish_non_exhaustive()
    }
}

/// Reactive handle to the currently constructed controller
pub struct ControlsRef<C: 'static> {
    state: State<Option<Rc<C>>>,
}

impl<C: 'static> Clone for ControlsRef<C> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<C: 'static> ControlsRef<C> {
    /// The controller, tracked: effects rerun when it is rebuilt
    pub fn get(&self) -> Option<Rc<C>> {
        self.state.try_get().flatten()
    }

    pub fn get_untracked(&self) -> Option<Rc<C>> {
        self.state.get_untracked().flatten()
    }

    pub fn is_constructed(&self) -> bool {
        self.get_untracked().is_some()
    }
}

/// Where a binding is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingPhase {
    Unconstructed,
    Connected,
    Disposed,
}

/// Everything one construction owns
struct Live<C> {
    controls: Rc<C>,
    element: Element,
    frame: Option<FrameSubscription>,
    forwarder: Option<SubscriptionKey>,
    claim: Option<DefaultClaim>,
}

struct Shared<C> {
    live: RefCell<Option<Live<C>>>,
    phase: Cell<BindingPhase>,
    generation: Cell<u64>,
    teardown_failures: RefCell<Vec<HelperError>>,
}

/// A mounted controller
pub struct ControlsBinding<C: Controls + 'static> {
    scope: Scope,
    controls: ControlsRef<C>,
    shared: Rc<Shared<C>>,
}

impl<C: Controls + 'static> ControlsBinding<C> {
    /// Mount a controller built by `factory` under `scope`
    ///
    /// Fails with [`FiberError::OutsideRoot`](orrery_fiber::FiberError) when
    /// `scope` is not inside a render root.
    pub fn mount(
        scope: &Scope,
        props: ControlsProps,
        factory: impl Fn(CameraHandle) -> C + 'static,
    ) -> Result<Self> {
        let ctx = use_three(scope)?;
        let scope = scope.child();
        let controls = ControlsRef {
            state: scope.create_state(None),
        };
        let shared = Rc::new(Shared {
            live: RefCell::new(None),
            phase: Cell::new(BindingPhase::Unconstructed),
            generation: Cell::new(0),
            teardown_failures: RefCell::new(Vec::new()),
        });

        // Construction: tracks the camera only
        {
            let ctx = ctx.clone();
            let props = props.clone();
            let shared = Rc::clone(&shared);
            let controls = controls.clone();
            scope.create_effect(move |graph| {
                let camera = match props.camera.get() {
                    Some(camera) => camera,
                    None => match ctx.camera() {
                        Ok(camera) => camera,
                        Err(err) => {
                            tracing::debug!(error = %err, "controls not constructed");
                            return;
                        }
                    },
                };

                let built = graph.untrack(|| construct(&ctx, &props, &factory, camera));
                let live = match built {
                    Ok(live) => live,
                    Err(err) => {
                        tracing::error!(error = %err, "controls construction failed");
                        return;
                    }
                };
                let handle = Rc::clone(&live.controls);
                *shared.live.borrow_mut() = Some(live);
                shared.phase.set(BindingPhase::Connected);
                shared.generation.set(shared.generation.get() + 1);
                controls.state.set(Some(handle));

                let shared = Rc::clone(&shared);
                let controls = controls.clone();
                graph.on_cleanup(move || {
                    let live = shared.live.borrow_mut().take();
                    if let Some(live) = live {
                        let failures = teardown(live);
                        shared.teardown_failures.borrow_mut().extend(failures);
                    }
                    if shared.phase.get() == BindingPhase::Connected {
                        shared.phase.set(BindingPhase::Unconstructed);
                    }
                    controls.state.set(None);
                });
            });
        }

        // Element changes reconnect the existing controller
        {
            let ctx = ctx.clone();
            let dom_element = props.dom_element.clone();
            let shared = Rc::clone(&shared);
            scope.create_effect(move |_| {
                let Some(element) = resolve_element(&dom_element.get(), &ctx) else {
                    return;
                };
                let controls = {
                    let mut live = shared.live.borrow_mut();
                    let Some(live) = live.as_mut() else {
                        return;
                    };
                    if live.element.ptr_eq(&element) {
                        return;
                    }
                    live.element = element.clone();
                    Rc::clone(&live.controls)
                };
                tracing::debug!(
                    kind = controls.kind(),
                    element = element.label(),
                    "controls reconnected"
                );
                controls.disconnect();
                controls.connect(&element);
            });
        }

        // Enabled flag
        {
            let enabled = props.enabled.clone();
            let shared = Rc::clone(&shared);
            scope.create_effect(move |_| {
                let enabled = enabled.get();
                let controls = shared.live.borrow().as_ref().map(|live| Rc::clone(&live.controls));
                if let Some(controls) = controls {
                    controls.set_enabled(enabled);
                }
            });
        }

        // Default-slot membership follows `make_default`
        {
            let ctx = ctx.clone();
            let make_default = props.make_default.clone();
            let shared = Rc::clone(&shared);
            scope.create_effect(move |_| {
                let wanted = make_default.get();
                let (controls, held) = {
                    let live = shared.live.borrow();
                    let Some(live) = live.as_ref() else {
                        return;
                    };
                    (Rc::clone(&live.controls), live.claim.is_some())
                };
                if wanted && !held {
                    let handle: ControlsHandle = controls;
                    match ctx.claim_default(handle) {
                        Ok(claim) => {
                            if let Some(live) = shared.live.borrow_mut().as_mut() {
                                live.claim = Some(claim);
                            }
                        }
                        Err(err) => tracing::warn!(error = %err, "default slot claim failed"),
                    }
                } else if !wanted && held {
                    let claim = shared
                        .live
                        .borrow_mut()
                        .as_mut()
                        .and_then(|live| live.claim.take());
                    if let Some(Err(err)) = claim.map(DefaultClaim::release) {
                        tracing::warn!(error = %err, "default slot release failed");
                    }
                }
            });
        }

        {
            let shared = Rc::clone(&shared);
            scope.on_cleanup(move || shared.phase.set(BindingPhase::Disposed));
        }

        Ok(Self {
            scope,
            controls,
            shared,
        })
    }

    /// Handle to the current controller
    pub fn controls(&self) -> ControlsRef<C> {
        self.controls.clone()
    }

    pub fn phase(&self) -> BindingPhase {
        self.shared.phase.get()
    }

    /// Number of controllers constructed so far
    pub fn generation(&self) -> u64 {
        self.shared.generation.get()
    }

    /// Whether the current construction holds the default slot
    pub fn is_default(&self) -> bool {
        self.shared
            .live
            .borrow()
            .as_ref()
            .is_some_and(|live| live.claim.is_some())
    }

    /// Teardown steps that failed so far
    pub fn teardown_failures(&self) -> usize {
        self.shared.teardown_failures.borrow().len()
    }

    /// Drain the recorded teardown failures
    pub fn take_teardown_failures(&self) -> Vec<HelperError> {
        std::mem::take(&mut *self.shared.teardown_failures.borrow_mut())
    }

    /// The scope owning the binding
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Tear down and dispose; equivalent to disposing the owning scope
    pub fn unmount(&self) {
        self.scope.dispose();
    }
}

impl<C: Controls + 'static> fmt::Debug for ControlsBinding<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlsBinding")
            .field("phase", &self.phase())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

/// The explicit element, else the context's event target, else its element
fn resolve_element(explicit: &Option<Element>, ctx: &RenderContext) -> Option<Element> {
    if let Some(element) = explicit {
        return Some(element.clone());
    }
    let connected = ctx.events().ok().and_then(|events| events.connected);
    connected.or_else(|| ctx.dom_element().ok())
}

fn construct<C: Controls + 'static>(
    ctx: &RenderContext,
    props: &ControlsProps,
    factory: &impl Fn(CameraHandle) -> C,
    camera: CameraHandle,
) -> Result<Live<C>> {
    let scheduler = ctx.scheduler()?;
    let element = resolve_element(&props.dom_element.get_untracked(), ctx)
        .ok_or(HelperError::MissingParent {
            component: "controls",
            parent: "an input element",
        })?;

    let controls = Rc::new(factory(camera));
    controls.connect(&element);
    controls.set_enabled(props.enabled.get_untracked());

    let forwarder = controls
        .events()
        .subscribe(forward_events(ctx.downgrade(), props));

    let weak: Weak<C> = Rc::downgrade(&controls);
    let frame = scheduler.register(CONTROLS_PRIORITY, move |frame| {
        if let Some(controls) = weak.upgrade() {
            if controls.is_enabled() {
                controls.update(frame.delta);
            }
        }
    });

    let live = Live {
        controls,
        element,
        frame: Some(frame),
        forwarder: Some(forwarder),
        claim: None,
    };
    let live = if props.make_default.get_untracked() {
        claim_or_release(ctx, live)?
    } else {
        live
    };

    tracing::debug!(
        kind = live.controls.kind(),
        element = live.element.label(),
        default = live.claim.is_some(),
        "controls constructed"
    );
    Ok(live)
}

/// Claim the default slot for `live`, tearing it down if the claim fails
fn claim_or_release<C: Controls + 'static>(
    ctx: &RenderContext,
    mut live: Live<C>,
) -> Result<Live<C>> {
    let handle: ControlsHandle = live.controls.clone();
    match ctx.claim_default(handle) {
        Ok(claim) => {
            live.claim = Some(claim);
            Ok(live)
        }
        Err(err) => {
            let kind = live.controls.kind();
            let failures = teardown(live);
            tracing::warn!(
                kind,
                error = %err,
                teardown_failures = failures.len(),
                "default claim failed, partial construction released"
            );
            Err(err.into())
        }
    }
}

fn forward_events(ctx: WeakRenderContext, props: &ControlsProps) -> impl Fn(&ControlsEvent) {
    let regress = props.regress;
    let on_change = props.on_change.clone();
    let on_start = props.on_start.clone();
    let on_end = props.on_end.clone();
    move |event| {
        let callback = match event {
            ControlsEvent::Change => {
                if let Some(ctx) = ctx.upgrade() {
                    ctx.invalidate();
                    if regress {
                        ctx.regress();
                    }
                }
                &on_change
            }
            ControlsEvent::Start => &on_start,
            ControlsEvent::End => &on_end,
            _ => return,
        };
        if let Some(callback) = callback {
            callback(event);
        }
    }
}

/// Run every teardown step, collecting the failures
fn teardown<C: Controls + 'static>(live: Live<C>) -> SmallVec<[HelperError; 1]> {
    let Live {
        controls,
        element,
        mut frame,
        forwarder,
        mut claim,
    } = live;
    let kind = controls.kind();
    let mut failures = SmallVec::new();

    let steps: [(&'static str, Box<dyn FnOnce() -> Result<()> + '_>); 4] = [
        (
            "unschedule",
            Box::new(|| {
                if let Some(frame) = frame.as_mut() {
                    frame.unsubscribe();
                }
                Ok(())
            }),
        ),
        (
            "detach",
            Box::new(|| {
                if let Some(key) = forwarder {
                    controls.events().unsubscribe(key);
                }
                controls.disconnect();
                Ok(())
            }),
        ),
        (
            "dispose",
            Box::new(|| {
                controls.dispose();
                Ok(())
            }),
        ),
        (
            "release",
            Box::new(|| match claim.take() {
                Some(claim) => claim.release().map_err(HelperError::from),
                None => Ok(()),
            }),
        ),
    ];

    for (step, run) in steps {
        let reason = match catch_unwind(AssertUnwindSafe(run)) {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };
        tracing::error!(kind, step, %reason, "controls teardown step failed");
        failures.push(HelperError::Teardown { step, reason });
    }

    tracing::debug!(kind, element = element.label(), "controls torn down");
    failures
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_core::ReactiveGraph;
    use orrery_fiber::{HeadlessRenderer, Root, RootDescriptor};

    use crate::controls::OrbitControls;

    #[test]
    fn test_failed_claim_releases_partial_construction() {
        let graph = ReactiveGraph::new();
        let element = Element::new("canvas");
        let (_, renderer) = HeadlessRenderer::shared(element.clone());
        let root = Root::create(&graph, RootDescriptor::new(renderer)).unwrap();
        let ctx = root.context().clone();
        let camera = ctx.camera().unwrap();

        let live = construct(&ctx, &ControlsProps::new(), &OrbitControls::new, camera).unwrap();
        let controls = Rc::clone(&live.controls);
        assert!(element.listener_count() > 0);
        assert!(!controls.events().is_empty());

        root.destroy();
        assert!(claim_or_release(&ctx, live).is_err());
        assert_eq!(element.listener_count(), 0);
        assert!(controls.events().is_empty());
    }
}
