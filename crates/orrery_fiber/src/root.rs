//! Render roots
//!
//! A [`Root`] owns one render context, one frame scheduler and the scope
//! every component of the scene is mounted under. The host calls
//! [`Root::advance`] once per display frame; the root decides whether a
//! frame is due, drives performance recovery and runs the scheduler around
//! the render pass.

use std::cell::Cell;
use std::rc::Rc;

use orrery_core::{CoreError, Element, ReactiveGraph, Scope, Size, Vec3};

use crate::config::RootConfig;
use crate::context::{ContextInit, RenderContext, RenderContextPatch, Viewport};
use crate::error::{FiberError, Result};
use crate::performance::{Performance, RecoveryStep};
use crate::scene::{Camera, CameraHandle, RendererHandle, Scene, SceneHandle};
use crate::scheduler::{FrameResult, FrameScheduler, FrameState, FrameSubscription, TickReport};

/// Collaborators a root is built from
pub struct RootDescriptor {
    pub renderer: RendererHandle,
    /// Camera to render with; a default one is created when allowed
    pub camera: Option<CameraHandle>,
    /// Input surface; falls back to the renderer's own element
    pub element: Option<Element>,
    pub scene: Option<SceneHandle>,
    pub config: RootConfig,
}

impl RootDescriptor {
    pub fn new(renderer: RendererHandle) -> Self {
        Self {
            renderer,
            camera: None,
            element: None,
            scene: None,
            config: RootConfig::default(),
        }
    }

    pub fn with_camera(mut self, camera: CameraHandle) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_element(mut self, element: Element) -> Self {
        self.element = Some(element);
        self
    }

    pub fn with_scene(mut self, scene: SceneHandle) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn with_config(mut self, config: RootConfig) -> Self {
        self.config = config;
        self
    }
}

/// Frame clock of a root, in host seconds
#[derive(Debug, Default)]
struct Clock {
    /// Timestamp of the previous `advance`
    last_advance: Cell<Option<f64>>,
    /// Timestamp of the previous rendered frame
    last_frame: Cell<Option<f64>>,
    /// Timestamp of the first rendered frame
    started: Cell<Option<f64>>,
    frame: Cell<u64>,
}

/// A mounted scene
pub struct Root {
    scope: Scope,
    context: RenderContext,
    scheduler: FrameScheduler,
    clock: Clock,
    destroyed: Cell<bool>,
}

impl Root {
    /// Create a root in `graph`
    ///
    /// Fails with [`FiberError::Misconfigured`] when no camera or no element
    /// can be resolved.
    pub fn create(graph: &ReactiveGraph, descriptor: RootDescriptor) -> Result<Self> {
        let RootDescriptor {
            renderer,
            camera,
            element,
            scene,
            config,
        } = descriptor;
        config.validate()?;

        let element = match element {
            Some(element) => element,
            None => renderer
                .borrow()
                .element()
                .ok_or(FiberError::Misconfigured { what: "dom element" })?,
        };
        let size = config
            .size
            .map(Size::from)
            .unwrap_or_else(|| element.client_size());

        let camera = match camera {
            Some(camera) => camera,
            None if config.default_camera => {
                let camera = if config.orthographic {
                    Camera::orthographic(size, 0.1, 1000.0)
                } else {
                    Camera::perspective(75.0, size.aspect(), 0.1, 1000.0)
                };
                camera.into_handle()
            }
            None => return Err(FiberError::Misconfigured { what: "camera" }),
        };

        let scheduler = FrameScheduler::new();
        let dpr = config.initial_dpr();
        let context = RenderContext::new(
            graph,
            ContextInit {
                renderer: Rc::clone(&renderer),
                scene: scene.unwrap_or_else(|| Scene::new().into_handle()),
                scheduler: scheduler.clone(),
                camera,
                element,
                size,
                dpr,
                dpr_range: config.dpr,
                performance: Performance::from_config(&config.performance),
                recovery_rate: config.performance.recovery_rate,
                events_enabled: config.events_enabled,
                frameloop: config.frameloop,
            },
        );

        let scope = graph.with_owner(None, || graph.create_scope());
        scope.provide_context(context.clone());
        Self::sync_renderer(&scope, &context, renderer);

        tracing::debug!(
            frameloop = ?config.frameloop,
            dpr,
            width = size.width,
            height = size.height,
            "root created"
        );
        context.invalidate();

        Ok(Self {
            scope,
            context,
            scheduler,
            clock: Clock::default(),
            destroyed: Cell::new(false),
        })
    }

    /// Keep the renderer and camera projection in step with the context
    fn sync_renderer(scope: &Scope, context: &RenderContext, renderer: RendererHandle) {
        let ctx = context.clone();
        let target = Rc::clone(&renderer);
        scope.create_effect(move |_| {
            let Ok(dpr) = ctx.dpr() else { return };
            target.borrow_mut().set_pixel_ratio(dpr);
            ctx.invalidate();
        });

        let ctx = context.clone();
        scope.create_effect(move |graph| {
            let (Ok(camera), Ok(size)) = (ctx.camera(), ctx.size()) else {
                return;
            };
            renderer.borrow_mut().set_size(size);
            graph.untrack(|| {
                camera.borrow_mut().set_view_size(size);
                if let Ok(snapshot) = ctx.snapshot() {
                    let viewport =
                        Viewport::compute(&camera.borrow(), size, snapshot.dpr, Vec3::ZERO);
                    if let Err(err) = ctx.set(RenderContextPatch::new().viewport(viewport)) {
                        tracing::debug!(error = %err, "viewport update skipped");
                    }
                }
            });
            ctx.invalidate();
        });
    }

    /// The root's render context
    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// The scope components are mounted under
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Create a child scope for mounting one component
    pub fn mount(&self) -> Scope {
        self.scope.child()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Whether a host frame at this point would render
    pub fn frame_due(&self) -> bool {
        match self.context.frameloop() {
            Ok(mode) => self.context.frame_requests().should_render(mode),
            Err(_) => false,
        }
    }

    /// Number of frames rendered so far
    pub fn frame_count(&self) -> u64 {
        self.clock.frame.get()
    }

    /// Host display-frame callback
    ///
    /// `now` is a monotonic timestamp in seconds. Returns whether a frame
    /// was rendered.
    pub fn advance(&self, now: f64) -> bool {
        if self.destroyed.get() {
            return false;
        }
        let delta = self
            .clock
            .last_advance
            .replace(Some(now))
            .map_or(0.0, |last| (now - last).max(0.0) as f32);
        self.recover_performance(now, delta);

        if !self.frame_due() {
            return false;
        }
        self.render_frame(now);
        true
    }

    /// Render a frame regardless of the frame loop mode
    pub fn force_frame(&self, now: f64) -> TickReport {
        if self.destroyed.get() {
            return TickReport::default();
        }
        self.clock.last_advance.set(Some(now));
        self.render_frame(now)
    }

    fn recover_performance(&self, now: f64, delta: f32) {
        let Ok(snapshot) = self.context.snapshot() else {
            return;
        };
        let performance = snapshot.performance;
        match self.context.regression().step(&performance, now, delta) {
            RecoveryStep::Idle => {}
            RecoveryStep::Waiting => self.context.invalidate(),
            RecoveryStep::Recovered(current) => {
                let next = performance.with_current(current);
                if let Err(err) = self.context.set(RenderContextPatch::new().performance(next)) {
                    tracing::debug!(error = %err, "performance recovery skipped");
                }
                if next.is_regressed() {
                    self.context.invalidate();
                } else {
                    tracing::debug!("performance recovered");
                }
            }
        }
    }

    fn render_frame(&self, now: f64) -> TickReport {
        // Requests made while this frame runs schedule the next one
        self.context.frame_requests().take();

        let clock = &self.clock;
        let started = match clock.started.get() {
            Some(started) => started,
            None => {
                clock.started.set(Some(now));
                now
            }
        };
        let delta = clock
            .last_frame
            .replace(Some(now))
            .map_or(0.0, |last| (now - last).max(0.0) as f32);
        let state = FrameState {
            delta,
            elapsed: (now - started).max(0.0) as f32,
            frame: clock.frame.get(),
        };

        let context = &self.context;
        let report = self.scheduler.tick(&state, || {
            let (Ok(renderer), Ok(scene), Ok(camera)) =
                (context.renderer(), context.scene(), context.camera())
            else {
                return;
            };
            let scene = scene.borrow();
            let camera = camera.borrow();
            renderer.borrow_mut().render(&scene, &camera);
        });
        clock.frame.set(clock.frame.get() + 1);

        if !report.failures.is_empty() {
            tracing::warn!(
                frame = state.frame,
                failures = report.failures.len(),
                "frame completed with failing callbacks"
            );
        }
        report
    }

    /// Unmount every component and destroy the context
    ///
    /// Calling again is a no-op.
    pub fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        self.scope.dispose();
        if let Ok(renderer) = self.context.renderer() {
            renderer.borrow_mut().dispose();
        }
        self.context.destroy();
        tracing::debug!(frames = self.clock.frame.get(), "root destroyed");
    }
}

impl Drop for Root {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("frames", &self.clock.frame.get())
            .field("destroyed", &self.destroyed.get())
            .finish_non_exhaustive()
    }
}

/// Look up the render context of the root `scope` is mounted under
pub fn use_three(scope: &Scope) -> Result<RenderContext> {
    let context = scope.expect_context::<RenderContext>().map_err(|err| match err {
        CoreError::ScopeDisposed => FiberError::ContextDestroyed,
        _ => FiberError::OutsideRoot,
    })?;
    if context.is_alive() {
        Ok(context)
    } else {
        Err(FiberError::ContextDestroyed)
    }
}

/// Register a frame callback for as long as `scope` lives
pub fn use_frame(
    scope: &Scope,
    priority: i32,
    callback: impl FnMut(&FrameState) + 'static,
) -> Result<()> {
    let subscription = use_three(scope)?.scheduler()?.register(priority, callback);
    hold_until_cleanup(scope, subscription);
    Ok(())
}

/// Fallible variant of [`use_frame`]; errors are logged per frame
pub fn try_use_frame(
    scope: &Scope,
    priority: i32,
    callback: impl FnMut(&FrameState) -> FrameResult + 'static,
) -> Result<()> {
    let subscription = use_three(scope)?.scheduler()?.try_register(priority, callback);
    hold_until_cleanup(scope, subscription);
    Ok(())
}

fn hold_until_cleanup(scope: &Scope, mut subscription: FrameSubscription) {
    scope.on_cleanup(move || subscription.unsubscribe());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frameloop::Frameloop;
    use crate::headless::HeadlessRenderer;
    use std::cell::RefCell;

    fn demand_root(graph: &ReactiveGraph) -> (Rc<RefCell<HeadlessRenderer>>, Root) {
        let element = Element::with_size("canvas", Size::new(800.0, 600.0));
        let (renderer, handle) = HeadlessRenderer::shared(element);
        let config = RootConfig {
            frameloop: Frameloop::Demand,
            ..RootConfig::default()
        };
        let root = Root::create(graph, RootDescriptor::new(handle).with_config(config)).unwrap();
        (renderer, root)
    }

    #[test]
    fn test_use_three_outside_root_fails_fast() {
        let graph = ReactiveGraph::new();
        let stray = graph.create_scope();
        assert!(matches!(use_three(&stray), Err(FiberError::OutsideRoot)));
        assert!(matches!(
            use_frame(&stray, 0, |_| {}),
            Err(FiberError::OutsideRoot)
        ));
    }

    #[test]
    fn test_components_share_one_context() {
        let graph = ReactiveGraph::new();
        let (_, root) = demand_root(&graph);
        let a = root.mount();
        let b = a.child();
        assert!(use_three(&a).unwrap().ptr_eq(&use_three(&b).unwrap()));
        assert!(use_three(&b).unwrap().ptr_eq(root.context()));
    }

    #[test]
    fn test_missing_camera_is_misconfigured() {
        let graph = ReactiveGraph::new();
        let (_, handle) = HeadlessRenderer::shared(Element::new("canvas"));
        let config = RootConfig {
            default_camera: false,
            ..RootConfig::default()
        };
        let err = Root::create(&graph, RootDescriptor::new(handle).with_config(config)).unwrap_err();
        assert!(matches!(err, FiberError::Misconfigured { what: "camera" }));
    }

    #[test]
    fn test_invalidations_coalesce_into_one_frame() {
        let graph = ReactiveGraph::new();
        let (renderer, root) = demand_root(&graph);

        // Initial frame
        assert!(root.advance(0.0));
        assert!(!root.advance(0.016));

        for _ in 0..5 {
            root.context().invalidate();
        }
        assert!(root.advance(0.032));
        assert!(!root.advance(0.048));
        assert_eq!(renderer.borrow().render_count(), 2);
    }

    #[test]
    fn test_never_mode_only_renders_when_forced() {
        let graph = ReactiveGraph::new();
        let (renderer, root) = demand_root(&graph);
        root.context()
            .set(RenderContextPatch::new().frameloop(Frameloop::Never))
            .unwrap();

        root.context().invalidate();
        assert!(!root.advance(0.0));
        root.force_frame(0.1);
        assert_eq!(renderer.borrow().render_count(), 1);
    }

    #[test]
    fn test_invalidate_from_frame_callback_schedules_next_frame() {
        let graph = ReactiveGraph::new();
        let (_, root) = demand_root(&graph);
        let component = root.mount();
        let ctx = use_three(&component).unwrap();

        let remaining = Rc::new(Cell::new(2));
        let left = remaining.clone();
        use_frame(&component, 0, move |_| {
            if left.get() > 0 {
                left.set(left.get() - 1);
                ctx.invalidate();
            }
        })
        .unwrap();

        let rendered: Vec<bool> = (0..5).map(|i| root.advance(i as f64 * 0.016)).collect();
        assert_eq!(rendered, vec![true, true, true, false, false]);
    }

    #[test]
    fn test_regression_recovers_monotonically() {
        let graph = ReactiveGraph::new();
        let (_, root) = demand_root(&graph);
        let ctx = root.context();
        root.advance(0.0);

        ctx.regress();
        assert_eq!(ctx.performance().unwrap().current, 0.5);

        let mut samples = Vec::new();
        let mut now = 0.0;
        for _ in 0..120 {
            now += 1.0 / 60.0;
            root.advance(now);
            samples.push(ctx.performance().unwrap().current);
        }

        assert!(samples.windows(2).all(|w| w[0] <= w[1]));
        assert!(samples.iter().all(|c| *c <= 1.0));
        assert_eq!(samples.last().copied(), Some(1.0));
        // Nothing left to recover; demand loop goes idle
        assert!(!root.advance(now + 1.0));
    }

    #[test]
    fn test_frame_state_timing() {
        let graph = ReactiveGraph::new();
        let (_, root) = demand_root(&graph);
        let component = root.mount();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        use_frame(&component, 0, move |state| sink.borrow_mut().push(*state)).unwrap();

        root.force_frame(1.0);
        root.force_frame(1.5);
        let seen = seen.borrow();
        assert_eq!(seen[0].frame, 0);
        assert_eq!(seen[1].frame, 1);
        assert_eq!(seen[1].delta, 0.5);
        assert_eq!(seen[1].elapsed, 0.5);
    }

    #[test]
    fn test_use_frame_released_with_scope() {
        let graph = ReactiveGraph::new();
        let (_, root) = demand_root(&graph);
        let component = root.mount();
        use_frame(&component, -1, |_| {}).unwrap();
        try_use_frame(&component, 1, |_| Ok(())).unwrap();
        assert_eq!(root.scheduler().len(), 2);

        component.dispose();
        assert!(root.scheduler().is_empty());
    }

    #[test]
    fn test_renderer_follows_context() {
        let graph = ReactiveGraph::new();
        let (renderer, root) = demand_root(&graph);
        let ctx = root.context();

        ctx.set_dpr(1.5).unwrap();
        ctx.set_size(Size::new(1024.0, 512.0)).unwrap();

        let renderer = renderer.borrow();
        assert_eq!(renderer.pixel_ratio, 1.5);
        assert_eq!(renderer.size, Size::new(1024.0, 512.0));
        let camera = ctx.camera().unwrap();
        assert_eq!(
            camera.borrow().projection,
            crate::scene::Projection::Perspective {
                fov: 75.0,
                aspect: 2.0,
                near: 0.1,
                far: 1000.0
            }
        );
    }

    #[test]
    fn test_destroy_tears_down_components_then_context() {
        let graph = ReactiveGraph::new();
        let (renderer, root) = demand_root(&graph);
        let component = root.mount();
        let ctx = use_three(&component).unwrap();

        let cleaned = Rc::new(Cell::new(false));
        let flag = cleaned.clone();
        let context = ctx.clone();
        component.on_cleanup(move || flag.set(context.is_alive()));

        root.destroy();
        root.destroy();
        assert!(cleaned.get(), "components unmount while the context is alive");
        assert!(!ctx.is_alive());
        assert!(renderer.borrow().disposed);
        assert!(!root.advance(1.0));
        assert!(use_three(root.scope()).is_err());
    }
}
