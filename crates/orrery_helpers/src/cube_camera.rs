//! Cube camera
//!
//! Renders the scene around a point into a cube render target, for
//! reflections and environment lighting. The group holding the reflective
//! objects is hidden while capturing so it does not reflect itself.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use orrery_core::{Scope, Vec3};
use orrery_fiber::{
    use_frame, use_three, Background, CubeRenderTarget, Fog, ObjectHandle, RenderContext,
    SceneHandle, TextureId,
};

use crate::error::Result;

/// Cube captures run ahead of the main render pass
pub const CUBE_CAMERA_PRIORITY: i32 = -1;

static NEXT_TEXTURE: AtomicU64 = AtomicU64::new(1);

/// How many frames a cube camera captures
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Frames {
    /// Capture on the first `n` frames, then keep the last result
    Count(u32),
    /// Capture every frame
    #[default]
    Infinite,
}

impl Frames {
    fn allows(self, captured: u32) -> bool {
        match self {
            Frames::Count(n) => captured < n,
            Frames::Infinite => true,
        }
    }
}

/// Scene state replaced for the duration of a capture
///
/// `background` and `fog` are swapped in on construction and the scene's own
/// values are put back on drop. `None` keeps the scene's value.
pub struct SceneStash {
    scene: SceneHandle,
    background: Option<Background>,
    fog: Option<Fog>,
}

impl SceneStash {
    pub fn new(scene: &SceneHandle, background: Option<Background>, fog: Option<Fog>) -> Self {
        let mut current = scene.borrow_mut();
        let saved_background = current.background.clone();
        let saved_fog = current.fog.clone();
        if background.is_some() {
            current.background = background;
        }
        if fog.is_some() {
            current.fog = fog;
        }
        drop(current);
        Self {
            scene: Rc::clone(scene),
            background: saved_background,
            fog: saved_fog,
        }
    }
}

impl Drop for SceneStash {
    fn drop(&mut self) {
        let mut scene = self.scene.borrow_mut();
        scene.background = self.background.take();
        scene.fog = self.fog.take();
    }
}

/// Hides an object until dropped
struct Hidden {
    object: ObjectHandle,
    was_visible: bool,
}

impl Hidden {
    fn new(object: &ObjectHandle) -> Self {
        let was_visible = std::mem::replace(&mut object.borrow_mut().visible, false);
        Self {
            object: Rc::clone(object),
            was_visible,
        }
    }
}

impl Drop for Hidden {
    fn drop(&mut self) {
        self.object.borrow_mut().visible = self.was_visible;
    }
}

#[derive(Clone, Debug)]
pub struct CubeCameraOptions {
    /// Edge length of each cube face in pixels
    pub resolution: u32,
    pub near: f32,
    pub far: f32,
    pub frames: Frames,
    pub position: Vec3,
    /// Background used while capturing instead of the scene's
    pub background: Option<Background>,
    /// Fog used while capturing instead of the scene's
    pub fog: Option<Fog>,
}

impl Default for CubeCameraOptions {
    fn default() -> Self {
        Self {
            resolution: 256,
            near: 0.1,
            far: 1000.0,
            frames: Frames::Infinite,
            position: Vec3::ZERO,
            background: None,
            fog: None,
        }
    }
}

struct Inner {
    target: CubeRenderTarget,
    group: ObjectHandle,
    options: CubeCameraOptions,
    captured: Cell<u32>,
}

/// A mounted cube camera
#[derive(Clone)]
pub struct CubeCamera {
    inner: Rc<Inner>,
}

impl CubeCamera {
    fn new(group: ObjectHandle, options: CubeCameraOptions) -> Self {
        let target = CubeRenderTarget {
            resolution: options.resolution,
            texture: TextureId(NEXT_TEXTURE.fetch_add(1, Ordering::Relaxed)),
        };
        Self {
            inner: Rc::new(Inner {
                target,
                group,
                options,
                captured: Cell::new(0),
            }),
        }
    }

    /// Texture the captures are written to
    pub fn texture(&self) -> TextureId {
        self.inner.target.texture
    }

    pub fn target(&self) -> &CubeRenderTarget {
        &self.inner.target
    }

    /// Group hidden during captures
    pub fn group(&self) -> ObjectHandle {
        Rc::clone(&self.inner.group)
    }

    /// Number of captures taken so far
    pub fn captures(&self) -> u32 {
        self.inner.captured.get()
    }

    /// Capture now, ignoring the frame budget
    pub fn capture(&self, ctx: &RenderContext) -> Result<()> {
        let renderer = ctx.renderer()?;
        let scene = ctx.scene()?;
        let options = &self.inner.options;
        {
            let _hidden = Hidden::new(&self.inner.group);
            let _stash = SceneStash::new(&scene, options.background.clone(), options.fog.clone());
            renderer.borrow_mut().render_cube(
                &scene.borrow(),
                &self.inner.target,
                options.position,
                options.near,
                options.far,
            );
        }
        self.inner.captured.set(self.inner.captured.get() + 1);
        Ok(())
    }

    fn on_frame(&self, ctx: &RenderContext) {
        if !self.inner.options.frames.allows(self.inner.captured.get()) {
            return;
        }
        if let Err(err) = self.capture(ctx) {
            tracing::debug!(error = %err, "cube capture skipped");
        }
    }
}

impl std::fmt::Debug for CubeCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CubeCamera")
            .field("target", &self.inner.target)
            .field("frames", &self.inner.options.frames)
            .field("captured", &self.inner.captured.get())
            .finish()
    }
}

/// Mount a cube camera that captures around `group` every frame until its
/// budget is spent
pub fn cube_camera(
    scope: &Scope,
    group: ObjectHandle,
    options: CubeCameraOptions,
) -> Result<CubeCamera> {
    let ctx = use_three(scope)?;
    let camera = CubeCamera::new(group, options);
    let frame_camera = camera.clone();
    use_frame(scope, CUBE_CAMERA_PRIORITY, move |_| frame_camera.on_frame(&ctx))?;
    tracing::debug!(texture = camera.texture().0, "cube camera mounted");
    Ok(camera)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_core::{Element, ReactiveGraph, Size};
    use orrery_fiber::{
        Camera, Color, HeadlessRenderer, Object3D, Renderer, Root, RootDescriptor, Scene,
    };
    use std::cell::RefCell;

    fn root(graph: &ReactiveGraph) -> (Root, Rc<RefCell<HeadlessRenderer>>) {
        let (headless, renderer) = HeadlessRenderer::shared(Element::new("canvas"));
        (Root::create(graph, RootDescriptor::new(renderer)).unwrap(), headless)
    }

    #[test]
    fn test_stash_restores_on_drop() {
        let scene = Scene::new().into_handle();
        scene.borrow_mut().background = Some(Background::Color(Color::WHITE));
        {
            let _stash = SceneStash::new(&scene, Some(Background::Color(Color::BLACK)), None);
            assert_eq!(
                scene.borrow().background,
                Some(Background::Color(Color::BLACK))
            );
        }
        assert_eq!(
            scene.borrow().background,
            Some(Background::Color(Color::WHITE))
        );
        assert!(scene.borrow().fog.is_none());
    }

    #[test]
    fn test_frame_budget() {
        let graph = ReactiveGraph::new();
        let (root, headless) = root(&graph);
        let scope = root.mount();
        let group = Object3D::new("mirror").into_handle();
        let camera = cube_camera(
            &scope,
            group,
            CubeCameraOptions {
                frames: Frames::Count(2),
                ..Default::default()
            },
        )
        .unwrap();

        for frame in 0..4 {
            root.force_frame(frame as f64 / 60.0);
        }
        assert_eq!(camera.captures(), 2);
        assert_eq!(headless.borrow().cube_captures.len(), 2);

        scope.dispose();
        root.force_frame(1.0);
        assert_eq!(headless.borrow().cube_captures.len(), 2);
    }

    #[test]
    fn test_capture_uses_overrides_and_restores_scene() {
        let graph = ReactiveGraph::new();
        let (root, headless) = root(&graph);
        let scene = root.context().scene().unwrap();
        scene.borrow_mut().background = Some(Background::Color(Color::WHITE));
        let fog = Fog {
            color: Color::BLACK,
            near: 1.0,
            far: 10.0,
        };

        let scope = root.mount();
        let camera = cube_camera(
            &scope,
            Object3D::new("mirror").into_handle(),
            CubeCameraOptions {
                fog: Some(fog.clone()),
                position: Vec3::new(0.0, 2.0, 0.0),
                ..Default::default()
            },
        )
        .unwrap();
        camera.capture(root.context()).unwrap();

        let capture = headless.borrow().cube_captures[0].clone();
        assert_eq!(capture.fog, Some(fog));
        assert_eq!(capture.background, Some(Background::Color(Color::WHITE)));
        assert_eq!(capture.position, Vec3::new(0.0, 2.0, 0.0));
        assert!(scene.borrow().fog.is_none());
    }

    struct VisibilityRecorder {
        group: ObjectHandle,
        seen: Vec<bool>,
    }

    impl Renderer for VisibilityRecorder {
        fn render(&mut self, _scene: &Scene, _camera: &Camera) {}

        fn render_cube(
            &mut self,
            _scene: &Scene,
            _target: &CubeRenderTarget,
            _position: Vec3,
            _near: f32,
            _far: f32,
        ) {
            self.seen.push(self.group.borrow().visible);
        }

        fn set_pixel_ratio(&mut self, _dpr: f32) {}

        fn set_size(&mut self, _size: Size) {}

        fn element(&self) -> Option<Element> {
            Some(Element::new("canvas"))
        }
    }

    #[test]
    fn test_group_hidden_only_while_capturing() {
        let graph = ReactiveGraph::new();
        let group = Object3D::new("mirror").into_handle();
        let recorder = Rc::new(RefCell::new(VisibilityRecorder {
            group: group.clone(),
            seen: Vec::new(),
        }));
        let renderer: orrery_fiber::RendererHandle = recorder.clone();
        let root = Root::create(&graph, RootDescriptor::new(renderer)).unwrap();

        let scope = root.mount();
        cube_camera(&scope, group.clone(), CubeCameraOptions::default()).unwrap();
        root.force_frame(0.0);

        assert_eq!(recorder.borrow().seen, vec![false]);
        assert!(group.borrow().visible);
    }
}
