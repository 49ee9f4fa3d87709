//! Headless renderer
//!
//! Records every call instead of drawing. Useful for servers, snapshot
//! tooling and tests that need a root without a GPU.

use std::cell::RefCell;
use std::rc::Rc;

use orrery_core::{Element, Size, Vec3};

use crate::scene::{Background, Camera, CubeRenderTarget, Fog, Renderer, RendererHandle, Scene};

/// One recorded main-pass render
#[derive(Clone, Debug, PartialEq)]
pub struct RenderRecord {
    pub camera: String,
    pub camera_position: Vec3,
    pub background: Option<Background>,
}

/// One recorded cube capture
#[derive(Clone, Debug, PartialEq)]
pub struct CubeRecord {
    pub position: Vec3,
    pub resolution: u32,
    /// Scene ambient state as seen during the capture
    pub background: Option<Background>,
    pub fog: Option<Fog>,
}

/// A renderer that records instead of drawing
#[derive(Debug)]
pub struct HeadlessRenderer {
    element: Element,
    pub renders: Vec<RenderRecord>,
    pub cube_captures: Vec<CubeRecord>,
    pub pixel_ratio: f32,
    pub size: Size,
    pub disposed: bool,
}

impl HeadlessRenderer {
    pub fn new(element: Element) -> Self {
        let size = element.client_size();
        Self {
            element,
            renders: Vec::new(),
            cube_captures: Vec::new(),
            pixel_ratio: 1.0,
            size,
            disposed: false,
        }
    }

    /// Shared handle plus the same renderer as a trait object
    pub fn shared(element: Element) -> (Rc<RefCell<HeadlessRenderer>>, RendererHandle) {
        let renderer = Rc::new(RefCell::new(Self::new(element)));
        let handle: RendererHandle = renderer.clone();
        (renderer, handle)
    }

    pub fn render_count(&self) -> usize {
        self.renders.len()
    }
}

impl Renderer for HeadlessRenderer {
    fn render(&mut self, scene: &Scene, camera: &Camera) {
        self.renders.push(RenderRecord {
            camera: camera.label.clone(),
            camera_position: camera.position,
            background: scene.background.clone(),
        });
    }

    fn render_cube(
        &mut self,
        scene: &Scene,
        target: &CubeRenderTarget,
        position: Vec3,
        _near: f32,
        _far: f32,
    ) {
        self.cube_captures.push(CubeRecord {
            position,
            resolution: target.resolution,
            background: scene.background.clone(),
            fog: scene.fog.clone(),
        });
    }

    fn set_pixel_ratio(&mut self, dpr: f32) {
        self.pixel_ratio = dpr;
    }

    fn set_size(&mut self, size: Size) {
        self.size = size;
    }

    fn element(&self) -> Option<Element> {
        Some(self.element.clone())
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }
}
