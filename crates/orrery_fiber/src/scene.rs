//! Scene-graph collaborators
//!
//! The renderer and the scene graph live outside of Orrery. This module holds
//! the slice of their state the lifecycle layer touches: cameras, the scene's
//! ambient state (background, fog, environment), plain objects, geometry
//! attributes, and the [`Renderer`] trait hosts implement.

use indexmap::IndexMap;
use orrery_core::{Element, Quat, Size, Vec3};
use std::cell::RefCell;
use std::rc::Rc;

// ============================================================================
// Camera
// ============================================================================

/// Camera projection
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    Perspective {
        /// Vertical field of view in degrees
        fov: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    },
}

/// A camera in the scene graph
#[derive(Clone, Debug)]
pub struct Camera {
    pub label: String,
    pub position: Vec3,
    /// Orientation; the camera looks down its local -Z axis
    pub quaternion: Quat,
    pub up: Vec3,
    pub zoom: f32,
    pub projection: Projection,
    /// Bumped whenever projection parameters change
    projection_version: u64,
}

/// Shared handle to a camera
pub type CameraHandle = Rc<RefCell<Camera>>;

impl Camera {
    /// Create a perspective camera
    pub fn perspective(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            label: "perspective".into(),
            position: Vec3::new(0.0, 0.0, 5.0),
            quaternion: Quat::IDENTITY,
            up: Vec3::UP,
            zoom: 1.0,
            projection: Projection::Perspective {
                fov,
                aspect,
                near,
                far,
            },
            projection_version: 0,
        }
    }

    /// Create an orthographic camera framing `size` pixels
    pub fn orthographic(size: Size, near: f32, far: f32) -> Self {
        let (hw, hh) = (size.width / 2.0, size.height / 2.0);
        Self {
            label: "orthographic".into(),
            position: Vec3::new(0.0, 0.0, 5.0),
            quaternion: Quat::IDENTITY,
            up: Vec3::UP,
            zoom: 1.0,
            projection: Projection::Orthographic {
                left: -hw,
                right: hw,
                top: hh,
                bottom: -hh,
                near,
                far,
            },
            projection_version: 0,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Wrap into a shared handle
    pub fn into_handle(self) -> CameraHandle {
        Rc::new(RefCell::new(self))
    }

    pub fn is_orthographic(&self) -> bool {
        matches!(self.projection, Projection::Orthographic { .. })
    }

    /// Orient the camera towards `target`
    pub fn look_at(&mut self, target: Vec3) {
        let direction = target - self.position;
        if direction.length_squared() > 0.0 {
            self.quaternion = Quat::look_rotation(direction, self.up);
        }
    }

    /// Unit vector the camera looks along
    pub fn forward(&self) -> Vec3 {
        self.quaternion.rotate_vec3(Vec3::FORWARD)
    }

    /// Unit vector to the camera's right
    pub fn right(&self) -> Vec3 {
        self.quaternion.rotate_vec3(Vec3::X)
    }

    /// Unit vector pointing up in camera space
    pub fn camera_up(&self) -> Vec3 {
        self.quaternion.rotate_vec3(Vec3::UP)
    }

    /// Vertical field of view in degrees (perspective only)
    pub fn fov(&self) -> Option<f32> {
        match self.projection {
            Projection::Perspective { fov, .. } => Some(fov),
            Projection::Orthographic { .. } => None,
        }
    }

    /// Adapt the projection to a new output size
    pub fn set_view_size(&mut self, size: Size) {
        match &mut self.projection {
            Projection::Perspective { aspect, .. } => *aspect = size.aspect(),
            Projection::Orthographic {
                left,
                right,
                top,
                bottom,
                ..
            } => {
                *left = -size.width / 2.0;
                *right = size.width / 2.0;
                *top = size.height / 2.0;
                *bottom = -size.height / 2.0;
            }
        }
        self.update_projection_matrix();
    }

    /// Mark projection parameters as changed
    pub fn update_projection_matrix(&mut self) {
        self.projection_version += 1;
    }

    pub fn projection_version(&self) -> u64 {
        self.projection_version
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(75.0, 1.0, 0.1, 1000.0)
    }
}

// ============================================================================
// Scene
// ============================================================================

/// Linear RGB color
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}

/// Opaque handle to a host-side texture
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// What is drawn behind the scene
#[derive(Clone, Debug, PartialEq)]
pub enum Background {
    Color(Color),
    Texture(TextureId),
}

/// Linear distance fog
#[derive(Clone, Debug, PartialEq)]
pub struct Fog {
    pub color: Color,
    pub near: f32,
    pub far: f32,
}

/// Ambient state of a scene
#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub background: Option<Background>,
    pub fog: Option<Fog>,
    pub environment: Option<TextureId>,
}

/// Shared handle to a scene
pub type SceneHandle = Rc<RefCell<Scene>>;

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_handle(self) -> SceneHandle {
        Rc::new(RefCell::new(self))
    }
}

/// A plain transformable object (groups, meshes, transform targets)
#[derive(Clone, Debug)]
pub struct Object3D {
    pub label: String,
    pub position: Vec3,
    pub quaternion: Quat,
    pub scale: Vec3,
    pub visible: bool,
}

/// Shared handle to an object
pub type ObjectHandle = Rc<RefCell<Object3D>>;

impl Object3D {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            position: Vec3::ZERO,
            quaternion: Quat::IDENTITY,
            scale: Vec3::ONE,
            visible: true,
        }
    }

    pub fn into_handle(self) -> ObjectHandle {
        Rc::new(RefCell::new(self))
    }
}

// ============================================================================
// Geometry
// ============================================================================

/// Flat per-vertex attribute data
#[derive(Clone, Debug, PartialEq)]
pub struct BufferAttribute {
    pub data: Vec<f32>,
    /// Components per vertex
    pub item_size: usize,
}

impl BufferAttribute {
    pub fn new(data: Vec<f32>, item_size: usize) -> Self {
        Self { data, item_size }
    }

    /// Number of vertices covered by the attribute
    pub fn count(&self) -> usize {
        if self.item_size == 0 {
            0
        } else {
            self.data.len() / self.item_size
        }
    }

    /// Component slice for one vertex
    pub fn item(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.item_size)?;
        self.data.get(start..start + self.item_size)
    }
}

/// Geometry as a set of named attributes
#[derive(Clone, Debug, Default)]
pub struct Geometry {
    attributes: IndexMap<String, BufferAttribute>,
}

/// Shared handle to a geometry
pub type GeometryHandle = Rc<RefCell<Geometry>>;

impl Geometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attribute: BufferAttribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    pub fn into_handle(self) -> GeometryHandle {
        Rc::new(RefCell::new(self))
    }

    pub fn attribute(&self, name: &str) -> Option<&BufferAttribute> {
        self.attributes.get(name)
    }

    /// Insert or replace an attribute, returning the previous one
    pub fn set_attribute(
        &mut self,
        name: impl Into<String>,
        attribute: BufferAttribute,
    ) -> Option<BufferAttribute> {
        self.attributes.insert(name.into(), attribute)
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<BufferAttribute> {
        self.attributes.shift_remove(name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Vertex count taken from the `position` attribute
    pub fn vertex_count(&self) -> usize {
        self.attribute("position").map_or(0, BufferAttribute::count)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

// ============================================================================
// Renderer
// ============================================================================

/// Off-screen cube target written by cube captures
#[derive(Clone, Debug, PartialEq)]
pub struct CubeRenderTarget {
    pub resolution: u32,
    pub texture: TextureId,
}

/// The real-time renderer, implemented by the host
pub trait Renderer {
    /// Draw the scene from the camera into the output surface
    fn render(&mut self, scene: &Scene, camera: &Camera);

    /// Draw the scene into the six faces of a cube target
    fn render_cube(
        &mut self,
        scene: &Scene,
        target: &CubeRenderTarget,
        position: Vec3,
        near: f32,
        far: f32,
    );

    fn set_pixel_ratio(&mut self, dpr: f32);

    fn set_size(&mut self, size: Size);

    /// The surface the renderer draws into, if it owns one
    fn element(&self) -> Option<Element> {
        None
    }

    /// Release GPU resources
    fn dispose(&mut self) {}
}

/// Shared handle to a renderer
pub type RendererHandle = Rc<RefCell<dyn Renderer>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_look_at_faces_target() {
        let mut camera = Camera::default().with_position(Vec3::new(0.0, 0.0, 10.0));
        camera.look_at(Vec3::new(10.0, 0.0, 10.0));
        assert!(camera.forward().abs_diff_eq(Vec3::X, 1e-5));
    }

    #[test]
    fn test_view_size_updates_aspect_and_version() {
        let mut camera = Camera::default();
        camera.set_view_size(Size::new(800.0, 400.0));
        match camera.projection {
            Projection::Perspective { aspect, .. } => assert_eq!(aspect, 2.0),
            _ => unreachable!(),
        }
        assert_eq!(camera.projection_version(), 1);
    }

    #[test]
    fn test_geometry_attribute_replace_returns_previous() {
        let mut geometry = Geometry::new()
            .with_attribute("position", BufferAttribute::new(vec![0.0; 9], 3));
        assert_eq!(geometry.vertex_count(), 3);

        let old = geometry.set_attribute("position", BufferAttribute::new(vec![1.0; 6], 3));
        assert_eq!(old.map(|a| a.count()), Some(3));
        assert_eq!(geometry.vertex_count(), 2);
        assert_eq!(
            geometry.attribute("position").and_then(|a| a.item(1)),
            Some(&[1.0, 1.0, 1.0][..])
        );
    }
}
