//! Arcball controls
//!
//! Rotation follows a virtual sphere centred on the target: the pointer is
//! projected onto the sphere (or onto a hyperbolic sheet outside it) and the
//! camera turns by the arc between successive projections.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use orrery_core::{Element, Emitter, EventKind, InputEvent, Quat, Size, Vec2, Vec3};
use orrery_fiber::{CameraHandle, Controls, ControlsEvent, Projection};

use super::input::{emitted, ControlsCore, Emitted, MouseButtons, PointerDrag, POINTER_KINDS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArcballAction {
    Rotate,
    Pan,
}

#[derive(Clone, Debug)]
pub struct ArcballOptions {
    pub target: Vec3,
    /// Virtual sphere radius relative to the smaller element side
    pub radius_factor: f32,
    pub enable_rotate: bool,
    pub enable_zoom: bool,
    pub enable_pan: bool,
    /// Distance multiplier per wheel notch
    pub scale_factor: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub mouse_buttons: MouseButtons<ArcballAction>,
}

impl Default for ArcballOptions {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            radius_factor: 0.67,
            enable_rotate: true,
            enable_zoom: true,
            enable_pan: true,
            scale_factor: 1.1,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
            mouse_buttons: MouseButtons {
                primary: Some(ArcballAction::Rotate),
                middle: None,
                secondary: Some(ArcballAction::Pan),
            },
        }
    }
}

struct ArcballState {
    camera: CameraHandle,
    options: ArcballOptions,
    drag: PointerDrag<ArcballAction>,
    /// Last pointer projection, in camera space
    last_point: Vec3,
}

/// Element position to coordinates where the shorter side spans -1..1
fn normalized(at: Vec2, size: Size) -> Vec2 {
    let unit = size.width.min(size.height).max(1.0);
    Vec2::new(
        (2.0 * at.x - size.width) / unit,
        (size.height - 2.0 * at.y) / unit,
    )
}

/// Project onto the virtual sphere, or the hyperbola outside it
fn project_to_sphere(point: Vec2, radius: f32) -> Vec3 {
    let d2 = point.x * point.x + point.y * point.y;
    let r2 = radius * radius;
    let z = if d2 <= r2 * 0.5 {
        (r2 - d2).sqrt()
    } else {
        r2 * 0.5 / d2.sqrt()
    };
    Vec3::new(point.x, point.y, z)
}

impl ArcballState {
    fn project(&self, at: Vec2, size: Size) -> Vec3 {
        project_to_sphere(normalized(at, size), self.options.radius_factor)
    }

    /// Turn the camera around the target by the arc from `from` to `to`
    fn rotate(&mut self, from: Vec3, to: Vec3) -> bool {
        let axis = from.cross(to);
        if axis.length_squared() < 1e-12 {
            return false;
        }
        let cos = (from.dot(to) / (from.length() * to.length())).clamp(-1.0, 1.0);
        let angle = cos.acos();

        let mut camera = self.camera.borrow_mut();
        let world_axis = camera.quaternion.rotate_vec3(axis.normalize());
        let rotation = Quat::from_axis_angle(world_axis, -angle);
        let target = self.options.target;

        camera.position = target + rotation.rotate_vec3(camera.position - target);
        camera.quaternion = rotation.mul_quat(&camera.quaternion).normalize();
        camera.up = rotation.rotate_vec3(camera.up);
        true
    }

    fn pan(&mut self, delta: Vec2, size: Size) -> bool {
        if delta == Vec2::ZERO {
            return false;
        }
        let mut camera = self.camera.borrow_mut();
        let unit = size.width.min(size.height).max(1.0);
        let half_extent = match camera.projection {
            Projection::Perspective { fov, .. } => {
                (camera.position - self.options.target).length() * (fov.to_radians() / 2.0).tan()
            }
            Projection::Orthographic { top, bottom, .. } => (top - bottom) / 2.0 / camera.zoom,
        };
        let scale = 2.0 * half_extent / unit;
        let offset = camera.right() * (-delta.x * scale) + camera.camera_up() * (delta.y * scale);
        camera.position += offset;
        self.options.target += offset;
        true
    }

    fn zoom(&mut self, delta_y: f32) -> bool {
        let factor = if delta_y > 0.0 {
            self.options.scale_factor
        } else {
            1.0 / self.options.scale_factor
        };
        let mut camera = self.camera.borrow_mut();
        if camera.is_orthographic() {
            camera.zoom /= factor;
            camera.update_projection_matrix();
            return true;
        }
        let target = self.options.target;
        let eye = camera.position - target;
        let distance = (eye.length() * factor)
            .clamp(self.options.min_distance, self.options.max_distance);
        let position = target + eye.normalize() * distance;
        let moved = (position - camera.position).length_squared() > 1e-12;
        camera.position = position;
        moved
    }

    fn handle(state: &mut ArcballState, event: &InputEvent, element: &Element) -> Emitted {
        let size = element.client_size();
        match event {
            InputEvent::PointerDown(pointer) => {
                let Some(action) = state.options.mouse_buttons.action(pointer.button) else {
                    return Emitted::new();
                };
                let allowed = match action {
                    ArcballAction::Rotate => state.options.enable_rotate,
                    ArcballAction::Pan => state.options.enable_pan,
                };
                if !allowed || state.drag.is_active() {
                    return Emitted::new();
                }
                state.last_point = state.project(pointer.position, size);
                state
                    .drag
                    .begin(action, pointer.pointer_id, pointer.position, element);
                emitted(&[ControlsEvent::Start])
            }
            InputEvent::PointerMove(pointer) => {
                let Some((action, delta)) = state.drag.movement(pointer.pointer_id, pointer.position)
                else {
                    return Emitted::new();
                };
                let moved = match action {
                    ArcballAction::Rotate => {
                        let point = state.project(pointer.position, size);
                        let from = std::mem::replace(&mut state.last_point, point);
                        state.rotate(from, point)
                    }
                    ArcballAction::Pan => state.pan(delta, size),
                };
                if moved {
                    emitted(&[ControlsEvent::Change])
                } else {
                    Emitted::new()
                }
            }
            InputEvent::PointerUp(pointer) | InputEvent::PointerCancel(pointer) => {
                if state.drag.end(pointer.pointer_id, element) {
                    emitted(&[ControlsEvent::End])
                } else {
                    Emitted::new()
                }
            }
            InputEvent::Wheel(wheel) => {
                if !state.options.enable_zoom || wheel.delta_y == 0.0 {
                    return Emitted::new();
                }
                let mut out = emitted(&[ControlsEvent::Start]);
                if state.zoom(wheel.delta_y) {
                    out.push(ControlsEvent::Change);
                }
                out.push(ControlsEvent::End);
                out
            }
            _ => Emitted::new(),
        }
    }
}

/// Virtual-sphere rotation, wheel zoom and screen-space pan
pub struct ArcballControls {
    core: ControlsCore,
    state: Rc<RefCell<ArcballState>>,
}

impl ArcballControls {
    pub fn new(camera: CameraHandle) -> Self {
        Self::with_options(camera, ArcballOptions::default())
    }

    pub fn with_options(camera: CameraHandle, options: ArcballOptions) -> Self {
        camera.borrow_mut().look_at(options.target);
        let state = ArcballState {
            camera,
            options,
            drag: PointerDrag::default(),
            last_point: Vec3::ZERO,
        };
        Self {
            core: ControlsCore::new("arcball"),
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn camera(&self) -> CameraHandle {
        Rc::clone(&self.state.borrow().camera)
    }

    pub fn target(&self) -> Vec3 {
        self.state.borrow().options.target
    }

    pub fn configure(&self, f: impl FnOnce(&mut ArcballOptions)) {
        f(&mut self.state.borrow_mut().options);
    }
}

impl Controls for ArcballControls {
    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn is_enabled(&self) -> bool {
        self.core.is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        self.core.set_enabled(enabled);
    }

    fn connect(&self, element: &Element) {
        if !self.core.begin_connect() {
            return;
        }
        for kind in POINTER_KINDS.into_iter().chain([EventKind::Wheel]) {
            self.core.listen(element, kind, &self.state, ArcballState::handle);
        }
    }

    fn disconnect(&self) {
        self.core.disconnect();
    }

    /// Input is applied as it arrives
    fn update(&self, _delta: f32) {}

    fn dispose(&self) {
        self.core.dispose();
    }

    fn events(&self) -> &Emitter<ControlsEvent> {
        self.core.events()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
