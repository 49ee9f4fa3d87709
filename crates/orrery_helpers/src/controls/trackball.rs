//! Trackball controls
//!
//! Free rotation around a target with no fixed up axis: the camera's up
//! vector rotates along with it. Motion keeps going after release unless
//! `static_moving` is set, decaying by `dynamic_damping_factor`.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use orrery_core::{Element, Emitter, EventKind, InputEvent, Quat, Size, Vec2, Vec3};
use orrery_fiber::{Camera, CameraHandle, Controls, ControlsEvent};

use super::input::{emitted, ControlsCore, Emitted, MouseButtons, PointerDrag, POINTER_KINDS};

const EPS: f32 = 1e-6;
const SETTLE: f32 = 1e-5;
const WHEEL_SCALE: f32 = 0.00025;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackballAction {
    Rotate,
    Zoom,
    Pan,
}

#[derive(Clone, Debug)]
pub struct TrackballOptions {
    pub target: Vec3,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
    pub no_rotate: bool,
    pub no_zoom: bool,
    pub no_pan: bool,
    /// Stop as soon as input stops instead of coasting
    pub static_moving: bool,
    pub dynamic_damping_factor: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub mouse_buttons: MouseButtons<TrackballAction>,
}

impl Default for TrackballOptions {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            rotate_speed: 1.0,
            zoom_speed: 1.2,
            pan_speed: 0.3,
            no_rotate: false,
            no_zoom: false,
            no_pan: false,
            static_moving: false,
            dynamic_damping_factor: 0.2,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
            mouse_buttons: MouseButtons {
                primary: Some(TrackballAction::Rotate),
                middle: Some(TrackballAction::Zoom),
                secondary: Some(TrackballAction::Pan),
            },
        }
    }
}

struct TrackballState {
    camera: CameraHandle,
    options: TrackballOptions,
    drag: PointerDrag<TrackballAction>,
    move_prev: Vec2,
    move_curr: Vec2,
    last_axis: Vec3,
    last_angle: f32,
    zoom_start: f32,
    zoom_end: f32,
    pan_start: Vec2,
    pan_end: Vec2,
    last_position: Vec3,
    last_up: Vec3,
    last_target: Vec3,
}

/// Pointer position projected onto the unit circle centred on the element
fn on_circle(at: Vec2, size: Size) -> Vec2 {
    let half_width = (size.width * 0.5).max(0.5);
    Vec2::new(
        (at.x - half_width) / half_width,
        (size.height - 2.0 * at.y) / (half_width * 2.0),
    )
}

/// Pointer position in 0..1 element coordinates
fn on_screen(at: Vec2, size: Size) -> Vec2 {
    Vec2::new(at.x / size.width.max(1.0), at.y / size.height.max(1.0))
}

impl TrackballState {
    fn is_pending(&self) -> bool {
        self.move_curr != self.move_prev
            || self.last_angle != 0.0
            || self.zoom_start != self.zoom_end
            || self.pan_start != self.pan_end
            || self.options.target != self.last_target
    }

    fn rotate(&mut self, camera: &mut Camera, eye: &mut Vec3) {
        let change = self.move_curr - self.move_prev;
        let angle = change.length();
        if angle > 0.0 {
            let eye_direction = eye.normalize();
            let up = camera.up.normalize();
            let sideways = up.cross(eye_direction).normalize();
            let direction = up * change.y + sideways * change.x;
            let axis = direction.cross(*eye).normalize();
            let angle = angle * self.options.rotate_speed;

            let rotation = Quat::from_axis_angle(axis, angle);
            *eye = rotation.rotate_vec3(*eye);
            camera.up = rotation.rotate_vec3(camera.up);
            self.last_axis = axis;
            self.last_angle = angle;
        } else if !self.options.static_moving && self.last_angle != 0.0 {
            self.last_angle *= (1.0 - self.options.dynamic_damping_factor).sqrt();
            if self.last_angle.abs() < SETTLE {
                self.last_angle = 0.0;
            } else {
                let rotation = Quat::from_axis_angle(self.last_axis, self.last_angle);
                *eye = rotation.rotate_vec3(*eye);
                camera.up = rotation.rotate_vec3(camera.up);
            }
        }
        self.move_prev = self.move_curr;
        if self.options.static_moving {
            self.last_angle = 0.0;
        }
    }

    fn zoom(&mut self, camera: &mut Camera, eye: &mut Vec3) {
        let factor = 1.0 + (self.zoom_end - self.zoom_start) * self.options.zoom_speed;
        if factor != 1.0 && factor > 0.0 {
            if camera.is_orthographic() {
                camera.zoom /= factor;
                camera.update_projection_matrix();
            } else {
                *eye *= factor;
            }
        }
        if self.options.static_moving {
            self.zoom_start = self.zoom_end;
        } else {
            self.zoom_start += (self.zoom_end - self.zoom_start) * self.options.dynamic_damping_factor;
            if (self.zoom_end - self.zoom_start).abs() < SETTLE {
                self.zoom_start = self.zoom_end;
            }
        }
    }

    fn pan(&mut self, camera: &Camera, eye: Vec3) {
        let change = self.pan_end - self.pan_start;
        if change.length() == 0.0 {
            return;
        }
        let scaled = change * (eye.length() * self.options.pan_speed);
        let offset = eye.cross(camera.up).normalize() * scaled.x + camera.up.normalize() * scaled.y;
        self.options.target += offset;

        if self.options.static_moving {
            self.pan_start = self.pan_end;
        } else {
            self.pan_start += change * self.options.dynamic_damping_factor;
            if (self.pan_end - self.pan_start).length() < SETTLE {
                self.pan_start = self.pan_end;
            }
        }
    }

    fn apply(&mut self) -> bool {
        if !self.is_pending() {
            return false;
        }
        let camera_handle = Rc::clone(&self.camera);
        let mut camera = camera_handle.borrow_mut();
        let mut eye = camera.position - self.options.target;

        if !self.options.no_rotate {
            self.rotate(&mut camera, &mut eye);
        }
        if !self.options.no_zoom {
            self.zoom(&mut camera, &mut eye);
        }
        if !self.options.no_pan {
            self.pan(&camera, eye);
        }

        let distance = eye.length();
        if distance > self.options.max_distance {
            eye = eye.normalize() * self.options.max_distance;
            self.zoom_start = self.zoom_end;
        } else if distance < self.options.min_distance {
            eye = eye.normalize() * self.options.min_distance;
            self.zoom_start = self.zoom_end;
        }

        let target = self.options.target;
        camera.position = target + eye;
        camera.look_at(target);
        self.last_target = target;

        // Per-frame motion, so the damped tail cannot resurface after a silent frame
        let moved = (self.last_position - camera.position).length_squared() > EPS
            || (self.last_up - camera.up).length_squared() > EPS;
        self.last_position = camera.position;
        self.last_up = camera.up;
        moved
    }

    fn handle(state: &mut TrackballState, event: &InputEvent, element: &Element) -> Emitted {
        let size = element.client_size();
        match event {
            InputEvent::PointerDown(pointer) => {
                let Some(action) = state.options.mouse_buttons.action(pointer.button) else {
                    return Emitted::new();
                };
                if state.drag.is_active() {
                    return Emitted::new();
                }
                match action {
                    TrackballAction::Rotate if !state.options.no_rotate => {
                        state.move_curr = on_circle(pointer.position, size);
                        state.move_prev = state.move_curr;
                    }
                    TrackballAction::Zoom if !state.options.no_zoom => {
                        state.zoom_start = on_screen(pointer.position, size).y;
                        state.zoom_end = state.zoom_start;
                    }
                    TrackballAction::Pan if !state.options.no_pan => {
                        state.pan_start = on_screen(pointer.position, size);
                        state.pan_end = state.pan_start;
                    }
                    _ => return Emitted::new(),
                }
                state
                    .drag
                    .begin(action, pointer.pointer_id, pointer.position, element);
                emitted(&[ControlsEvent::Start])
            }
            InputEvent::PointerMove(pointer) => {
                let Some((action, _)) = state.drag.movement(pointer.pointer_id, pointer.position)
                else {
                    return Emitted::new();
                };
                match action {
                    TrackballAction::Rotate => {
                        state.move_prev = state.move_curr;
                        state.move_curr = on_circle(pointer.position, size);
                    }
                    TrackballAction::Zoom => state.zoom_end = on_screen(pointer.position, size).y,
                    TrackballAction::Pan => state.pan_end = on_screen(pointer.position, size),
                }
                if state.apply() {
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
                if state.options.no_zoom || wheel.delta_y == 0.0 {
                    return Emitted::new();
                }
                state.zoom_start -= wheel.delta_y * WHEEL_SCALE;
                let mut out = emitted(&[ControlsEvent::Start]);
                if state.apply() {
                    out.push(ControlsEvent::Change);
                }
                out.push(ControlsEvent::End);
                out
            }
            _ => Emitted::new(),
        }
    }
}

/// Rotate, zoom and pan without a fixed up axis
pub struct TrackballControls {
    core: ControlsCore,
    state: Rc<RefCell<TrackballState>>,
}

impl TrackballControls {
    pub fn new(camera: CameraHandle) -> Self {
        Self::with_options(camera, TrackballOptions::default())
    }

    pub fn with_options(camera: CameraHandle, options: TrackballOptions) -> Self {
        let (position, up) = {
            let camera = camera.borrow();
            (camera.position, camera.up)
        };
        let target = options.target;
        let state = TrackballState {
            camera,
            options,
            drag: PointerDrag::default(),
            move_prev: Vec2::ZERO,
            move_curr: Vec2::ZERO,
            last_axis: Vec3::ZERO,
            last_angle: 0.0,
            zoom_start: 0.0,
            zoom_end: 0.0,
            pan_start: Vec2::ZERO,
            pan_end: Vec2::ZERO,
            last_position: position,
            last_up: up,
            last_target: target,
        };
        Self {
            core: ControlsCore::new("trackball"),
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn camera(&self) -> CameraHandle {
        Rc::clone(&self.state.borrow().camera)
    }

    pub fn target(&self) -> Vec3 {
        self.state.borrow().options.target
    }

    pub fn set_target(&self, target: Vec3) {
        self.state.borrow_mut().options.target = target;
    }

    pub fn configure(&self, f: impl FnOnce(&mut TrackballOptions)) {
        f(&mut self.state.borrow_mut().options);
    }
}

impl Controls for TrackballControls {
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
        for kind in POINTER_KINDS.into_iter().chain([EventKind::Wheel, EventKind::ContextMenu]) {
            self.core.listen(element, kind, &self.state, TrackballState::handle);
        }
    }

    fn disconnect(&self) {
        self.core.disconnect();
    }

    fn update(&self, _delta: f32) {
        let changed = match self.state.try_borrow_mut() {
            Ok(mut state) => state.apply(),
            Err(_) => false,
        };
        if changed {
            self.core.emit(ControlsEvent::Change);
        }
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_core::{PointerButton, PointerEvent, WheelEvent};
    use std::cell::Cell;

    fn setup() -> (TrackballControls, Element, Rc<Cell<u32>>) {
        let camera = Camera::default()
            .with_position(Vec3::new(0.0, 0.0, 10.0))
            .into_handle();
        let controls = TrackballControls::new(camera);
        let element = Element::with_size("canvas", Size::new(800.0, 600.0));
        controls.connect(&element);
        let changes = Rc::new(Cell::new(0));
        let counter = changes.clone();
        controls.events().subscribe(move |event| {
            if *event == ControlsEvent::Change {
                counter.set(counter.get() + 1);
            }
        });
        (controls, element, changes)
    }

    fn drag(element: &Element, button: PointerButton, from: (f32, f32), to: (f32, f32)) {
        element.dispatch(&InputEvent::PointerDown(
            PointerEvent::at(from.0, from.1).with_button(button),
        ));
        element.dispatch(&InputEvent::PointerMove(
            PointerEvent::at(to.0, to.1).with_button(button),
        ));
        element.dispatch(&InputEvent::PointerUp(
            PointerEvent::at(to.0, to.1).with_button(button),
        ));
    }

    fn distance(controls: &TrackballControls) -> f32 {
        let camera = controls.camera();
        let position = camera.borrow().position;
        position.distance(controls.target())
    }

    #[test]
    fn test_rotation_coasts_then_settles() {
        let (controls, element, changes) = setup();
        drag(&element, PointerButton::Primary, (400.0, 300.0), (450.0, 300.0));
        assert_eq!(changes.get(), 1);
        assert!((distance(&controls) - 10.0).abs() < 1e-3);

        let mut frames = 0;
        loop {
            let before = changes.get();
            controls.update(1.0 / 60.0);
            frames += 1;
            if changes.get() == before || frames > 1000 {
                break;
            }
        }
        assert!(changes.get() > 1, "rotation should coast after release");
        assert!(frames < 1000);
        assert!((distance(&controls) - 10.0).abs() < 1e-2);
    }

    #[test]
    fn test_wheel_zooms_towards_target() {
        let (controls, element, changes) = setup();
        element.dispatch(&InputEvent::Wheel(WheelEvent {
            delta_y: -100.0,
            ..Default::default()
        }));
        assert_eq!(changes.get(), 1);
        assert!(distance(&controls) < 10.0);
    }

    #[test]
    fn test_pan_moves_target_with_camera() {
        let (controls, element, _) = setup();
        controls.configure(|options| options.static_moving = true);
        drag(&element, PointerButton::Secondary, (400.0, 300.0), (480.0, 300.0));
        assert!(controls.target().x < 0.0);
        assert!((distance(&controls) - 10.0).abs() < 1e-3);
    }
}
