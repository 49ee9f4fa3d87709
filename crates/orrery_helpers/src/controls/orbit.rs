//! Orbit and map controls
//!
//! Orbits the camera around a target point. Rotation and zoom are kept in
//! spherical coordinates around the camera's up axis; panning moves the
//! target. With damping enabled, input accumulates into deltas that the
//! per-frame update bleeds off.

use std::any::Any;
use std::cell::RefCell;
use std::f32::consts::PI;
use std::ops::Deref;
use std::rc::Rc;

use orrery_core::{Element, Emitter, EventKind, InputEvent, Quat, Size, Spherical, Vec2, Vec3};
use orrery_fiber::{CameraHandle, Controls, ControlsEvent, Projection};

use super::input::{emitted, ControlsCore, Emitted, MouseButtons, PointerDrag, POINTER_KINDS};

const EPS: f32 = 1e-6;
/// Damped deltas below this snap to zero
const SETTLE: f32 = 1e-4;

/// What a pointer drag does
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrbitAction {
    Rotate,
    Dolly,
    Pan,
}

/// Tuning of [`OrbitControls`]
#[derive(Clone, Debug)]
pub struct OrbitOptions {
    /// Point the camera orbits around
    pub target: Vec3,
    pub enable_damping: bool,
    pub damping_factor: f32,
    pub enable_zoom: bool,
    pub zoom_speed: f32,
    pub enable_rotate: bool,
    pub rotate_speed: f32,
    pub enable_pan: bool,
    pub pan_speed: f32,
    /// Pan in the screen plane instead of the ground plane
    pub screen_space_panning: bool,
    pub min_distance: f32,
    pub max_distance: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
    /// Polar angle limits, measured from the up axis
    pub min_polar_angle: f32,
    pub max_polar_angle: f32,
    pub min_azimuth_angle: f32,
    pub max_azimuth_angle: f32,
    pub auto_rotate: bool,
    /// Full turns per minute, times two
    pub auto_rotate_speed: f32,
    pub mouse_buttons: MouseButtons<OrbitAction>,
}

impl Default for OrbitOptions {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            enable_damping: true,
            damping_factor: 0.05,
            enable_zoom: true,
            zoom_speed: 1.0,
            enable_rotate: true,
            rotate_speed: 1.0,
            enable_pan: true,
            pan_speed: 1.0,
            screen_space_panning: true,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
            min_zoom: 0.0,
            max_zoom: f32::INFINITY,
            min_polar_angle: 0.0,
            max_polar_angle: PI,
            min_azimuth_angle: f32::NEG_INFINITY,
            max_azimuth_angle: f32::INFINITY,
            auto_rotate: false,
            auto_rotate_speed: 2.0,
            mouse_buttons: MouseButtons {
                primary: Some(OrbitAction::Rotate),
                middle: Some(OrbitAction::Dolly),
                secondary: Some(OrbitAction::Pan),
            },
        }
    }
}

impl OrbitOptions {
    /// Preset for map-style navigation: primary button pans over the ground
    pub fn map() -> Self {
        Self {
            screen_space_panning: false,
            mouse_buttons: MouseButtons {
                primary: Some(OrbitAction::Pan),
                middle: Some(OrbitAction::Dolly),
                secondary: Some(OrbitAction::Rotate),
            },
            ..Self::default()
        }
    }
}

pub(crate) struct OrbitState {
    camera: CameraHandle,
    options: OrbitOptions,
    spherical_delta: Spherical,
    scale: f32,
    pan_offset: Vec3,
    zoom_changed: bool,
    drag: PointerDrag<OrbitAction>,
    last_position: Vec3,
    last_quaternion: Quat,
    last_target: Vec3,
    saved: (Vec3, Vec3, f32),
}

impl OrbitState {
    fn new(camera: CameraHandle, options: OrbitOptions) -> Self {
        let (position, quaternion, zoom) = {
            let camera = camera.borrow();
            (camera.position, camera.quaternion, camera.zoom)
        };
        let target = options.target;
        Self {
            camera,
            options,
            spherical_delta: Spherical::new(1.0, 0.0, 0.0),
            scale: 1.0,
            pan_offset: Vec3::ZERO,
            zoom_changed: false,
            drag: PointerDrag::default(),
            last_position: position,
            last_quaternion: quaternion,
            last_target: target,
            saved: (target, position, zoom),
        }
    }

    fn zoom_scale(&self) -> f32 {
        0.95f32.powf(self.options.zoom_speed)
    }

    fn rotate_left(&mut self, angle: f32) {
        self.spherical_delta.theta -= angle;
    }

    fn rotate_up(&mut self, angle: f32) {
        self.spherical_delta.phi -= angle;
    }

    fn dolly(&mut self, factor: f32) {
        let mut camera = self.camera.borrow_mut();
        if camera.is_orthographic() {
            camera.zoom = (camera.zoom * factor).clamp(self.options.min_zoom, self.options.max_zoom);
            camera.update_projection_matrix();
            self.zoom_changed = true;
        } else {
            self.scale /= factor;
        }
    }

    /// Move the camera closer
    fn dolly_in(&mut self) {
        let scale = self.zoom_scale();
        self.dolly(1.0 / scale);
    }

    fn dolly_out(&mut self) {
        let scale = self.zoom_scale();
        self.dolly(scale);
    }

    fn pan(&mut self, delta: Vec2, size: Size) {
        let camera = self.camera.borrow();
        let (left, up) = match camera.projection {
            Projection::Perspective { fov, .. } => {
                let distance = (camera.position - self.options.target).length()
                    * (fov.to_radians() / 2.0).tan();
                (
                    2.0 * delta.x * distance / size.height.max(1.0),
                    2.0 * delta.y * distance / size.height.max(1.0),
                )
            }
            Projection::Orthographic {
                left,
                right,
                top,
                bottom,
                ..
            } => (
                delta.x * (right - left) / camera.zoom / size.width.max(1.0),
                delta.y * (top - bottom) / camera.zoom / size.height.max(1.0),
            ),
        };

        let right_axis = camera.right();
        let up_axis = if self.options.screen_space_panning {
            camera.camera_up()
        } else {
            camera.up.cross(right_axis)
        };
        let offset = right_axis * (-left * self.options.pan_speed)
            + up_axis * (up * self.options.pan_speed);
        drop(camera);
        self.pan_offset += offset;
    }

    fn is_pending(&self) -> bool {
        self.spherical_delta.theta != 0.0
            || self.spherical_delta.phi != 0.0
            || self.scale != 1.0
            || self.pan_offset != Vec3::ZERO
            || self.zoom_changed
            || self.options.target != self.last_target
            || (self.options.auto_rotate && !self.drag.is_active())
    }

    /// Apply accumulated input to the camera; returns whether it moved
    fn apply(&mut self, delta: f32) -> bool {
        if !self.is_pending() {
            return false;
        }
        let options = &self.options;
        let mut camera = self.camera.borrow_mut();

        let to_y_up = Quat::from_unit_vectors(camera.up.normalize(), Vec3::UP);
        let from_y_up = to_y_up.conjugate();

        let offset = to_y_up.rotate_vec3(camera.position - options.target);
        let mut spherical = Spherical::from_vec3(offset);

        if options.auto_rotate && !self.drag.is_active() {
            self.spherical_delta.theta -= 2.0 * PI / 60.0 * options.auto_rotate_speed * delta;
        }

        let factor = if options.enable_damping {
            options.damping_factor
        } else {
            1.0
        };
        spherical.theta += self.spherical_delta.theta * factor;
        spherical.phi += self.spherical_delta.phi * factor;

        if options.min_azimuth_angle.is_finite() && options.max_azimuth_angle.is_finite() {
            spherical.theta = spherical
                .theta
                .clamp(options.min_azimuth_angle, options.max_azimuth_angle);
        }
        spherical.phi = spherical
            .phi
            .clamp(options.min_polar_angle, options.max_polar_angle);
        spherical.make_safe();

        spherical.radius = (spherical.radius * self.scale)
            .clamp(options.min_distance, options.max_distance);

        self.options.target += self.pan_offset * factor;
        let target = self.options.target;

        camera.position = target + from_y_up.rotate_vec3(spherical.to_vec3());
        camera.look_at(target);
        let (position, q) = (camera.position, camera.quaternion);
        drop(camera);

        if self.options.enable_damping {
            let keep = 1.0 - factor;
            self.spherical_delta.theta *= keep;
            self.spherical_delta.phi *= keep;
            self.pan_offset *= keep;
            if self.spherical_delta.theta.abs() < SETTLE
                && self.spherical_delta.phi.abs() < SETTLE
                && self.pan_offset.length_squared() < SETTLE * SETTLE
            {
                self.clear_deltas();
            }
        } else {
            self.clear_deltas();
        }
        self.scale = 1.0;
        self.last_target = target;

        // Compare against the previous frame so sub-threshold drift never piles up
        let l = self.last_quaternion;
        let dot = q.x * l.x + q.y * l.y + q.z * l.z + q.w * l.w;
        let moved = self.zoom_changed
            || (self.last_position - position).length_squared() > EPS
            || 8.0 * (1.0 - dot) > EPS;
        self.last_position = position;
        self.last_quaternion = q;
        self.zoom_changed = false;
        if !moved {
            // Damping has decayed below what a frame can show
            self.clear_deltas();
        }
        moved
    }

    fn clear_deltas(&mut self) {
        self.spherical_delta = Spherical::new(1.0, 0.0, 0.0);
        self.pan_offset = Vec3::ZERO;
    }

    fn handle(state: &mut OrbitState, event: &InputEvent, element: &Element) -> Emitted {
        let size = element.client_size();
        match event {
            InputEvent::PointerDown(pointer) => {
                let Some(action) = state.options.mouse_buttons.action(pointer.button) else {
                    return Emitted::new();
                };
                let allowed = match action {
                    OrbitAction::Rotate => state.options.enable_rotate,
                    OrbitAction::Dolly => state.options.enable_zoom,
                    OrbitAction::Pan => state.options.enable_pan,
                };
                if !allowed || state.drag.is_active() {
                    return Emitted::new();
                }
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
                match action {
                    OrbitAction::Rotate => {
                        let speed = state.options.rotate_speed;
                        let height = size.height.max(1.0);
                        state.rotate_left(2.0 * PI * delta.x / height * speed);
                        state.rotate_up(2.0 * PI * delta.y / height * speed);
                    }
                    OrbitAction::Dolly => {
                        if delta.y > 0.0 {
                            state.dolly_out();
                        } else if delta.y < 0.0 {
                            state.dolly_in();
                        }
                    }
                    OrbitAction::Pan => state.pan(delta, size),
                }
                if state.apply(0.0) {
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
                if !state.options.enable_zoom || state.drag.is_active() || wheel.delta_y == 0.0 {
                    return Emitted::new();
                }
                if wheel.delta_y < 0.0 {
                    state.dolly_in();
                } else {
                    state.dolly_out();
                }
                let mut out = emitted(&[ControlsEvent::Start]);
                if state.apply(0.0) {
                    out.push(ControlsEvent::Change);
                }
                out.push(ControlsEvent::End);
                out
            }
            _ => Emitted::new(),
        }
    }
}

/// Orbit the camera around a target with rotate, zoom and pan
pub struct OrbitControls {
    core: ControlsCore,
    state: Rc<RefCell<OrbitState>>,
}

impl OrbitControls {
    pub fn new(camera: CameraHandle) -> Self {
        Self::with_options(camera, OrbitOptions::default())
    }

    pub fn with_options(camera: CameraHandle, options: OrbitOptions) -> Self {
        Self::build("orbit", camera, options)
    }

    fn build(kind: &'static str, camera: CameraHandle, options: OrbitOptions) -> Self {
        let state = OrbitState::new(camera, options);
        let controls = Self {
            core: ControlsCore::new(kind),
            state: Rc::new(RefCell::new(state)),
        };
        // Settle the camera onto the orbit without announcing it
        {
            let mut state = controls.state.borrow_mut();
            state.zoom_changed = true;
            state.apply(0.0);
        }
        controls
    }

    pub fn camera(&self) -> CameraHandle {
        Rc::clone(&self.state.borrow().camera)
    }

    pub fn target(&self) -> Vec3 {
        self.state.borrow().options.target
    }

    /// Move the orbit target; the camera follows on the next update
    pub fn set_target(&self, target: Vec3) {
        self.state.borrow_mut().options.target = target;
    }

    /// Adjust options in place
    pub fn configure(&self, f: impl FnOnce(&mut OrbitOptions)) {
        f(&mut self.state.borrow_mut().options);
    }

    /// Polar angle of the camera, measured from the up axis
    pub fn polar_angle(&self) -> f32 {
        let state = self.state.borrow();
        let camera = state.camera.borrow();
        Spherical::from_vec3(camera.position - state.options.target).phi
    }

    /// Azimuthal angle of the camera around the up axis
    pub fn azimuthal_angle(&self) -> f32 {
        let state = self.state.borrow();
        let camera = state.camera.borrow();
        Spherical::from_vec3(camera.position - state.options.target).theta
    }

    pub fn distance(&self) -> f32 {
        let state = self.state.borrow();
        let distance = state.camera.borrow().position.distance(state.options.target);
        distance
    }

    pub fn is_dragging(&self) -> bool {
        self.state.borrow().drag.is_active()
    }

    /// Remember the current target, position and zoom for [`reset`](Self::reset)
    pub fn save_state(&self) {
        let mut state = self.state.borrow_mut();
        let (position, zoom) = {
            let camera = state.camera.borrow();
            (camera.position, camera.zoom)
        };
        state.saved = (state.options.target, position, zoom);
    }

    /// Return to the saved state
    pub fn reset(&self) {
        let changed = {
            let mut state = self.state.borrow_mut();
            let (target, position, zoom) = state.saved;
            state.options.target = target;
            {
                let mut camera = state.camera.borrow_mut();
                camera.position = position;
                camera.zoom = zoom;
                camera.update_projection_matrix();
            }
            state.spherical_delta = Spherical::new(1.0, 0.0, 0.0);
            state.pan_offset = Vec3::ZERO;
            state.zoom_changed = true;
            state.apply(0.0)
        };
        if changed {
            self.core.emit(ControlsEvent::Change);
        }
    }
}

impl Controls for OrbitControls {
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
            self.core.listen(element, kind, &self.state, OrbitState::handle);
        }
    }

    fn disconnect(&self) {
        self.core.disconnect();
    }

    fn update(&self, delta: f32) {
        let changed = match self.state.try_borrow_mut() {
            Ok(mut state) => state.apply(delta),
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

/// Orbit controls tuned for top-down map navigation
pub struct MapControls(OrbitControls);

impl MapControls {
    pub fn new(camera: CameraHandle) -> Self {
        Self::with_options(camera, OrbitOptions::map())
    }

    pub fn with_options(camera: CameraHandle, options: OrbitOptions) -> Self {
        Self(OrbitControls::build("map", camera, options))
    }
}

impl Deref for MapControls {
    type Target = OrbitControls;

    fn deref(&self) -> &OrbitControls {
        &self.0
    }
}

impl Controls for MapControls {
    fn kind(&self) -> &'static str {
        self.0.kind()
    }

    fn is_enabled(&self) -> bool {
        self.0.is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        self.0.set_enabled(enabled);
    }

    fn connect(&self, element: &Element) {
        self.0.connect(element);
    }

    fn disconnect(&self) {
        self.0.disconnect();
    }

    fn update(&self, delta: f32) {
        self.0.update(delta);
    }

    fn dispose(&self) {
        self.0.dispose();
    }

    fn events(&self) -> &Emitter<ControlsEvent> {
        self.0.events()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_core::{PointerButton, PointerEvent, WheelEvent};
    use orrery_fiber::Camera;
    use std::cell::Cell;

    fn setup(options: OrbitOptions) -> (OrbitControls, Element, Rc<Cell<u32>>) {
        let camera = Camera::default()
            .with_position(Vec3::new(0.0, 0.0, 10.0))
            .into_handle();
        let controls = OrbitControls::with_options(camera, options);
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

    fn undamped() -> OrbitOptions {
        OrbitOptions {
            enable_damping: false,
            ..OrbitOptions::default()
        }
    }

    fn drag(element: &Element, button: PointerButton, from: Vec2, to: Vec2) {
        element.dispatch(&InputEvent::PointerDown(
            PointerEvent::at(from.x, from.y).with_button(button),
        ));
        element.dispatch(&InputEvent::PointerMove(
            PointerEvent::at(to.x, to.y).with_button(button),
        ));
        element.dispatch(&InputEvent::PointerUp(
            PointerEvent::at(to.x, to.y).with_button(button),
        ));
    }

    #[test]
    fn test_rotate_keeps_distance_and_faces_target() {
        let (controls, element, changes) = setup(undamped());
        drag(
            &element,
            PointerButton::Primary,
            Vec2::new(400.0, 300.0),
            Vec2::new(300.0, 300.0),
        );

        assert_eq!(changes.get(), 1);
        assert!((controls.distance() - 10.0).abs() < 1e-3);
        let camera = controls.camera();
        let camera = camera.borrow();
        let to_target = (Vec3::ZERO - camera.position).normalize();
        assert!(camera.forward().abs_diff_eq(to_target, 1e-4));
        assert!(camera.position.x.abs() > 1.0);
    }

    #[test]
    fn test_wheel_zooms_in_and_out() {
        let (controls, element, changes) = setup(undamped());
        element.dispatch(&InputEvent::Wheel(WheelEvent {
            delta_y: -100.0,
            ..Default::default()
        }));
        assert!(controls.distance() < 10.0);
        element.dispatch(&InputEvent::Wheel(WheelEvent {
            delta_y: 100.0,
            ..Default::default()
        }));
        assert!((controls.distance() - 10.0).abs() < 1e-3);
        assert_eq!(changes.get(), 2);
    }

    #[test]
    fn test_damping_settles_through_updates() {
        let (controls, element, changes) = setup(OrbitOptions::default());
        drag(
            &element,
            PointerButton::Primary,
            Vec2::new(400.0, 300.0),
            Vec2::new(350.0, 300.0),
        );
        let after_drag = changes.get();

        let mut frames = 0;
        while frames < 2000 {
            let before = changes.get();
            controls.update(1.0 / 60.0);
            frames += 1;
            if changes.get() == before {
                break;
            }
        }
        assert!(changes.get() > after_drag);
        assert!(frames < 2000, "damping never settled");

        // Idle updates are silent
        let settled = changes.get();
        controls.update(1.0 / 60.0);
        assert_eq!(changes.get(), settled);
    }

    #[test]
    fn test_pan_moves_target() {
        let (controls, element, _) = setup(undamped());
        drag(
            &element,
            PointerButton::Secondary,
            Vec2::new(400.0, 300.0),
            Vec2::new(450.0, 300.0),
        );
        assert!(controls.target().x < 0.0);
    }

    #[test]
    fn test_map_preset_pans_with_primary_button() {
        let camera = Camera::default()
            .with_position(Vec3::new(0.0, 10.0, 0.01))
            .into_handle();
        let controls = MapControls::with_options(
            camera,
            OrbitOptions {
                enable_damping: false,
                ..OrbitOptions::map()
            },
        );
        let element = Element::with_size("canvas", Size::new(800.0, 600.0));
        controls.connect(&element);
        drag(
            &element,
            PointerButton::Primary,
            Vec2::new(400.0, 300.0),
            Vec2::new(400.0, 350.0),
        );
        assert_eq!(controls.kind(), "map");
        assert!(controls.target().y.abs() < 1e-4, "ground-plane pan keeps height");
        assert!(controls.target() != Vec3::ZERO);
    }

    #[test]
    fn test_disabled_controls_ignore_input() {
        let (controls, element, changes) = setup(undamped());
        controls.set_enabled(false);
        drag(
            &element,
            PointerButton::Primary,
            Vec2::new(400.0, 300.0),
            Vec2::new(300.0, 300.0),
        );
        assert_eq!(changes.get(), 0);
    }

    #[test]
    fn test_reset_restores_saved_state() {
        let (controls, element, _) = setup(undamped());
        controls.save_state();
        drag(
            &element,
            PointerButton::Primary,
            Vec2::new(400.0, 300.0),
            Vec2::new(200.0, 200.0),
        );
        controls.reset();
        let camera = controls.camera();
        assert!(camera
            .borrow()
            .position
            .abs_diff_eq(Vec3::new(0.0, 0.0, 10.0), 1e-3));
    }
}
