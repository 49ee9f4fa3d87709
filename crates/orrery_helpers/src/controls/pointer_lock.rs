//! Pointer lock controls
//!
//! First-person look: while the pointer is locked to the element, raw
//! pointer movement turns the camera. Clicking the element requests the
//! lock; the host reports lock changes back as `PointerLockChange`.

use std::any::Any;
use std::cell::RefCell;
use std::f32::consts::{FRAC_PI_2, PI};
use std::rc::Rc;

use orrery_core::{Element, Emitter, EventKind, InputEvent, Quat, Vec3};
use orrery_fiber::{CameraHandle, Controls, ControlsEvent};

use super::input::{emitted, ControlsCore, Emitted};

/// Radians per pixel of movement at unit pointer speed
const LOOK_SCALE: f32 = 0.002;

#[derive(Clone, Debug)]
pub struct PointerLockOptions {
    pub pointer_speed: f32,
    /// Polar limits measured from straight up
    pub min_polar_angle: f32,
    pub max_polar_angle: f32,
    /// Request the lock when the element is clicked
    pub lock_on_click: bool,
}

impl Default for PointerLockOptions {
    fn default() -> Self {
        Self {
            pointer_speed: 1.0,
            min_polar_angle: 0.0,
            max_polar_angle: PI,
            lock_on_click: true,
        }
    }
}

struct LookState {
    camera: CameraHandle,
    options: PointerLockOptions,
    yaw: f32,
    pitch: f32,
}

impl LookState {
    fn turn(&mut self, dx: f32, dy: f32) -> bool {
        if dx == 0.0 && dy == 0.0 {
            return false;
        }
        let scale = LOOK_SCALE * self.options.pointer_speed;
        self.yaw -= dx * scale;
        self.pitch = (self.pitch - dy * scale).clamp(
            FRAC_PI_2 - self.options.max_polar_angle,
            FRAC_PI_2 - self.options.min_polar_angle,
        );
        self.camera.borrow_mut().quaternion = Quat::from_euler_yxz(self.yaw, self.pitch, 0.0);
        true
    }

    fn handle(state: &mut LookState, event: &InputEvent, element: &Element) -> Emitted {
        match event {
            InputEvent::PointerDown(_) if state.options.lock_on_click => {
                element.request_pointer_lock();
                Emitted::new()
            }
            InputEvent::PointerMove(pointer) if element.is_pointer_locked() => {
                if state.turn(pointer.movement.x, pointer.movement.y) {
                    emitted(&[ControlsEvent::Change])
                } else {
                    Emitted::new()
                }
            }
            _ => Emitted::new(),
        }
    }
}

/// Mouse-look camera driven by pointer lock
pub struct PointerLockControls {
    core: ControlsCore,
    look: Rc<RefCell<LookState>>,
    locked: Rc<RefCell<bool>>,
}

impl PointerLockControls {
    pub fn new(camera: CameraHandle) -> Self {
        Self::with_options(camera, PointerLockOptions::default())
    }

    pub fn with_options(camera: CameraHandle, options: PointerLockOptions) -> Self {
        let forward = camera.borrow().forward();
        let look = LookState {
            camera,
            options,
            yaw: (-forward.x).atan2(-forward.z),
            pitch: forward.y.clamp(-1.0, 1.0).asin(),
        };
        Self {
            core: ControlsCore::new("pointer-lock"),
            look: Rc::new(RefCell::new(look)),
            locked: Rc::new(RefCell::new(false)),
        }
    }

    pub fn camera(&self) -> CameraHandle {
        Rc::clone(&self.look.borrow().camera)
    }

    pub fn is_locked(&self) -> bool {
        *self.locked.borrow()
    }

    /// Ask the connected element for pointer lock
    pub fn lock(&self) {
        if let Some(element) = self.core.element() {
            element.request_pointer_lock();
        }
    }

    pub fn unlock(&self) {
        if let Some(element) = self.core.element() {
            element.exit_pointer_lock();
        }
    }

    /// Unit vector the camera faces, in world space
    pub fn direction(&self) -> Vec3 {
        self.camera().borrow().forward()
    }

    /// Walk along the ground plane in the facing direction
    pub fn move_forward(&self, distance: f32) {
        let camera = self.camera();
        let mut camera = camera.borrow_mut();
        let heading = camera.up.cross(camera.right());
        camera.position += heading * distance;
    }

    /// Strafe along the camera's right axis
    pub fn move_right(&self, distance: f32) {
        let camera = self.camera();
        let mut camera = camera.borrow_mut();
        let right = camera.right();
        camera.position += right * distance;
    }
}

impl Controls for PointerLockControls {
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
        for kind in [EventKind::PointerDown, EventKind::PointerMove] {
            self.core.listen(element, kind, &self.look, LookState::handle);
        }
        // Lock changes arrive re-entrantly from `request_pointer_lock`, so
        // they go through their own state cell
        self.core.listen(
            element,
            EventKind::PointerLockChange,
            &self.locked,
            |locked, event, _| match event {
                InputEvent::PointerLockChange { locked: now }
                    if std::mem::replace(locked, *now) != *now =>
                {
                    if *now {
                        emitted(&[ControlsEvent::Lock])
                    } else {
                        emitted(&[ControlsEvent::Unlock])
                    }
                }
                _ => Emitted::new(),
            },
        );
        *self.locked.borrow_mut() = element.is_pointer_locked();
    }

    fn disconnect(&self) {
        self.core.disconnect();
    }

    /// Input is applied as it arrives
    fn update(&self, _delta: f32) {}

    fn dispose(&self) {
        if self.is_locked() {
            self.unlock();
        }
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
    use orrery_core::PointerEvent;
    use orrery_fiber::Camera;

    fn setup() -> (PointerLockControls, Element, Rc<RefCell<Vec<ControlsEvent>>>) {
        let camera = Camera::default().with_position(Vec3::ZERO).into_handle();
        let controls = PointerLockControls::new(camera);
        let element = Element::new("canvas");
        controls.connect(&element);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        controls
            .events()
            .subscribe(move |event| log.borrow_mut().push(event.clone()));
        (controls, element, seen)
    }

    #[test]
    fn test_click_locks_and_movement_turns() {
        let (controls, element, seen) = setup();
        element.dispatch(&InputEvent::PointerDown(PointerEvent::at(10.0, 10.0)));
        assert!(controls.is_locked());

        element.dispatch(&InputEvent::PointerMove(
            PointerEvent::at(10.0, 10.0).with_movement(200.0, 0.0),
        ));
        assert!(controls.direction().x > 0.0, "moving right turns right");

        controls.unlock();
        assert!(!controls.is_locked());
        element.dispatch(&InputEvent::PointerMove(
            PointerEvent::at(10.0, 10.0).with_movement(200.0, 0.0),
        ));
        assert_eq!(
            *seen.borrow(),
            vec![ControlsEvent::Lock, ControlsEvent::Change, ControlsEvent::Unlock]
        );
    }

    #[test]
    fn test_pitch_stays_within_polar_limits() {
        let (controls, element, _) = setup();
        controls.lock();
        element.dispatch(&InputEvent::PointerMove(
            PointerEvent::default().with_movement(0.0, -100_000.0),
        ));
        let direction = controls.direction();
        assert!(direction.y > 0.99);
        assert!(direction.length() > 0.99);
    }

    #[test]
    fn test_move_forward_stays_on_ground() {
        let (controls, _, _) = setup();
        controls.move_forward(2.0);
        let camera = controls.camera();
        assert!(camera
            .borrow()
            .position
            .abs_diff_eq(Vec3::new(0.0, 0.0, -2.0), 1e-5));
    }
}
