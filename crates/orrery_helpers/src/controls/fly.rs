//! Fly controls
//!
//! Keyboard flight in camera space. WASD/RF translate, QE roll, arrows
//! pitch and yaw, shift slows everything down. The pointer steers by its
//! offset from the element centre, either always or only while dragging.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use orrery_core::{Element, Emitter, EventKind, InputEvent, PointerButton, Quat, Vec2, Vec3};
use orrery_fiber::{CameraHandle, Controls, ControlsEvent};

use super::input::{ControlsCore, Emitted, MoveKeys, PointerDrag, POINTER_KINDS};

const EPS: f32 = 1e-6;
const SLOW_MULTIPLIER: f32 = 0.1;

#[derive(Clone, Debug)]
pub struct FlyOptions {
    /// Units per second
    pub movement_speed: f32,
    /// Radians per second at full deflection
    pub roll_speed: f32,
    /// Steer only while a pointer button is held
    pub drag_to_look: bool,
    /// Keep moving forward without input
    pub auto_forward: bool,
}

impl Default for FlyOptions {
    fn default() -> Self {
        Self {
            movement_speed: 1.0,
            roll_speed: 0.005,
            drag_to_look: false,
            auto_forward: false,
        }
    }
}

struct FlyState {
    camera: CameraHandle,
    options: FlyOptions,
    keys: MoveKeys,
    /// Pointer steering: x yaws left, y pitches down
    look: Vec2,
    drag: PointerDrag<()>,
    last_position: Vec3,
    last_quaternion: Quat,
}

impl FlyState {
    fn is_moving(&self) -> bool {
        self.keys.any() || self.look != Vec2::ZERO || self.options.auto_forward
    }

    fn steer(&mut self, at: Vec2, element: &Element) {
        let size = element.client_size();
        let half = Vec2::new((size.width * 0.5).max(0.5), (size.height * 0.5).max(0.5));
        self.look = Vec2::new(-(at.x - half.x) / half.x, (at.y - half.y) / half.y);
    }

    fn apply(&mut self, delta: f32) -> bool {
        let multiplier = if self.keys.slow { SLOW_MULTIPLIER } else { 1.0 };
        let move_mult = delta * self.options.movement_speed * multiplier;
        let rot_mult = delta * self.options.roll_speed;

        let mut movement = self.keys.movement();
        if self.options.auto_forward && !self.keys.forward && !self.keys.backward {
            movement.z = -1.0;
        }
        let rotation = self.keys.rotation() + Vec3::new(-self.look.y, self.look.x, 0.0);

        let mut camera = self.camera.borrow_mut();
        if movement != Vec3::ZERO {
            let step = camera.quaternion.rotate_vec3(movement) * move_mult;
            camera.position += step;
        }
        if rotation != Vec3::ZERO {
            let turn = Quat::new(
                rotation.x * rot_mult,
                rotation.y * rot_mult,
                rotation.z * rot_mult,
                1.0,
            )
            .normalize();
            camera.quaternion = camera.quaternion.mul_quat(&turn).normalize();
        }

        let q = camera.quaternion;
        let l = self.last_quaternion;
        let dot = q.x * l.x + q.y * l.y + q.z * l.z + q.w * l.w;
        let moved = (self.last_position - camera.position).length_squared() > EPS
            || 8.0 * (1.0 - dot) > EPS;
        if moved {
            self.last_position = camera.position;
            self.last_quaternion = camera.quaternion;
        }
        moved
    }

    fn handle(state: &mut FlyState, event: &InputEvent, element: &Element) -> Emitted {
        let was_moving = state.is_moving();
        match event {
            InputEvent::KeyDown(key) => {
                if key.modifiers.alt {
                    return Emitted::new();
                }
                state.keys.apply(&key.code, true);
            }
            InputEvent::KeyUp(key) => {
                state.keys.apply(&key.code, false);
            }
            InputEvent::PointerDown(pointer) => {
                if state.options.drag_to_look {
                    state
                        .drag
                        .begin((), pointer.pointer_id, pointer.position, element);
                    state.steer(pointer.position, element);
                } else {
                    match pointer.button {
                        PointerButton::Primary => state.keys.forward = true,
                        PointerButton::Secondary => state.keys.backward = true,
                        PointerButton::Middle => {}
                    }
                }
            }
            InputEvent::PointerMove(pointer) => {
                if !state.options.drag_to_look || state.drag.is_active() {
                    state.steer(pointer.position, element);
                }
            }
            InputEvent::PointerUp(pointer) | InputEvent::PointerCancel(pointer) => {
                if state.options.drag_to_look {
                    if state.drag.end(pointer.pointer_id, element) {
                        state.look = Vec2::ZERO;
                    }
                } else {
                    match pointer.button {
                        PointerButton::Primary => state.keys.forward = false,
                        PointerButton::Secondary => state.keys.backward = false,
                        PointerButton::Middle => {}
                    }
                }
            }
            InputEvent::ContextMenu => {}
            _ => return Emitted::new(),
        }

        let mut out = Emitted::new();
        match (was_moving, state.is_moving()) {
            (false, true) => out.push(ControlsEvent::Start),
            (true, false) => out.push(ControlsEvent::End),
            _ => {}
        }
        out
    }
}

/// Free flight with keyboard translation and pointer steering
pub struct FlyControls {
    core: ControlsCore,
    state: Rc<RefCell<FlyState>>,
}

impl FlyControls {
    pub fn new(camera: CameraHandle) -> Self {
        Self::with_options(camera, FlyOptions::default())
    }

    pub fn with_options(camera: CameraHandle, options: FlyOptions) -> Self {
        let (position, quaternion) = {
            let camera = camera.borrow();
            (camera.position, camera.quaternion)
        };
        let state = FlyState {
            camera,
            options,
            keys: MoveKeys::default(),
            look: Vec2::ZERO,
            drag: PointerDrag::default(),
            last_position: position,
            last_quaternion: quaternion,
        };
        Self {
            core: ControlsCore::new("fly"),
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn camera(&self) -> CameraHandle {
        Rc::clone(&self.state.borrow().camera)
    }

    pub fn keys(&self) -> MoveKeys {
        self.state.borrow().keys
    }

    pub fn configure(&self, f: impl FnOnce(&mut FlyOptions)) {
        f(&mut self.state.borrow_mut().options);
    }
}

impl Controls for FlyControls {
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
        let kinds = POINTER_KINDS
            .into_iter()
            .chain([EventKind::KeyDown, EventKind::KeyUp, EventKind::ContextMenu]);
        for kind in kinds {
            self.core.listen(element, kind, &self.state, FlyState::handle);
        }
    }

    fn disconnect(&self) {
        self.core.disconnect();
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.keys = MoveKeys::default();
            state.look = Vec2::ZERO;
        }
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
        self.disconnect();
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
    use orrery_core::{KeyEvent, PointerEvent, Size};
    use orrery_fiber::Camera;
    use std::cell::Cell;

    fn setup(options: FlyOptions) -> (FlyControls, Element, Rc<RefCell<Vec<ControlsEvent>>>) {
        let camera = Camera::default().with_position(Vec3::ZERO).into_handle();
        let controls = FlyControls::with_options(camera, options);
        let element = Element::with_size("canvas", Size::new(800.0, 600.0));
        controls.connect(&element);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        controls
            .events()
            .subscribe(move |event| log.borrow_mut().push(event.clone()));
        (controls, element, seen)
    }

    #[test]
    fn test_forward_key_moves_along_view() {
        let (controls, element, seen) = setup(FlyOptions {
            movement_speed: 2.0,
            ..FlyOptions::default()
        });
        element.dispatch(&InputEvent::KeyDown(KeyEvent::new("KeyW")));
        controls.update(0.5);

        let camera = controls.camera();
        assert!(camera
            .borrow()
            .position
            .abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-5));

        element.dispatch(&InputEvent::KeyUp(KeyEvent::new("KeyW")));
        controls.update(0.5);
        assert_eq!(
            *seen.borrow(),
            vec![ControlsEvent::Start, ControlsEvent::Change, ControlsEvent::End]
        );
    }

    #[test]
    fn test_shift_slows_movement() {
        let (controls, element, _) = setup(FlyOptions::default());
        element.dispatch(&InputEvent::KeyDown(KeyEvent::new("ShiftLeft")));
        element.dispatch(&InputEvent::KeyDown(KeyEvent::new("KeyD")));
        controls.update(1.0);
        let camera = controls.camera();
        assert!((camera.borrow().position.x - SLOW_MULTIPLIER).abs() < 1e-5);
    }

    #[test]
    fn test_yaw_left_turns_view_left() {
        let (controls, element, _) = setup(FlyOptions {
            roll_speed: 1.0,
            ..FlyOptions::default()
        });
        element.dispatch(&InputEvent::KeyDown(KeyEvent::new("ArrowLeft")));
        controls.update(0.1);
        let camera = controls.camera();
        assert!(camera.borrow().forward().x < 0.0);
    }

    #[test]
    fn test_drag_to_look_only_steers_while_held() {
        let (controls, element, _) = setup(FlyOptions {
            drag_to_look: true,
            roll_speed: 1.0,
            ..FlyOptions::default()
        });
        let moves = Rc::new(Cell::new(0));
        let counter = moves.clone();
        controls.events().subscribe(move |event| {
            if *event == ControlsEvent::Change {
                counter.set(counter.get() + 1);
            }
        });

        element.dispatch(&InputEvent::PointerMove(PointerEvent::at(700.0, 300.0)));
        controls.update(0.1);
        assert_eq!(moves.get(), 0);

        element.dispatch(&InputEvent::PointerDown(PointerEvent::at(700.0, 300.0)));
        controls.update(0.1);
        assert_eq!(moves.get(), 1);

        element.dispatch(&InputEvent::PointerUp(PointerEvent::at(700.0, 300.0)));
        controls.update(0.1);
        assert_eq!(moves.get(), 1);
    }
}
