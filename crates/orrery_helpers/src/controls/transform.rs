//! Transform controls
//!
//! Drags an attached object: translate, rotate or scale, optionally
//! constrained to one axis and snapped. While a drag is in progress the
//! component disables the render context's default controls so the camera
//! stays put.

use std::any::Any;
use std::cell::RefCell;
use std::f32::consts::PI;
use std::rc::Rc;

use orrery_core::{
    Element, Emitter, InputEvent, PointerButton, Quat, Scope, Size, Value, Vec2, Vec3,
    WeakElement,
};
use orrery_fiber::{
    use_three, CameraHandle, Controls, ControlsEvent, ObjectHandle, Projection, WeakRenderContext,
};

use super::input::{emitted, ControlsCore, Emitted, PointerDrag, POINTER_KINDS};
use crate::binding::{ControlsBinding, ControlsProps};
use crate::error::{HelperError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransformMode {
    #[default]
    Translate,
    Rotate,
    Scale,
}

/// Frame the constraint axis is expressed in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransformSpace {
    #[default]
    World,
    Local,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn unit(self) -> Vec3 {
        match self {
            Axis::X => Vec3::X,
            Axis::Y => Vec3::UP,
            Axis::Z => Vec3::Z,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TransformOptions {
    pub mode: TransformMode,
    pub space: TransformSpace,
    /// Restrict the drag to one axis; `None` moves in the view plane
    pub axis: Option<Axis>,
    pub translation_snap: Option<f32>,
    /// Radians
    pub rotation_snap: Option<f32>,
    pub scale_snap: Option<f32>,
}

#[derive(Clone, Copy, Debug)]
struct DragStart {
    position: Vec3,
    quaternion: Quat,
    scale: Vec3,
    total: Vec2,
}

fn snap(value: f32, step: Option<f32>) -> f32 {
    match step {
        Some(step) if step > 0.0 => (value / step).round() * step,
        _ => value,
    }
}

struct TransformState {
    camera: CameraHandle,
    object: Option<ObjectHandle>,
    options: TransformOptions,
    drag: PointerDrag<()>,
    start: Option<DragStart>,
    /// Element holding the drag's pointer capture
    grabbed: Option<WeakElement>,
}

impl TransformState {
    fn axis_vector(&self, axis: Axis, start: &DragStart) -> Vec3 {
        match self.options.space {
            TransformSpace::World => axis.unit(),
            TransformSpace::Local => start.quaternion.rotate_vec3(axis.unit()),
        }
    }

    /// World units per pixel at the object's depth
    fn world_per_pixel(&self, at: Vec3, size: Size) -> f32 {
        let camera = self.camera.borrow();
        let height = size.height.max(1.0);
        match camera.projection {
            Projection::Perspective { fov, .. } => {
                2.0 * camera.position.distance(at) * (fov.to_radians() / 2.0).tan() / height
            }
            Projection::Orthographic { top, bottom, .. } => (top - bottom) / camera.zoom / height,
        }
    }

    /// Recompute the object transform from the accumulated drag
    fn apply_drag(&mut self, start: DragStart, size: Size) -> bool {
        let Some(object) = self.object.clone() else {
            return false;
        };
        let (right, up, forward) = {
            let camera = self.camera.borrow();
            (camera.right(), camera.camera_up(), camera.forward())
        };
        let total = start.total;
        let height = size.height.max(1.0);
        let mut object = object.borrow_mut();
        let before = (object.position, object.quaternion, object.scale);

        match self.options.mode {
            TransformMode::Translate => {
                let scale = self.world_per_pixel(start.position, size);
                let mut offset = right * (total.x * scale) + up * (-total.y * scale);
                if let Some(axis) = self.options.axis {
                    let direction = self.axis_vector(axis, &start);
                    offset = direction * offset.dot(direction);
                }
                let mut position = start.position + offset;
                let step = self.options.translation_snap;
                match self.options.axis {
                    Some(Axis::X) => position.x = snap(position.x, step),
                    Some(Axis::Y) => position.y = snap(position.y, step),
                    Some(Axis::Z) => position.z = snap(position.z, step),
                    None => {
                        position = Vec3::new(
                            snap(position.x, step),
                            snap(position.y, step),
                            snap(position.z, step),
                        )
                    }
                }
                object.position = position;
            }
            TransformMode::Rotate => {
                let angle = snap((total.x - total.y) * PI / height, self.options.rotation_snap);
                let rotation = match self.options.axis {
                    Some(axis) => Quat::from_axis_angle(self.axis_vector(axis, &start), angle),
                    None => Quat::from_axis_angle(-forward, angle),
                };
                object.quaternion = rotation.mul_quat(&start.quaternion).normalize();
            }
            TransformMode::Scale => {
                let factor = (1.0 + (total.x - total.y) / height).max(1e-3);
                let step = self.options.scale_snap;
                let scaled = |value: f32| snap(value * factor, step).max(1e-6);
                let mut scale = start.scale;
                match self.options.axis {
                    Some(Axis::X) => scale.x = scaled(scale.x),
                    Some(Axis::Y) => scale.y = scaled(scale.y),
                    Some(Axis::Z) => scale.z = scaled(scale.z),
                    None => scale = Vec3::new(scaled(scale.x), scaled(scale.y), scaled(scale.z)),
                }
                object.scale = scale;
            }
        }

        (object.position, object.quaternion, object.scale) != before
    }

    fn end_drag(&mut self, pointer_id: u32, element: &Element) -> Emitted {
        if !self.drag.end(pointer_id, element) {
            return Emitted::new();
        }
        self.start = None;
        self.grabbed = None;
        emitted(&[ControlsEvent::End, ControlsEvent::DraggingChanged(false)])
    }

    /// End a drag without its pointer being released
    fn abandon_drag(&mut self) -> Emitted {
        let pointer_id = self.drag.pointer_id;
        self.start = None;
        if !self.drag.cancel() {
            return Emitted::new();
        }
        if let Some(element) = self.grabbed.take().and_then(|weak| weak.upgrade()) {
            element.release_pointer_capture(pointer_id);
        }
        emitted(&[ControlsEvent::End, ControlsEvent::DraggingChanged(false)])
    }

    fn handle(state: &mut TransformState, event: &InputEvent, element: &Element) -> Emitted {
        match event {
            InputEvent::PointerDown(pointer) => {
                if pointer.button != PointerButton::Primary || state.drag.is_active() {
                    return Emitted::new();
                }
                let Some(object) = state.object.as_ref() else {
                    return Emitted::new();
                };
                let start = {
                    let object = object.borrow();
                    DragStart {
                        position: object.position,
                        quaternion: object.quaternion,
                        scale: object.scale,
                        total: Vec2::ZERO,
                    }
                };
                state.start = Some(start);
                state.grabbed = Some(element.downgrade());
                state
                    .drag
                    .begin((), pointer.pointer_id, pointer.position, element);
                emitted(&[ControlsEvent::DraggingChanged(true), ControlsEvent::Start])
            }
            InputEvent::PointerMove(pointer) => {
                let Some((_, delta)) = state.drag.movement(pointer.pointer_id, pointer.position)
                else {
                    return Emitted::new();
                };
                let Some(mut start) = state.start else {
                    return Emitted::new();
                };
                start.total += delta;
                state.start = Some(start);
                if state.apply_drag(start, element.client_size()) {
                    emitted(&[ControlsEvent::Change])
                } else {
                    Emitted::new()
                }
            }
            InputEvent::PointerUp(pointer) | InputEvent::PointerCancel(pointer) => {
                state.end_drag(pointer.pointer_id, element)
            }
            _ => Emitted::new(),
        }
    }
}

/// Gizmo-style dragging of an attached object
pub struct TransformControls {
    core: ControlsCore,
    state: Rc<RefCell<TransformState>>,
}

impl TransformControls {
    pub fn new(camera: CameraHandle) -> Self {
        Self::with_options(camera, TransformOptions::default())
    }

    pub fn with_options(camera: CameraHandle, options: TransformOptions) -> Self {
        let state = TransformState {
            camera,
            object: None,
            options,
            drag: PointerDrag::default(),
            start: None,
            grabbed: None,
        };
        Self {
            core: ControlsCore::new("transform"),
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Attach to `object`; a drag in progress is ended
    pub fn attach(&self, object: ObjectHandle) {
        let attached = self
            .state
            .borrow()
            .object
            .as_ref()
            .is_some_and(|o| Rc::ptr_eq(o, &object));
        if attached {
            return;
        }
        self.end_active_drag();
        self.state.borrow_mut().object = Some(object);
    }

    /// Detach the object, ending a drag in progress
    pub fn detach(&self) {
        self.end_active_drag();
        self.state.borrow_mut().object = None;
    }

    fn end_active_drag(&self) {
        let out = self.state.borrow_mut().abandon_drag();
        for event in out {
            self.core.emit(event);
        }
    }

    pub fn object(&self) -> Option<ObjectHandle> {
        self.state.borrow().object.clone()
    }

    pub fn mode(&self) -> TransformMode {
        self.state.borrow().options.mode
    }

    pub fn set_mode(&self, mode: TransformMode) {
        self.state.borrow_mut().options.mode = mode;
    }

    pub fn configure(&self, f: impl FnOnce(&mut TransformOptions)) {
        f(&mut self.state.borrow_mut().options);
    }

    pub fn is_dragging(&self) -> bool {
        self.state.borrow().drag.is_active()
    }
}

impl Controls for TransformControls {
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
        for kind in POINTER_KINDS {
            self.core.listen(element, kind, &self.state, TransformState::handle);
        }
    }

    fn disconnect(&self) {
        self.core.disconnect();
    }

    /// Input is applied as it arrives
    fn update(&self, _delta: f32) {}

    fn dispose(&self) {
        self.detach();
        self.core.dispose();
    }

    fn events(&self) -> &Emitter<ControlsEvent> {
        self.core.events()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Inputs of [`transform_controls`]
#[derive(Clone, Default)]
pub struct TransformProps {
    pub controls: ControlsProps,
    pub object: Value<Option<ObjectHandle>>,
    pub mode: Value<TransformMode>,
    pub options: TransformOptions,
}

impl TransformProps {
    pub fn new(object: impl Into<Value<Option<ObjectHandle>>>) -> Self {
        Self {
            object: object.into(),
            ..Self::default()
        }
    }

    pub fn mode(mut self, mode: impl Into<Value<TransformMode>>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn options(mut self, options: TransformOptions) -> Self {
        self.options = options;
        self
    }

    pub fn controls(mut self, controls: ControlsProps) -> Self {
        self.controls = controls;
        self
    }
}

/// Mount transform controls on an object
///
/// While dragging, the render context's default controls are disabled.
pub fn transform_controls(
    scope: &Scope,
    props: TransformProps,
) -> Result<ControlsBinding<TransformControls>> {
    if props.object.get_untracked().is_none() {
        return Err(HelperError::MissingParent {
            component: "TransformControls",
            parent: "an object to attach to",
        });
    }
    let ctx = use_three(scope)?.downgrade();

    let binding = {
        let options = props.options.clone();
        let object = props.object.clone();
        let mode = props.mode.clone();
        ControlsBinding::mount(scope, props.controls.clone(), move |camera| {
            let controls = TransformControls::with_options(camera, options.clone());
            if let Some(object) = object.get_untracked() {
                controls.attach(object);
            }
            controls.set_mode(mode.get_untracked());
            let ctx = ctx.clone();
            controls.events().subscribe(move |event| {
                if let ControlsEvent::DraggingChanged(dragging) = event {
                    suspend_default_controls(&ctx, *dragging);
                }
            });
            controls
        })?
    };

    let controls = binding.controls();
    let object = props.object;
    binding.scope().create_effect(move |_| {
        let object = object.get();
        if let Some(controls) = controls.get() {
            match object {
                Some(object) => controls.attach(object),
                None => controls.detach(),
            }
        }
    });

    let controls = binding.controls();
    let mode = props.mode;
    binding.scope().create_effect(move |_| {
        let mode = mode.get();
        if let Some(controls) = controls.get() {
            controls.set_mode(mode);
        }
    });

    Ok(binding)
}

fn suspend_default_controls(ctx: &WeakRenderContext, dragging: bool) {
    let Some(ctx) = ctx.upgrade() else {
        return;
    };
    let Ok(Some(default)) = ctx.graph().untrack(|| ctx.controls()) else {
        return;
    };
    if default.as_any().is::<TransformControls>() {
        return;
    }
    default.set_enabled(!dragging);
    tracing::debug!(kind = default.kind(), dragging, "default controls suspended while dragging");
}
