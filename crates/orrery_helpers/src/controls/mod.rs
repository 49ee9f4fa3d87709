//! Camera and object controllers
//!
//! Each controller implements [`Controls`](orrery_fiber::Controls) and can
//! be used standalone (connect it to an element, call `update` every frame)
//! or mounted through a [`ControlsBinding`] with the `*_controls` functions
//! below.

pub mod arcball;
pub mod fly;
pub(crate) mod input;
pub mod orbit;
pub mod pointer_lock;
pub mod trackball;
pub mod transform;

pub use arcball::{ArcballAction, ArcballControls, ArcballOptions};
pub use fly::{FlyControls, FlyOptions};
pub use input::{MouseButtons, MoveKeys};
pub use orbit::{MapControls, OrbitAction, OrbitControls, OrbitOptions};
pub use pointer_lock::{PointerLockControls, PointerLockOptions};
pub use trackball::{TrackballAction, TrackballControls, TrackballOptions};
pub use transform::{
    transform_controls, Axis, TransformControls, TransformMode, TransformOptions, TransformProps,
    TransformSpace,
};

use orrery_core::Scope;

use crate::binding::{ControlsBinding, ControlsProps};
use crate::error::Result;

pub fn orbit_controls(
    scope: &Scope,
    props: ControlsProps,
    options: OrbitOptions,
) -> Result<ControlsBinding<OrbitControls>> {
    ControlsBinding::mount(scope, props, move |camera| {
        OrbitControls::with_options(camera, options.clone())
    })
}

pub fn map_controls(
    scope: &Scope,
    props: ControlsProps,
    options: OrbitOptions,
) -> Result<ControlsBinding<MapControls>> {
    ControlsBinding::mount(scope, props, move |camera| {
        MapControls::with_options(camera, options.clone())
    })
}

pub fn trackball_controls(
    scope: &Scope,
    props: ControlsProps,
    options: TrackballOptions,
) -> Result<ControlsBinding<TrackballControls>> {
    ControlsBinding::mount(scope, props, move |camera| {
        TrackballControls::with_options(camera, options.clone())
    })
}

pub fn arcball_controls(
    scope: &Scope,
    props: ControlsProps,
    options: ArcballOptions,
) -> Result<ControlsBinding<ArcballControls>> {
    ControlsBinding::mount(scope, props, move |camera| {
        ArcballControls::with_options(camera, options.clone())
    })
}

pub fn fly_controls(
    scope: &Scope,
    props: ControlsProps,
    options: FlyOptions,
) -> Result<ControlsBinding<FlyControls>> {
    ControlsBinding::mount(scope, props, move |camera| {
        FlyControls::with_options(camera, options.clone())
    })
}

pub fn pointer_lock_controls(
    scope: &Scope,
    props: ControlsProps,
    options: PointerLockOptions,
) -> Result<ControlsBinding<PointerLockControls>> {
    ControlsBinding::mount(scope, props, move |camera| {
        PointerLockControls::with_options(camera, options.clone())
    })
}
