//! Orrery Helpers
//!
//! Components mounted under an [`orrery_fiber::Root`]:
//!
//! - **Controls**: orbit, map, trackball, arcball, fly, pointer-lock and
//!   transform controllers, each bound to the root through a
//!   [`ControlsBinding`] that builds, reconnects and tears it down
//! - **Adaptive consumers**: pixel ratio and event raycasting that follow
//!   the root's performance level
//! - **Scoped resources**: cube captures and computed geometry attributes
//!   that undo their scene changes when unmounted
//! - **Materials**: data-driven procedural material descriptors
//! - **Masks**: stencil parameters for masked content
//!
//! # Example
//!
//! ```rust
//! use orrery_core::{Element, InputEvent, PointerEvent, ReactiveGraph};
//! use orrery_fiber::{HeadlessRenderer, Root, RootDescriptor};
//! use orrery_helpers::{orbit_controls, ControlsProps, OrbitOptions};
//!
//! let graph = ReactiveGraph::new();
//! let element = Element::new("canvas");
//! let (_renderer, handle) = HeadlessRenderer::shared(element.clone());
//! let root = Root::create(&graph, RootDescriptor::new(handle)).unwrap();
//!
//! let binding = orbit_controls(
//!     &root.mount(),
//!     ControlsProps::new().make_default(true),
//!     OrbitOptions::default(),
//! )
//! .unwrap();
//! assert!(binding.is_default());
//!
//! element.dispatch(&InputEvent::PointerDown(PointerEvent::at(10.0, 10.0)));
//! element.dispatch(&InputEvent::PointerMove(PointerEvent::at(40.0, 10.0)));
//! element.dispatch(&InputEvent::PointerUp(PointerEvent::at(40.0, 10.0)));
//! assert!(root.advance(0.0));
//! ```

pub mod adaptive;
pub mod binding;
pub mod computed_attribute;
pub mod controls;
pub mod cube_camera;
pub mod error;
pub mod mask;
pub mod materials;

pub use adaptive::{adaptive_dpr, adaptive_events};
pub use binding::{
    BindingPhase, ControlsBinding, ControlsProps, ControlsRef, EventCallback, CONTROLS_PRIORITY,
};
pub use computed_attribute::{computed_attribute, ComputedAttribute};
pub use controls::{
    arcball_controls, fly_controls, map_controls, orbit_controls, pointer_lock_controls,
    trackball_controls, transform_controls, ArcballControls, ArcballOptions, Axis, FlyControls,
    FlyOptions, MapControls, OrbitControls, OrbitOptions, PointerLockControls,
    PointerLockOptions, TrackballControls, TrackballOptions, TransformControls, TransformMode,
    TransformOptions, TransformProps, TransformSpace,
};
pub use cube_camera::{cube_camera, CubeCamera, CubeCameraOptions, Frames, SceneStash};
pub use error::{HelperError, Result};
pub use mask::{mask, use_mask, Mask, MaskId, MaskOptions, StencilFunc, StencilOp, StencilParams};
pub use materials::{
    distort_material, wobble_material, BaseParams, DistortMaterial, DistortOptions,
    MaterialDescriptor, MaterialHandle, PointMaterial, ShaderPatch, ShaderStage, ShadingModel,
    UniformValue, WobbleMaterial, WobbleOptions,
};
