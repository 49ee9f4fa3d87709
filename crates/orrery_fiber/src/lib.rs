//! Orrery Fiber
//!
//! The render root every Orrery component is mounted under:
//!
//! - **Render Context**: per-root store of camera, element, size, pixel
//!   ratio, performance, active controls and event routing
//! - **Frame Scheduler**: priority-ordered per-frame callbacks around one
//!   render pass
//! - **Frame Loop**: always-on, on-demand or host-driven frames with
//!   coalescing invalidation
//! - **Performance Regression**: temporary fidelity drops with debounced
//!   recovery
//!
//! # Example
//!
//! ```rust
//! use orrery_core::{Element, ReactiveGraph};
//! use orrery_fiber::{use_frame, use_three, HeadlessRenderer, Root, RootDescriptor};
//!
//! let graph = ReactiveGraph::new();
//! let (_renderer, handle) = HeadlessRenderer::shared(Element::new("canvas"));
//! let root = Root::create(&graph, RootDescriptor::new(handle)).unwrap();
//!
//! let component = root.mount();
//! let ctx = use_three(&component).unwrap();
//! use_frame(&component, 0, move |frame| {
//!     let _ = (frame.delta, ctx.is_alive());
//! })
//! .unwrap();
//!
//! assert!(root.advance(0.0));
//! ```

pub mod config;
pub mod context;
pub mod controls;
pub mod error;
pub mod frameloop;
pub mod headless;
pub mod performance;
pub mod root;
pub mod scene;
pub mod scheduler;

pub use config::{DprRange, RootConfig, SizeConfig};
pub use context::{
    ContextSnapshot, DefaultClaim, EventCompute, EventsPatch, EventsState, RenderContext,
    RenderContextPatch, Viewport, WeakRenderContext,
};
pub use controls::{same_controls, Controls, ControlsEvent, ControlsHandle};
pub use error::{FiberError, Result};
pub use frameloop::{FrameRequests, Frameloop};
pub use headless::{CubeRecord, HeadlessRenderer, RenderRecord};
pub use performance::{Performance, PerformanceConfig, RecoveryStep, Regression};
pub use root::{try_use_frame, use_frame, use_three, Root, RootDescriptor};
pub use scene::{
    Background, BufferAttribute, Camera, CameraHandle, Color, CubeRenderTarget, Fog, Geometry,
    GeometryHandle, Object3D, ObjectHandle, Projection, Renderer, RendererHandle, Scene,
    SceneHandle, TextureId,
};
pub use scheduler::{
    FrameCallbackId, FrameResult, FrameScheduler, FrameState, FrameSubscription, TickReport,
};
