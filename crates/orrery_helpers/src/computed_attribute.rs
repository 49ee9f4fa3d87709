//! Computed geometry attributes
//!
//! Derives a named vertex attribute from a geometry and keeps it current.
//! Signals read by the compute function are tracked, so the attribute is
//! recomputed when they change. Unmounting puts back whatever attribute
//! of the same name the geometry had before.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use orrery_core::Scope;
use orrery_fiber::{BufferAttribute, Geometry, GeometryHandle, RenderContext};

type ComputeFn = dyn Fn(&Geometry) -> BufferAttribute;

struct Inner {
    name: String,
    geometry: GeometryHandle,
    compute: Box<ComputeFn>,
    /// Attribute replaced at attach time
    previous: RefCell<Option<BufferAttribute>>,
    attached: Cell<bool>,
    computations: Cell<u32>,
}

impl Inner {
    fn recompute(&self) {
        let attribute = (self.compute)(&self.geometry.borrow());
        self.geometry
            .borrow_mut()
            .set_attribute(self.name.as_str(), attribute);
        self.computations.set(self.computations.get() + 1);
    }

    fn detach(&self) {
        if !self.attached.replace(false) {
            return;
        }
        let mut geometry = self.geometry.borrow_mut();
        match self.previous.borrow_mut().take() {
            Some(previous) => {
                geometry.set_attribute(self.name.as_str(), previous);
            }
            None => {
                geometry.remove_attribute(&self.name);
            }
        }
        tracing::debug!(name = %self.name, "computed attribute detached");
    }
}

/// Handle to a mounted computed attribute
#[derive(Clone)]
pub struct ComputedAttribute {
    inner: Rc<Inner>,
}

impl ComputedAttribute {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn geometry(&self) -> GeometryHandle {
        Rc::clone(&self.inner.geometry)
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached.get()
    }

    /// Times the attribute has been computed
    pub fn computations(&self) -> u32 {
        self.inner.computations.get()
    }

    /// Compute again outside of any reactive change
    pub fn recompute(&self) {
        if self.is_attached() {
            self.inner.recompute();
        }
    }
}

impl std::fmt::Debug for ComputedAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedAttribute")
            .field("name", &self.inner.name)
            .field("attached", &self.inner.attached.get())
            .finish()
    }
}

/// Attach attribute `name` to `geometry` for as long as `scope` lives
///
/// When mounted under a render root every recompute requests a frame.
pub fn computed_attribute(
    scope: &Scope,
    geometry: GeometryHandle,
    name: impl Into<String>,
    compute: impl Fn(&Geometry) -> BufferAttribute + 'static,
) -> ComputedAttribute {
    let name = name.into();
    let previous = geometry.borrow().attribute(&name).cloned();
    let inner = Rc::new(Inner {
        name,
        geometry,
        compute: Box::new(compute),
        previous: RefCell::new(previous),
        attached: Cell::new(true),
        computations: Cell::new(0),
    });

    let ctx = scope.use_context::<RenderContext>();
    {
        let inner = Rc::clone(&inner);
        scope.create_effect(move |_| {
            if !inner.attached.get() {
                return;
            }
            inner.recompute();
            if let Some(ctx) = &ctx {
                ctx.invalidate();
            }
        });
    }

    {
        let inner = Rc::clone(&inner);
        scope.on_cleanup(move || inner.detach());
    }

    tracing::debug!(name = %inner.name, "computed attribute attached");
    ComputedAttribute { inner }
}
