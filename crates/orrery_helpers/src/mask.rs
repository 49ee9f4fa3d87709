//! Stencil masks
//!
//! A mask writes its id into the stencil buffer wherever it is drawn.
//! Consumers then draw only where the stencil equals that id (or, inverted,
//! only where it does not).

use orrery_core::Scope;
use serde::{Deserialize, Serialize};

use crate::error::{HelperError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StencilFunc {
    Always,
    Equal,
    NotEqual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StencilOp {
    Keep,
    Replace,
}

/// Stencil state to merge into a material
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StencilParams {
    pub stencil_write: bool,
    pub stencil_ref: u32,
    pub stencil_func: StencilFunc,
    pub stencil_fail: StencilOp,
    pub stencil_z_fail: StencilOp,
    pub stencil_z_pass: StencilOp,
}

impl StencilParams {
    /// Parameters for the mask shape itself
    pub fn writer(id: u32) -> Self {
        Self {
            stencil_write: true,
            stencil_ref: id,
            stencil_func: StencilFunc::Always,
            stencil_fail: StencilOp::Replace,
            stencil_z_fail: StencilOp::Replace,
            stencil_z_pass: StencilOp::Replace,
        }
    }

    /// Parameters for content clipped by mask `id`
    pub fn reader(id: u32, inverse: bool) -> Self {
        Self {
            stencil_write: true,
            stencil_ref: id,
            stencil_func: if inverse {
                StencilFunc::NotEqual
            } else {
                StencilFunc::Equal
            },
            stencil_fail: StencilOp::Keep,
            stencil_z_fail: StencilOp::Keep,
            stencil_z_pass: StencilOp::Keep,
        }
    }
}

/// Id of the nearest enclosing mask
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaskId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaskOptions {
    /// Draw the mask shape into the color buffer as well
    pub color_write: bool,
    pub depth_write: bool,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            color_write: false,
            depth_write: false,
        }
    }
}

/// Material state of a mounted mask
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mask {
    pub id: MaskId,
    pub stencil: StencilParams,
    pub color_write: bool,
    pub depth_write: bool,
}

/// Mount mask `id`; scopes below `scope` can call [`use_mask`] without an id
pub fn mask(scope: &Scope, id: u32, options: MaskOptions) -> Mask {
    scope.provide_context(MaskId(id));
    tracing::debug!(id, "mask mounted");
    Mask {
        id: MaskId(id),
        stencil: StencilParams::writer(id),
        color_write: options.color_write,
        depth_write: options.depth_write,
    }
}

/// Stencil parameters for content clipped by a mask
///
/// With `id` unset the nearest enclosing [`mask`] is used; having neither is
/// an error.
pub fn use_mask(scope: &Scope, id: Option<u32>, inverse: bool) -> Result<StencilParams> {
    let id = match id {
        Some(id) => id,
        None => {
            scope
                .use_context::<MaskId>()
                .ok_or(HelperError::MissingParent {
                    component: "use_mask",
                    parent: "a mask id or an enclosing mask",
                })?
                .0
        }
    };
    Ok(StencilParams::reader(id, inverse))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_core::ReactiveGraph;

    #[test]
    fn test_reader_follows_enclosing_mask() {
        let graph = ReactiveGraph::new();
        let scope = graph.create_scope();
        let mounted = mask(&scope, 3, MaskOptions::default());
        assert_eq!(mounted.stencil.stencil_func, StencilFunc::Always);
        assert_eq!(mounted.stencil.stencil_z_pass, StencilOp::Replace);

        let content = scope.child();
        let params = use_mask(&content, None, false).unwrap();
        assert_eq!(params.stencil_ref, 3);
        assert_eq!(params.stencil_func, StencilFunc::Equal);

        let inverted = use_mask(&content, Some(5), true).unwrap();
        assert_eq!(inverted.stencil_ref, 5);
        assert_eq!(inverted.stencil_func, StencilFunc::NotEqual);
    }

    #[test]
    fn test_missing_mask_is_an_error() {
        let graph = ReactiveGraph::new();
        let scope = graph.create_scope();
        assert!(matches!(
            use_mask(&scope, None, false),
            Err(HelperError::MissingParent { component: "use_mask", .. })
        ));
    }
}
