//! Helper error types

use orrery_fiber::FiberError;
use thiserror::Error;

/// Errors raised by helper components
#[derive(Error, Debug)]
pub enum HelperError {
    /// The render root rejected the request
    #[error(transparent)]
    Fiber(#[from] FiberError),

    /// One step of a controller teardown failed
    #[error("teardown step `{step}` failed: {reason}")]
    Teardown { step: &'static str, reason: String },

    /// A component was used without the parent it needs
    #[error("{component} requires {parent}")]
    MissingParent {
        component: &'static str,
        parent: &'static str,
    },

    /// A material descriptor could not be exported
    #[error("material export failed: {0}")]
    Export(#[from] serde_json::Error),
}

/// Result type for helper operations
pub type Result<T> = std::result::Result<T, HelperError>;
