//! Core error types

use thiserror::Error;

/// Errors raised by the reactive runtime and input layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A signal handle outlived its owner
    #[error("signal has been disposed")]
    SignalDisposed,

    /// A scope was used after disposal
    #[error("scope has been disposed")]
    ScopeDisposed,

    /// No ancestor scope provides the requested context
    #[error("no context of type `{0}` is provided by this scope or its ancestors")]
    MissingContext(&'static str),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
