//! Render root error types

use thiserror::Error;

/// Errors raised by the render root and its context
#[derive(Error, Debug)]
pub enum FiberError {
    /// A context-dependent hook was used outside of any root
    #[error("render context requested outside of a root; mount the component inside a Root scope")]
    OutsideRoot,

    /// The root that owned the context has been destroyed
    #[error("render context used after its root was destroyed")]
    ContextDestroyed,

    /// The root could not resolve a required collaborator
    #[error("root misconfigured: no {what} could be resolved")]
    Misconfigured { what: &'static str },

    /// Configuration could not be parsed
    #[error("invalid root configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration parsed but holds inconsistent values
    #[error("invalid root configuration: {0}")]
    InvalidConfig(String),

    /// A frame callback failed
    #[error("frame callback failed: {0}")]
    Frame(String),
}

/// Result type for render root operations
pub type Result<T> = std::result::Result<T, FiberError>;
