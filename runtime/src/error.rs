use bindlet_core::LifecycleError;
use thiserror::Error;

/// Errors raised by the container registries and dispatch
#[derive(Error, Debug)]
pub enum ContainerError {
    /// A lifecycle transition was denied or a hook failed
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A child refused a new owner, or two owners contended for it
    #[error("Component '{child}' cannot be owned by '{owner}': {reason}")]
    OwnershipConflict {
        /// Name of the contested child
        child: String,
        /// Name of the owner that tried to take it
        owner: String,
        /// Why the transfer failed
        reason: String,
    },

    /// No registration with this name
    #[error("Handler '{handler}' not found in context '{context}'")]
    HandlerNotFound {
        /// Context that was searched
        context: String,
        /// Requested handler name
        handler: String,
    },

    /// Instantiating or initializing a handler failed
    #[error("Failed to construct handler '{handler}': {source}")]
    HandlerConstruction {
        /// Handler name
        handler: String,
        /// Factory or `init` error
        #[source]
        source: anyhow::Error,
    },

    /// A handler class does not satisfy its declared instancing policy
    #[error("Invalid handler class '{class}': {reason}")]
    InvalidHandlerClass {
        /// Class name
        class: String,
        /// Rule that was broken
        reason: String,
    },

    /// A handler's `process` (or a capability hook) failed
    #[error("Handler '{handler}' failed: {source}")]
    Handler {
        /// Handler name
        handler: String,
        /// The handler's own error
        #[source]
        source: anyhow::Error,
    },

    /// The topology could not be turned into a running domain
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    /// Invalid container configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ContainerError {
    /// Whether the error came from user code (handler body or hook) rather
    /// than from the container itself
    #[must_use]
    pub const fn is_handler_failure(&self) -> bool {
        matches!(self, Self::Handler { .. })
    }
}
