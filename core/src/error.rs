use crate::lifecycle::LifecycleState;
use thiserror::Error;

/// Errors raised by lifecycle transitions
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The transition matrix denies moving between the two states
    ///
    /// The component's state is left unchanged.
    #[error("Lifecycle transition denied for '{component}': {from} -> {to}")]
    TransitionDenied {
        /// Name of the component that refused the transition
        component: String,
        /// State the component was in
        from: LifecycleState,
        /// State that was requested
        to: LifecycleState,
    },

    /// A lifecycle hook returned an error
    ///
    /// The component has been forced into `FAILED`; the hook's error is kept
    /// as the source.
    #[error("Lifecycle hook failed for '{component}' while {state}: {source}")]
    HookFailed {
        /// Name of the component whose hook failed
        component: String,
        /// Transient state the hook ran in
        state: LifecycleState,
        /// The error produced by the hook
        #[source]
        source: anyhow::Error,
    },
}

impl LifecycleError {
    /// Name of the component the error refers to
    #[must_use]
    pub fn component(&self) -> &str {
        match self {
            Self::TransitionDenied { component, .. } | Self::HookFailed { component, .. } => {
                component
            },
        }
    }

    /// Whether this is a denied transition (as opposed to a hook failure)
    #[must_use]
    pub const fn is_denied(&self) -> bool {
        matches!(self, Self::TransitionDenied { .. })
    }
}
