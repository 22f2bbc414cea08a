//! # Bindlet Core
//!
//! Core traits and types shared by every level of the bindlet container.
//!
//! The container is a hierarchy of long-lived components
//! (`Domain → Server → Service → Context → Handler`) that routes inbound
//! request/response pairs to registered handlers. This crate holds the pieces
//! every level builds on and that carry no routing logic of their own:
//!
//! - **Lifecycle**: the twelve-state machine, its fixed transition matrix and
//!   the [`Lifecycle`](lifecycle::Lifecycle) trait with overridable hooks
//! - **Payloads**: runtime [`TypeTag`](payload::TypeTag)s, the
//!   [`Payload`](payload::Payload) trait and the [`RequestEvent`](payload::RequestEvent)
//!   carried down the dispatch tree
//! - **Configuration**: the [`ConfigLookup`](config::ConfigLookup) contract
//!   consumed when building handler configuration snapshots
//! - **Instancing**: the per-handler [`Instancing`](instancing::Instancing) policy
//!
//! ## Example
//!
//! ```
//! use bindlet_core::lifecycle::{LifecycleManager, LifecycleState, Transition};
//!
//! let manager = LifecycleManager::new("web");
//! assert_eq!(manager.state(), LifecycleState::New);
//!
//! let outcome = manager.change_state(LifecycleState::Initializing)?;
//! assert_eq!(outcome, Transition::Accept);
//! assert_eq!(manager.state(), LifecycleState::Initializing);
//! # Ok::<(), bindlet_core::LifecycleError>(())
//! ```

/// Configuration lookup contract and the map-backed implementation
pub mod config;

/// Error types for lifecycle operations
pub mod error;

/// Lifecycle state machine, listeners and the `Lifecycle` trait
pub mod lifecycle;

/// Runtime type tags, payloads and the request event
pub mod payload;

/// Instancing module - how many handler instances serve a registration
///
/// Every handler class declares one of three policies. The registration that
/// owns the class consults it on each request to decide whether to build a
/// fresh instance or hand out the shared one.
pub mod instancing {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /// Instancing policy of a handler class
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum Instancing {
        /// A brand-new instance for every request
        #[default]
        Stateful,

        /// One shared instance, built and initialized once, used concurrently
        Stateless,

        /// Declared reuse through a recycle contract.
        ///
        /// Creation currently follows the `Stateful` path: a new instance per
        /// request, and the recycle hook is never invoked.
        Recyclable,
    }

    impl Instancing {
        /// Whether every request is served by the same instance
        #[must_use]
        pub const fn shares_instance(self) -> bool {
            matches!(self, Self::Stateless)
        }

        /// Whether the container runs `init`/`destroy` around each request
        #[must_use]
        pub const fn runs_per_call_lifecycle(self) -> bool {
            !self.shares_instance()
        }

        /// Canonical upper-case name
        #[must_use]
        pub const fn as_str(self) -> &'static str {
            match self {
                Self::Stateful => "STATEFUL",
                Self::Stateless => "STATELESS",
                Self::Recyclable => "RECYCLABLE",
            }
        }
    }

    impl fmt::Display for Instancing {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }
}

pub use config::{ConfigLookup, MapConfig};
pub use error::LifecycleError;
pub use instancing::Instancing;
pub use lifecycle::{
    ComponentEvent, ComponentListener, Lifecycle, LifecycleManager, LifecycleState, ListenerId,
    Phase, Transition,
};
pub use payload::{Payload, RequestEvent, TypeTag, Typed};

#[cfg(test)]
mod tests {
    use super::Instancing;

    #[test]
    fn test_instancing_defaults_to_stateful() {
        assert_eq!(Instancing::default(), Instancing::Stateful);
    }

    #[test]
    fn test_only_stateless_shares_instance() {
        assert!(Instancing::Stateless.shares_instance());
        assert!(!Instancing::Stateful.shares_instance());
        assert!(!Instancing::Recyclable.shares_instance());
        assert!(Instancing::Recyclable.runs_per_call_lifecycle());
    }
}
