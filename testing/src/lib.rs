//! # Bindlet Testing
//!
//! Testing utilities and helpers for the bindlet container.
//!
//! This crate provides:
//! - Payload types with a small subtype hierarchy
//! - Handlers that count and record what the container does to them
//! - A recording lifecycle listener and capability hook
//! - A Given-When-Then harness for dispatch
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use bindlet_testing::{DispatchTest, Reply, Text, echo_domain};
//!
//! #[tokio::test]
//! async fn test_echo() {
//!     DispatchTest::new(echo_domain().unwrap())
//!         .when(RequestEvent::new(Text::from("hi"), Reply::default()).with_handler("echo"))
//!         .then_handled()
//!         .then_response::<Reply, _>(|reply| assert_eq!(reply.0, "hi"))
//!         .run()
//!         .await;
//! }
//! ```

pub mod dispatch_test;
pub mod fixtures;

/// Recording doubles for listeners and capability hooks
pub mod mocks {
    use async_trait::async_trait;
    use bindlet_core::{ComponentEvent, ComponentListener, LifecycleState, RequestEvent};
    use bindlet_runtime::CapabilityHook;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, PoisonError};

    use crate::fixtures::Reply;

    /// Listener keeping every event it sees
    #[derive(Debug, Default)]
    pub struct RecordingListener {
        events: Mutex<Vec<ComponentEvent>>,
    }

    impl RecordingListener {
        /// An empty recorder
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Every event, in arrival order
        #[must_use]
        pub fn events(&self) -> Vec<ComponentEvent> {
            self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        /// Target states of the recorded transitions
        #[must_use]
        pub fn states(&self) -> Vec<LifecycleState> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    ComponentEvent::StateChanged { to, .. } => Some(to),
                    ComponentEvent::OwnerChanged { .. } => None,
                })
                .collect()
        }

        /// `(previous, current)` owner names of the recorded ownership changes
        #[must_use]
        pub fn owner_changes(&self) -> Vec<(Option<String>, Option<String>)> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    ComponentEvent::OwnerChanged { previous, current, .. } => Some((previous, current)),
                    ComponentEvent::StateChanged { .. } => None,
                })
                .collect()
        }
    }

    impl ComponentListener for RecordingListener {
        fn on_event(&self, event: &ComponentEvent) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        }
    }

    /// Hook with a switchable verdict that writes `"denied"` into refused
    /// [`Reply`] responses
    #[derive(Debug)]
    pub struct RecordingHook {
        allow: AtomicBool,
        checked: Mutex<Vec<String>>,
        refused: Mutex<Vec<String>>,
    }

    impl RecordingHook {
        /// A hook answering `allow` until told otherwise
        #[must_use]
        pub fn new(allow: bool) -> Self {
            Self {
                allow: AtomicBool::new(allow),
                checked: Mutex::new(Vec::new()),
                refused: Mutex::new(Vec::new()),
            }
        }

        /// Change the verdict
        pub fn set_allow(&self, allow: bool) {
            self.allow.store(allow, Ordering::SeqCst);
        }

        /// Handlers the hook was asked about
        #[must_use]
        pub fn checked(&self) -> Vec<String> {
            self.checked.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        /// Handlers the hook refused
        #[must_use]
        pub fn refused(&self) -> Vec<String> {
            self.refused.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    #[async_trait]
    impl CapabilityHook for RecordingHook {
        async fn authenticate(&self, handler: &str, _event: &RequestEvent) -> bool {
            self.checked
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handler.to_string());
            self.allow.load(Ordering::SeqCst)
        }

        async fn unauthorized(&self, handler: &str, event: &mut RequestEvent) -> anyhow::Result<()> {
            self.refused
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handler.to_string());
            if let Some(reply) = event.response_mut().downcast_mut::<Reply>() {
                reply.0 = "denied".to_string();
            }
            Ok(())
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use bindlet_core::LifecycleState;
    use proptest::prelude::*;

    /// Names usable for handlers, contexts and other components
    pub fn component_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}"
    }

    /// Any of the twelve lifecycle states
    pub fn lifecycle_state() -> impl Strategy<Value = LifecycleState> {
        proptest::sample::select(LifecycleState::ALL.to_vec())
    }

    /// Short sequences of handler registrations by name, duplicates included
    pub fn registration_names() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::vec(prop_oneof![component_name(), Just("echo".to_string())], 0..16)
    }
}

/// Install a `tracing` subscriber honoring `RUST_LOG`, once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use dispatch_test::DispatchTest;
pub use fixtures::{
    GREETING, Greeting, Probe, ProbeHandler, REPLY, Reply, TEXT, Text, echo_class, echo_domain,
    failing_class, single_context_domain, Failure,
};
pub use mocks::{RecordingHook, RecordingListener};

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use bindlet_core::{ComponentEvent, ComponentListener, LifecycleState};

    #[test]
    fn test_recording_listener_splits_events() {
        let listener = RecordingListener::new();
        listener.on_event(&ComponentEvent::StateChanged {
            component: "c".into(),
            from: LifecycleState::New,
            to: LifecycleState::Initializing,
        });
        listener.on_event(&ComponentEvent::OwnerChanged {
            component: "c".into(),
            previous: None,
            current: Some("s".into()),
        });

        assert_eq!(listener.states(), vec![LifecycleState::Initializing]);
        assert_eq!(listener.owner_changes(), vec![(None, Some("s".to_string()))]);
    }
}
