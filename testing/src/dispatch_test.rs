//! Ergonomic testing utilities for dispatch
//!
//! This module provides a fluent API for testing a container tree with
//! readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // DispatchTest is the natural name

use bindlet_core::{Payload, RequestEvent};
use bindlet_runtime::{ContainerError, Domain};
use std::sync::Arc;

/// Type alias for response assertion functions
type ResponseAssertion = Box<dyn FnOnce(&dyn Payload) + Send>;

/// Type alias for error assertion functions
type ErrorAssertion = Box<dyn FnOnce(&ContainerError) + Send>;

/// Fluent API for testing dispatch with Given-When-Then syntax
///
/// # Example
///
/// ```ignore
/// use bindlet_testing::{DispatchTest, Reply, Text, echo_domain};
///
/// DispatchTest::new(echo_domain()?)
///     .when(RequestEvent::new(Text::from("hi"), Reply::default()))
///     .then_handled()
///     .then_response::<Reply, _>(|reply| assert_eq!(reply.0, "hi"))
///     .run()
///     .await;
/// ```
pub struct DispatchTest {
    domain: Arc<Domain>,
    start: bool,
    event: Option<RequestEvent>,
    handled: Option<bool>,
    response_assertions: Vec<ResponseAssertion>,
    error_assertion: Option<ErrorAssertion>,
}

impl DispatchTest {
    /// Create a new dispatch test against `domain` (Given)
    ///
    /// The domain is started before the event is sent unless
    /// [`without_start`](Self::without_start) is called.
    #[must_use]
    pub fn new(domain: Arc<Domain>) -> Self {
        Self {
            domain,
            start: true,
            event: None,
            handled: None,
            response_assertions: Vec::new(),
            error_assertion: None,
        }
    }

    /// Dispatch without driving the domain's lifecycle first
    #[must_use]
    pub const fn without_start(mut self) -> Self {
        self.start = false;
        self
    }

    /// Set the event to dispatch (When)
    #[must_use]
    pub fn when(mut self, event: RequestEvent) -> Self {
        self.event = Some(event);
        self
    }

    /// Expect the event to be consumed (Then)
    #[must_use]
    pub const fn then_handled(mut self) -> Self {
        self.handled = Some(true);
        self
    }

    /// Expect no context to consume the event (Then)
    #[must_use]
    pub const fn then_unhandled(mut self) -> Self {
        self.handled = Some(false);
        self
    }

    /// Add an assertion about the response, downcast to `T` (Then)
    #[must_use]
    #[allow(clippy::panic)] // Test code can panic
    pub fn then_response<T, F>(mut self, assertion: F) -> Self
    where
        T: Payload,
        F: FnOnce(&T) + Send + 'static,
    {
        self.response_assertions.push(Box::new(move |response: &dyn Payload| {
            let tag = response.type_tag();
            let Some(response) = response.downcast_ref::<T>() else {
                panic!("response is a {tag}, not the expected type");
            };
            assertion(response);
        }));
        self
    }

    /// Expect dispatch to fail, and check the error (Then)
    #[must_use]
    pub fn then_error<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&ContainerError) + Send + 'static,
    {
        self.error_assertion = Some(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions, returning the event
    ///
    /// # Panics
    ///
    /// Panics if no event was set, if starting the domain fails, if dispatch
    /// succeeds or fails against expectations, or if any assertion fails.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub async fn run(self) -> RequestEvent {
        let mut event = self.event.expect("Event must be set with when()");

        if self.start {
            bindlet_core::Lifecycle::start(&*self.domain)
                .await
                .expect("domain should start");
        }

        let outcome = self.domain.dispatch(&mut event).await;
        match (outcome, self.error_assertion) {
            (Ok(()), None) => {},
            (Err(error), Some(assertion)) => assertion(&error),
            (Ok(()), Some(_)) => panic!("dispatch succeeded but an error was expected"),
            (Err(error), None) => panic!("dispatch failed: {error}"),
        }

        if let Some(expected) = self.handled {
            assert_eq!(event.is_handled(), expected, "unexpected handled flag");
        }

        for assertion in self.response_assertions {
            assertion(event.response());
        }

        event
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::fixtures::{Greeting, Reply, Text, echo_domain};

    #[tokio::test]
    async fn test_echo_round_trip() {
        DispatchTest::new(echo_domain().unwrap())
            .when(RequestEvent::new(Text::from("ping"), Reply::default()))
            .then_handled()
            .then_response::<Reply, _>(|reply| assert_eq!(reply.0, "ping"))
            .run()
            .await;
    }

    #[tokio::test]
    async fn test_unknown_handler_leaves_event_unhandled() {
        DispatchTest::new(echo_domain().unwrap())
            .when(RequestEvent::new(Greeting::new("bo"), Reply::default()).with_handler("missing"))
            .then_unhandled()
            .then_response::<Reply, _>(|reply| assert!(reply.0.is_empty()))
            .run()
            .await;
    }
}
