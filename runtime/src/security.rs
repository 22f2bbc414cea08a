//! Capability check for restricted handlers.
//!
//! Authentication schemes live outside the container. A registration whose
//! restricted flag is set consults its [`CapabilityHook`] before the handler
//! sees the event; a refusal lets the hook write its own response instead.

use async_trait::async_trait;
use bindlet_core::RequestEvent;

/// Pluggable per-handler authorization check
#[async_trait]
pub trait CapabilityHook: Send + Sync {
    /// Whether `event` may reach `handler`
    async fn authenticate(&self, handler: &str, event: &RequestEvent) -> bool;

    /// Produce the refusal response for an event that failed
    /// [`authenticate`](Self::authenticate)
    ///
    /// # Errors
    ///
    /// The error is returned to the dispatcher as a handler failure.
    async fn unauthorized(&self, handler: &str, event: &mut RequestEvent) -> anyhow::Result<()>;
}

/// Hook that admits every event
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl CapabilityHook for AllowAll {
    async fn authenticate(&self, _handler: &str, _event: &RequestEvent) -> bool {
        true
    }

    async fn unauthorized(&self, _handler: &str, _event: &mut RequestEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hook that refuses every event and leaves the response untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl CapabilityHook for DenyAll {
    async fn authenticate(&self, _handler: &str, _event: &RequestEvent) -> bool {
        false
    }

    async fn unauthorized(&self, handler: &str, _event: &mut RequestEvent) -> anyhow::Result<()> {
        tracing::debug!(handler, "Request refused");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[derive(Debug)]
    struct Empty;

    static EMPTY: bindlet_core::TypeTag = bindlet_core::TypeTag::new("empty");

    impl bindlet_core::Typed for Empty {
        const TYPE: &'static bindlet_core::TypeTag = &EMPTY;
    }

    #[tokio::test]
    async fn test_fixed_verdicts() {
        let mut event = RequestEvent::new(Empty, Empty);
        assert!(AllowAll.authenticate("any", &event).await);
        assert!(!DenyAll.authenticate("any", &event).await);
        DenyAll.unauthorized("any", &mut event).await.unwrap();
        assert!(!event.is_handled());
    }
}
