//! Services: ordered groups of contexts.
//!
//! Contexts are kept in insertion order and that order is the match
//! precedence: an event goes to the first context whose declared types accept
//! it, and only to that one.

use crate::context::Context;
use crate::error::ContainerError;
use crate::metrics::TransitionCounter;
use crate::ownership::OwnerSlot;
use crate::server::Server;
use async_trait::async_trait;
use bindlet_core::{Lifecycle, LifecycleManager, RequestEvent};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A named, ordered group of contexts
pub struct Service {
    name: String,
    lifecycle: LifecycleManager,
    server: OwnerSlot<Server>,
    contexts: RwLock<Vec<Arc<Context>>>,
}

impl Service {
    /// An empty service
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let lifecycle = LifecycleManager::new(name.clone());
        lifecycle.add_listener(Arc::new(TransitionCounter));

        Self {
            name,
            lifecycle,
            server: OwnerSlot::new(),
            contexts: RwLock::new(Vec::new()),
        }
    }

    /// Service name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning server, while attached
    #[must_use]
    pub fn server(&self) -> Option<Arc<Server>> {
        self.server.get()
    }

    pub(crate) const fn owner_slot(&self) -> &OwnerSlot<Server> {
        &self.server
    }

    /// Take ownership of `context`
    ///
    /// A context owned by another service is released by it first. A context
    /// with the same name is replaced in place and keeps its precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::OwnershipConflict`] if another service
    /// claimed the context concurrently or the context is being destroyed.
    pub fn add_context(self: &Arc<Self>, context: Arc<Context>) -> Result<Option<Arc<Context>>, ContainerError> {
        if let Some(previous) = context.service() {
            if !Arc::ptr_eq(&previous, self) {
                previous.detach_context(&context);
            }
        }
        context.owner_slot().claim(context.lifecycle(), &self.name, self)?;

        let replaced = {
            let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
            match contexts.iter().position(|existing| existing.name() == context.name()) {
                Some(index) => Some(std::mem::replace(&mut contexts[index], Arc::clone(&context))),
                None => {
                    contexts.push(Arc::clone(&context));
                    None
                },
            }
        };

        match replaced {
            Some(old) if !Arc::ptr_eq(&old, &context) => {
                old.owner_slot().release(old.lifecycle(), self);
                Ok(Some(old))
            },
            _ => Ok(None),
        }
    }

    /// Remove and release the context named `name`
    pub fn remove_context(self: &Arc<Self>, name: &str) -> Option<Arc<Context>> {
        let removed = {
            let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
            let index = contexts.iter().position(|context| context.name() == name)?;
            contexts.remove(index)
        };
        removed.owner_slot().release(removed.lifecycle(), self);
        Some(removed)
    }

    fn detach_context(self: &Arc<Self>, context: &Arc<Context>) {
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|existing| !Arc::ptr_eq(existing, context));
        context.owner_slot().release(context.lifecycle(), self);
    }

    /// Context named `name`
    #[must_use]
    pub fn get_context(&self, name: &str) -> Option<Arc<Context>> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|context| context.name() == name)
            .cloned()
    }

    /// Context names in precedence order
    #[must_use]
    pub fn context_names(&self) -> Vec<String> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|context| context.name().to_string())
            .collect()
    }

    /// Snapshot of the contexts in precedence order
    #[must_use]
    pub fn contexts(&self) -> Vec<Arc<Context>> {
        self.contexts.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Hand the event to the first context that accepts it
    ///
    /// # Errors
    ///
    /// Propagates the accepting context's error.
    pub async fn dispatch(&self, event: &mut RequestEvent) -> Result<(), ContainerError> {
        for context in self.contexts() {
            if context.accepts(event) {
                return context.dispatch(event).await;
            }
        }

        tracing::trace!(
            service = %self.name,
            request = %event.request_type(),
            response = %event.response_type(),
            "No context accepts event"
        );
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for Service {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    async fn on_init(&self) -> anyhow::Result<()> {
        for context in self.contexts() {
            context.init().await?;
        }
        Ok(())
    }

    async fn on_start(&self) -> anyhow::Result<()> {
        for context in self.contexts() {
            context.start().await?;
        }
        Ok(())
    }

    async fn on_stop(&self) -> anyhow::Result<()> {
        for context in self.contexts() {
            context.stop().await?;
        }
        Ok(())
    }

    async fn on_destroy(&self) -> anyhow::Result<()> {
        for context in self.contexts() {
            context.destroy().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("state", &self.lifecycle.state())
            .field("contexts", &self.context_names())
            .finish_non_exhaustive()
    }
}
