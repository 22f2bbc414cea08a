//! The domain: root of the container tree.
//!
//! The host process owns one [`Domain`], hands every inbound
//! [`RequestEvent`] to [`Domain::dispatch`] and drives the tree's lifecycle
//! from it.
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use bindlet_core::{Lifecycle, Payload, RequestEvent, TypeTag, Typed};
//! use bindlet_runtime::{Context, Domain, FnHandlerClass, Handler, Server, Service};
//! use std::sync::Arc;
//!
//! static TEXT: TypeTag = TypeTag::new("text");
//!
//! #[derive(Debug)]
//! struct Text(String);
//!
//! impl Typed for Text {
//!     const TYPE: &'static TypeTag = &TEXT;
//! }
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Handler for Echo {
//!     async fn process(&self, request: &dyn Payload, response: &mut dyn Payload) -> anyhow::Result<()> {
//!         let text = request.downcast_ref::<Text>().map(|t| t.0.clone()).unwrap_or_default();
//!         if let Some(out) = response.downcast_mut::<Text>() {
//!             out.0 = text;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test_block(async {
//! let context = Arc::new(Context::for_types::<Text, Text>("echo"));
//! context.register("echo", Arc::new(FnHandlerClass::new("echo", || Ok(Box::new(Echo) as Box<dyn Handler>))))?;
//!
//! let service = Arc::new(Service::new("web"));
//! service.add_context(context)?;
//! let server = Arc::new(Server::new("local"));
//! server.add_service(service)?;
//! let domain = Arc::new(Domain::new("main"));
//! domain.add_server(server)?;
//! domain.start().await?;
//!
//! let mut event = RequestEvent::new(Text("hi".into()), Text(String::new())).with_handler("echo");
//! domain.dispatch(&mut event).await?;
//! assert!(event.is_handled());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use crate::config::ContainerConfig;
use crate::error::ContainerError;
use crate::metrics::{DISPATCH_TOTAL, DISPATCH_UNHANDLED, TransitionCounter};
use crate::server::Server;
use async_trait::async_trait;
use bindlet_core::lifecycle::Convergence;
use bindlet_core::{Lifecycle, LifecycleManager, LifecycleState, RequestEvent};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Root of the container tree
pub struct Domain {
    name: String,
    lifecycle: LifecycleManager,
    servers: RwLock<HashMap<String, Arc<Server>>>,
    config: ContainerConfig,
}

impl Domain {
    /// An empty domain with default configuration
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let lifecycle = LifecycleManager::new(name.clone());
        lifecycle.add_listener(Arc::new(TransitionCounter));

        Self {
            name,
            lifecycle,
            servers: RwLock::new(HashMap::new()),
            config: ContainerConfig::default(),
        }
    }

    /// Use `config` instead of the defaults
    #[must_use]
    pub fn with_config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Domain name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container configuration
    #[must_use]
    pub const fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Take ownership of `server`, replacing any server with the same name
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::OwnershipConflict`] if another domain claimed
    /// the server concurrently or the server is being destroyed.
    pub fn add_server(self: &Arc<Self>, server: Arc<Server>) -> Result<Option<Arc<Server>>, ContainerError> {
        if let Some(previous) = server.domain() {
            if !Arc::ptr_eq(&previous, self) {
                previous.detach_server(&server);
            }
        }
        server.owner_slot().claim(server.lifecycle(), &self.name, self)?;

        let replaced = self
            .servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(server.name().to_string(), Arc::clone(&server));

        match replaced {
            Some(old) if !Arc::ptr_eq(&old, &server) => {
                old.owner_slot().release(old.lifecycle(), self);
                Ok(Some(old))
            },
            _ => Ok(None),
        }
    }

    /// Remove and release the server named `name`
    pub fn remove_server(self: &Arc<Self>, name: &str) -> Option<Arc<Server>> {
        let removed = self
            .servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)?;
        removed.owner_slot().release(removed.lifecycle(), self);
        Some(removed)
    }

    fn detach_server(self: &Arc<Self>, server: &Arc<Server>) {
        {
            let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
            if servers.get(server.name()).is_some_and(|existing| Arc::ptr_eq(existing, server)) {
                servers.remove(server.name());
            }
        }
        server.owner_slot().release(server.lifecycle(), self);
    }

    /// Server named `name`
    #[must_use]
    pub fn get_server(&self, name: &str) -> Option<Arc<Server>> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of every server, sorted
    #[must_use]
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Snapshot of the servers
    #[must_use]
    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Route the event down the tree
    ///
    /// Each server is offered the event until one handles it. An event nobody
    /// accepts comes back with `is_handled() == false`.
    ///
    /// # Errors
    ///
    /// Propagates the first error raised below.
    pub async fn dispatch(&self, event: &mut RequestEvent) -> Result<(), ContainerError> {
        metrics::counter!(DISPATCH_TOTAL, "domain" => self.name.clone()).increment(1);

        for server in self.servers() {
            server.dispatch(event).await?;
            if event.is_handled() {
                return Ok(());
            }
        }

        metrics::counter!(DISPATCH_UNHANDLED, "domain" => self.name.clone()).increment(1);
        tracing::debug!(
            domain = %self.name,
            request = %event.request_type(),
            handler = ?event.handler_name(),
            "Event not handled"
        );
        Ok(())
    }

    /// Poll until the domain is `STARTED`, within the configured budget
    pub async fn wait_until_started(&self) -> Convergence {
        self.wait_until(LifecycleState::Started).await
    }

    /// Poll until the domain reaches `state`, within the configured budget
    pub async fn wait_until(&self, state: LifecycleState) -> Convergence {
        self.lifecycle
            .wait_for(
                |current| current == state,
                self.config.lifecycle_poll_retries,
                self.config.lifecycle_poll_interval(),
            )
            .await
    }
}

#[async_trait]
impl Lifecycle for Domain {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    async fn on_init(&self) -> anyhow::Result<()> {
        for server in self.servers() {
            server.init().await?;
        }
        Ok(())
    }

    async fn on_start(&self) -> anyhow::Result<()> {
        for server in self.servers() {
            server.start().await?;
        }
        tracing::info!(domain = %self.name, servers = self.server_names().len(), "Domain started");
        Ok(())
    }

    async fn on_stop(&self) -> anyhow::Result<()> {
        for server in self.servers() {
            server.stop().await?;
        }
        tracing::info!(domain = %self.name, "Domain stopped");
        Ok(())
    }

    async fn on_destroy(&self) -> anyhow::Result<()> {
        for server in self.servers() {
            server.destroy().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.name)
            .field("state", &self.lifecycle.state())
            .field("servers", &self.server_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::time::Duration;

    fn quick() -> ContainerConfig {
        ContainerConfig::default().with_lifecycle_polling(2, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_wait_until_started() {
        let domain = Arc::new(Domain::new("main").with_config(quick()));
        assert!(!domain.wait_until_started().await.converged);

        domain.add_server(Arc::new(Server::new("http"))).unwrap();
        domain.start().await.unwrap();

        let outcome = domain.wait_until_started().await;
        assert!(outcome.converged);
        assert_eq!(outcome.polls, 1);
        assert_eq!(
            domain.get_server("http").unwrap().state(),
            LifecycleState::Started
        );
    }

    #[test]
    fn test_server_moves_between_domains() {
        let first = Arc::new(Domain::new("first"));
        let second = Arc::new(Domain::new("second"));
        let http = Arc::new(Server::new("http"));

        first.add_server(Arc::clone(&http)).unwrap();
        second.add_server(Arc::clone(&http)).unwrap();

        assert!(first.server_names().is_empty());
        assert_eq!(second.server_names(), vec!["http"]);
        assert_eq!(http.domain().unwrap().name(), "second");
    }

    #[tokio::test]
    async fn test_empty_domain_leaves_event_unhandled() {
        #[derive(Debug)]
        struct Nothing;

        static NOTHING: bindlet_core::TypeTag = bindlet_core::TypeTag::new("nothing");

        impl bindlet_core::Typed for Nothing {
            const TYPE: &'static bindlet_core::TypeTag = &NOTHING;
        }

        let domain = Domain::new("main");
        let mut event = RequestEvent::new(Nothing, Nothing);
        domain.dispatch(&mut event).await.unwrap();
        assert!(!event.is_handled());
    }
}
