//! Servers: named groups of services.

use crate::error::ContainerError;
use crate::domain::Domain;
use crate::metrics::TransitionCounter;
use crate::ownership::OwnerSlot;
use crate::service::Service;
use async_trait::async_trait;
use bindlet_core::{Lifecycle, LifecycleManager, RequestEvent};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A named group of services
///
/// Services are keyed by name; dispatch tries them in no particular order and
/// stops at the first one that handles the event.
pub struct Server {
    name: String,
    lifecycle: LifecycleManager,
    domain: OwnerSlot<Domain>,
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Server {
    /// An empty server
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let lifecycle = LifecycleManager::new(name.clone());
        lifecycle.add_listener(Arc::new(TransitionCounter));

        Self {
            name,
            lifecycle,
            domain: OwnerSlot::new(),
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Server name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning domain, while attached
    #[must_use]
    pub fn domain(&self) -> Option<Arc<Domain>> {
        self.domain.get()
    }

    pub(crate) const fn owner_slot(&self) -> &OwnerSlot<Domain> {
        &self.domain
    }

    /// Take ownership of `service`, replacing any service with the same name
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::OwnershipConflict`] if another server claimed
    /// the service concurrently or the service is being destroyed.
    pub fn add_service(self: &Arc<Self>, service: Arc<Service>) -> Result<Option<Arc<Service>>, ContainerError> {
        if let Some(previous) = service.server() {
            if !Arc::ptr_eq(&previous, self) {
                previous.detach_service(&service);
            }
        }
        service.owner_slot().claim(service.lifecycle(), &self.name, self)?;

        let replaced = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.name().to_string(), Arc::clone(&service));

        match replaced {
            Some(old) if !Arc::ptr_eq(&old, &service) => {
                old.owner_slot().release(old.lifecycle(), self);
                Ok(Some(old))
            },
            _ => Ok(None),
        }
    }

    /// Remove and release the service named `name`
    pub fn remove_service(self: &Arc<Self>, name: &str) -> Option<Arc<Service>> {
        let removed = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)?;
        removed.owner_slot().release(removed.lifecycle(), self);
        Some(removed)
    }

    fn detach_service(self: &Arc<Self>, service: &Arc<Service>) {
        {
            let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
            if services.get(service.name()).is_some_and(|existing| Arc::ptr_eq(existing, service)) {
                services.remove(service.name());
            }
        }
        service.owner_slot().release(service.lifecycle(), self);
    }

    /// Service named `name`
    #[must_use]
    pub fn get_service(&self, name: &str) -> Option<Arc<Service>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of every service, sorted
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Snapshot of the services
    #[must_use]
    pub fn services(&self) -> Vec<Arc<Service>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Offer the event to each service until one handles it
    ///
    /// # Errors
    ///
    /// Propagates the first service error.
    pub async fn dispatch(&self, event: &mut RequestEvent) -> Result<(), ContainerError> {
        for service in self.services() {
            service.dispatch(event).await?;
            if event.is_handled() {
                return Ok(());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for Server {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    async fn on_init(&self) -> anyhow::Result<()> {
        for service in self.services() {
            service.init().await?;
        }
        Ok(())
    }

    async fn on_start(&self) -> anyhow::Result<()> {
        for service in self.services() {
            service.start().await?;
        }
        Ok(())
    }

    async fn on_stop(&self) -> anyhow::Result<()> {
        for service in self.services() {
            service.stop().await?;
        }
        Ok(())
    }

    async fn on_destroy(&self) -> anyhow::Result<()> {
        for service in self.services() {
            service.destroy().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("state", &self.lifecycle.state())
            .field("services", &self.service_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use bindlet_core::LifecycleState;

    #[test]
    fn test_service_registry() {
        let server = Arc::new(Server::new("http"));
        server.add_service(Arc::new(Service::new("web"))).unwrap();
        server.add_service(Arc::new(Service::new("admin"))).unwrap();

        assert_eq!(server.service_names(), vec!["admin", "web"]);
        assert_eq!(server.get_service("web").unwrap().server().unwrap().name(), "http");

        let old = server.get_service("web").unwrap();
        let replaced = server.add_service(Arc::new(Service::new("web"))).unwrap();
        assert!(Arc::ptr_eq(&replaced.unwrap(), &old));
        assert!(old.server().is_none());

        assert!(server.remove_service("admin").is_some());
        assert_eq!(server.service_names(), vec!["web"]);
    }

    #[test]
    fn test_readding_same_service_is_noop() {
        let server = Arc::new(Server::new("http"));
        let web = Arc::new(Service::new("web"));
        server.add_service(Arc::clone(&web)).unwrap();
        assert!(server.add_service(Arc::clone(&web)).unwrap().is_none());
        assert!(web.owner_slot().is_owned_by(&server));
    }

    #[tokio::test]
    async fn test_destroyed_service_cannot_be_adopted() {
        let web = Arc::new(Service::new("web"));
        web.destroy().await.unwrap();
        assert_eq!(web.state(), LifecycleState::Destroyed);

        let server = Arc::new(Server::new("http"));
        let err = server.add_service(web).unwrap_err();
        assert!(matches!(err, ContainerError::OwnershipConflict { .. }));
        assert!(server.service_names().is_empty());
    }
}
