//! Contexts: named groups of handlers.
//!
//! A context declares the request and response [`TypeTag`]s it accepts and
//! keeps the handler registrations under a single read-write lock, so a
//! registration added while requests are in flight is either fully visible
//! to a dispatch or not at all.
//!
//! # Request path
//!
//! ```text
//! dispatch(event)
//!   ├─ resolve name (event target, else default handler) ── none ──► unhandled
//!   ├─ look up registration ─────────────────────────────── miss ──► unhandled
//!   ├─ unavailable? ─────────────────────────────────────── yes ───► unhandled
//!   ├─ restricted? ─► capability hook ─ refused ─► unauthorized() ─► handled
//!   └─ mark handled ─► lease ─► init* ─► process ─► destroy* ─► release
//!                                        (* per-request policies only)
//! ```

use crate::config::ContainerConfig;
use crate::error::ContainerError;
use crate::handler::HandlerClass;
use crate::metrics::{HANDLER_FAILED, TransitionCounter};
use crate::ownership::OwnerSlot;
use crate::registration::HandlerRegistration;
use crate::service::Service;
use async_trait::async_trait;
use bindlet_core::{Lifecycle, LifecycleManager, LifecycleState, RequestEvent, TypeTag, Typed};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A named group of handlers sharing request/response types
pub struct Context {
    name: String,
    request_type: &'static TypeTag,
    response_type: &'static TypeTag,
    lifecycle: LifecycleManager,
    service: OwnerSlot<Service>,
    handlers: RwLock<HashMap<String, Arc<HandlerRegistration>>>,
    retired: RwLock<Vec<Arc<HandlerRegistration>>>,
    default_handler: RwLock<Option<String>>,
    config: ContainerConfig,
}

impl Context {
    /// A context accepting `request`/`response` payloads and their subtypes
    #[must_use]
    pub fn new(name: impl Into<String>, request: &'static TypeTag, response: &'static TypeTag) -> Self {
        let name = name.into();
        let lifecycle = LifecycleManager::new(name.clone());
        lifecycle.add_listener(Arc::new(TransitionCounter));

        Self {
            name,
            request_type: request,
            response_type: response,
            lifecycle,
            service: OwnerSlot::new(),
            handlers: RwLock::new(HashMap::new()),
            retired: RwLock::new(Vec::new()),
            default_handler: RwLock::new(None),
            config: ContainerConfig::default(),
        }
    }

    /// A context typed after two payload types
    #[must_use]
    pub fn for_types<Req: Typed, Res: Typed>(name: impl Into<String>) -> Self {
        Self::new(name, Req::TYPE, Res::TYPE)
    }

    /// Use `config` instead of the defaults
    #[must_use]
    pub fn with_config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Context name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared request type
    #[must_use]
    pub const fn request_type(&self) -> &'static TypeTag {
        self.request_type
    }

    /// Declared response type
    #[must_use]
    pub const fn response_type(&self) -> &'static TypeTag {
        self.response_type
    }

    /// Owning service, while attached
    #[must_use]
    pub fn service(&self) -> Option<Arc<Service>> {
        self.service.get()
    }

    pub(crate) const fn owner_slot(&self) -> &OwnerSlot<Service> {
        &self.service
    }

    /// Add a registration, replacing any registration with the same name
    ///
    /// The replaced registration is returned and kept until the context
    /// stops, when its shared instance, if any, is torn down.
    pub fn add_handler(&self, registration: HandlerRegistration) -> Option<Arc<HandlerRegistration>> {
        self.insert(Arc::new(registration))
    }

    /// Register `class` under `name` and return the new registration
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InvalidHandlerClass`] if the class fails
    /// registration checks.
    pub fn register(
        &self,
        name: impl Into<String>,
        class: Arc<dyn HandlerClass>,
    ) -> Result<Arc<HandlerRegistration>, ContainerError> {
        let registration = Arc::new(HandlerRegistration::new(name, class)?);
        self.insert(Arc::clone(&registration));
        Ok(registration)
    }

    fn insert(&self, registration: Arc<HandlerRegistration>) -> Option<Arc<HandlerRegistration>> {
        registration.attach(&self.name);
        let name = registration.name().to_string();
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), registration);

        match &replaced {
            Some(previous) => {
                self.retired
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Arc::clone(previous));
                tracing::debug!(context = %self.name, handler = %name, "Handler registration replaced");
            },
            None => tracing::debug!(context = %self.name, handler = %name, "Handler registered"),
        }
        replaced
    }

    /// Tear down registrations replaced since the last stop
    async fn teardown_retired(&self) {
        let retired = std::mem::take(&mut *self.retired.write().unwrap_or_else(PoisonError::into_inner));
        for registration in retired {
            registration.teardown().await;
            tracing::debug!(context = %self.name, handler = %registration.name(), "Replaced handler torn down");
        }
    }

    /// Remove a registration and tear down its shared instance
    pub async fn remove_handler(&self, name: &str) -> Option<Arc<HandlerRegistration>> {
        let removed = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);

        if let Some(registration) = &removed {
            registration.teardown().await;
            tracing::debug!(context = %self.name, handler = name, "Handler removed");
        }
        removed
    }

    /// Registration for `name`
    #[must_use]
    pub fn get_handler(&self, name: &str) -> Option<Arc<HandlerRegistration>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registration for `name`, or an error naming the context
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::HandlerNotFound`] if nothing is registered
    /// under `name`.
    pub fn require_handler(&self, name: &str) -> Result<Arc<HandlerRegistration>, ContainerError> {
        self.get_handler(name).ok_or_else(|| ContainerError::HandlerNotFound {
            context: self.name.clone(),
            handler: name.to_string(),
        })
    }

    /// Names of every registration, sorted
    #[must_use]
    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Route events without a target handler to `name`
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::HandlerNotFound`] if `name` is not registered.
    pub fn set_default_handler(&self, name: &str) -> Result<(), ContainerError> {
        self.require_handler(name)?;
        *self
            .default_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(name.to_string());
        Ok(())
    }

    /// Handler used when the event names none
    #[must_use]
    pub fn default_handler(&self) -> Option<String> {
        self.default_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the event's payload types fit this context
    ///
    /// A failed or destroyed context accepts nothing.
    #[must_use]
    pub fn accepts(&self, event: &RequestEvent) -> bool {
        if matches!(
            self.lifecycle.state(),
            LifecycleState::Failed | LifecycleState::Destroying | LifecycleState::Destroyed
        ) {
            return false;
        }
        self.request_type.is_assignable_from(event.request_type())
            && self.response_type.is_assignable_from(event.response_type())
    }

    /// Run the event through its handler
    ///
    /// Misses (no name, unknown name, unavailable registration) leave the
    /// event unhandled and return `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::HandlerConstruction`] if the instance cannot
    /// be built or initialized and [`ContainerError::Handler`] if `process`
    /// or the capability hook fails. Failures of `destroy` are logged only.
    pub async fn dispatch(&self, event: &mut RequestEvent) -> Result<(), ContainerError> {
        let Some(name) = event
            .handler_name()
            .map(str::to_string)
            .or_else(|| self.default_handler())
        else {
            tracing::debug!(context = %self.name, "No handler named and no default handler");
            return Ok(());
        };

        let Some(registration) = self.get_handler(&name) else {
            tracing::debug!(context = %self.name, handler = %name, "Handler not found");
            return Ok(());
        };

        if registration.is_unavailable() {
            tracing::warn!(context = %self.name, handler = %name, "Handler unavailable");
            return Ok(());
        }

        if registration.is_restricted(&self.config.restricted_param) && !self.admit(&registration, event).await? {
            return Ok(());
        }

        event.mark_handled();
        self.invoke(&registration, event).await
    }

    /// Run the capability check; `false` means the handler must not run
    async fn admit(
        &self,
        registration: &HandlerRegistration,
        event: &mut RequestEvent,
    ) -> Result<bool, ContainerError> {
        let name = registration.name();
        let Some(hook) = registration.hook() else {
            tracing::warn!(
                context = %self.name,
                handler = name,
                "Restricted handler has no capability hook, refusing"
            );
            return Ok(false);
        };

        if hook.authenticate(name, event).await {
            return Ok(true);
        }

        tracing::info!(context = %self.name, handler = name, "Request not authorized");
        event.mark_handled();
        hook.unauthorized(name, event)
            .await
            .map_err(|source| ContainerError::Handler {
                handler: name.to_string(),
                source,
            })?;
        Ok(false)
    }

    async fn invoke(
        &self,
        registration: &HandlerRegistration,
        event: &mut RequestEvent,
    ) -> Result<(), ContainerError> {
        let name = registration.name();
        let mut lease = registration.lease().await?;

        if let Some(handler) = lease.handler_mut() {
            let config = registration.config();
            if let Err(source) = handler.init(&config).await {
                metrics::counter!(HANDLER_FAILED, "handler" => name.to_string(), "stage" => "init")
                    .increment(1);
                return Err(ContainerError::HandlerConstruction {
                    handler: name.to_string(),
                    source,
                });
            }
        }

        let (request, response) = event.payloads_mut();
        let outcome = lease.handler().process(&*request, response).await;

        if let Some(handler) = lease.handler_mut() {
            if let Err(error) = handler.destroy().await {
                tracing::warn!(
                    context = %self.name,
                    handler = name,
                    error = %error,
                    "Handler destroy failed after process"
                );
            }
        }
        drop(lease);

        outcome.map_err(|source| {
            metrics::counter!(HANDLER_FAILED, "handler" => name.to_string(), "stage" => "process")
                .increment(1);
            tracing::warn!(context = %self.name, handler = name, error = %source, "Handler failed");
            ContainerError::Handler {
                handler: name.to_string(),
                source,
            }
        })
    }

    fn registrations(&self) -> Vec<Arc<HandlerRegistration>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Lifecycle for Context {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    async fn on_start(&self) -> anyhow::Result<()> {
        for registration in self.registrations() {
            if registration.load_on_startup() {
                registration.preload().await?;
            }
        }
        Ok(())
    }

    async fn on_stop(&self) -> anyhow::Result<()> {
        self.teardown_retired().await;
        for registration in self.registrations() {
            registration.teardown().await;
        }
        Ok(())
    }

    async fn on_destroy(&self) -> anyhow::Result<()> {
        let registrations: Vec<_> = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, registration)| registration)
            .collect();

        self.teardown_retired().await;
        for registration in registrations {
            registration.teardown().await;
        }
        *self
            .default_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("request_type", &self.request_type.name())
            .field("response_type", &self.response_type.name())
            .field("state", &self.lifecycle.state())
            .field("handlers", &self.handler_names())
            .finish_non_exhaustive()
    }
}
