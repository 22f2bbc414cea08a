//! Handler registrations.
//!
//! A [`HandlerRegistration`] is the bookkeeping record a context keeps for
//! each handler name: the class, the resolved instancing policy, the init
//! parameters and, for `STATELESS` classes, the one shared instance.
//!
//! # Instance creation
//!
//! ```text
//! STATEFUL   : instantiate ─► Owned(Box)         (caller runs init/destroy)
//! RECYCLABLE : instantiate ─► Owned(Box)         (same as STATEFUL)
//! STATELESS  : read lock ─► hit ─► Shared(Arc)
//!                      └─► miss ─► write lock ─► re-check ─► instantiate + init ─► Shared(Arc)
//! ```

use crate::error::ContainerError;
use crate::handler::{Handler, HandlerClass, HandlerConfig};
use crate::metrics::{HANDLER_CREATED, HANDLER_FAILED};
use crate::security::CapabilityHook;
use bindlet_core::{ConfigLookup, Instancing, MapConfig};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Notify;

/// A handler instance handed out by [`HandlerRegistration::create_handler`]
pub enum HandlerInstance {
    /// Exclusively owned by one request
    Owned(Box<dyn Handler>),
    /// The registration's shared `STATELESS` instance
    Shared(Arc<dyn Handler>),
}

impl HandlerInstance {
    /// The handler
    #[must_use]
    pub fn handler(&self) -> &dyn Handler {
        match self {
            Self::Owned(handler) => handler.as_ref(),
            Self::Shared(handler) => handler.as_ref(),
        }
    }

    /// Mutable access, only for per-request instances
    pub fn handler_mut(&mut self) -> Option<&mut (dyn Handler + 'static)> {
        match self {
            Self::Owned(handler) => Some(handler.as_mut()),
            Self::Shared(_) => None,
        }
    }

    /// Whether this is the shared instance
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    /// Whether both values point at the same handler object
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        std::ptr::addr_eq(
            std::ptr::from_ref::<dyn Handler>(self.handler()),
            std::ptr::from_ref::<dyn Handler>(other.handler()),
        )
    }
}

impl fmt::Debug for HandlerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned(_) => f.write_str("HandlerInstance::Owned"),
            Self::Shared(_) => f.write_str("HandlerInstance::Shared"),
        }
    }
}

/// Instance checked out of a registration, returned to it on drop
///
/// The release runs on every exit path, including a failing `process`.
pub struct HandlerLease<'a> {
    // Fields drop in order: the instance goes before the slot is released.
    instance: HandlerInstance,
    _slot: LeaseSlot<'a>,
}

impl HandlerLease<'_> {
    /// Mutable access, only for per-request instances
    pub fn handler_mut(&mut self) -> Option<&mut (dyn Handler + 'static)> {
        self.instance.handler_mut()
    }
}

impl Deref for HandlerLease<'_> {
    type Target = HandlerInstance;

    fn deref(&self) -> &HandlerInstance {
        &self.instance
    }
}

struct LeaseSlot<'a> {
    registration: &'a HandlerRegistration,
}

impl Drop for LeaseSlot<'_> {
    fn drop(&mut self) {
        self.registration.release_slot();
    }
}

/// Registration record of one handler inside a context
pub struct HandlerRegistration {
    name: String,
    class: Arc<dyn HandlerClass>,
    instancing: Instancing,
    params: RwLock<MapConfig>,
    context: RwLock<Option<String>>,
    config: RwLock<Option<Arc<HandlerConfig>>>,
    unavailable: AtomicBool,
    load_on_startup: AtomicBool,
    hook: RwLock<Option<Arc<dyn CapabilityHook>>>,
    shared: tokio::sync::RwLock<Option<Arc<dyn Handler>>>,
    active: AtomicUsize,
    released: Notify,
}

impl HandlerRegistration {
    /// Register `class` under `name`, resolving its instancing policy
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InvalidHandlerClass`] if the class declares
    /// `RECYCLABLE` without the recycle capability.
    pub fn new(name: impl Into<String>, class: Arc<dyn HandlerClass>) -> Result<Self, ContainerError> {
        let instancing = class.instancing();
        if instancing == Instancing::Recyclable && !class.is_recyclable() {
            return Err(ContainerError::InvalidHandlerClass {
                class: class.type_name().to_string(),
                reason: "declared RECYCLABLE but does not implement Recyclable".to_string(),
            });
        }

        Ok(Self {
            name: name.into(),
            class,
            instancing,
            params: RwLock::new(MapConfig::new()),
            context: RwLock::new(None),
            config: RwLock::new(None),
            unavailable: AtomicBool::new(false),
            load_on_startup: AtomicBool::new(false),
            hook: RwLock::new(None),
            shared: tokio::sync::RwLock::new(None),
            active: AtomicUsize::new(0),
            released: Notify::new(),
        })
    }

    /// Builder-style init parameter
    #[must_use]
    pub fn with_param(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_param(name, value);
        self
    }

    /// Builder-style capability hook
    #[must_use]
    pub fn with_hook(self, hook: Arc<dyn CapabilityHook>) -> Self {
        self.set_hook(Some(hook));
        self
    }

    /// Builder-style "load on startup" flag
    #[must_use]
    pub fn with_load_on_startup(self, load: bool) -> Self {
        self.set_load_on_startup(load);
        self
    }

    /// Registration name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handler class
    #[must_use]
    pub fn class(&self) -> &Arc<dyn HandlerClass> {
        &self.class
    }

    /// Instancing policy resolved at construction
    #[must_use]
    pub const fn instancing(&self) -> Instancing {
        self.instancing
    }

    /// Owning context, once attached
    #[must_use]
    pub fn context_name(&self) -> Option<String> {
        self.context.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn attach(&self, context: &str) {
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = Some(context.to_string());
        self.invalidate_config();
    }

    /// Set an init parameter, returning the previous value
    pub fn set_param(&self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let previous = self
            .params
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
        self.invalidate_config();
        previous
    }

    /// Remove an init parameter
    pub fn remove_param(&self, name: &str) -> Option<String> {
        let previous = self.params.write().unwrap_or_else(PoisonError::into_inner).remove(name);
        self.invalidate_config();
        previous
    }

    /// Copy of the init parameters
    #[must_use]
    pub fn params(&self) -> MapConfig {
        self.params.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Snapshot handed to `init`, rebuilt after any parameter change
    #[must_use]
    pub fn config(&self) -> Arc<HandlerConfig> {
        if let Some(config) = self.config.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Arc::clone(config);
        }

        let mut slot = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(config) = slot.as_ref() {
            return Arc::clone(config);
        }
        let config = Arc::new(HandlerConfig::new(
            self.name.clone(),
            self.context_name().unwrap_or_default(),
            self.params(),
        ));
        *slot = Some(Arc::clone(&config));
        config
    }

    fn invalidate_config(&self) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Whether dispatch should skip this registration
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::Acquire)
    }

    /// Flag the registration unavailable (or available again)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Whether a `STATELESS` instance is built when the context starts
    #[must_use]
    pub fn load_on_startup(&self) -> bool {
        self.load_on_startup.load(Ordering::Acquire)
    }

    /// Set the "load on startup" flag
    pub fn set_load_on_startup(&self, load: bool) {
        self.load_on_startup.store(load, Ordering::Release);
    }

    /// Attach or detach the capability hook
    pub fn set_hook(&self, hook: Option<Arc<dyn CapabilityHook>>) {
        *self.hook.write().unwrap_or_else(PoisonError::into_inner) = hook;
    }

    /// The capability hook, if attached
    #[must_use]
    pub fn hook(&self) -> Option<Arc<dyn CapabilityHook>> {
        self.hook.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Whether the boolean init parameter `param` is set to true
    #[must_use]
    pub fn is_restricted(&self, param: &str) -> bool {
        self.params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get_bool(param)
            .unwrap_or(false)
    }

    /// Instances currently checked out
    #[must_use]
    pub fn active_instances(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Whether the shared instance has been built
    pub async fn has_shared_instance(&self) -> bool {
        self.shared.read().await.is_some()
    }

    /// Hand out an instance according to the instancing policy
    ///
    /// Per-request instances come back uninitialized; the shared instance has
    /// been initialized exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::HandlerConstruction`] if the class cannot
    /// build an instance or the shared instance's `init` fails.
    pub async fn create_handler(&self) -> Result<HandlerInstance, ContainerError> {
        // Counted before the shared Arc is cloned so teardown never sees an
        // uncounted reference.
        self.active.fetch_add(1, Ordering::AcqRel);
        let instance = match self.instancing {
            Instancing::Stateless => self.shared_instance().await.map(HandlerInstance::Shared),
            Instancing::Stateful | Instancing::Recyclable => self.instantiate().map(HandlerInstance::Owned),
        };
        if instance.is_err() {
            self.release_slot();
        }
        instance
    }

    /// [`create_handler`](Self::create_handler) wrapped in a lease that
    /// releases the instance when dropped
    ///
    /// # Errors
    ///
    /// See [`create_handler`](Self::create_handler).
    pub async fn lease(&self) -> Result<HandlerLease<'_>, ContainerError> {
        let instance = self.create_handler().await?;
        Ok(HandlerLease {
            instance,
            _slot: LeaseSlot { registration: self },
        })
    }

    /// Return an instance obtained from [`create_handler`](Self::create_handler)
    pub fn release_handler(&self, instance: HandlerInstance) {
        drop(instance);
        self.release_slot();
    }

    fn release_slot(&self) {
        match self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(_) => self.released.notify_waiters(),
            Err(_) => tracing::debug!(handler = %self.name, "Release without an active instance ignored"),
        }
    }

    /// Build the shared instance ahead of the first request
    ///
    /// A no-op for per-request policies.
    ///
    /// # Errors
    ///
    /// See [`create_handler`](Self::create_handler).
    pub async fn preload(&self) -> Result<(), ContainerError> {
        if self.instancing.shares_instance() {
            let instance = self.create_handler().await?;
            self.release_handler(instance);
        }
        Ok(())
    }

    /// Destroy the shared instance, if any
    ///
    /// Requests already holding the instance finish first; `destroy` runs once
    /// the last of them has released it. Requests arriving after the slot is
    /// cleared build a fresh instance.
    pub async fn teardown(&self) {
        let Some(mut shared) = self.shared.write().await.take() else {
            return;
        };

        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if Arc::get_mut(&mut shared).is_some() {
                break;
            }
            if self.active_instances() == 0 {
                // Every clone handed out is counted; an idle count means a stray reference.
                tracing::warn!(
                    handler = %self.name,
                    "Shared handler referenced outside a lease, dropped without destroy"
                );
                return;
            }
            tracing::debug!(
                handler = %self.name,
                active = self.active_instances(),
                "Waiting for in-flight requests before destroy"
            );
            released.await;
        }

        let Some(handler) = Arc::get_mut(&mut shared) else {
            return;
        };
        if let Err(error) = handler.destroy().await {
            tracing::warn!(handler = %self.name, error = %error, "Shared handler destroy failed");
        } else {
            tracing::debug!(handler = %self.name, "Shared handler destroyed");
        }
    }

    async fn shared_instance(&self) -> Result<Arc<dyn Handler>, ContainerError> {
        if let Some(handler) = self.shared.read().await.as_ref() {
            return Ok(Arc::clone(handler));
        }

        let mut slot = self.shared.write().await;
        if let Some(handler) = slot.as_ref() {
            return Ok(Arc::clone(handler));
        }

        let mut handler = self.instantiate()?;
        let config = self.config();
        if let Err(source) = handler.init(&config).await {
            metrics::counter!(HANDLER_FAILED, "handler" => self.name.clone(), "stage" => "init")
                .increment(1);
            return Err(ContainerError::HandlerConstruction {
                handler: self.name.clone(),
                source,
            });
        }

        let handler: Arc<dyn Handler> = Arc::from(handler);
        *slot = Some(Arc::clone(&handler));
        tracing::debug!(handler = %self.name, "Shared handler initialized");
        Ok(handler)
    }

    fn instantiate(&self) -> Result<Box<dyn Handler>, ContainerError> {
        match self.class.instantiate() {
            Ok(handler) => {
                metrics::counter!(HANDLER_CREATED, "handler" => self.name.clone()).increment(1);
                Ok(handler)
            },
            Err(source) => {
                metrics::counter!(HANDLER_FAILED, "handler" => self.name.clone(), "stage" => "construct")
                    .increment(1);
                tracing::warn!(
                    handler = %self.name,
                    class = %self.class.type_name(),
                    error = %source,
                    "Handler instantiation failed"
                );
                Err(ContainerError::HandlerConstruction {
                    handler: self.name.clone(),
                    source,
                })
            },
        }
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("name", &self.name)
            .field("class", &self.class.type_name())
            .field("instancing", &self.instancing)
            .field("unavailable", &self.is_unavailable())
            .field("load_on_startup", &self.load_on_startup())
            .finish_non_exhaustive()
    }
}
