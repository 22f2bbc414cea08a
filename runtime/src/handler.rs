//! Handlers and handler classes.
//!
//! A [`Handler`] is the unit that actually processes a request/response pair.
//! The container never builds handlers directly; it goes through a
//! [`HandlerClass`], the runtime stand-in for "the handler's type": it knows
//! the type's name, its declared [`Instancing`] policy and how to build a
//! fresh instance.
//!
//! Two ready-made classes exist:
//!
//! - [`HandlerType<H>`] for handler types implementing [`HandlerDefinition`]
//! - [`FnHandlerClass`] for closures, handy in tests and bootstraps

use async_trait::async_trait;
use bindlet_core::{ConfigLookup, Instancing, MapConfig, Payload};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Configuration snapshot handed to [`Handler::init`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    handler: String,
    context: String,
    params: MapConfig,
}

impl HandlerConfig {
    /// Snapshot for `handler` registered in `context`
    pub fn new(handler: impl Into<String>, context: impl Into<String>, params: MapConfig) -> Self {
        Self {
            handler: handler.into(),
            context: context.into(),
            params,
        }
    }

    /// Registration name of the handler
    #[must_use]
    pub fn handler_name(&self) -> &str {
        &self.handler
    }

    /// Name of the owning context (empty while unregistered)
    #[must_use]
    pub fn context_name(&self) -> &str {
        &self.context
    }

    /// Init parameters
    #[must_use]
    pub const fn params(&self) -> &MapConfig {
        &self.params
    }
}

impl ConfigLookup for HandlerConfig {
    fn get(&self, name: &str) -> Option<String> {
        self.params.get(name)
    }

    fn keys(&self) -> Vec<String> {
        self.params.keys()
    }
}

/// A request-processing unit
///
/// `process` takes `&self`: a `STATELESS` instance is shared by every
/// concurrent request and must synchronize its own state.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Prepare the instance
    ///
    /// Runs once per request for per-call instances, once per lifetime for
    /// shared ones.
    ///
    /// # Errors
    ///
    /// A failure aborts the request as a construction failure.
    async fn init(&mut self, _config: &HandlerConfig) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle one request, filling in the response
    ///
    /// # Errors
    ///
    /// The error is returned to whoever dispatched the event.
    async fn process(&self, request: &dyn Payload, response: &mut dyn Payload) -> anyhow::Result<()>;

    /// Release whatever `init` acquired
    ///
    /// # Errors
    ///
    /// Failures are logged and never replace the result of `process`.
    async fn destroy(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handlers able to reset their transient state for reuse
///
/// Declaring `RECYCLABLE` requires this capability. The container currently
/// serves `RECYCLABLE` classes like `STATEFUL` ones (a fresh instance per
/// request) and never calls [`recycle`](Recyclable::recycle).
pub trait Recyclable: Handler {
    /// Clear per-request state
    fn recycle(&mut self);
}

/// Runtime description of a handler type
pub trait HandlerClass: Send + Sync {
    /// Type name, for logs and errors
    fn type_name(&self) -> &str;

    /// Declared instancing policy
    fn instancing(&self) -> Instancing;

    /// Whether instances implement [`Recyclable`]
    fn is_recyclable(&self) -> bool {
        false
    }

    /// Build a fresh, uninitialized instance
    ///
    /// # Errors
    ///
    /// Returns the constructor's error.
    fn instantiate(&self) -> anyhow::Result<Box<dyn Handler>>;
}

/// Handler types the container can construct itself
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use bindlet_core::{Instancing, Payload};
/// use bindlet_runtime::handler::{Handler, HandlerDefinition};
///
/// struct Health;
///
/// #[async_trait]
/// impl Handler for Health {
///     async fn process(&self, _: &dyn Payload, _: &mut dyn Payload) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
///
/// impl HandlerDefinition for Health {
///     const INSTANCING: Instancing = Instancing::Stateless;
///
///     fn construct() -> anyhow::Result<Self> {
///         Ok(Self)
///     }
/// }
/// ```
pub trait HandlerDefinition: Handler + Sized + 'static {
    /// Instancing policy shared by every instance
    const INSTANCING: Instancing = Instancing::Stateful;

    /// Build an uninitialized instance
    ///
    /// # Errors
    ///
    /// Returns an error if the instance cannot be built.
    fn construct() -> anyhow::Result<Self>;
}

/// [`HandlerClass`] of a [`HandlerDefinition`] type
pub struct HandlerType<H> {
    recyclable: bool,
    _marker: PhantomData<fn() -> H>,
}

impl<H: HandlerDefinition> HandlerType<H> {
    /// Class of `H`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            recyclable: false,
            _marker: PhantomData,
        }
    }

    /// Class of `H`, advertising its [`Recyclable`] capability
    #[must_use]
    pub const fn recyclable() -> Self
    where
        H: Recyclable,
    {
        Self {
            recyclable: true,
            _marker: PhantomData,
        }
    }
}

impl<H: HandlerDefinition> Default for HandlerType<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HandlerDefinition> HandlerClass for HandlerType<H> {
    fn type_name(&self) -> &str {
        std::any::type_name::<H>()
    }

    fn instancing(&self) -> Instancing {
        H::INSTANCING
    }

    fn is_recyclable(&self) -> bool {
        self.recyclable
    }

    fn instantiate(&self) -> anyhow::Result<Box<dyn Handler>> {
        Ok(Box::new(H::construct()?))
    }
}

impl<H> fmt::Debug for HandlerType<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerType")
            .field("type", &std::any::type_name::<H>())
            .field("recyclable", &self.recyclable)
            .finish()
    }
}

type HandlerFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn Handler>> + Send + Sync>;

/// [`HandlerClass`] backed by a closure
#[derive(Clone)]
pub struct FnHandlerClass {
    name: String,
    instancing: Instancing,
    recyclable: bool,
    factory: HandlerFactory,
}

impl FnHandlerClass {
    /// A `STATEFUL` class named `name` built by `factory`
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Handler>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            instancing: Instancing::Stateful,
            recyclable: false,
            factory: Arc::new(factory),
        }
    }

    /// Set the declared instancing policy
    #[must_use]
    pub const fn with_instancing(mut self, instancing: Instancing) -> Self {
        self.instancing = instancing;
        self
    }

    /// Advertise the recycle capability
    #[must_use]
    pub const fn with_recycle_support(mut self) -> Self {
        self.recyclable = true;
        self
    }
}

impl HandlerClass for FnHandlerClass {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn instancing(&self) -> Instancing {
        self.instancing
    }

    fn is_recyclable(&self) -> bool {
        self.recyclable
    }

    fn instantiate(&self) -> anyhow::Result<Box<dyn Handler>> {
        (self.factory)()
    }
}

impl fmt::Debug for FnHandlerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandlerClass")
            .field("name", &self.name)
            .field("instancing", &self.instancing)
            .field("recyclable", &self.recyclable)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    struct Counter {
        resets: usize,
    }

    #[async_trait]
    impl Handler for Counter {
        async fn process(&self, _: &dyn Payload, _: &mut dyn Payload) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl Recyclable for Counter {
        fn recycle(&mut self) {
            self.resets += 1;
        }
    }

    impl HandlerDefinition for Counter {
        const INSTANCING: Instancing = Instancing::Recyclable;

        fn construct() -> anyhow::Result<Self> {
            Ok(Self { resets: 0 })
        }
    }

    #[test]
    fn test_handler_type_reports_definition() {
        let plain = HandlerType::<Counter>::new();
        assert_eq!(plain.instancing(), Instancing::Recyclable);
        assert!(!plain.is_recyclable());
        assert!(plain.type_name().ends_with("Counter"));

        let recyclable = HandlerType::<Counter>::recyclable();
        assert!(recyclable.is_recyclable());
        assert!(recyclable.instantiate().is_ok());
    }

    #[test]
    fn test_fn_class_defaults_to_stateful() {
        let class = FnHandlerClass::new("counter", || Ok(Box::new(Counter { resets: 0 }) as Box<dyn Handler>));
        assert_eq!(class.type_name(), "counter");
        assert_eq!(class.instancing(), Instancing::Stateful);
        assert!(!class.is_recyclable());

        let class = class.with_instancing(Instancing::Stateless);
        assert_eq!(class.instancing(), Instancing::Stateless);
    }

    #[test]
    fn test_handler_config_reads_params() {
        let config = HandlerConfig::new("echo", "text", MapConfig::new().with("greeting", "hi"));
        assert_eq!(config.handler_name(), "echo");
        assert_eq!(config.context_name(), "text");
        assert_eq!(config.get("greeting").as_deref(), Some("hi"));
        assert_eq!(config.keys(), vec!["greeting"]);
    }
}
