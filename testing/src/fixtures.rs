//! Payloads, handlers and ready-made trees for container tests.
//!
//! The payload hierarchy is small on purpose: [`Greeting`] extends [`Text`],
//! and both are answered with a [`Reply`].

use async_trait::async_trait;
use bindlet_core::{ConfigLookup, Instancing, Payload, TypeTag, Typed};
use bindlet_runtime::{
    ContainerError, Context, Domain, FnHandlerClass, Handler, HandlerConfig, HandlerDefinition, HandlerType,
    Recyclable, Server, Service,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Tag of [`Text`]
pub static TEXT: TypeTag = TypeTag::new("test.text");

/// Tag of [`Greeting`], a subtype of [`TEXT`]
pub static GREETING: TypeTag = TypeTag::extending("test.greeting", &TEXT);

/// Tag of [`Reply`]
pub static REPLY: TypeTag = TypeTag::new("test.reply");

/// Plain text request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Text(pub String);

impl From<&str> for Text {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Typed for Text {
    const TYPE: &'static TypeTag = &TEXT;
}

/// Request addressed to someone; reads as `"hello {name}"`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Greeting {
    /// Who to greet
    pub name: String,
}

impl Greeting {
    /// Greet `name`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Typed for Greeting {
    const TYPE: &'static TypeTag = &GREETING;
}

/// Response text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply(pub String);

impl Typed for Reply {
    const TYPE: &'static TypeTag = &REPLY;
}

fn request_text(request: &dyn Payload) -> anyhow::Result<String> {
    if let Some(text) = request.downcast_ref::<Text>() {
        return Ok(text.0.clone());
    }
    if let Some(greeting) = request.downcast_ref::<Greeting>() {
        return Ok(format!("hello {}", greeting.name));
    }
    anyhow::bail!("unsupported request type {}", request.type_tag())
}

fn write_reply(response: &mut dyn Payload, text: String) -> anyhow::Result<()> {
    let tag = response.type_tag();
    let Some(reply) = response.downcast_mut::<Reply>() else {
        anyhow::bail!("unsupported response type {tag}");
    };
    reply.0 = text;
    Ok(())
}

/// Copies the request text into the reply
#[derive(Debug, Default)]
pub struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn process(&self, request: &dyn Payload, response: &mut dyn Payload) -> anyhow::Result<()> {
        write_reply(response, request_text(request)?)
    }
}

impl HandlerDefinition for Echo {
    const INSTANCING: Instancing = Instancing::Stateless;

    fn construct() -> anyhow::Result<Self> {
        Ok(Self)
    }
}

/// `STATELESS` class of [`Echo`]
#[must_use]
pub fn echo_class() -> Arc<HandlerType<Echo>> {
    Arc::new(HandlerType::new())
}

/// Shared counters observing every [`ProbeHandler`] built from one class
#[derive(Debug, Default)]
pub struct Probe {
    constructed: AtomicUsize,
    initialized: AtomicUsize,
    processed: AtomicUsize,
    destroyed: AtomicUsize,
    seen: Mutex<Vec<usize>>,
    delay: Duration,
}

impl Probe {
    /// A probe whose handlers answer immediately
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A probe whose handlers sleep for `delay` inside `process`
    #[must_use]
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Handler class named `name` building probe handlers
    #[must_use]
    pub fn class(self: &Arc<Self>, name: &str, instancing: Instancing) -> FnHandlerClass {
        let probe = Arc::clone(self);
        let class = FnHandlerClass::new(name, move || {
            let id = probe.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ProbeHandler {
                id,
                probe: Arc::clone(&probe),
                prefix: String::new(),
            }) as Box<dyn Handler>)
        })
        .with_instancing(instancing);

        if instancing == Instancing::Recyclable {
            class.with_recycle_support()
        } else {
            class
        }
    }

    /// Instances built so far
    #[must_use]
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    /// Calls to `init`
    #[must_use]
    pub fn initialized(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Calls to `process`
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    /// Calls to `destroy`
    #[must_use]
    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Number of distinct instances that processed an event
    #[must_use]
    pub fn distinct_instances(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Echo handler reporting to a [`Probe`]
///
/// Replies are prefixed with the `prefix` init parameter.
#[derive(Debug)]
pub struct ProbeHandler {
    id: usize,
    probe: Arc<Probe>,
    prefix: String,
}

#[async_trait]
impl Handler for ProbeHandler {
    async fn init(&mut self, config: &HandlerConfig) -> anyhow::Result<()> {
        self.probe.initialized.fetch_add(1, Ordering::SeqCst);
        self.prefix = config.get("prefix").unwrap_or_default();
        Ok(())
    }

    async fn process(&self, request: &dyn Payload, response: &mut dyn Payload) -> anyhow::Result<()> {
        self.probe.processed.fetch_add(1, Ordering::SeqCst);
        self.probe
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.id);

        if !self.probe.delay.is_zero() {
            tokio::time::sleep(self.probe.delay).await;
        }
        write_reply(response, format!("{}{}", self.prefix, request_text(request)?))
    }

    async fn destroy(&mut self) -> anyhow::Result<()> {
        self.probe.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Recyclable for ProbeHandler {
    fn recycle(&mut self) {
        self.prefix.clear();
    }
}

/// Stage at which a [`failing_class`] handler gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The class cannot build an instance
    Construct,
    /// `init` fails
    Init,
    /// `process` fails
    Process,
    /// `destroy` fails after a successful `process`
    Destroy,
}

struct FailingHandler {
    failure: Failure,
}

#[async_trait]
impl Handler for FailingHandler {
    async fn init(&mut self, _config: &HandlerConfig) -> anyhow::Result<()> {
        if self.failure == Failure::Init {
            anyhow::bail!("init refused");
        }
        Ok(())
    }

    async fn process(&self, request: &dyn Payload, response: &mut dyn Payload) -> anyhow::Result<()> {
        if self.failure == Failure::Process {
            anyhow::bail!("process refused");
        }
        write_reply(response, request_text(request)?)
    }

    async fn destroy(&mut self) -> anyhow::Result<()> {
        if self.failure == Failure::Destroy {
            anyhow::bail!("destroy refused");
        }
        Ok(())
    }
}

/// `STATEFUL` class named `name` whose handlers fail at `failure`
#[must_use]
pub fn failing_class(name: &str, failure: Failure) -> FnHandlerClass {
    FnHandlerClass::new(name, move || {
        if failure == Failure::Construct {
            anyhow::bail!("construction refused");
        }
        Ok(Box::new(FailingHandler { failure }) as Box<dyn Handler>)
    })
}

/// `main` domain → `local` server → `web` service → `context`
///
/// # Errors
///
/// Returns [`ContainerError::OwnershipConflict`] if `context` already belongs
/// to a service that is being destroyed.
pub fn single_context_domain(context: Arc<Context>) -> Result<Arc<Domain>, ContainerError> {
    let service = Arc::new(Service::new("web"));
    service.add_context(context)?;
    let server = Arc::new(Server::new("local"));
    server.add_service(service)?;
    let domain = Arc::new(Domain::new("main"));
    domain.add_server(server)?;
    Ok(domain)
}

/// A domain with one `text` context (`Text` → `Reply`) whose default
/// handler is `echo`
///
/// # Errors
///
/// Returns an error only if wiring the tree fails.
pub fn echo_domain() -> Result<Arc<Domain>, ContainerError> {
    let context = Arc::new(Context::for_types::<Text, Reply>("text"));
    context.register("echo", echo_class())?;
    context.set_default_handler("echo")?;
    single_context_domain(context)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use bindlet_core::MapConfig;

    #[tokio::test]
    async fn test_probe_counts_lifecycle() {
        let probe = Probe::new();
        let class = probe.class("probe", Instancing::Stateful);
        let mut handler = bindlet_runtime::HandlerClass::instantiate(&class).unwrap();

        let params = MapConfig::new().with("prefix", "> ");
        handler.init(&HandlerConfig::new("probe", "text", params)).await.unwrap();
        let mut reply = Reply::default();
        handler.process(&Greeting::new("ann"), &mut reply).await.unwrap();
        handler.destroy().await.unwrap();

        assert_eq!(reply.0, "> hello ann");
        assert_eq!(
            (probe.constructed(), probe.initialized(), probe.processed(), probe.destroyed()),
            (1, 1, 1, 1)
        );
    }

    #[tokio::test]
    async fn test_echo_rejects_foreign_payloads() {
        let mut text = Text::default();
        let err = Echo.process(&Reply::default(), &mut text).await.unwrap_err();
        assert!(err.to_string().contains("test.reply"));
    }
}
