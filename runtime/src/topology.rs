//! Domain topology and bootstrap.
//!
//! The topology describes the tree once, at startup:
//!
//! ```toml
//! name = "main"
//!
//! [config]
//! restricted_param = "secured"
//!
//! [[server]]
//! name = "local"
//!
//! [[server.service]]
//! name = "web"
//!
//! [[server.service.context]]
//! name = "echo"
//! request_type = "text"
//! response_type = "text"
//! default_handler = "echo"
//!
//! [[server.service.context.handler]]
//! name = "echo"
//! class = "echo"
//! load_on_startup = true
//! params = { greeting = "hi" }
//! ```
//!
//! Names in the file are resolved through the catalogs of a [`Bootstrap`]:
//! handler classes by `class`, payload types by tag name, capability hooks
//! by `hook`. The file is not consulted again after [`Bootstrap::build`].

use crate::config::ContainerConfig;
use crate::context::Context;
use crate::domain::Domain;
use crate::error::ContainerError;
use crate::handler::HandlerClass;
use crate::registration::HandlerRegistration;
use crate::security::CapabilityHook;
use crate::server::Server;
use crate::service::Service;
use bindlet_core::{MapConfig, TypeTag, Typed};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Root of a topology file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainTopology {
    /// Domain name
    pub name: String,
    /// Container settings
    #[serde(default)]
    pub config: ContainerConfig,
    /// Servers
    #[serde(default, rename = "server")]
    pub servers: Vec<ServerTopology>,
}

/// One `[[server]]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTopology {
    /// Server name
    pub name: String,
    /// Services
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceTopology>,
}

/// One `[[server.service]]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTopology {
    /// Service name
    pub name: String,
    /// Contexts, in precedence order
    #[serde(default, rename = "context")]
    pub contexts: Vec<ContextTopology>,
}

/// One `[[server.service.context]]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTopology {
    /// Context name
    pub name: String,
    /// Tag name of the accepted request type
    pub request_type: String,
    /// Tag name of the accepted response type
    pub response_type: String,
    /// Handler used when an event names none
    #[serde(default)]
    pub default_handler: Option<String>,
    /// Handlers
    #[serde(default, rename = "handler")]
    pub handlers: Vec<HandlerTopology>,
}

/// One `[[server.service.context.handler]]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerTopology {
    /// Registration name
    pub name: String,
    /// Catalog name of the handler class
    pub class: String,
    /// Init parameters
    #[serde(default)]
    pub params: MapConfig,
    /// Build the shared instance when the context starts
    #[serde(default)]
    pub load_on_startup: bool,
    /// Register the handler but skip it during dispatch
    #[serde(default)]
    pub unavailable: bool,
    /// Catalog name of the capability hook
    #[serde(default)]
    pub hook: Option<String>,
}

impl DomainTopology {
    /// Parse a TOML topology
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Bootstrap`] if the text is not a valid
    /// topology, or [`ContainerError::Config`] if its settings are invalid.
    pub fn from_toml_str(text: &str) -> Result<Self, ContainerError> {
        let topology: Self = toml::from_str(text).map_err(|e| ContainerError::Bootstrap(e.to_string()))?;
        topology.config.validate()?;
        Ok(topology)
    }
}

/// Catalogs turning a [`DomainTopology`] into a running tree
#[derive(Default)]
pub struct Bootstrap {
    classes: HashMap<String, Arc<dyn HandlerClass>>,
    types: HashMap<&'static str, &'static TypeTag>,
    hooks: HashMap<String, Arc<dyn CapabilityHook>>,
}

impl Bootstrap {
    /// Empty catalogs
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `class` available under `name`
    #[must_use]
    pub fn with_class(mut self, name: impl Into<String>, class: Arc<dyn HandlerClass>) -> Self {
        self.classes.insert(name.into(), class);
        self
    }

    /// Make `tag` available under its own name
    #[must_use]
    pub fn with_type(mut self, tag: &'static TypeTag) -> Self {
        self.types.insert(tag.name(), tag);
        self
    }

    /// Make the tag of `T` available
    #[must_use]
    pub fn with_payload<T: Typed>(self) -> Self {
        self.with_type(T::TYPE)
    }

    /// Make `hook` available under `name`
    #[must_use]
    pub fn with_hook(mut self, name: impl Into<String>, hook: Arc<dyn CapabilityHook>) -> Self {
        self.hooks.insert(name.into(), hook);
        self
    }

    /// Build the domain described by `topology`
    ///
    /// Components are created and wired but not started.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Bootstrap`] on unknown catalog names,
    /// duplicate sibling names or a default handler that is not registered,
    /// and propagates registration errors.
    pub fn build(&self, topology: &DomainTopology) -> Result<Arc<Domain>, ContainerError> {
        topology.config.validate()?;
        let domain = Arc::new(Domain::new(&topology.name).with_config(topology.config.clone()));

        unique(topology.servers.iter().map(|s| s.name.as_str()), "server", &topology.name)?;
        for server_spec in &topology.servers {
            let server = Arc::new(Server::new(&server_spec.name));

            unique(server_spec.services.iter().map(|s| s.name.as_str()), "service", &server_spec.name)?;
            for service_spec in &server_spec.services {
                let service = Arc::new(Service::new(&service_spec.name));

                unique(service_spec.contexts.iter().map(|c| c.name.as_str()), "context", &service_spec.name)?;
                for context_spec in &service_spec.contexts {
                    service.add_context(Arc::new(self.context(context_spec, &topology.config)?))?;
                }
                server.add_service(service)?;
            }
            domain.add_server(server)?;
        }

        tracing::info!(
            domain = %topology.name,
            servers = topology.servers.len(),
            "Domain topology loaded"
        );
        Ok(domain)
    }

    fn context(&self, spec: &ContextTopology, config: &ContainerConfig) -> Result<Context, ContainerError> {
        let context = Context::new(&spec.name, self.tag(&spec.request_type)?, self.tag(&spec.response_type)?)
            .with_config(config.clone());

        unique(spec.handlers.iter().map(|h| h.name.as_str()), "handler", &spec.name)?;
        for handler in &spec.handlers {
            context.add_handler(self.registration(handler)?);
        }

        if let Some(default) = &spec.default_handler {
            context.set_default_handler(default).map_err(|_| {
                ContainerError::Bootstrap(format!(
                    "default handler '{default}' of context '{}' is not registered",
                    spec.name
                ))
            })?;
        }
        Ok(context)
    }

    fn registration(&self, spec: &HandlerTopology) -> Result<HandlerRegistration, ContainerError> {
        let class = self
            .classes
            .get(&spec.class)
            .ok_or_else(|| ContainerError::Bootstrap(format!("unknown handler class '{}'", spec.class)))?;

        let registration = HandlerRegistration::new(&spec.name, Arc::clone(class))?;
        for (name, value) in spec.params.iter() {
            registration.set_param(name, value);
        }
        registration.set_load_on_startup(spec.load_on_startup);
        registration.set_unavailable(spec.unavailable);

        if let Some(hook) = &spec.hook {
            let hook = self
                .hooks
                .get(hook)
                .ok_or_else(|| ContainerError::Bootstrap(format!("unknown capability hook '{hook}'")))?;
            registration.set_hook(Some(Arc::clone(hook)));
        }
        Ok(registration)
    }

    fn tag(&self, name: &str) -> Result<&'static TypeTag, ContainerError> {
        if name == TypeTag::ANY.name() {
            return Ok(&TypeTag::ANY);
        }
        self.types
            .get(name)
            .copied()
            .ok_or_else(|| ContainerError::Bootstrap(format!("unknown payload type '{name}'")))
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<_> = self.classes.keys().collect();
        classes.sort();
        let mut types: Vec<_> = self.types.keys().collect();
        types.sort();
        f.debug_struct("Bootstrap")
            .field("classes", &classes)
            .field("types", &types)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

fn unique<'a>(names: impl Iterator<Item = &'a str>, kind: &str, parent: &str) -> Result<(), ContainerError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ContainerError::Bootstrap(format!(
                "duplicate {kind} '{name}' in '{parent}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::handler::{FnHandlerClass, Handler};
    use crate::security::DenyAll;
    use async_trait::async_trait;
    use bindlet_core::{ConfigLookup, Instancing, Lifecycle, Payload};

    static TEXT: TypeTag = TypeTag::new("text");

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn process(&self, _: &dyn Payload, _: &mut dyn Payload) -> anyhow::Result<()> {
            Ok(())
        }
    }

    const TOPOLOGY: &str = r#"
        name = "main"

        [config]
        restricted_param = "secured"

        [[server]]
        name = "local"

        [[server.service]]
        name = "web"

        [[server.service.context]]
        name = "echo"
        request_type = "text"
        response_type = "*"
        default_handler = "echo"

        [[server.service.context.handler]]
        name = "echo"
        class = "noop"
        load_on_startup = true
        params = { greeting = "hi", secured = "true" }
        hook = "deny"

        [[server.service.context.handler]]
        name = "spare"
        class = "noop"
        unavailable = true
    "#;

    fn bootstrap() -> Bootstrap {
        Bootstrap::new()
            .with_type(&TEXT)
            .with_class(
                "noop",
                Arc::new(
                    FnHandlerClass::new("noop", || Ok(Box::new(Noop) as Box<dyn Handler>))
                        .with_instancing(Instancing::Stateless),
                ),
            )
            .with_hook("deny", Arc::new(DenyAll))
    }

    #[tokio::test]
    async fn test_builds_described_tree() {
        let topology = DomainTopology::from_toml_str(TOPOLOGY).unwrap();
        assert_eq!(topology.config.restricted_param, "secured");

        let domain = bootstrap().build(&topology).unwrap();
        let context = domain
            .get_server("local")
            .and_then(|server| server.get_service("web"))
            .and_then(|service| service.get_context("echo"))
            .unwrap();

        assert_eq!(context.handler_names(), vec!["echo", "spare"]);
        assert_eq!(context.default_handler().as_deref(), Some("echo"));
        assert_eq!(context.response_type(), &TypeTag::ANY);

        let echo = context.get_handler("echo").unwrap();
        assert_eq!(echo.params().get("greeting").as_deref(), Some("hi"));
        assert!(echo.load_on_startup());
        assert!(echo.hook().is_some());
        assert!(echo.is_restricted("secured"));
        assert!(context.get_handler("spare").unwrap().is_unavailable());

        domain.start().await.unwrap();
        assert!(echo.has_shared_instance().await);
    }

    #[test]
    fn test_unknown_names_fail() {
        let topology = DomainTopology::from_toml_str(&TOPOLOGY.replace("class = \"noop\"\n        load", "class = \"ghost\"\n        load")).unwrap();
        let err = bootstrap().build(&topology).unwrap_err();
        assert!(err.to_string().contains("ghost"));

        let topology = DomainTopology::from_toml_str(&TOPOLOGY.replace("request_type = \"text\"", "request_type = \"json\"")).unwrap();
        assert!(matches!(bootstrap().build(&topology), Err(ContainerError::Bootstrap(_))));

        let topology = DomainTopology::from_toml_str(&TOPOLOGY.replace("default_handler = \"echo\"", "default_handler = \"missing\"")).unwrap();
        assert!(matches!(bootstrap().build(&topology), Err(ContainerError::Bootstrap(_))));
    }

    #[test]
    fn test_duplicate_siblings_fail() {
        let text = format!("{TOPOLOGY}\n[[server]]\nname = \"local\"\n");
        let topology = DomainTopology::from_toml_str(&text).unwrap();
        let err = bootstrap().build(&topology).unwrap_err();
        assert!(err.to_string().contains("duplicate server 'local'"));
    }

    #[test]
    fn test_malformed_topology() {
        assert!(matches!(
            DomainTopology::from_toml_str("name = 3"),
            Err(ContainerError::Bootstrap(_))
        ));
        assert!(matches!(
            DomainTopology::from_toml_str("name = \"x\"\n[config]\nrestricted_param = \"\""),
            Err(ContainerError::Config(_))
        ));
    }
}
