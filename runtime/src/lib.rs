//! # Bindlet Runtime
//!
//! The request-routing container built on `bindlet-core`.
//!
//! The runtime holds the component tree and routes each inbound
//! [`RequestEvent`](bindlet_core::RequestEvent) down to exactly one handler:
//!
//! ```text
//! Domain ─► Server* ─► Service* ─► Context* ─► HandlerRegistration* ─► Handler
//!   │          │           │           │
//!   │          │           │           └─ accepts by request/response TypeTag
//!   │          │           └─ first accepting context, insertion order
//!   │          └─ first service that handles the event
//!   └─ first server that handles the event
//! ```
//!
//! ## Core Components
//!
//! - **[`Domain`]**, **[`Server`]**, **[`Service`]**, **[`Context`]**: the
//!   registries, each with its own lifecycle cascading to its children
//! - **[`HandlerRegistration`]**: per-handler bookkeeping and instancing
//! - **[`Handler`]** / **[`HandlerClass`]**: the processing unit and its
//!   runtime type
//! - **[`CapabilityHook`]**: authorization for restricted handlers
//! - **[`topology`]**: TOML description of a tree and the [`Bootstrap`] that
//!   builds it
//! - **[`rpc_handler`]**: serving `bindlet-rpc` endpoints from a context
//! - **[`metrics`]**: metric names and the Prometheus exporter
//!
//! See [`domain`] for a complete example.

/// Container configuration
pub mod config;

/// Contexts: named groups of handlers
pub mod context;

/// The root of the tree
pub mod domain;

/// Error types for the container
pub mod error;

/// Handlers and handler classes
pub mod handler;

/// Prometheus metrics for observability
pub mod metrics;

/// Weak parent references and ownership transfer
pub mod ownership;

/// Handler registrations and instancing
pub mod registration;

/// Serving RPC endpoints as handlers
pub mod rpc_handler;

/// Capability hooks for restricted handlers
pub mod security;

/// Servers: named groups of services
pub mod server;

/// Services: ordered groups of contexts
pub mod service;

/// Topology description and bootstrap
pub mod topology;

pub use config::ContainerConfig;
pub use context::Context;
pub use domain::Domain;
pub use error::ContainerError;
pub use handler::{
    FnHandlerClass, Handler, HandlerClass, HandlerConfig, HandlerDefinition, HandlerType, Recyclable,
};
pub use metrics::{MetricsExporter, register_metrics};
pub use ownership::OwnerSlot;
pub use registration::{HandlerInstance, HandlerLease, HandlerRegistration};
pub use rpc_handler::{RpcHandler, RpcHandlerClass, RpcRequest, RpcResponse};
pub use security::{AllowAll, CapabilityHook, DenyAll};
pub use server::Server;
pub use service::Service;
pub use topology::{
    Bootstrap, ContextTopology, DomainTopology, HandlerTopology, ServerTopology, ServiceTopology,
};
