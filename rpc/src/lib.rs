//! # Bindlet RPC
//!
//! Descriptor-driven remote procedure calls for the bindlet container.
//!
//! A remote component is described by an [`InterfaceDef`] (exported methods
//! with named parameters) and implemented by an [`ImplementationDef`]. The
//! [`MethodRunner`] validates both once, binds every exported method to its
//! implementation closure and then executes [`MethodCall`]s: arguments are
//! looked up by parameter name, coerced by the [`TypeConverter`] and handed to
//! the implementation as [`Args`].
//!
//! ## Example
//!
//! ```
//! use bindlet_rpc::{
//!     accept_all, CallContext, ImplementationDef, InterfaceDef, MethodCall, MethodDef,
//!     MethodRunner, ParamDef, RpcType,
//! };
//! use bindlet_core::MapConfig;
//! use serde_json::Value;
//!
//! struct Greeter;
//!
//! let iface = InterfaceDef::remote("Greeter").method(
//!     MethodDef::exported("greet")
//!         .param(ParamDef::of::<String>("name"))
//!         .returns_type::<String>(),
//! );
//! let implementation = ImplementationDef::new("GreeterImpl", |_| Ok(Greeter)).method(
//!     "greet",
//!     vec![String::value_type()],
//!     String::value_type(),
//!     |_, _, args| async move {
//!         let name: String = args.get("name")?;
//!         Ok(Value::from(format!("hello {name}")))
//!     },
//! );
//!
//! let runner = MethodRunner::new(&iface, implementation, &accept_all(), MapConfig::new())?;
//! # tokio::runtime::Builder::new_current_thread().build()?.block_on(async {
//! let call = MethodCall::new("Greeter.greet(T)T").with("name", "ada");
//! let reply = runner.call_method(&CallContext::new(), &call).await?;
//! assert_eq!(reply, Value::from("hello ada"));
//! # Ok::<(), bindlet_rpc::RpcError>(())
//! # })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

extern crate self as bindlet_rpc;

/// Argument coercion
pub mod converter;

/// Interface and implementation builders
pub mod definition;

/// Immutable interface metadata and prototypes
pub mod descriptor;

/// Error types
pub mod error;

/// Interface binding and call execution
pub mod runner;

/// Value type model and the `RpcType` trait
pub mod types;

/// Interface and implementation rules
pub mod validator;

pub use bindlet_macros::{RpcBean, RpcEnum};
pub use converter::TypeConverter;
pub use definition::{
    Args, CallContext, ImplMethod, ImplementationDef, InterfaceDef, MethodDef, ParamDef, Visibility,
};
pub use descriptor::{ComponentDescriptor, MethodDescriptor, ParameterDescriptor, prototype};
pub use error::{ConversionError, ErrorKind, RpcError};
pub use runner::{
    InjectionData, MethodCall, MethodRunner, PrototypeFilter, RPC_CALLS, RPC_DURATION, RPC_FAILURES, RpcEndpoint,
    accept_all,
};
pub use types::{BeanType, EnumType, Primitive, PropertyDescriptor, RpcType, ValueType};
