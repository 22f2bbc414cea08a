//! Binding of an interface to an implementation and execution of named calls.
//!
//! A [`MethodRunner`] is built once per interface/implementation pair. All
//! validation happens at construction; the hot path is a map lookup by
//! prototype, argument binding and one closure call.
//!
//! ```text
//! MethodCall { prototype, params }
//!     │
//!     ├─ lookup prototype          ─► MethodNotFound
//!     ├─ bind params by name        ─► MissingParameter / Conversion
//!     ├─ shared or fresh instance   ─► Invocation
//!     └─ invoke bound closure       ─► InvocationTarget
//! ```

use crate::converter::TypeConverter;
use crate::definition::{Args, CallContext, ImplementationDef, InterfaceDef, MethodFn};
use crate::descriptor::{ComponentDescriptor, MethodDescriptor, ParameterDescriptor};
use crate::error::RpcError;
use crate::validator::RpcValidator;
use async_trait::async_trait;
use bindlet_core::{Instancing, MapConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// RPC calls executed, labelled by interface
pub const RPC_CALLS: &str = "bindlet.rpc.calls";
/// Failed RPC calls, labelled by interface
pub const RPC_FAILURES: &str = "bindlet.rpc.failures";
/// RPC call latency in seconds, labelled by interface
pub const RPC_DURATION: &str = "bindlet.rpc.duration_seconds";

/// Configuration handed to the implementation factory and injection hook
pub type InjectionData = MapConfig;

/// Selects which exported methods a runner binds
pub type PrototypeFilter = Arc<dyn Fn(&MethodDescriptor) -> bool + Send + Sync>;

/// Filter binding every exported method
#[must_use]
pub fn accept_all() -> PrototypeFilter {
    Arc::new(|_| true)
}

/// A named call: the target prototype and its arguments by parameter name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    /// Prototype of the target method
    pub prototype: String,
    /// Arguments keyed by parameter name
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl MethodCall {
    /// A call with no arguments yet
    pub fn new(prototype: impl Into<String>) -> Self {
        Self {
            prototype: prototype.into(),
            params: Map::new(),
        }
    }

    /// Builder-style argument
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Type-erased runner, as stored by handlers and hosts
#[async_trait]
pub trait RpcEndpoint: Send + Sync {
    /// Description of the bound interface
    fn descriptor(&self) -> &ComponentDescriptor;

    /// Prototypes that can be called, sorted
    fn prototypes(&self) -> Vec<String>;

    /// Execute one call
    ///
    /// # Errors
    ///
    /// See [`MethodRunner::call_method`].
    async fn call_method(&self, ctx: &CallContext, call: &MethodCall) -> Result<Value, RpcError>;
}

struct BoundMethod<T> {
    descriptor: MethodDescriptor,
    invoke: MethodFn<T>,
}

/// Executes calls against one implementation of a remote interface
pub struct MethodRunner<T> {
    descriptor: ComponentDescriptor,
    implementation: ImplementationDef<T>,
    methods: HashMap<String, BoundMethod<T>>,
    shared: Option<Arc<T>>,
    data: InjectionData,
    converter: TypeConverter,
}

impl<T: Send + Sync + 'static> MethodRunner<T> {
    /// Validate and bind `implementation` to `interface`
    ///
    /// Only exported methods accepted by `filter` are bound. A `STATELESS`
    /// implementation is built and injected right away; every other policy
    /// gets a fresh instance per call.
    ///
    /// # Errors
    ///
    /// - Validation errors ([`RpcError::InvalidRpcClass`],
    ///   [`RpcError::InterfaceIncomplete`]) for a broken interface or an
    ///   implementation that does not cover it
    /// - [`RpcError::Invocation`] if the eager shared instance fails to build
    pub fn new(
        interface: &InterfaceDef,
        implementation: ImplementationDef<T>,
        filter: &PrototypeFilter,
        data: InjectionData,
    ) -> Result<Self, RpcError> {
        let validator = RpcValidator::new();
        validator.validate_interface(interface)?;
        let descriptor = ComponentDescriptor::new(interface)?;
        validator.validate_implementation(&descriptor, &implementation)?;

        let mut methods = HashMap::new();
        for method in descriptor.methods() {
            if !filter(method) {
                tracing::debug!(prototype = %method.prototype(), "Prototype filtered out");
                continue;
            }
            let params: Vec<_> = method.params().iter().map(ParameterDescriptor::ty).collect();
            if let Some(found) = implementation.best_match(method.name(), &params) {
                methods.insert(
                    method.prototype().to_string(),
                    BoundMethod {
                        descriptor: method.clone(),
                        invoke: found.invoker(),
                    },
                );
            }
        }

        let shared = if implementation.instancing_policy().shares_instance() {
            let instance = implementation.instantiate(&data).map_err(|source| RpcError::Invocation {
                prototype: implementation.name().to_string(),
                source,
            })?;
            Some(Arc::new(instance))
        } else {
            None
        };

        tracing::info!(
            interface = %descriptor.name(),
            implementation = %implementation.name(),
            instancing = %implementation.instancing_policy(),
            methods = methods.len(),
            "Bound RPC component"
        );

        Ok(Self {
            descriptor,
            implementation,
            methods,
            shared,
            data,
            converter: TypeConverter::new(),
        })
    }

    /// Execute one call
    ///
    /// # Errors
    ///
    /// - [`RpcError::MethodNotFound`] for an unknown or filtered-out prototype
    /// - [`RpcError::MissingParameter`] when a required argument is absent or `null`
    /// - [`RpcError::Conversion`] when an argument does not convert
    /// - [`RpcError::Invocation`] when a per-call instance fails to build
    /// - [`RpcError::InvocationTarget`] when the method itself fails
    pub async fn call_method(&self, ctx: &CallContext, call: &MethodCall) -> Result<Value, RpcError> {
        let started = Instant::now();
        let result = self.dispatch(ctx, call).await;

        metrics::counter!(RPC_CALLS, "interface" => self.descriptor.name().to_string()).increment(1);
        metrics::histogram!(RPC_DURATION, "interface" => self.descriptor.name().to_string())
            .record(started.elapsed().as_secs_f64());

        if let Err(err) = &result {
            metrics::counter!(RPC_FAILURES, "interface" => self.descriptor.name().to_string()).increment(1);
            tracing::warn!(prototype = %call.prototype, kind = ?err.kind(), error = %err, "RPC call failed");
        }

        result
    }

    async fn dispatch(&self, ctx: &CallContext, call: &MethodCall) -> Result<Value, RpcError> {
        let bound = self
            .methods
            .get(&call.prototype)
            .ok_or_else(|| RpcError::MethodNotFound {
                prototype: call.prototype.clone(),
            })?;

        let args = self.bind_arguments(&bound.descriptor, call)?;
        let instance = self.instance_for(&call.prototype)?;

        tracing::trace!(prototype = %call.prototype, args = args.len(), "Invoking RPC method");
        (bound.invoke)(instance, ctx.clone(), args)
            .await
            .map_err(|source| RpcError::InvocationTarget {
                prototype: call.prototype.clone(),
                source,
            })
    }

    /// Bind the call's arguments to the formal parameters of `method`
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::MissingParameter`] or [`RpcError::Conversion`].
    pub fn bind_arguments(&self, method: &MethodDescriptor, call: &MethodCall) -> Result<Args, RpcError> {
        let mut values = Map::new();
        for param in method.params() {
            let value = match call.params.get(param.name()).filter(|v| !v.is_null()) {
                None if param.is_required() => {
                    return Err(RpcError::MissingParameter {
                        prototype: method.prototype().to_string(),
                        parameter: param.name().to_string(),
                    });
                },
                None => Value::Null,
                Some(raw) if param.is_public() => raw.clone(),
                Some(raw) => self
                    .converter
                    .convert(param.ty(), raw)
                    .map_err(|source| RpcError::Conversion {
                        prototype: method.prototype().to_string(),
                        parameter: param.name().to_string(),
                        source,
                    })?,
            };
            values.insert(param.name().to_string(), value);
        }
        Ok(Args::new(values))
    }

    fn instance_for(&self, prototype: &str) -> Result<Arc<T>, RpcError> {
        if let Some(shared) = &self.shared {
            return Ok(Arc::clone(shared));
        }
        self.implementation
            .instantiate(&self.data)
            .map(Arc::new)
            .map_err(|source| RpcError::Invocation {
                prototype: prototype.to_string(),
                source,
            })
    }

    /// Description of the bound interface
    #[must_use]
    pub const fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    /// Bound prototypes, sorted
    #[must_use]
    pub fn prototypes(&self) -> Vec<String> {
        let mut prototypes: Vec<_> = self.methods.keys().cloned().collect();
        prototypes.sort();
        prototypes
    }

    /// Instancing policy of the implementation
    #[must_use]
    pub const fn instancing(&self) -> Instancing {
        self.implementation.instancing_policy()
    }

    /// The eagerly built shared instance, for `STATELESS` implementations
    #[must_use]
    pub fn shared_instance(&self) -> Option<Arc<T>> {
        self.shared.clone()
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> RpcEndpoint for MethodRunner<T> {
    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    fn prototypes(&self) -> Vec<String> {
        Self::prototypes(self)
    }

    async fn call_method(&self, ctx: &CallContext, call: &MethodCall) -> Result<Value, RpcError> {
        Self::call_method(self, ctx, call).await
    }
}

impl<T> fmt::Debug for MethodRunner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRunner")
            .field("interface", &self.descriptor.name())
            .field("implementation", &self.implementation.name())
            .field("methods", &self.methods.len())
            .field("shared", &self.shared.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::definition::{MethodDef, ParamDef};
    use crate::error::ErrorKind;
    use crate::types::RpcType;
    use bindlet_core::ConfigLookup;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct Counter {
        step: i64,
    }

    fn interface() -> InterfaceDef {
        InterfaceDef::remote("Counter")
            .method(
                MethodDef::exported("add")
                    .param(ParamDef::of::<i64>("value"))
                    .param(ParamDef::of::<Option<String>>("label").optional())
                    .returns_type::<i64>(),
            )
            .method(MethodDef::exported("fail").returns_type::<bool>())
    }

    fn implementation(instancing: Instancing) -> ImplementationDef<Counter> {
        ImplementationDef::new("CounterImpl", |data: &MapConfig| {
            BUILT.fetch_add(1, Ordering::SeqCst);
            let step = data.get("step").map_or(Ok(1), |v| v.parse())?;
            Ok(Counter { step })
        })
        .instancing(instancing)
        .method(
            "add",
            vec![i64::value_type(), <Option<String>>::value_type()],
            i64::value_type(),
            |counter, _, args| async move {
                let value: i64 = args.get("value")?;
                Ok(Value::from(value + counter.step))
            },
        )
        .method("fail", vec![], bool::value_type(), |_, _, _| async {
            anyhow::bail!("counter overflow")
        })
    }

    fn runner(instancing: Instancing) -> MethodRunner<Counter> {
        let data = MapConfig::new().with("step", "10");
        MethodRunner::new(&interface(), implementation(instancing), &accept_all(), data).unwrap()
    }

    #[tokio::test]
    async fn test_call_converts_arguments() {
        let runner = runner(Instancing::Stateful);
        let call = MethodCall::new("Counter.add(JT)J").with("value", "32");
        let result = runner.call_method(&CallContext::new(), &call).await.unwrap();
        assert_eq!(result, Value::from(42));
    }

    #[tokio::test]
    async fn test_unknown_prototype() {
        let runner = runner(Instancing::Stateful);
        let err = runner
            .call_method(&CallContext::new(), &MethodCall::new("Counter.add(I)I"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MethodNotFound);
    }

    #[tokio::test]
    async fn test_missing_required_parameter() {
        let runner = runner(Instancing::Stateful);
        let call = MethodCall::new("Counter.add(JT)J").with("label", "x");
        let err = runner.call_method(&CallContext::new(), &call).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredParameter);
        assert!(err.to_string().contains("'value'"));
    }

    #[tokio::test]
    async fn test_conversion_failure_is_reported_per_call() {
        let runner = runner(Instancing::Stateful);
        let call = MethodCall::new("Counter.add(JT)J").with("value", "ten");
        let err = runner.call_method(&CallContext::new(), &call).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedTypeConversion);

        // The runner keeps working
        let call = MethodCall::new("Counter.add(JT)J").with("value", 1);
        assert!(runner.call_method(&CallContext::new(), &call).await.is_ok());
    }

    #[tokio::test]
    async fn test_target_failure_keeps_cause() {
        let runner = runner(Instancing::Stateless);
        let err = runner
            .call_method(&CallContext::new(), &MethodCall::new("Counter.fail()Z"))
            .await
            .unwrap_err();
        assert!(err.is_target_failure());
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "counter overflow");
    }

    #[test]
    fn test_filter_restricts_bound_methods() {
        let only_add: PrototypeFilter = Arc::new(|m: &MethodDescriptor| m.name() == "add");
        let runner =
            MethodRunner::new(&interface(), implementation(Instancing::Stateful), &only_add, MapConfig::new())
                .unwrap();
        assert_eq!(runner.prototypes(), vec!["Counter.add(JT)J".to_string()]);
        assert_eq!(runner.descriptor().methods().len(), 2);
    }

    #[test]
    fn test_stateless_instance_is_built_eagerly() {
        let before = BUILT.load(Ordering::SeqCst);
        let stateless = runner(Instancing::Stateless);
        assert!(BUILT.load(Ordering::SeqCst) > before);
        assert_eq!(stateless.shared_instance().map(|c| c.step), Some(10));
        assert!(runner(Instancing::Stateful).shared_instance().is_none());
    }

    #[test]
    fn test_eager_build_failure() {
        let data = MapConfig::new().with("step", "many");
        let err = MethodRunner::new(&interface(), implementation(Instancing::Stateless), &accept_all(), data)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvocationFailure);
    }

    #[test]
    fn test_invalid_interface_rejected_before_binding() {
        let iface = interface().method(MethodDef::exported("noop"));
        let err = MethodRunner::new(&iface, implementation(Instancing::Stateful), &accept_all(), MapConfig::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRpcClass);
    }

    #[test]
    fn test_optional_parameter_binds_null() {
        let runner = runner(Instancing::Stateful);
        let method = runner.descriptor().method("Counter.add(JT)J").unwrap().clone();
        let args = runner
            .bind_arguments(&method, &MethodCall::new("Counter.add(JT)J").with("value", 5))
            .unwrap();
        assert_eq!(args.raw("label"), Some(&Value::Null));
        assert_eq!(args.raw("value"), Some(&Value::from(5)));
    }
}
