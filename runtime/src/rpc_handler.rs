//! Serving RPC endpoints from the dispatch tree.
//!
//! An [`RpcHandler`] accepts an [`RpcRequest`] payload, runs its call through
//! an [`RpcEndpoint`] and stores the outcome in the [`RpcResponse`]. Call
//! failures (unknown prototype, missing or unconvertible arguments, a failing
//! method) travel back inside the response; the handler itself only fails on
//! payloads it does not understand.

use crate::handler::{Handler, HandlerClass};
use async_trait::async_trait;
use bindlet_core::{Instancing, Payload, TypeTag, Typed};
use bindlet_rpc::{CallContext, ErrorKind, MethodCall, RpcEndpoint, RpcError};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Tag of [`RpcRequest`]
pub static RPC_REQUEST: TypeTag = TypeTag::new("bindlet.rpc.request");

/// Tag of [`RpcResponse`]
pub static RPC_RESPONSE: TypeTag = TypeTag::new("bindlet.rpc.response");

/// Request payload carrying one call
#[derive(Debug, Clone)]
pub struct RpcRequest {
    /// The call to run
    pub call: MethodCall,
    /// Caller information
    pub context: CallContext,
}

impl RpcRequest {
    /// An anonymous call
    #[must_use]
    pub fn new(call: MethodCall) -> Self {
        Self {
            call,
            context: CallContext::new(),
        }
    }

    /// Attach caller information
    #[must_use]
    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

impl Typed for RpcRequest {
    const TYPE: &'static TypeTag = &RPC_REQUEST;
}

/// Response payload receiving the call's outcome
#[derive(Debug, Default)]
pub struct RpcResponse {
    /// `None` until a handler ran the call
    pub outcome: Option<Result<Value, RpcError>>,
}

impl RpcResponse {
    /// An empty response
    #[must_use]
    pub const fn new() -> Self {
        Self { outcome: None }
    }

    /// The returned value, if the call succeeded
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().and_then(|outcome| outcome.as_ref().ok())
    }

    /// The failure category, if the call failed
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Some(Err(error)) => Some(error.kind()),
            _ => None,
        }
    }
}

impl Typed for RpcResponse {
    const TYPE: &'static TypeTag = &RPC_RESPONSE;
}

/// Handler running calls against one endpoint
pub struct RpcHandler {
    endpoint: Arc<dyn RpcEndpoint>,
}

impl RpcHandler {
    /// Serve `endpoint`
    #[must_use]
    pub fn new(endpoint: Arc<dyn RpcEndpoint>) -> Self {
        Self { endpoint }
    }

    /// The served endpoint
    #[must_use]
    pub fn endpoint(&self) -> &Arc<dyn RpcEndpoint> {
        &self.endpoint
    }
}

#[async_trait]
impl Handler for RpcHandler {
    async fn process(&self, request: &dyn Payload, response: &mut dyn Payload) -> anyhow::Result<()> {
        let Some(request) = request.downcast_ref::<RpcRequest>() else {
            anyhow::bail!("expected {}, got {}", RPC_REQUEST, request.type_tag());
        };
        let tag = response.type_tag();
        let Some(response) = response.downcast_mut::<RpcResponse>() else {
            anyhow::bail!("expected {}, got {}", RPC_RESPONSE, tag);
        };

        let outcome = self.endpoint.call_method(&request.context, &request.call).await;
        if let Err(error) = &outcome {
            tracing::debug!(
                interface = %self.endpoint.descriptor().name(),
                prototype = %request.call.prototype,
                error = %error,
                "RPC call returned an error"
            );
        }
        response.outcome = Some(outcome);
        Ok(())
    }
}

impl fmt::Debug for RpcHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcHandler")
            .field("interface", &self.endpoint.descriptor().name())
            .finish()
    }
}

/// `STATELESS` class building [`RpcHandler`]s around one shared endpoint
pub struct RpcHandlerClass {
    name: String,
    endpoint: Arc<dyn RpcEndpoint>,
}

impl RpcHandlerClass {
    /// A class named after the endpoint's interface
    #[must_use]
    pub fn new(endpoint: Arc<dyn RpcEndpoint>) -> Self {
        let name = format!("rpc:{}", endpoint.descriptor().name());
        Self { name, endpoint }
    }
}

impl HandlerClass for RpcHandlerClass {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn instancing(&self) -> Instancing {
        Instancing::Stateless
    }

    fn instantiate(&self) -> anyhow::Result<Box<dyn Handler>> {
        Ok(Box::new(RpcHandler::new(Arc::clone(&self.endpoint))))
    }
}

impl fmt::Debug for RpcHandlerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcHandlerClass").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::context::Context;
    use bindlet_core::{MapConfig, RequestEvent};
    use bindlet_rpc::{ImplementationDef, InterfaceDef, MethodDef, MethodRunner, ParamDef, RpcType, accept_all};

    struct Clock;

    fn endpoint() -> Arc<dyn RpcEndpoint> {
        let iface = InterfaceDef::remote("Clock").method(
            MethodDef::exported("shift")
                .param(ParamDef::of::<i64>("hours"))
                .returns_type::<i64>(),
        );
        let implementation = ImplementationDef::new("ClockImpl", |_| Ok(Clock)).method(
            "shift",
            vec![i64::value_type()],
            i64::value_type(),
            |_, _, args| async move {
                let hours: i64 = args.get("hours")?;
                Ok(Value::from((12 + hours).rem_euclid(24)))
            },
        );
        Arc::new(MethodRunner::new(&iface, implementation, &accept_all(), MapConfig::new()).unwrap())
    }

    fn rpc_context() -> Context {
        let context = Context::for_types::<RpcRequest, RpcResponse>("rpc");
        context.register("clock", Arc::new(RpcHandlerClass::new(endpoint()))).unwrap();
        context.set_default_handler("clock").unwrap();
        context
    }

    async fn call(context: &Context, call: MethodCall) -> RpcResponse {
        let mut event = RequestEvent::new(RpcRequest::new(call), RpcResponse::new());
        context.dispatch(&mut event).await.unwrap();
        assert!(event.is_handled());
        let (_, response) = event.into_parts();
        let mut response = response;
        let response = response.downcast_mut::<RpcResponse>().unwrap();
        std::mem::take(response)
    }

    #[tokio::test]
    async fn test_call_result_lands_in_response() {
        let context = rpc_context();
        let response = call(&context, MethodCall::new("Clock.shift(J)J").with("hours", "15")).await;
        assert_eq!(response.value(), Some(&Value::from(3)));
    }

    #[tokio::test]
    async fn test_call_errors_are_returned_not_raised() {
        let context = rpc_context();

        let response = call(&context, MethodCall::new("Clock.stop()V")).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::MethodNotFound));

        let response = call(&context, MethodCall::new("Clock.shift(J)J")).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::MissingRequiredParameter));
    }

    #[test]
    fn test_class_is_stateless() {
        let class = RpcHandlerClass::new(endpoint());
        assert_eq!(class.instancing(), Instancing::Stateless);
        assert_eq!(class.type_name(), "rpc:Clock");
    }
}
