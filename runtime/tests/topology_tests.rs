//! Bootstrap from TOML, ownership transfer and the RPC bridge.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bindlet_core::{Instancing, Lifecycle, LifecycleState, MapConfig, RequestEvent};
use bindlet_rpc::{
    CallContext, ErrorKind, ImplementationDef, InterfaceDef, MethodCall, MethodDef, MethodRunner, ParamDef,
    RpcEndpoint, RpcType, accept_all,
};
use bindlet_runtime::{
    Bootstrap, ContainerError, Context, DenyAll, DomainTopology, RpcHandlerClass, RpcRequest, RpcResponse, Service,
};
use bindlet_testing::properties::registration_names;
use bindlet_testing::{
    DispatchTest, GREETING, Greeting, Probe, RecordingListener, Reply, TEXT, Text, echo_class, single_context_domain,
};
use proptest::prelude::*;
use serde_json::Value;
use std::sync::Arc;

const TOPOLOGY: &str = r#"
    name = "main"

    [config]
    restricted_param = "secured"
    lifecycle_poll_retries = 3
    lifecycle_poll_interval_ms = 1

    [[server]]
    name = "local"

    [[server.service]]
    name = "web"

    [[server.service.context]]
    name = "greetings"
    request_type = "test.greeting"
    response_type = "test.reply"
    default_handler = "welcome"

    [[server.service.context.handler]]
    name = "welcome"
    class = "probe"
    params = { prefix = "* " }
    load_on_startup = true

    [[server.service.context]]
    name = "text"
    request_type = "test.text"
    response_type = "*"
    default_handler = "echo"

    [[server.service.context.handler]]
    name = "echo"
    class = "echo"

    [[server.service.context.handler]]
    name = "admin"
    class = "echo"
    params = { secured = "true" }
    hook = "deny"
"#;

fn bootstrap(probe: &Arc<Probe>) -> Bootstrap {
    Bootstrap::new()
        .with_class("probe", Arc::new(probe.class("probe", Instancing::Stateless)))
        .with_class("echo", echo_class())
        .with_type(&TEXT)
        .with_payload::<Greeting>()
        .with_payload::<Reply>()
        .with_hook("deny", Arc::new(DenyAll))
}

#[tokio::test]
async fn test_topology_builds_a_working_tree() {
    let probe = Probe::new();
    let topology = DomainTopology::from_toml_str(TOPOLOGY).unwrap();
    let domain = bootstrap(&probe).build(&topology).unwrap();

    assert_eq!(domain.server_names(), vec!["local"]);
    let service = domain.get_server("local").unwrap().get_service("web").unwrap();
    assert_eq!(service.context_names(), vec!["greetings", "text"]);
    let greetings = service.get_context("greetings").unwrap();
    assert_eq!(greetings.request_type().name(), GREETING.name());

    domain.start().await.unwrap();
    assert!(domain.wait_until_started().await.converged);
    assert_eq!(probe.initialized(), 1);

    DispatchTest::new(Arc::clone(&domain))
        .without_start()
        .when(RequestEvent::new(Greeting::new("ann"), Reply::default()))
        .then_handled()
        .then_response::<Reply, _>(|reply| assert_eq!(reply.0, "* hello ann"))
        .run()
        .await;

    DispatchTest::new(Arc::clone(&domain))
        .without_start()
        .when(RequestEvent::new(Text::from("plain"), Reply::default()))
        .then_handled()
        .then_response::<Reply, _>(|reply| assert_eq!(reply.0, "plain"))
        .run()
        .await;

    DispatchTest::new(domain)
        .without_start()
        .when(RequestEvent::new(Text::from("sudo"), Reply::default()).with_handler("admin"))
        .then_handled()
        .then_response::<Reply, _>(|reply| assert!(reply.0.is_empty()))
        .run()
        .await;
}

#[test]
fn test_topology_rejects_unknown_names() {
    let probe = Probe::new();
    let topology = DomainTopology::from_toml_str(TOPOLOGY).unwrap();

    let err = Bootstrap::new()
        .with_class("probe", Arc::new(probe.class("probe", Instancing::Stateless)))
        .with_type(&TEXT)
        .with_payload::<Greeting>()
        .with_payload::<Reply>()
        .build(&topology)
        .unwrap_err();
    assert!(matches!(err, ContainerError::Bootstrap(msg) if msg.contains("'echo'")));

    let mut broken = topology;
    broken.servers[0].services[0].contexts[1].default_handler = Some("ghost".to_string());
    let err = bootstrap(&probe).build(&broken).unwrap_err();
    assert!(matches!(err, ContainerError::Bootstrap(msg) if msg.contains("ghost")));
}

#[test]
fn test_topology_rejects_malformed_text() {
    let err = DomainTopology::from_toml_str("name = ").unwrap_err();
    assert!(matches!(err, ContainerError::Bootstrap(_)));

    let err = DomainTopology::from_toml_str("name = \"main\"\n[config]\nrestricted_param = \"\"\n").unwrap_err();
    assert!(matches!(err, ContainerError::Config(_)));
}

#[tokio::test]
async fn test_context_moves_between_services() {
    let context = Arc::new(Context::for_types::<Text, Reply>("text"));
    let listener = Arc::new(RecordingListener::new());
    context.lifecycle().add_listener(listener.clone());

    let first = Arc::new(Service::new("first"));
    let second = Arc::new(Service::new("second"));
    first.add_context(Arc::clone(&context)).unwrap();
    second.add_context(Arc::clone(&context)).unwrap();

    assert!(first.context_names().is_empty());
    assert_eq!(second.context_names(), vec!["text"]);
    assert_eq!(context.service().unwrap().name(), "second");
    assert_eq!(
        listener.owner_changes(),
        vec![
            (None, Some("first".to_string())),
            (Some("first".to_string()), None),
            (None, Some("second".to_string())),
        ]
    );

    drop(second);
    assert!(context.service().is_none());
    first.add_context(Arc::clone(&context)).unwrap();
    assert_eq!(context.service().unwrap().name(), "first");
}

#[tokio::test]
async fn test_destroyed_context_cannot_be_adopted() {
    let context = Arc::new(Context::for_types::<Text, Reply>("text"));
    let service = Arc::new(Service::new("web"));
    service.add_context(Arc::clone(&context)).unwrap();
    context.destroy().await.unwrap();
    assert_eq!(context.state(), LifecycleState::Destroyed);

    let other = Arc::new(Service::new("other"));
    let err = other.add_context(context).unwrap_err();
    assert!(matches!(err, ContainerError::OwnershipConflict { .. }));
}

struct Greeter;

fn greeter() -> Arc<dyn RpcEndpoint> {
    let iface = InterfaceDef::remote("Greeter")
        .method(MethodDef::exported("greet").param(ParamDef::of::<String>("name")).returns_type::<String>());
    let implementation = ImplementationDef::new("GreeterImpl", |_| Ok(Greeter)).method(
        "greet",
        vec![String::value_type()],
        String::value_type(),
        |_, ctx: CallContext, args| async move {
            let name: String = args.get("name")?;
            let caller = ctx.caller().unwrap_or("anonymous").to_string();
            Ok(Value::from(format!("{caller} greets {name}")))
        },
    );
    Arc::new(MethodRunner::new(&iface, implementation, &accept_all(), MapConfig::new()).unwrap())
}

#[tokio::test]
async fn test_rpc_calls_travel_through_the_tree() {
    let context = Arc::new(Context::for_types::<RpcRequest, RpcResponse>("rpc"));
    context.register("greeter", Arc::new(RpcHandlerClass::new(greeter()))).unwrap();
    let domain = single_context_domain(context).unwrap();

    let call = MethodCall::new("Greeter.greet(T)T").with("name", "bo");
    let request = RpcRequest::new(call).with_context(CallContext::new().with_caller("ann"));
    DispatchTest::new(Arc::clone(&domain))
        .when(RequestEvent::new(request, RpcResponse::new()).with_handler("greeter"))
        .then_handled()
        .then_response::<RpcResponse, _>(|response| {
            assert_eq!(response.value(), Some(&Value::from("ann greets bo")));
        })
        .run()
        .await;

    DispatchTest::new(domain)
        .without_start()
        .when(
            RequestEvent::new(RpcRequest::new(MethodCall::new("Greeter.wave()V")), RpcResponse::new())
                .with_handler("greeter"),
        )
        .then_handled()
        .then_response::<RpcResponse, _>(|response| {
            assert_eq!(response.error_kind(), Some(ErrorKind::MethodNotFound));
        })
        .run()
        .await;
}

proptest! {
    #[test]
    fn prop_handler_registry_is_last_write_wins(names in registration_names()) {
        let context = Context::for_types::<Text, Reply>("text");
        let mut expected = std::collections::BTreeSet::new();

        for name in &names {
            let registration = context.register(name, echo_class()).unwrap();
            prop_assert_eq!(registration.name(), name.as_str());
            expected.insert(name.clone());
        }

        prop_assert_eq!(context.handler_names(), expected.into_iter().collect::<Vec<_>>());
        for name in &names {
            prop_assert_eq!(
                context.get_handler(name).unwrap().context_name(),
                Some("text".to_string())
            );
        }
    }
}
