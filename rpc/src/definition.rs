//! Builder API describing RPC interfaces and their implementations.
//!
//! An [`InterfaceDef`] is the statically written description of a remote
//! component: which methods are exported, their named parameters and return
//! types. An [`ImplementationDef`] binds a concrete Rust type to it: a factory,
//! an optional injection hook, an instancing policy and one closure per method.
//!
//! ```
//! use bindlet_rpc::{InterfaceDef, MethodDef, ParamDef};
//!
//! let calculator = InterfaceDef::remote("Calculator")
//!     .method(
//!         MethodDef::exported("add")
//!             .param(ParamDef::of::<i32>("a"))
//!             .param(ParamDef::of::<i32>("b"))
//!             .returns_type::<i32>(),
//!     );
//! assert_eq!(calculator.methods().len(), 1);
//! ```

use crate::types::{RpcType, ValueType};
use bindlet_core::{Instancing, MapConfig};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Method visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Callable from outside
    #[default]
    Public,
    /// Internal only
    Private,
}

/// One formal parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    name: Option<String>,
    ty: ValueType,
    required: bool,
    public: bool,
}

impl ParamDef {
    /// A named, required parameter
    pub fn named(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: Some(name.into()),
            ty,
            required: true,
            public: false,
        }
    }

    /// A named parameter typed after `T`
    pub fn of<T: RpcType>(name: impl Into<String>) -> Self {
        Self::named(name, T::value_type())
    }

    /// A parameter without a name; rejected by descriptors and the validator
    #[must_use]
    pub const fn unnamed(ty: ValueType) -> Self {
        Self {
            name: None,
            ty,
            required: true,
            public: false,
        }
    }

    /// Mark as optional
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Mark as public: the raw value is passed through without conversion
    #[must_use]
    pub const fn public(mut self) -> Self {
        self.public = true;
        self
    }

    /// Declared name
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Declared type
    #[must_use]
    pub const fn ty(&self) -> &ValueType {
        &self.ty
    }

    /// Whether a value must be supplied
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// Whether the value bypasses conversion
    #[must_use]
    pub const fn is_public(&self) -> bool {
        self.public
    }
}

/// One interface method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    name: String,
    visibility: Visibility,
    is_static: bool,
    exported: bool,
    params: Vec<ParamDef>,
    returns: ValueType,
    description: String,
}

impl MethodDef {
    /// A public, non-exported instance method returning `Unit`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility: Visibility::Public,
            is_static: false,
            exported: false,
            params: Vec::new(),
            returns: ValueType::Unit,
            description: String::new(),
        }
    }

    /// A public, exported instance method returning `Unit`
    pub fn exported(name: impl Into<String>) -> Self {
        Self::new(name).export()
    }

    /// Mark as exported remote method
    #[must_use]
    pub const fn export(mut self) -> Self {
        self.exported = true;
        self
    }

    /// Make private
    #[must_use]
    pub const fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    /// Make static
    #[must_use]
    pub const fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Append a parameter
    #[must_use]
    pub fn param(mut self, param: ParamDef) -> Self {
        self.params.push(param);
        self
    }

    /// Set the return type
    #[must_use]
    pub fn returns(mut self, ty: ValueType) -> Self {
        self.returns = ty;
        self
    }

    /// Set the return type after `T`
    #[must_use]
    pub fn returns_type<T: RpcType>(self) -> Self {
        self.returns(T::value_type())
    }

    /// Set the free-text description
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Method name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Visibility
    #[must_use]
    pub const fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Whether the method is public
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Whether the method is static
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.is_static
    }

    /// Whether the method carries the export marker
    #[must_use]
    pub const fn is_exported(&self) -> bool {
        self.exported
    }

    /// Formal parameters in order
    #[must_use]
    pub fn params(&self) -> &[ParamDef] {
        &self.params
    }

    /// Return type
    #[must_use]
    pub const fn return_type(&self) -> &ValueType {
        &self.returns
    }

    /// Free-text description
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// A remote component interface
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDef {
    name: String,
    remote: bool,
    extends_component: bool,
    methods: Vec<MethodDef>,
}

impl InterfaceDef {
    /// A plain interface: neither remote nor a component
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote: false,
            extends_component: false,
            methods: Vec::new(),
        }
    }

    /// A remote component interface
    pub fn remote(name: impl Into<String>) -> Self {
        Self {
            remote: true,
            extends_component: true,
            ..Self::new(name)
        }
    }

    /// Keep the remote marker but drop the component capability
    #[must_use]
    pub const fn without_component(mut self) -> Self {
        self.extends_component = false;
        self
    }

    /// Append a method
    #[must_use]
    pub fn method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    /// Interface name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the remote component marker is present
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        self.remote
    }

    /// Whether the interface extends the component capability
    #[must_use]
    pub const fn extends_component(&self) -> bool {
        self.extends_component
    }

    /// All declared methods in order
    #[must_use]
    pub fn methods(&self) -> &[MethodDef] {
        &self.methods
    }

    /// Public exported methods in order
    pub fn exported_methods(&self) -> impl Iterator<Item = &MethodDef> {
        self.methods.iter().filter(|m| m.is_public() && m.is_exported())
    }
}

/// Caller-side information handed to every invocation
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    caller: Option<String>,
    attributes: MapConfig,
}

impl CallContext {
    /// An anonymous call
    #[must_use]
    pub const fn new() -> Self {
        Self {
            caller: None,
            attributes: MapConfig::new(),
        }
    }

    /// Name the caller
    #[must_use]
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    /// Attach an attribute
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name, value);
        self
    }

    /// Caller identity, if known
    #[must_use]
    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// Free-form call attributes
    #[must_use]
    pub const fn attributes(&self) -> &MapConfig {
        &self.attributes
    }
}

/// Bound, converted arguments of one call
///
/// Absent optional parameters are present as `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: Map<String, Value>,
}

impl Args {
    pub(crate) const fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Raw converted value
    #[must_use]
    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Deserialize an argument
    ///
    /// # Errors
    ///
    /// Returns an error if the argument is unknown or does not deserialize
    /// into `T`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("no argument named '{name}'"))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Number of bound arguments
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no arguments were bound
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Uniform signature of a bound implementation method
pub type MethodFn<T> =
    Arc<dyn Fn(Arc<T>, CallContext, Args) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

type FactoryFn<T> = Arc<dyn Fn(&MapConfig) -> anyhow::Result<T> + Send + Sync>;
type InjectFn<T> = Arc<dyn Fn(&mut T, &MapConfig) -> anyhow::Result<()> + Send + Sync>;

/// One implementation method
pub struct ImplMethod<T> {
    name: String,
    params: Vec<ValueType>,
    returns: ValueType,
    visibility: Visibility,
    invoke: MethodFn<T>,
}

impl<T> ImplMethod<T> {
    /// Method name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter types in order
    #[must_use]
    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    /// Return type
    #[must_use]
    pub const fn return_type(&self) -> &ValueType {
        &self.returns
    }

    /// Whether the method is public
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    pub(crate) fn invoker(&self) -> MethodFn<T> {
        Arc::clone(&self.invoke)
    }
}

impl<T> fmt::Debug for ImplMethod<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

/// A concrete implementation of a remote interface
pub struct ImplementationDef<T> {
    name: String,
    instancing: Instancing,
    factory: FactoryFn<T>,
    inject: Option<InjectFn<T>>,
    methods: Vec<ImplMethod<T>>,
}

impl<T: Send + Sync + 'static> ImplementationDef<T> {
    /// Describe an implementation built by `factory` from the injection data
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&MapConfig) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            instancing: Instancing::Stateful,
            factory: Arc::new(factory),
            inject: None,
            methods: Vec::new(),
        }
    }

    /// Set the instancing policy
    #[must_use]
    pub const fn instancing(mut self, instancing: Instancing) -> Self {
        self.instancing = instancing;
        self
    }

    /// Hook run on every freshly built instance before it serves calls
    #[must_use]
    pub fn on_inject<F>(mut self, inject: F) -> Self
    where
        F: Fn(&mut T, &MapConfig) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inject = Some(Arc::new(inject));
        self
    }

    /// Bind a public method
    #[must_use]
    pub fn method<F, Fut>(self, name: impl Into<String>, params: Vec<ValueType>, returns: ValueType, f: F) -> Self
    where
        F: Fn(Arc<T>, CallContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.bind(name, params, returns, Visibility::Public, f)
    }

    /// Bind a method with explicit visibility
    #[must_use]
    pub fn bind<F, Fut>(
        mut self,
        name: impl Into<String>,
        params: Vec<ValueType>,
        returns: ValueType,
        visibility: Visibility,
        f: F,
    ) -> Self
    where
        F: Fn(Arc<T>, CallContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let invoke: MethodFn<T> = Arc::new(
            move |instance, ctx, args| -> BoxFuture<'static, anyhow::Result<Value>> {
                Box::pin(f(instance, ctx, args))
            },
        );
        self.methods.push(ImplMethod {
            name: name.into(),
            params,
            returns,
            visibility,
            invoke,
        });
        self
    }

    /// Build and inject a fresh instance
    ///
    /// # Errors
    ///
    /// Returns whatever the factory or the injection hook returned.
    pub fn instantiate(&self, data: &MapConfig) -> anyhow::Result<T> {
        let mut instance = (self.factory)(data)?;
        if let Some(inject) = &self.inject {
            inject(&mut instance, data)?;
        }
        Ok(instance)
    }
}

impl<T> ImplementationDef<T> {
    /// Implementation name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instancing policy
    #[must_use]
    pub const fn instancing_policy(&self) -> Instancing {
        self.instancing
    }

    /// Bound methods in declaration order
    #[must_use]
    pub fn methods(&self) -> &[ImplMethod<T>] {
        &self.methods
    }

    /// Best public implementation method for an interface method
    ///
    /// An exact match on name and parameter types wins; otherwise the first
    /// same-named method whose parameters accept the declared ones.
    #[must_use]
    pub fn best_match(&self, name: &str, params: &[&ValueType]) -> Option<&ImplMethod<T>> {
        let candidates = || {
            self.methods
                .iter()
                .filter(move |m| m.is_public() && m.name == name && m.params.len() == params.len())
        };

        candidates()
            .find(|m| m.params.iter().zip(params).all(|(have, want)| have == *want))
            .or_else(|| candidates().find(|m| m.params.iter().zip(params).all(|(have, want)| have.accepts(want))))
    }
}

impl<T> fmt::Debug for ImplementationDef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationDef")
            .field("name", &self.name)
            .field("instancing", &self.instancing)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}
