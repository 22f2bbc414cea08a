//! Immutable metadata derived once per interface.

use crate::definition::{InterfaceDef, MethodDef};
use crate::error::RpcError;
use crate::types::ValueType;
use std::collections::HashMap;

/// Build the prototype string of a method
///
/// `"{declaring}.{method}({one code per parameter}){return code}"`, e.g.
/// `Calculator.add(II)I`.
pub fn prototype<'a, I>(declaring: &str, method: &str, params: I, returns: &ValueType) -> String
where
    I: IntoIterator<Item = &'a ValueType>,
{
    let codes: String = params.into_iter().map(ValueType::code).collect();
    format!("{declaring}.{method}({codes}){}", returns.code())
}

/// A named formal parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    name: String,
    ty: ValueType,
    required: bool,
    public: bool,
}

impl ParameterDescriptor {
    /// Parameter name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
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

    /// Whether the raw value bypasses conversion
    #[must_use]
    pub const fn is_public(&self) -> bool {
        self.public
    }
}

/// An exported method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    name: String,
    params: Vec<ParameterDescriptor>,
    returns: ValueType,
    description: String,
    prototype: String,
}

impl MethodDescriptor {
    /// Describe `method` declared on `declaring`
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InterfaceIncomplete`] if a parameter has no name or
    /// a blank one.
    pub fn new(declaring: &str, method: &MethodDef) -> Result<Self, RpcError> {
        let params = method
            .params()
            .iter()
            .enumerate()
            .map(|(position, param)| match param.name().map(str::trim) {
                Some(name) if !name.is_empty() => Ok(ParameterDescriptor {
                    name: name.to_string(),
                    ty: param.ty().clone(),
                    required: param.is_required(),
                    public: param.is_public(),
                }),
                _ => Err(RpcError::InterfaceIncomplete {
                    interface: declaring.to_string(),
                    method: method.name().to_string(),
                    position,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: method.name().to_string(),
            prototype: prototype(
                declaring,
                method.name(),
                params.iter().map(ParameterDescriptor::ty),
                method.return_type(),
            ),
            params,
            returns: method.return_type().clone(),
            description: method.description().to_string(),
        })
    }

    /// Method name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters in declaration order
    #[must_use]
    pub fn params(&self) -> &[ParameterDescriptor] {
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

    /// Dispatch key
    #[must_use]
    pub fn prototype(&self) -> &str {
        &self.prototype
    }
}

/// Every exported method of a remote interface
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    name: String,
    methods: Vec<MethodDescriptor>,
    by_prototype: HashMap<String, usize>,
}

impl ComponentDescriptor {
    /// Describe a remote interface
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidRpcClass`] if the interface lacks the remote
    ///   marker, or two exported methods share a prototype
    /// - [`RpcError::InterfaceIncomplete`] if an exported method has an
    ///   unnamed or blank-named parameter
    pub fn new(interface: &InterfaceDef) -> Result<Self, RpcError> {
        if !interface.is_remote() {
            return Err(RpcError::invalid(interface.name(), "missing remote component marker"));
        }

        let mut methods = Vec::new();
        let mut by_prototype = HashMap::new();
        for method in interface.exported_methods() {
            let descriptor = MethodDescriptor::new(interface.name(), method)?;
            if by_prototype.insert(descriptor.prototype.clone(), methods.len()).is_some() {
                return Err(RpcError::invalid(
                    interface.name(),
                    format!("duplicate prototype {}", descriptor.prototype),
                ));
            }
            methods.push(descriptor);
        }

        tracing::debug!(interface = %interface.name(), methods = methods.len(), "Built component descriptor");

        Ok(Self {
            name: interface.name().to_string(),
            methods,
            by_prototype,
        })
    }

    /// Interface name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exported methods in declaration order
    #[must_use]
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// Method with the given prototype
    #[must_use]
    pub fn method(&self, prototype: &str) -> Option<&MethodDescriptor> {
        self.by_prototype.get(prototype).and_then(|&index| self.methods.get(index))
    }

    /// Every overload named `name`
    pub fn overloads<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodDescriptor> {
        self.methods.iter().filter(move |m| m.name == name)
    }
}
