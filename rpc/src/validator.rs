//! Rules an interface and its implementation must satisfy before any call can
//! reach them.

use crate::definition::{ImplementationDef, InterfaceDef, MethodDef, ParamDef};
use crate::descriptor::{ComponentDescriptor, ParameterDescriptor, prototype};
use crate::error::RpcError;
use std::collections::HashSet;

/// Stateless rule checker
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcValidator;

impl RpcValidator {
    /// Create a validator
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Check that `method` of `declaring` can be bound
    ///
    /// The method must be public, non-static, exported and return a value;
    /// every parameter must be named, and only non-primitive parameters may
    /// be optional.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InterfaceIncomplete`] for an unnamed parameter and
    /// [`RpcError::InvalidRpcClass`] for every other broken rule.
    pub fn validate_method(&self, declaring: &str, method: &MethodDef) -> Result<(), RpcError> {
        let reject = |reason: String| Err(RpcError::invalid(declaring, reason));

        if !method.is_public() {
            return reject(format!("method '{}' is not public", method.name()));
        }
        if method.is_static() {
            return reject(format!("method '{}' is static", method.name()));
        }
        if !method.is_exported() {
            return reject(format!("method '{}' is not exported", method.name()));
        }
        if method.return_type().is_unit() {
            return reject(format!("method '{}' returns no value", method.name()));
        }

        for (position, param) in method.params().iter().enumerate() {
            let Some(name) = param.name().map(str::trim).filter(|name| !name.is_empty()) else {
                return Err(RpcError::InterfaceIncomplete {
                    interface: declaring.to_string(),
                    method: method.name().to_string(),
                    position,
                });
            };
            if !param.is_required() && param.ty().is_primitive() {
                return reject(format!(
                    "parameter '{name}' of '{}' is optional but has primitive type {}",
                    method.name(),
                    param.ty()
                ));
            }
        }

        Ok(())
    }

    /// Check a whole interface
    ///
    /// Besides the marker checks, every exported method must pass
    /// [`validate_method`](Self::validate_method) and no two exported methods
    /// may share a prototype.
    ///
    /// # Errors
    ///
    /// Returns the first broken rule.
    pub fn validate_interface(&self, interface: &InterfaceDef) -> Result<(), RpcError> {
        if !interface.is_remote() {
            return Err(RpcError::invalid(interface.name(), "missing remote component marker"));
        }
        if !interface.extends_component() {
            return Err(RpcError::invalid(
                interface.name(),
                "interface does not extend the component capability",
            ));
        }

        let mut seen = HashSet::new();
        for method in interface.methods().iter().filter(|m| m.is_exported()) {
            self.validate_method(interface.name(), method)?;

            let key = prototype(
                interface.name(),
                method.name(),
                method.params().iter().map(ParamDef::ty),
                method.return_type(),
            );
            if !seen.insert(key.clone()) {
                return Err(RpcError::invalid(interface.name(), format!("duplicate prototype {key}")));
            }
        }

        Ok(())
    }

    /// Check that `implementation` provides every method of `descriptor`
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidRpcClass`] naming the implementation if it
    /// has no name, or if an interface method has no public counterpart with
    /// compatible parameter types and the same return type.
    pub fn validate_implementation<T>(
        &self,
        descriptor: &ComponentDescriptor,
        implementation: &ImplementationDef<T>,
    ) -> Result<(), RpcError> {
        if implementation.name().trim().is_empty() {
            return Err(RpcError::invalid(descriptor.name(), "implementation has no name"));
        }

        for method in descriptor.methods() {
            let params: Vec<_> = method.params().iter().map(ParameterDescriptor::ty).collect();
            match implementation.best_match(method.name(), &params) {
                Some(found) if found.return_type() == method.return_type() => {},
                Some(found) => {
                    return Err(RpcError::invalid(
                        implementation.name(),
                        format!(
                            "{} returns {} but the interface declares {}",
                            method.prototype(),
                            found.return_type(),
                            method.return_type()
                        ),
                    ));
                },
                None => {
                    return Err(RpcError::invalid(
                        implementation.name(),
                        format!("no implementation for {}", method.prototype()),
                    ));
                },
            }
        }

        Ok(())
    }
}
