use thiserror::Error;

/// Why a value could not be coerced into a declared type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// The target type has no conversion rule
    #[error("Cannot cast to {type_name}")]
    Unsupported {
        /// Name of the target type
        type_name: String,
    },

    /// `null` supplied for a non-nullable scalar
    #[error("Cannot cast null to primitive {type_name}")]
    NullPrimitive {
        /// Name of the target type
        type_name: String,
    },

    /// The value's JSON shape cannot represent the target type
    #[error("Cannot cast {found} to {type_name}")]
    Incompatible {
        /// Name of the target type
        type_name: String,
        /// JSON kind of the supplied value
        found: &'static str,
    },

    /// Text that does not parse as the target type
    #[error("Cannot parse '{value}' as {type_name}")]
    Parse {
        /// Name of the target type
        type_name: String,
        /// The offending text
        value: String,
    },

    /// A number outside the target type's range
    #[error("Value {value} out of range for {type_name}")]
    OutOfRange {
        /// Name of the target type
        type_name: String,
        /// The offending number
        value: String,
    },

    /// Text naming no constant of the target enum
    #[error("'{value}' is not a constant of {type_name}")]
    UnknownConstant {
        /// Name of the enum
        type_name: String,
        /// The offending text
        value: String,
    },
}

/// Failure kinds reported by the RPC engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A parameter lacks a name
    InterfaceIncomplete,
    /// Interface or implementation breaks the validation rules
    InvalidRpcClass,
    /// Unknown prototype
    MethodNotFound,
    /// A required parameter had no value
    MissingRequiredParameter,
    /// A value could not be coerced
    UnsupportedTypeConversion,
    /// The invoked method itself failed
    InvocationTargetFailure,
    /// The engine failed before or around the call
    InvocationFailure,
}

/// Errors raised by descriptor construction, validation and invocation
#[derive(Error, Debug)]
pub enum RpcError {
    /// An exported method has an unnamed or blank-named parameter
    #[error("Interface '{interface}' is incomplete: parameter #{position} of '{method}' has no name")]
    InterfaceIncomplete {
        /// Interface name
        interface: String,
        /// Method name
        method: String,
        /// Zero-based parameter position
        position: usize,
    },

    /// The interface or implementation cannot be bound safely
    #[error("Invalid RPC class '{class}': {reason}")]
    InvalidRpcClass {
        /// Interface or implementation name
        class: String,
        /// Rule that was broken
        reason: String,
    },

    /// No bound method has this prototype
    #[error("Method not found: {prototype}")]
    MethodNotFound {
        /// Requested prototype
        prototype: String,
    },

    /// A required parameter was absent or `null`
    #[error("Parameter '{parameter}' not found for {prototype}")]
    MissingParameter {
        /// Method prototype
        prototype: String,
        /// Parameter name
        parameter: String,
    },

    /// A supplied value could not be coerced to the declared type
    #[error("Cannot convert parameter '{parameter}' of {prototype}: {source}")]
    Conversion {
        /// Method prototype
        prototype: String,
        /// Parameter name
        parameter: String,
        /// Converter failure
        #[source]
        source: ConversionError,
    },

    /// The implementation method returned an error
    #[error("{prototype} failed: {source}")]
    InvocationTarget {
        /// Method prototype
        prototype: String,
        /// The method's own error
        #[source]
        source: anyhow::Error,
    },

    /// The engine could not perform the call
    #[error("Invocation of {prototype} failed: {source}")]
    Invocation {
        /// Method prototype, or the implementation name for eager instances
        prototype: String,
        /// Underlying failure
        #[source]
        source: anyhow::Error,
    },
}

impl RpcError {
    /// Taxonomy kind of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InterfaceIncomplete { .. } => ErrorKind::InterfaceIncomplete,
            Self::InvalidRpcClass { .. } => ErrorKind::InvalidRpcClass,
            Self::MethodNotFound { .. } => ErrorKind::MethodNotFound,
            Self::MissingParameter { .. } => ErrorKind::MissingRequiredParameter,
            Self::Conversion { .. } => ErrorKind::UnsupportedTypeConversion,
            Self::InvocationTarget { .. } => ErrorKind::InvocationTargetFailure,
            Self::Invocation { .. } => ErrorKind::InvocationFailure,
        }
    }

    /// Whether the invoked method itself failed
    #[must_use]
    pub const fn is_target_failure(&self) -> bool {
        matches!(self, Self::InvocationTarget { .. })
    }

    pub(crate) fn invalid(class: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRpcClass {
            class: class.into(),
            reason: reason.into(),
        }
    }
}
