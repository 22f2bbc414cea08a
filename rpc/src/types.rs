//! Value types understood by the RPC engine.
//!
//! Every declared parameter and return type is described by a [`ValueType`].
//! The description drives three things: the one-letter code used in method
//! prototypes, the coercion rules of the [`TypeConverter`](crate::TypeConverter)
//! and the matching of interface methods against implementation methods.
//!
//! Rust types obtain their description through [`RpcType`]. Structs and unit
//! enums usually derive it with `#[derive(RpcBean)]` / `#[derive(RpcEnum)]`.

use std::fmt;

/// Fixed-size scalar kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// `true` / `false`
    Boolean,
    /// 8-bit signed integer
    Byte,
    /// 16-bit signed integer
    Short,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// A single character
    Char,
}

impl Primitive {
    /// Prototype letter of the non-nullable form
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Boolean => 'Z',
            Self::Byte => 'B',
            Self::Short => 'S',
            Self::Int => 'I',
            Self::Long => 'J',
            Self::Float => 'F',
            Self::Double => 'D',
            Self::Char => 'C',
        }
    }

    /// Lower-case name of the non-nullable form
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Char => "char",
        }
    }

    /// Name of the nullable (boxed) form
    #[must_use]
    pub const fn boxed_name(self) -> &'static str {
        match self {
            Self::Boolean => "Boolean",
            Self::Byte => "Byte",
            Self::Short => "Short",
            Self::Int => "Integer",
            Self::Long => "Long",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::Char => "Character",
        }
    }

    /// Inclusive integer range, for the integral kinds
    #[must_use]
    pub const fn integer_range(self) -> Option<(i64, i64)> {
        match self {
            Self::Byte => Some((i8::MIN as i64, i8::MAX as i64)),
            Self::Short => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::Int => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::Long => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

/// An enumeration and its declared constants
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumType {
    name: String,
    constants: Vec<String>,
}

impl EnumType {
    /// Describe an enumeration
    pub fn new<I, S>(name: impl Into<String>, constants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            constants: constants.into_iter().map(Into::into).collect(),
        }
    }

    /// Type name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared constants in declaration order
    #[must_use]
    pub fn constants(&self) -> &[String] {
        &self.constants
    }

    /// Whether `value` is exactly one of the constants
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.constants.iter().any(|constant| constant == value)
    }
}

/// A property of a bean type
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    name: String,
    ty: ValueType,
    writable: bool,
}

impl PropertyDescriptor {
    /// A readable and writable property
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            writable: true,
        }
    }

    /// A property the converter never populates
    pub fn read_only(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            writable: false,
            ..Self::new(name, ty)
        }
    }

    /// Property name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type
    #[must_use]
    pub const fn ty(&self) -> &ValueType {
        &self.ty
    }

    /// Whether the converter may populate it
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.writable
    }
}

/// A structured type made of named properties
#[derive(Debug, Clone, PartialEq)]
pub struct BeanType {
    name: String,
    properties: Vec<PropertyDescriptor>,
}

impl BeanType {
    /// A bean with no properties yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Builder-style property declaration
    #[must_use]
    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    /// Type name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Properties in declaration order
    #[must_use]
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }
}

/// Declared type of a parameter, property or return value
#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    /// No value (`()`)
    Unit,
    /// Non-nullable scalar
    Primitive(Primitive),
    /// Nullable scalar
    Boxed(Primitive),
    /// Text
    String,
    /// Enumeration matched by constant name
    Enum(EnumType),
    /// Structured object populated property by property
    Bean(BeanType),
    /// Any other type; passed through untouched when the parameter is public
    Opaque(String),
}

impl ValueType {
    /// Single-letter code used in prototypes
    ///
    /// Primitives use `Z B S I J F D C`, their nullable forms the same letters
    /// in lower case; `T` string, `E` enum, `L` bean, `O` opaque, `V` unit.
    #[must_use]
    pub const fn code(&self) -> char {
        match self {
            Self::Unit => 'V',
            Self::Primitive(primitive) => primitive.code(),
            Self::Boxed(primitive) => primitive.code().to_ascii_lowercase(),
            Self::String => 'T',
            Self::Enum(_) => 'E',
            Self::Bean(_) => 'L',
            Self::Opaque(_) => 'O',
        }
    }

    /// Human-readable type name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Unit => "void",
            Self::Primitive(primitive) => primitive.name(),
            Self::Boxed(primitive) => primitive.boxed_name(),
            Self::String => "String",
            Self::Enum(enum_type) => enum_type.name(),
            Self::Bean(bean) => bean.name(),
            Self::Opaque(name) => name,
        }
    }

    /// Whether this is a non-nullable scalar
    #[must_use]
    pub const fn is_primitive(&self) -> bool {
        matches!(self, Self::Primitive(_))
    }

    /// Whether this is `Unit`
    #[must_use]
    pub const fn is_unit(&self) -> bool {
        matches!(self, Self::Unit)
    }

    /// The nullable form of this type
    #[must_use]
    pub fn nullable(self) -> Self {
        match self {
            Self::Primitive(primitive) => Self::Boxed(primitive),
            other => other,
        }
    }

    /// Whether a value declared as `other` may be passed where `self` is expected
    ///
    /// Exact equality, a boxed scalar accepting its primitive, or an opaque
    /// target accepting anything but `Unit`.
    #[must_use]
    pub fn accepts(&self, other: &Self) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (Self::Boxed(a), Self::Primitive(b)) => a == b,
            (Self::Opaque(_), other) => !other.is_unit(),
            _ => false,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust types with an RPC description
pub trait RpcType {
    /// The description of `Self`
    fn value_type() -> ValueType;
}

macro_rules! primitive_rpc_type {
    ($($ty:ty => $primitive:ident),* $(,)?) => {
        $(
            impl RpcType for $ty {
                fn value_type() -> ValueType {
                    ValueType::Primitive(Primitive::$primitive)
                }
            }
        )*
    };
}

primitive_rpc_type! {
    bool => Boolean,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    char => Char,
}

impl RpcType for () {
    fn value_type() -> ValueType {
        ValueType::Unit
    }
}

impl RpcType for String {
    fn value_type() -> ValueType {
        ValueType::String
    }
}

impl<T: RpcType> RpcType for Option<T> {
    fn value_type() -> ValueType {
        T::value_type().nullable()
    }
}

impl RpcType for serde_json::Value {
    fn value_type() -> ValueType {
        ValueType::Opaque("json".to_string())
    }
}

impl<T: RpcType> RpcType for Vec<T> {
    fn value_type() -> ValueType {
        ValueType::Opaque(format!("list<{}>", T::value_type()))
    }
}
