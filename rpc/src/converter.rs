//! Coercion of loosely typed call arguments into declared types.
//!
//! Callers frequently send everything as text (query strings, form fields),
//! so each scalar target accepts both its natural JSON shape and a string that
//! parses as it. Beans are populated property by property: properties whose
//! supplied value does not convert are left at their default.

use crate::error::ConversionError;
use crate::types::{BeanType, EnumType, Primitive, ValueType};
use serde_json::{Map, Number, Value};

/// Stateless value coercer
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeConverter;

impl TypeConverter {
    /// Create a converter
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Coerce `value` into `target`
    ///
    /// `null` converts to `null` for every nullable target.
    ///
    /// # Errors
    ///
    /// Returns a [`ConversionError`] when the target has no conversion rule
    /// (`Unit`, opaque types), when `null` is given for a primitive, or when
    /// the value cannot represent the target.
    pub fn convert(&self, target: &ValueType, value: &Value) -> Result<Value, ConversionError> {
        match target {
            ValueType::Unit | ValueType::Opaque(_) => Err(ConversionError::Unsupported {
                type_name: target.name().to_string(),
            }),
            _ if value.is_null() => {
                if target.is_primitive() {
                    Err(ConversionError::NullPrimitive {
                        type_name: target.name().to_string(),
                    })
                } else {
                    Ok(Value::Null)
                }
            },
            ValueType::Primitive(primitive) | ValueType::Boxed(primitive) => {
                Self::convert_scalar(*primitive, target.name(), value)
            },
            ValueType::String => Self::convert_string(value),
            ValueType::Enum(enum_type) => Self::convert_enum(enum_type, value),
            ValueType::Bean(bean) => self.convert_bean(bean, value),
        }
    }

    fn convert_scalar(primitive: Primitive, type_name: &str, value: &Value) -> Result<Value, ConversionError> {
        match primitive {
            Primitive::Boolean => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(parse_error(type_name, text)),
                },
                other => Err(incompatible(type_name, other)),
            },
            Primitive::Byte | Primitive::Short | Primitive::Int | Primitive::Long => {
                let number = match value {
                    Value::Number(n) => integral(n).ok_or_else(|| parse_error(type_name, &n.to_string()))?,
                    Value::String(text) => text.trim().parse::<i64>().map_err(|_| parse_error(type_name, text))?,
                    other => return Err(incompatible(type_name, other)),
                };
                match primitive.integer_range() {
                    Some((min, max)) if number < min || number > max => Err(ConversionError::OutOfRange {
                        type_name: type_name.to_string(),
                        value: number.to_string(),
                    }),
                    _ => Ok(Value::from(number)),
                }
            },
            Primitive::Float | Primitive::Double => {
                let number = match value {
                    Value::Number(n) => n.as_f64().ok_or_else(|| parse_error(type_name, &n.to_string()))?,
                    Value::String(text) => text.trim().parse::<f64>().map_err(|_| parse_error(type_name, text))?,
                    other => return Err(incompatible(type_name, other)),
                };
                let in_range = primitive == Primitive::Double || number.abs() <= f64::from(f32::MAX);
                match Number::from_f64(number) {
                    Some(n) if in_range => Ok(Value::Number(n)),
                    _ => Err(ConversionError::OutOfRange {
                        type_name: type_name.to_string(),
                        value: number.to_string(),
                    }),
                }
            },
            Primitive::Char => match value {
                Value::String(text) if text.chars().count() == 1 => Ok(Value::String(text.clone())),
                Value::String(text) => Err(parse_error(type_name, text)),
                other => Err(incompatible(type_name, other)),
            },
        }
    }

    fn convert_string(value: &Value) -> Result<Value, ConversionError> {
        match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(incompatible("String", other)),
        }
    }

    fn convert_enum(enum_type: &EnumType, value: &Value) -> Result<Value, ConversionError> {
        match value {
            Value::String(text) if enum_type.contains(text) => Ok(value.clone()),
            Value::String(text) => Err(ConversionError::UnknownConstant {
                type_name: enum_type.name().to_string(),
                value: text.clone(),
            }),
            other => Err(incompatible(enum_type.name(), other)),
        }
    }

    fn convert_bean(&self, bean: &BeanType, value: &Value) -> Result<Value, ConversionError> {
        let Value::Object(source) = value else {
            return Err(incompatible(bean.name(), value));
        };

        let mut populated = Map::new();
        for property in bean.properties().iter().filter(|p| p.is_writable()) {
            let converted = match source.get(property.name()) {
                Some(raw) => self.convert(property.ty(), raw).map_err(|err| {
                    tracing::debug!(
                        bean = %bean.name(),
                        property = %property.name(),
                        error = %err,
                        "Skipping bean property whose type does not agree"
                    );
                }),
                None => Err(()),
            };
            populated.insert(
                property.name().to_string(),
                converted.unwrap_or_else(|()| default_value(property.ty())),
            );
        }

        Ok(Value::Object(populated))
    }
}

/// Value an unpopulated property holds
fn default_value(ty: &ValueType) -> Value {
    match ty {
        ValueType::Primitive(Primitive::Boolean) => Value::Bool(false),
        ValueType::Primitive(Primitive::Float | Primitive::Double) => Value::from(0.0),
        ValueType::Primitive(Primitive::Char) => Value::String("\0".to_string()),
        ValueType::Primitive(_) => Value::from(0),
        _ => Value::Null,
    }
}

/// Integer value of a JSON number, accepting floats with no fractional part
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn integral(n: &Number) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && (-LIMIT..LIMIT).contains(f))
            .map(|f| f as i64)
    })
}

fn parse_error(type_name: &str, text: &str) -> ConversionError {
    ConversionError::Parse {
        type_name: type_name.to_string(),
        value: text.to_string(),
    }
}

fn incompatible(type_name: &str, value: &Value) -> ConversionError {
    ConversionError::Incompatible {
        type_name: type_name.to_string(),
        found: json_kind(value),
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::types::{PropertyDescriptor, RpcType};
    use proptest::prelude::*;
    use serde_json::json;

    fn convert(target: &ValueType, value: Value) -> Result<Value, ConversionError> {
        TypeConverter::new().convert(target, &value)
    }

    #[test]
    fn test_boolean_from_text() {
        let boolean = <Option<bool>>::value_type();
        assert_eq!(convert(&boolean, json!("true")).unwrap(), json!(true));
        assert_eq!(convert(&boolean, json!("FALSE")).unwrap(), json!(false));
        assert!(matches!(convert(&boolean, json!("yes")), Err(ConversionError::Parse { .. })));
    }

    #[test]
    fn test_integer_from_text() {
        let int = <Option<i32>>::value_type();
        assert_eq!(convert(&int, json!("42")).unwrap(), json!(42));
        assert_eq!(convert(&int, json!(42.0)).unwrap(), json!(42));
        assert!(matches!(convert(&int, json!("4.2")), Err(ConversionError::Parse { .. })));
        assert!(matches!(convert(&int, json!(true)), Err(ConversionError::Incompatible { .. })));
    }

    #[test]
    fn test_integer_ranges() {
        assert!(matches!(
            convert(&i8::value_type(), json!(200)),
            Err(ConversionError::OutOfRange { .. })
        ));
        assert_eq!(convert(&i16::value_type(), json!("-32768")).unwrap(), json!(-32768));
        assert_eq!(convert(&i64::value_type(), json!(i64::MAX)).unwrap(), json!(i64::MAX));
    }

    #[test]
    fn test_floats() {
        assert_eq!(convert(&f64::value_type(), json!("2.5")).unwrap(), json!(2.5));
        assert_eq!(convert(&f32::value_type(), json!(1)).unwrap(), json!(1.0));
        assert!(matches!(
            convert(&f32::value_type(), json!(1e300)),
            Err(ConversionError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_char_requires_single_character() {
        assert_eq!(convert(&char::value_type(), json!("x")).unwrap(), json!("x"));
        assert!(convert(&char::value_type(), json!("xy")).is_err());
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(convert(&<Option<i32>>::value_type(), Value::Null).unwrap(), Value::Null);
        assert_eq!(convert(&String::value_type(), Value::Null).unwrap(), Value::Null);
        assert!(matches!(
            convert(&i32::value_type(), Value::Null),
            Err(ConversionError::NullPrimitive { .. })
        ));
    }

    #[test]
    fn test_enum_requires_exact_constant() {
        let level = ValueType::Enum(EnumType::new("Level", ["LOW", "HIGH"]));
        assert_eq!(convert(&level, json!("HIGH")).unwrap(), json!("HIGH"));

        let err = convert(&level, json!("UNKNOWN_VALUE")).unwrap_err();
        assert!(matches!(err, ConversionError::UnknownConstant { .. }));
        assert!(convert(&level, json!("high")).is_err());
    }

    #[test]
    fn test_unsupported_targets_name_the_type() {
        let err = convert(&ValueType::Opaque("Socket".into()), json!("x")).unwrap_err();
        assert_eq!(err.to_string(), "Cannot cast to Socket");
        assert!(convert(&ValueType::Unit, json!(null)).is_err());
    }

    #[test]
    fn test_bean_populates_matching_properties() {
        let address = BeanType::new("Address")
            .property(PropertyDescriptor::new("city", ValueType::String))
            .property(PropertyDescriptor::new("zip", i32::value_type()));
        let person = ValueType::Bean(
            BeanType::new("Person")
                .property(PropertyDescriptor::new("name", ValueType::String))
                .property(PropertyDescriptor::new("age", i32::value_type()))
                .property(PropertyDescriptor::new("active", bool::value_type()))
                .property(PropertyDescriptor::new("address", ValueType::Bean(address)))
                .property(PropertyDescriptor::read_only("id", i64::value_type())),
        );

        let converted = convert(
            &person,
            json!({
                "name": "Ada",
                "age": "not a number",
                "address": { "city": "London", "zip": "12345" },
                "id": 9,
                "extra": true
            }),
        )
        .unwrap();

        assert_eq!(
            converted,
            json!({
                "name": "Ada",
                "age": 0,
                "active": false,
                "address": { "city": "London", "zip": 12345 }
            })
        );
    }

    #[test]
    fn test_bean_rejects_non_objects() {
        let bean = ValueType::Bean(BeanType::new("Empty"));
        assert!(matches!(convert(&bean, json!([1, 2])), Err(ConversionError::Incompatible { .. })));
    }

    proptest! {
        #[test]
        fn int_text_round_trips(n in any::<i32>()) {
            let converted = convert(&i32::value_type(), Value::String(n.to_string())).unwrap();
            prop_assert_eq!(converted, json!(n));
        }

        #[test]
        fn long_text_outside_int_is_rejected(n in (i64::from(i32::MAX) + 1)..i64::MAX) {
            let result = convert(&i32::value_type(), Value::String(n.to_string()));
            let out_of_range = matches!(result, Err(ConversionError::OutOfRange { .. }));
            prop_assert!(out_of_range);
        }
    }
}
