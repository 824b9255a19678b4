//! Typed reads on top of the string-valued provider API.

use crate::provider::{
    Fallback, ReadOnlyConfigProvider, first_char, parse_bool, parse_int, split_list,
};
use crate::validator::Validator;

/// The shape a bound member expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Bool,
    Char,
    Int,
    List,
}

/// A value read from configuration, already converted to its [`ValueType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    String(String),
    Bool(bool),
    Char(char),
    Int(i64),
    List(Vec<String>),
}

/// Resolve `(domain, key)` and its fallbacks as `ty`.
///
/// Lists are never absent: a missing list option reads as an empty list.
pub fn retrieve<P>(
    provider: &P,
    ty: ValueType,
    domain: &str,
    key: &str,
    required: bool,
    fallbacks: &[Fallback<'_>],
) -> Option<ConfigValue>
where
    P: ReadOnlyConfigProvider + ?Sized,
{
    let lookup = |validator: &Validator| {
        provider.option_string(domain, key, required, validator, fallbacks)
    };

    match ty {
        ValueType::String => lookup(&Validator::Permissive).map(ConfigValue::String),
        ValueType::Bool => lookup(&Validator::Permissive).map(|v| ConfigValue::Bool(parse_bool(&v))),
        ValueType::Char => lookup(&Validator::NonEmpty)
            .and_then(|v| first_char(&v))
            .map(ConfigValue::Char),
        ValueType::Int => lookup(&Validator::int())
            .and_then(|v| parse_int(&v))
            .map(ConfigValue::Int),
        ValueType::List => Some(ConfigValue::List(
            lookup(&Validator::Permissive)
                .map(|v| split_list(&v, true))
                .unwrap_or_default(),
        )),
    }
}

/// Conversion from a retrieved value to a member type.
///
/// Only types implementing this trait can be bound, so unsupported member
/// types fail to compile rather than at bind time.
pub trait FromConfigValue: Sized + Send + 'static {
    const VALUE_TYPE: ValueType;

    /// `None` when the value cannot be represented as `Self`.
    fn from_config_value(value: ConfigValue) -> Option<Self>;

    /// What an absent option converts to.
    fn from_missing() -> Option<Self> {
        None
    }
}

/// Convert a retrieval result; `None` means the member should be left alone.
pub fn convert<V: FromConfigValue>(value: Option<ConfigValue>) -> Option<V> {
    match value {
        Some(value) => V::from_config_value(value),
        None => V::from_missing(),
    }
}

impl FromConfigValue for String {
    const VALUE_TYPE: ValueType = ValueType::String;

    fn from_config_value(value: ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl FromConfigValue for bool {
    const VALUE_TYPE: ValueType = ValueType::Bool;

    fn from_config_value(value: ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl FromConfigValue for char {
    const VALUE_TYPE: ValueType = ValueType::Char;

    fn from_config_value(value: ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::Char(c) => Some(c),
            _ => None,
        }
    }
}

impl FromConfigValue for Vec<String> {
    const VALUE_TYPE: ValueType = ValueType::List;

    fn from_config_value(value: ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::List(items) => Some(items),
            _ => None,
        }
    }

    fn from_missing() -> Option<Self> {
        Some(Vec::new())
    }
}

macro_rules! integer_value {
    ($($ty:ty),*) => {
        $(
            impl FromConfigValue for $ty {
                const VALUE_TYPE: ValueType = ValueType::Int;

                fn from_config_value(value: ConfigValue) -> Option<Self> {
                    match value {
                        ConfigValue::Int(n) => <$ty>::try_from(n).ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

integer_value!(i32, i64, u16, u32, u64, usize);

/// Optional members are cleared when the option is absent.
impl<T: FromConfigValue> FromConfigValue for Option<T> {
    const VALUE_TYPE: ValueType = T::VALUE_TYPE;

    fn from_config_value(value: ConfigValue) -> Option<Self> {
        T::from_config_value(value).map(Some)
    }

    fn from_missing() -> Option<Self> {
        Some(T::from_missing())
    }
}
