//! Predicates over raw option values.
//!
//! Values are always stored as strings; validators decide at read time
//! whether a stored string is acceptable for a particular use.

/// Prefix marking an option as present but switched off.
pub const DISABLED_PREFIX: &str = "false:";
/// Prefix marking an option as explicitly switched on.
pub const ENABLED_PREFIX: &str = "true:";

/// A predicate over a raw option value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Validator {
    /// Accepts everything.
    #[default]
    Permissive,
    /// Accepts integers within the optional inclusive bounds.
    Numeric { min: Option<i64>, max: Option<i64> },
    /// Accepts any non-empty value.
    NonEmpty,
    /// Rejects values carrying the `false:` prefix.
    NotDisabled,
    /// Strips a `true:`/`false:` prefix before delegating.
    Optional(Box<Validator>),
    /// Accepts only if every inner validator does.
    All(Vec<Validator>),
}

impl Validator {
    pub fn numeric(min: i64, max: i64) -> Self {
        Validator::Numeric {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Any integer, allowing an enable/disable prefix.
    pub fn int() -> Self {
        Validator::Optional(Box::new(Validator::Numeric {
            min: None,
            max: None,
        }))
    }

    /// Combines `self` with [`Validator::NotDisabled`].
    pub fn not_disabled(self) -> Self {
        match self {
            Validator::Permissive => Validator::NotDisabled,
            Validator::All(mut inner) => {
                inner.insert(0, Validator::NotDisabled);
                Validator::All(inner)
            }
            other => Validator::All(vec![Validator::NotDisabled, other]),
        }
    }

    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Validator::Permissive => true,
            Validator::Numeric { min, max } => match value.trim().parse::<i64>() {
                Ok(n) => min.is_none_or(|m| n >= m) && max.is_none_or(|m| n <= m),
                Err(_) => false,
            },
            Validator::NonEmpty => !value.is_empty(),
            Validator::NotDisabled => !is_disabled(value),
            Validator::Optional(inner) => inner.accepts(strip_state_prefix(value)),
            Validator::All(inner) => inner.iter().all(|v| v.accepts(value)),
        }
    }
}

/// True if the value carries the `false:` prefix.
pub fn is_disabled(value: &str) -> bool {
    value.starts_with(DISABLED_PREFIX)
}

/// Removes a leading `true:` or `false:` marker.
pub fn strip_state_prefix(value: &str) -> &str {
    value
        .strip_prefix(ENABLED_PREFIX)
        .or_else(|| value.strip_prefix(DISABLED_PREFIX))
        .unwrap_or(value)
}
