use regex::Regex;
use serde_json::Value;

use crate::properties::property_models::OperatorType;

#[derive(Debug, PartialEq, Eq)]
pub enum PropertyMatchError {
    /// The declared value cannot be used with the declared operator,
    /// e.g. an `in` operator whose value is not an array.
    InvalidComparison(String),
}

impl std::fmt::Display for PropertyMatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyMatchError::InvalidComparison(msg) => {
                write!(f, "invalid comparison: {msg}")
            }
        }
    }
}

pub fn to_string_representation(value: &Value) -> String {
    if value.is_string() {
        return value
            .as_str()
            .expect("string slice should always exist for string value")
            .to_string();
    }
    value.to_string()
}

pub fn to_f64_representation(value: &Value) -> Option<f64> {
    if value.is_number() {
        return value.as_f64();
    }
    to_string_representation(value).parse::<f64>().ok()
}

/// Evaluates a single operator against the attribute value supplied by the
/// evaluation context.
///
/// A missing attribute fails every operator except `not_equals`, which holds
/// vacuously (an absent attribute cannot equal the declared value). Numeric
/// comparisons against non-numeric attributes resolve to false rather than
/// erroring, matching how the rest of the engine treats malformed context
/// data as "does not match".
pub fn match_operator(
    operator: OperatorType,
    declared: &Value,
    actual: Option<&Value>,
) -> Result<bool, PropertyMatchError> {
    let actual = match actual {
        Some(value) => value,
        None => return Ok(operator == OperatorType::NotEquals),
    };

    match operator {
        OperatorType::Equals | OperatorType::NotEquals => {
            let is_equal = values_equal(declared, actual);
            if operator == OperatorType::Equals {
                Ok(is_equal)
            } else {
                Ok(!is_equal)
            }
        }
        OperatorType::GreaterThan | OperatorType::LessThan => {
            let (lhs, rhs) = match (to_f64_representation(actual), to_f64_representation(declared))
            {
                (Some(lhs), Some(rhs)) => (lhs, rhs),
                // Non-numeric operands never satisfy an ordering comparison
                _ => return Ok(false),
            };
            if operator == OperatorType::GreaterThan {
                Ok(lhs > rhs)
            } else {
                Ok(lhs < rhs)
            }
        }
        OperatorType::Contains => {
            let haystack = to_string_representation(actual);
            let needle = to_string_representation(declared);
            Ok(haystack.contains(&needle))
        }
        OperatorType::In => {
            let candidates = declared.as_array().ok_or_else(|| {
                PropertyMatchError::InvalidComparison(format!(
                    "'in' operator requires an array value, got {declared}"
                ))
            })?;
            Ok(candidates.iter().any(|candidate| values_equal(candidate, actual)))
        }
        OperatorType::Regex => {
            let pattern = match Regex::new(&to_string_representation(declared)) {
                Ok(pattern) => pattern,
                // An unparseable pattern matches nothing
                Err(_) => return Ok(false),
            };
            Ok(pattern.find(&to_string_representation(actual)).is_some())
        }
    }
}

/// Loose equality across JSON types: numbers compare numerically, everything
/// else through its string representation, so `"42"` and `42` are equal.
fn values_equal(declared: &Value, actual: &Value) -> bool {
    if let (Some(lhs), Some(rhs)) = (declared.as_f64(), actual.as_f64()) {
        return lhs == rhs;
    }
    to_string_representation(declared) == to_string_representation(actual)
}
