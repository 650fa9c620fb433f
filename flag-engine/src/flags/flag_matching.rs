use std::collections::HashMap;

use crate::flags::flag_models::Variant;
use crate::properties::property_matching::{match_operator, PropertyMatchError};
use crate::properties::property_models::FlagCondition;
use crate::utils::hash::hash_bucket;

/// Weighted consistent-hash variant selection: the user's variant bucket is
/// computed over the total declared weight and matched against cumulative
/// weights, so selection stays proportional even when weights don't sum
/// to 100. Returns None when no variants carry weight.
pub fn select_variant<'a>(user_id: &str, variants: &'a [Variant]) -> Option<&'a str> {
    let total_weight: u32 = variants.iter().map(|variant| variant.weight).sum();
    if total_weight == 0 {
        return None;
    }

    let bucket = hash_bucket(&format!("{user_id}_variant"), total_weight);
    let mut cumulative = 0;
    for variant in variants {
        cumulative += variant.weight;
        if bucket < cumulative {
            return Some(&variant.name);
        }
    }
    None
}

/// Evaluates a flag's conditions against context attributes. AND semantics:
/// the first non-matching condition fails the set. A condition's `negate`
/// inverts its own verdict before it joins the conjunction.
pub fn conditions_match(
    conditions: &[FlagCondition],
    attributes: &HashMap<String, serde_json::Value>,
) -> Result<bool, PropertyMatchError> {
    for condition in conditions {
        let matched = match_operator(
            condition.operator,
            &condition.value,
            attributes.get(&condition.attribute),
        )?;
        if matched == condition.negate {
            return Ok(false);
        }
    }
    Ok(true)
}
