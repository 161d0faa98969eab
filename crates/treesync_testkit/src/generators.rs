//! Property-based test generators using proptest.
//!
//! Provides strategies for generating node keys, attribute maps and raw
//! snapshot values.

use proptest::prelude::*;
use serde_json::{Map, Value};
use treesync_core::Attributes;

/// Strategy for generating valid child keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9_-]{1,16}").expect("Invalid regex")
}

/// Strategy for generating attribute names that are neither an identifier
/// nor the priority key.
pub fn attribute_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}")
        .expect("Invalid regex")
        .prop_filter("Reserved attribute name", |name| name != "id")
}

/// Strategy for generating non-null scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        prop::string::string_regex("[ -~]{0,24}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for generating snapshot values a record cannot be built from:
/// scalars and arrays.
pub fn primitive_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        scalar_strategy(),
        prop::collection::vec(scalar_strategy(), 0..4).prop_map(Value::Array),
    ]
}

/// Strategy for generating flat attribute maps of scalar values.
pub fn attributes_strategy() -> impl Strategy<Value = Attributes> {
    prop::collection::btree_map(attribute_name_strategy(), scalar_strategy(), 0..6)
        .prop_map(|entries| entries.into_iter().collect())
}

/// Strategy for generating a keyed map of records, as a collection node
/// holds them.
pub fn children_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(key_strategy(), attributes_strategy(), 0..6).prop_map(
        |children| {
            let map: Map<String, Value> = children
                .into_iter()
                .filter(|(_, attributes)| !attributes.is_empty())
                .map(|(key, attributes)| (key, Value::Object(attributes)))
                .collect();
            Value::Object(map)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesync_core::is_primitive;

    proptest! {
        #[test]
        fn keys_are_single_segments(key in key_strategy()) {
            prop_assert!(!key.is_empty());
            prop_assert!(!key.contains('/'));
        }

        #[test]
        fn primitives_are_primitive(value in primitive_strategy()) {
            prop_assert!(is_primitive(&value));
        }

        #[test]
        fn attribute_maps_skip_the_identifier(attributes in attributes_strategy()) {
            prop_assert!(!attributes.contains_key("id"));
        }
    }
}
