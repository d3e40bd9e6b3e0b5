//! `proptest` strategies for the session core's data model, for
//! property-based tests of the matcher and assignment validator elsewhere
//! in the workspace.

use kasocki_core::assignment::Assignment;
use proptest::prelude::*;
use serde_json::Value;

/// A handful of fixed topic names, mirroring the `kasocki_test_NN` fixtures
/// used throughout the seed scenarios.
pub fn topic_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("kasocki_test_01".to_string()),
        Just("kasocki_test_02".to_string()),
        Just("kasocki_test_03".to_string()),
        Just("kasocki_test_04".to_string()),
    ]
}

/// A valid partition id (non-negative, small).
pub fn partition() -> impl Strategy<Value = i32> {
    0i32..8
}

/// A valid offset: `-1` (latest) or a non-negative offset.
pub fn offset() -> impl Strategy<Value = i64> {
    prop_oneof![Just(-1i64), 0i64..10_000i64]
}

/// An arbitrary, individually-valid `Assignment` (valid partition/offset
/// shape; the caller still decides topic availability).
pub fn assignment() -> impl Strategy<Value = Assignment> {
    (topic_name(), partition(), offset())
        .prop_map(|(topic, partition, offset)| Assignment { topic, partition, offset })
}

/// A non-empty list of arbitrary assignments, for exercising the validator
/// and matcher against more than one tuple at a time.
pub fn assignments() -> impl Strategy<Value = Vec<Assignment>> {
    proptest::collection::vec(assignment(), 1..6)
}

/// An arbitrary JSON scalar: the leaves a matcher's dotted-path resolution
/// ultimately compares against.
pub fn json_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

/// An arbitrary shallow JSON message: a small object of scalar and
/// nested-object fields, deep enough to exercise dotted-path resolution
/// without risking unbounded recursion in the generator itself.
pub fn json_message() -> impl Strategy<Value = Value> {
    let leaf = json_scalar();
    proptest::collection::btree_map("[a-z]{1,6}", leaf, 0..4).prop_flat_map(|flat| {
        proptest::collection::btree_map("[a-z]{1,6}", json_scalar(), 0..3).prop_map(move |nested| {
            let mut map = serde_json::Map::new();
            for (k, v) in &flat {
                map.insert(k.clone(), v.clone());
            }
            if !nested.is_empty() {
                map.insert("nested".to_string(), Value::Object(nested.into_iter().collect()));
            }
            Value::Object(map)
        })
    })
}
