use crate::schema::{Field, FieldType, SchemaError, SchemaSet};
use serde_json::{json, Value};

fn schema_with_cpu_host() -> SchemaSet {
    let mut set = SchemaSet::empty();
    set.set_schema(vec![
        Field {
            index: 0,
            name: "cpu".into(),
            field_type: FieldType::Number,
        },
        Field {
            index: 1,
            name: "host".into(),
            field_type: FieldType::String,
        },
    ])
    .unwrap();
    set
}

fn parse(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[test]
fn compact_replaces_known_keys_with_indices() {
    let set = schema_with_cpu_host();
    let expanded = br#"{"cpu":42,"host":"a"}"#;
    let compact = set.compact(expanded, false).unwrap();
    assert_eq!(parse(&compact), json!({"0": 42, "1": "a"}));
}

#[test]
fn expand_is_inverse_of_compact() {
    let set = schema_with_cpu_host();
    let expanded = br#"{"cpu":42,"host":"a"}"#;
    let compact = set.compact(expanded, false).unwrap();
    let round_tripped = set.expand(&compact, 0).unwrap();
    assert_eq!(parse(&round_tripped), json!({"cpu": 42, "host": "a"}));
}

#[test]
fn unknown_key_passes_through_by_default() {
    let set = schema_with_cpu_host();
    let expanded = br#"{"cpu":1,"mystery":true}"#;
    let compact = set.compact(expanded, false).unwrap();
    assert_eq!(parse(&compact), json!({"0": 1, "mystery": true}));
}

#[test]
fn unknown_key_rejected_when_configured() {
    let set = schema_with_cpu_host();
    let expanded = br#"{"cpu":1,"mystery":true}"#;
    let err = set.compact(expanded, true).unwrap_err();
    assert!(matches!(err, SchemaError::UnknownField(ref k) if k == "mystery"));
}

#[test]
fn expand_leaves_unknown_numeric_keys_as_is() {
    let set = schema_with_cpu_host();
    let compact = br#"{"0":1,"99":"z"}"#;
    let expanded = set.expand(compact, 0).unwrap();
    assert_eq!(parse(&expanded), json!({"cpu": 1, "99": "z"}));
}

#[test]
fn expand_uses_version_that_was_current_when_written() {
    let mut set = schema_with_cpu_host();
    // v2 adds a field; a record compacted against v1 should still expand correctly.
    set.set_schema(vec![
        Field { index: 0, name: "cpu".into(), field_type: FieldType::Number },
        Field { index: 1, name: "host".into(), field_type: FieldType::String },
        Field { index: 2, name: "status".into(), field_type: FieldType::String },
    ])
    .unwrap();

    let compact = br#"{"0":1,"1":"a"}"#;
    let expanded = set.expand(compact, 1).unwrap();
    assert_eq!(parse(&expanded), json!({"cpu": 1, "host": "a"}));
}

#[test]
fn compact_without_schema_errors() {
    let set = SchemaSet::empty();
    let err = set.compact(b"{}", false).unwrap_err();
    assert!(matches!(err, SchemaError::SchemaRequired));
}

#[test]
fn compact_non_object_payload_errors() {
    let set = schema_with_cpu_host();
    let err = set.compact(b"[1,2,3]", false).unwrap_err();
    assert!(matches!(err, SchemaError::NotAnObject));
}
