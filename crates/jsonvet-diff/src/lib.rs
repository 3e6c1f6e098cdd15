//! Semantic comparison of JSON documents.
//!
//! This crate exists so the harness can judge whether a subject's re-emitted
//! JSON carries the same data as the fixture it was given, independent of key
//! order, whitespace, or numeric literal formatting. `diff` walks two parsed
//! documents in parallel and returns every point of disagreement; an empty
//! result means the documents are semantically equivalent.

use std::fmt;

use serde_json::{Map, Number, Value};

/// Relative tolerance for comparing non-integral numbers. Wide enough to
/// absorb decimal-to-binary round-trip drift from a subject's formatter,
/// tight enough that genuinely different values still differ.
const REL_TOLERANCE: f64 = 1e-12;

/// One point of disagreement between two JSON documents.
///
/// Paths are JSON Pointers (RFC 6901); the empty string is the document
/// root. For key differences the path points at the key itself.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Difference {
    /// The two sides hold different JSON variants; no descent below here.
    TypeMismatch {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },
    /// A key present in the expected mapping is absent from the actual one.
    MissingKey { path: String },
    /// A key present in the actual mapping has no expected counterpart.
    UnexpectedKey { path: String },
    /// Sequences of different lengths; elements are not compared.
    LengthMismatch {
        path: String,
        expected: usize,
        actual: usize,
    },
    /// Scalars at the same path with different values.
    ValueMismatch {
        path: String,
        expected: Value,
        actual: Value,
    },
}

impl Difference {
    /// JSON Pointer to the disagreeing location.
    pub fn path(&self) -> &str {
        match self {
            Difference::TypeMismatch { path, .. }
            | Difference::MissingKey { path }
            | Difference::UnexpectedKey { path }
            | Difference::LengthMismatch { path, .. }
            | Difference::ValueMismatch { path, .. } => path,
        }
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difference::TypeMismatch {
                path,
                expected,
                actual,
            } => write!(
                f,
                "type mismatch at {}: expected {expected}, got {actual}",
                pointer_display(path)
            ),
            Difference::MissingKey { path } => {
                write!(f, "missing key at {}", pointer_display(path))
            }
            Difference::UnexpectedKey { path } => {
                write!(f, "unexpected key at {}", pointer_display(path))
            }
            Difference::LengthMismatch {
                path,
                expected,
                actual,
            } => write!(
                f,
                "length mismatch at {}: expected {expected} elements, got {actual}",
                pointer_display(path)
            ),
            Difference::ValueMismatch {
                path,
                expected,
                actual,
            } => write!(
                f,
                "value mismatch at {}: expected {expected}, got {actual}",
                pointer_display(path)
            ),
        }
    }
}

/// Compares `expected` against `actual` and returns every difference.
///
/// Mappings compare by key set, then by value for shared keys; key order is
/// never significant. Sequences compare by length, then element-wise by
/// position; order is significant. Numbers compare by numeric value, never
/// by literal text (see [`numbers_equal`]).
pub fn diff(expected: &Value, actual: &Value) -> Vec<Difference> {
    let mut out = Vec::new();
    diff_at("", expected, actual, &mut out);
    out
}

/// True iff [`diff`] would report no differences.
pub fn equivalent(expected: &Value, actual: &Value) -> bool {
    diff(expected, actual).is_empty()
}

fn diff_at(path: &str, expected: &Value, actual: &Value, out: &mut Vec<Difference>) {
    match (expected, actual) {
        (Value::Object(e), Value::Object(a)) => diff_objects(path, e, a, out),
        (Value::Array(e), Value::Array(a)) => diff_arrays(path, e, a, out),
        (Value::Number(e), Value::Number(a)) => {
            if !numbers_equal(e, a) {
                out.push(Difference::ValueMismatch {
                    path: path.to_string(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
        (Value::String(e), Value::String(a)) => {
            if e != a {
                out.push(Difference::ValueMismatch {
                    path: path.to_string(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
        (Value::Bool(e), Value::Bool(a)) => {
            if e != a {
                out.push(Difference::ValueMismatch {
                    path: path.to_string(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
        (Value::Null, Value::Null) => {}
        _ => out.push(Difference::TypeMismatch {
            path: path.to_string(),
            expected: kind_name(expected),
            actual: kind_name(actual),
        }),
    }
}

fn diff_objects(
    path: &str,
    expected: &Map<String, Value>,
    actual: &Map<String, Value>,
    out: &mut Vec<Difference>,
) {
    for (key, expected_value) in expected {
        match actual.get(key) {
            Some(actual_value) => {
                diff_at(&child_key(path, key), expected_value, actual_value, out)
            }
            None => out.push(Difference::MissingKey {
                path: child_key(path, key),
            }),
        }
    }
    for key in actual.keys() {
        if !expected.contains_key(key) {
            out.push(Difference::UnexpectedKey {
                path: child_key(path, key),
            });
        }
    }
}

fn diff_arrays(path: &str, expected: &[Value], actual: &[Value], out: &mut Vec<Difference>) {
    if expected.len() != actual.len() {
        out.push(Difference::LengthMismatch {
            path: path.to_string(),
            expected: expected.len(),
            actual: actual.len(),
        });
        return;
    }
    for (idx, (expected_value, actual_value)) in expected.iter().zip(actual).enumerate() {
        diff_at(&child_index(path, idx), expected_value, actual_value, out);
    }
}

/// Numeric equality by value. Both-integral comparisons are exact over
/// `i64`/`u64`, so 64-bit integers beyond `f64` precision never collapse.
/// Anything involving a float compares as `f64` with 1e-12 relative slack;
/// plain equality (including `1` vs `1.0`) always passes.
pub fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    if !a.is_f64() && !b.is_f64() {
        // integral with disjoint ranges: negative vs above i64::MAX
        return false;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => f64_close(x, y),
        _ => false,
    }
}

fn f64_close(x: f64, y: f64) -> bool {
    if x == y {
        return true;
    }
    let scale = x.abs().max(y.abs());
    (x - y).abs() <= scale * REL_TOLERANCE
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn pointer_display(path: &str) -> &str {
    if path.is_empty() {
        "(root)"
    } else {
        path
    }
}

fn child_key(parent: &str, key: &str) -> String {
    if key.contains(['~', '/']) {
        let escaped = key.replace('~', "~0").replace('/', "~1");
        format!("{parent}/{escaped}")
    } else {
        format!("{parent}/{key}")
    }
}

fn child_index(parent: &str, idx: usize) -> String {
    format!("{parent}/{idx}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_documents_are_equivalent() {
        let doc = json!({"a": [1, 2, 3], "b": {"c": null, "d": "x"}});
        assert!(equivalent(&doc, &doc.clone()));
    }

    #[test]
    fn key_order_is_not_significant() {
        let left: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let right: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(diff(&left, &right), Vec::new());
    }

    #[test]
    fn sequence_order_is_significant() {
        let left = json!([1, 2]);
        let right = json!([2, 1]);
        let report = diff(&left, &right);
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].path(), "/0");
        assert_eq!(report[1].path(), "/1");
    }

    #[test]
    fn integer_and_float_of_same_value_are_equal() {
        let left: Value = serde_json::from_str(r#"{"x":1}"#).unwrap();
        let right: Value = serde_json::from_str(r#"{"x":1.0}"#).unwrap();
        assert!(equivalent(&left, &right));
    }

    #[test]
    fn whitespace_and_formatting_are_not_compared() {
        let left: Value = serde_json::from_str(r#"{"a":[1,2,3]}"#).unwrap();
        let right: Value = serde_json::from_str("{\"a\": [1, 2, 3]}").unwrap();
        assert!(equivalent(&left, &right));
    }

    #[test]
    fn large_unsigned_integers_compare_exactly() {
        // adjacent u64 values collapse under f64, must still differ here
        let left: Value = serde_json::from_str("18446744073709551615").unwrap();
        let right: Value = serde_json::from_str("18446744073709551614").unwrap();
        let report = diff(&left, &right);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].path(), "");
    }

    #[test]
    fn negative_vs_large_unsigned_differs() {
        let left: Value = serde_json::from_str("-1").unwrap();
        let right: Value = serde_json::from_str("18446744073709551615").unwrap();
        assert!(!equivalent(&left, &right));
    }

    #[test]
    fn float_roundtrip_drift_is_within_tolerance() {
        let left: Value = serde_json::from_str("0.3").unwrap();
        let right: Value = serde_json::from_str("0.30000000000000004").unwrap();
        assert!(equivalent(&left, &right));
    }

    #[test]
    fn distinct_floats_beyond_tolerance_differ() {
        let left: Value = serde_json::from_str("1.0").unwrap();
        let right: Value = serde_json::from_str("1.001").unwrap();
        assert!(!equivalent(&left, &right));
    }

    #[test]
    fn zero_compares_equal_regardless_of_sign() {
        let left: Value = serde_json::from_str("0.0").unwrap();
        let right: Value = serde_json::from_str("-0.0").unwrap();
        assert!(equivalent(&left, &right));
    }

    #[test]
    fn missing_and_unexpected_keys_are_reported_by_pointer() {
        let left = json!({"keep": 1, "gone": 2});
        let right = json!({"keep": 1, "extra": 3});
        let report = diff(&left, &right);
        assert!(report.contains(&Difference::MissingKey {
            path: "/gone".to_string()
        }));
        assert!(report.contains(&Difference::UnexpectedKey {
            path: "/extra".to_string()
        }));
        assert_eq!(report.len(), 2);
    }

    #[test]
    fn type_mismatch_stops_descent() {
        let left = json!({"a": {"b": 1}});
        let right = json!({"a": [1]});
        let report = diff(&left, &right);
        assert_eq!(
            report,
            vec![Difference::TypeMismatch {
                path: "/a".to_string(),
                expected: "object",
                actual: "array",
            }]
        );
    }

    #[test]
    fn length_mismatch_stops_element_comparison() {
        let left = json!([1, 2, 3]);
        let right = json!([9, 9]);
        let report = diff(&left, &right);
        assert_eq!(
            report,
            vec![Difference::LengthMismatch {
                path: "".to_string(),
                expected: 3,
                actual: 2,
            }]
        );
    }

    #[test]
    fn nested_paths_use_json_pointers() {
        let left = json!({"a": [{"b": 1}]});
        let right = json!({"a": [{"b": 2}]});
        let report = diff(&left, &right);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].path(), "/a/0/b");
    }

    #[test]
    fn pointer_tokens_are_escaped() {
        let left = json!({"a/b": 1, "c~d": 2});
        let right = json!({"a/b": 9, "c~d": 2});
        let report = diff(&left, &right);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].path(), "/a~1b");
    }

    #[test]
    fn null_vs_false_is_a_type_mismatch() {
        let report = diff(&Value::Null, &json!(false));
        assert_eq!(
            report,
            vec![Difference::TypeMismatch {
                path: "".to_string(),
                expected: "null",
                actual: "boolean",
            }]
        );
    }

    #[test]
    fn display_names_the_pointer() {
        let report = diff(&json!({"x": 1}), &json!({"x": 2}));
        assert_eq!(
            report[0].to_string(),
            "value mismatch at /x: expected 1, got 2"
        );
    }

    #[test]
    fn display_names_the_root() {
        let report = diff(&json!(1), &json!("1"));
        assert_eq!(
            report[0].to_string(),
            "type mismatch at (root): expected number, got string"
        );
    }

    #[test]
    fn differences_serialize_with_kind_tags() {
        let report = diff(&json!({"a": 1}), &json!({}));
        let encoded = serde_json::to_value(&report).unwrap();
        assert_eq!(encoded, json!([{"kind": "missing_key", "path": "/a"}]));
    }
}
