//! Partial document updates
//!
//! A `Patch` is an ordered list of `(dotted.path, op)` pairs applied to a JSON
//! document. `Increment` is the building block for lost-update-free counters:
//! implementations must apply it against the stored value, never against a
//! value the caller read earlier.
//!
//! Path segments are split on `.`, so keys used in dotted paths (member ids,
//! action keys) must not contain dots themselves.

use serde_json::{Map, Value};

use super::StoreError;

/// One field operation.
#[derive(Debug, Clone)]
pub enum FieldOp {
    /// Replace the value at the path, creating intermediate objects.
    Set(Value),
    /// Add to the integer at the path; an absent field counts as 0.
    Increment(i64),
}

/// An ordered set of field operations.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    ops: Vec<(String, FieldOp)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push((path.into(), FieldOp::Set(value.into())));
        self
    }

    pub fn increment(mut self, path: impl Into<String>, delta: i64) -> Self {
        self.ops.push((path.into(), FieldOp::Increment(delta)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[(String, FieldOp)] {
        &self.ops
    }
}

/// Apply a patch to a document in place.
///
/// Intermediate objects are created for `Set` and `Increment`; descending
/// through a non-object value is an error.
pub fn apply_patch(doc: &mut Value, patch: &Patch) -> Result<(), StoreError> {
    for (path, op) in patch.ops() {
        apply_op(doc, path, op)?;
    }
    Ok(())
}

fn apply_op(doc: &mut Value, path: &str, op: &FieldOp) -> Result<(), StoreError> {
    let mut segments = path.split('.').peekable();
    let mut current = doc;

    loop {
        let segment = segments.next().ok_or_else(|| StoreError::InvalidPatch {
            path: path.to_string(),
            reason: "empty path".to_string(),
        })?;
        if segment.is_empty() {
            return Err(StoreError::InvalidPatch {
                path: path.to_string(),
                reason: "empty path segment".to_string(),
            });
        }

        let map = as_object(current, path)?;
        if segments.peek().is_none() {
            apply_leaf(map, segment, path, op)?;
            return Ok(());
        }

        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

fn apply_leaf(
    map: &mut Map<String, Value>,
    key: &str,
    path: &str,
    op: &FieldOp,
) -> Result<(), StoreError> {
    match op {
        FieldOp::Set(value) => {
            map.insert(key.to_string(), value.clone());
        }
        FieldOp::Increment(delta) => {
            let current = match map.get(key) {
                None | Some(Value::Null) => 0,
                Some(value) => value.as_i64().ok_or_else(|| StoreError::InvalidPatch {
                    path: path.to_string(),
                    reason: format!("cannot increment non-integer value {value}"),
                })?,
            };
            map.insert(key.to_string(), Value::from(current + delta));
        }
    }
    Ok(())
}

fn as_object<'a>(value: &'a mut Value, path: &str) -> Result<&'a mut Map<String, Value>, StoreError> {
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    value.as_object_mut().ok_or_else(|| StoreError::InvalidPatch {
        path: path.to_string(),
        reason: "path traverses a non-object value".to_string(),
    })
}

/// Read a dotted path out of a document.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_creates_nested_objects() {
        let mut doc = json!({});
        let patch = Patch::new().set("a.b.c", 5).set("a.d", "x");
        apply_patch(&mut doc, &patch).unwrap();
        assert_eq!(doc, json!({"a": {"b": {"c": 5}, "d": "x"}}));
    }

    #[test]
    fn test_increment_from_absent_counts_from_zero() {
        let mut doc = json!({"counts": {}});
        let patch = Patch::new().increment("counts.kael", 250);
        apply_patch(&mut doc, &patch).unwrap();
        apply_patch(&mut doc, &patch).unwrap();
        assert_eq!(get_path(&doc, "counts.kael"), Some(&json!(500)));
    }

    #[test]
    fn test_increment_negative() {
        let mut doc = json!({"count": 2});
        apply_patch(&mut doc, &Patch::new().increment("count", -1)).unwrap();
        assert_eq!(doc, json!({"count": 1}));
    }

    #[test]
    fn test_increment_non_integer_fails() {
        let mut doc = json!({"name": "boss"});
        let err = apply_patch(&mut doc, &Patch::new().increment("name", 1)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPatch { .. }));
    }

    #[test]
    fn test_traverse_scalar_fails() {
        let mut doc = json!({"a": 1});
        let err = apply_patch(&mut doc, &Patch::new().set("a.b", 2)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPatch { .. }));
    }

    #[test]
    fn test_ops_apply_in_order() {
        let mut doc = json!({});
        let patch = Patch::new().set("hp", 100).increment("hp", -30);
        apply_patch(&mut doc, &patch).unwrap();
        assert_eq!(doc, json!({"hp": 70}));
    }
}
