use serde_json::Value;

/// Shallow-merges `patch` into `target`: top-level fields present in the patch
/// overwrite, every other existing field is preserved.
///
/// A non-object target is replaced by the patch. A non-object patch replaces
/// the target outright.
pub fn merge_shallow(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                existing.insert(key, value);
            }
        }
        (slot, replacement) => *slot = replacement,
    }
}
