//! Global context store helpers.
//!
//! The global context is the only channel between steps: a flat
//! `key -> value` map owned by the workflow record. Each step writes exactly
//! one key, `<step name>_result`, so concurrent steps never contend for the
//! same entry. Readers (gate evaluation, template interpolation) work on a
//! cloned snapshot and tolerate keys that have not been written yet.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum serialized size of a single merged step result (1 MB).
pub const MAX_RESULT_SIZE: usize = 1_048_576;

/// Suffix appended to a step's name to form its context key.
pub const RESULT_KEY_SUFFIX: &str = "_result";

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// The context key a step's result is stored under.
pub fn result_key(step_name: &str) -> String {
    format!("{step_name}{RESULT_KEY_SUFFIX}")
}

/// Merge a step result into the context.
///
/// Only structured results (objects and arrays) are merged; scalars and null
/// are left out of the context. Results larger than `MAX_RESULT_SIZE` are
/// replaced by a truncation marker. Returns `true` if an entry was written.
pub fn merge_step_result(
    context: &mut HashMap<String, Value>,
    step_name: &str,
    result: &Value,
) -> bool {
    if !is_structured(result) {
        return false;
    }

    let key = result_key(step_name);
    let size = serde_json::to_string(result).map(|s| s.len()).unwrap_or(0);
    if size > MAX_RESULT_SIZE {
        tracing::warn!(
            key = key.as_str(),
            size,
            max = MAX_RESULT_SIZE,
            "step result exceeds size limit, truncating context entry"
        );
        context.insert(
            key,
            json!({
                "_truncated": true,
                "_original_size": size,
                "_message": format!("result exceeded {MAX_RESULT_SIZE} byte limit and was truncated"),
            }),
        );
    } else {
        context.insert(key, result.clone());
    }
    true
}

fn is_structured(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Look up an identifier, falling back to a dotted path into nested objects.
///
/// `fetch_result` matches a top-level key directly; `fetch_result.rows`
/// resolves `rows` inside it when no key named `fetch_result.rows` exists.
pub fn lookup<'a>(context: &'a HashMap<String, Value>, identifier: &str) -> Option<&'a Value> {
    if let Some(value) = context.get(identifier) {
        return Some(value);
    }

    let mut segments = identifier.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Build the JSON object gate expressions evaluate against.
///
/// Context keys become top-level free variables.
pub fn to_expression_context(context: &HashMap<String, Value>) -> Value {
    let map: Map<String, Value> = context
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(map)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
