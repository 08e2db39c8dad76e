//! `{{name}}` placeholder substitution for step inputs.
//!
//! Interpolation is pure and structure-preserving: strings have their
//! placeholders replaced, arrays and objects are rebuilt element by element,
//! and every other JSON value is returned as-is. The input is never mutated.
//!
//! Unknown references are left as-is (not an error), which is what lets a
//! step read a snapshot of a context that is still being filled in.

use std::collections::HashMap;

use serde_json::Value;

use super::context::lookup;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Resolve placeholders throughout a JSON value.
pub fn interpolate(value: &Value, context: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_str(s, context)),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve placeholders in a single string.
///
/// `{{ name }}` (whitespace inside the braces is ignored) is replaced with the
/// stringified context value. Dotted names reach into nested objects.
/// Substituted text is not scanned again, so a context value that itself
/// contains `{{...}}` is inserted verbatim. Interpolating a second time only
/// matches the first pass when no context value holds a placeholder.
pub fn interpolate_str(template: &str, context: &HashMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];

        let Some(end) = after_open.find(CLOSE) else {
            rest = &rest[start..];
            break;
        };

        let name = after_open[..end].trim();
        let resolved = if is_identifier(name) {
            lookup(context, name)
        } else {
            None
        };

        match resolved {
            Some(value) => {
                out.push_str(&value_to_string(value));
                rest = &after_open[end + CLOSE.len()..];
            }
            None => {
                // Keep the literal opener and rescan from just past it.
                out.push_str(OPEN);
                rest = after_open;
            }
        }
    }

    out.push_str(rest);
    out
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '-')
}

/// Convert a JSON value to its substitution text.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Objects and arrays become compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
