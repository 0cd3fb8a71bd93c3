// ruleflow-core/src/core/template.rs
// ============================================================================
// Module: Ruleflow Templates
// Description: `{{path}}` and `$n` template expansion over binding scopes.
// Purpose: Expand action fields against the per-firing binding context.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Action strings may embed `{{path}}` references resolved against the
//! binding scope and `$n` tokens resolved against wildcard captures from the
//! trigger match. References that do not resolve expand to the empty string.
//! Whole-string references inside JSON values keep the referenced value's
//! type instead of stringifying it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

// ============================================================================
// SECTION: Path Resolution
// ============================================================================

/// Resolves a dotted path inside a JSON value.
#[must_use]
pub fn resolve_path<'scope>(scope: &'scope Value, path: &str) -> Option<&'scope Value> {
    let mut current = scope;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Renders a JSON value for embedding into an expanded string.
///
/// Strings render unquoted; null renders empty; everything else renders as
/// compact JSON.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// SECTION: String Expansion
// ============================================================================

/// Returns true when the text contains template placeholders or captures.
#[must_use]
pub fn has_placeholders(text: &str) -> bool {
    text.contains("{{") || text.contains('$')
}

/// Expands `$n` captures and `{{path}}` references in a template string.
#[must_use]
pub fn expand_str(template: &str, scope: &Value, captures: &[String]) -> String {
    let mut expanded = template.to_string();
    for (position, capture) in captures.iter().enumerate().rev() {
        let token = format!("${}", position + 1);
        expanded = expanded.replace(&token, capture);
    }

    let mut output = String::with_capacity(expanded.len());
    let mut rest = expanded.as_str();
    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[.. open]);
        let after_open = &rest[open + 2 ..];
        let Some(close) = after_open.find("}}") else {
            output.push_str(&rest[open ..]);
            rest = "";
            break;
        };
        let path = after_open[.. close].trim();
        if let Some(value) = resolve_path(scope, path) {
            output.push_str(&stringify(value));
        }
        rest = &after_open[close + 2 ..];
    }
    output.push_str(rest);
    output
}

/// Expands string leaves of a JSON value.
///
/// A string consisting of exactly one `{{path}}` reference resolves to the
/// referenced value itself, preserving its JSON type; unresolved whole-string
/// references become null.
#[must_use]
pub fn expand_value(value: &Value, scope: &Value, captures: &[String]) -> Value {
    match value {
        Value::String(text) => {
            if let Some(path) = whole_reference(text) {
                return resolve_path(scope, path).cloned().unwrap_or(Value::Null);
            }
            Value::String(expand_str(text, scope, captures))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| expand_value(item, scope, captures))
                .collect(),
        ),
        Value::Object(fields) => {
            let mut expanded = serde_json::Map::with_capacity(fields.len());
            for (key, field) in fields {
                expanded.insert(
                    expand_str(key, scope, captures),
                    expand_value(field, scope, captures),
                );
            }
            Value::Object(expanded)
        }
        other => other.clone(),
    }
}

/// Returns the inner path when the text is exactly one `{{path}}` reference.
fn whole_reference(text: &str) -> Option<&str> {
    let stripped = text.strip_prefix("{{")?.strip_suffix("}}")?;
    let path = stripped.trim();
    if path.is_empty() || path.contains("{{") || path.contains("}}") {
        return None;
    }
    Some(path)
}

// ============================================================================
// SECTION: Reference Collection
// ============================================================================

/// Collects `{{path}}` references from a template string.
pub fn collect_refs(template: &str, refs: &mut Vec<String>) {
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let after_open = &rest[open + 2 ..];
        let Some(close) = after_open.find("}}") else {
            return;
        };
        let path = after_open[.. close].trim();
        if !path.is_empty() {
            refs.push(path.to_string());
        }
        rest = &after_open[close + 2 ..];
    }
}

/// Collects `{{path}}` references from string leaves of a JSON value.
pub fn collect_value_refs(value: &Value, refs: &mut Vec<String>) {
    match value {
        Value::String(text) => collect_refs(text, refs),
        Value::Array(items) => {
            for item in items {
                collect_value_refs(item, refs);
            }
        }
        Value::Object(fields) => {
            for field in fields.values() {
                collect_value_refs(field, refs);
            }
        }
        _ => {}
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        reason = "Test-only assertions are permitted."
    )]

    use serde_json::json;

    use super::collect_refs;
    use super::expand_str;
    use super::expand_value;
    use super::resolve_path;

    #[test]
    fn expands_paths_and_captures() {
        let scope = json!({"event": {"orderId": "o-7", "total": 42}});
        let captures = vec!["42".to_string()];
        let expanded = expand_str(
            "order {{event.orderId}} for customer-$1 total {{event.total}}",
            &scope,
            &captures,
        );
        assert_eq!(expanded, "order o-7 for customer-42 total 42");
    }

    #[test]
    fn missing_references_expand_to_empty() {
        let scope = json!({});
        assert_eq!(expand_str("x={{event.missing}}!", &scope, &[]), "x=!");
    }

    #[test]
    fn whole_string_reference_preserves_type() {
        let scope = json!({"event": {"count": 3, "flag": true}});
        let expanded = expand_value(
            &json!({"n": "{{event.count}}", "b": "{{event.flag}}", "s": "n={{event.count}}"}),
            &scope,
            &[],
        );
        assert_eq!(expanded, json!({"n": 3, "b": true, "s": "n=3"}));
    }

    #[test]
    fn resolve_path_walks_nested_objects() {
        let scope = json!({"a": {"b": {"c": 1}}});
        assert_eq!(resolve_path(&scope, "a.b.c"), Some(&json!(1)));
        assert_eq!(resolve_path(&scope, "a.b.missing"), None);
    }

    #[test]
    fn collects_references() {
        let mut refs = Vec::new();
        collect_refs("{{event.user}} and {{ context.threshold }}", &mut refs);
        assert_eq!(refs, vec!["event.user", "context.threshold"]);
    }

    #[test]
    fn unterminated_reference_is_left_verbatim() {
        let scope = json!({});
        assert_eq!(expand_str("broken {{event.x", &scope, &[]), "broken {{event.x");
    }
}
