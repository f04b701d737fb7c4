//! Template parameter resolution: steps reference prior step outputs
//! (`${steps.X.output.path}`) and state entries (`${state.key}`)
//! (spec.md §4.K).

use std::collections::HashMap;

use helm_state::StateStore;
use serde_json::Value;

/// Read-only context a template is resolved against.
pub struct TemplateContext<'a> {
    /// Outputs of steps that have already run, keyed by step id.
    pub step_outputs: &'a HashMap<String, Value>,
    /// The workflow's state store.
    pub state: &'a StateStore,
}

/// Walk `value` recursively, replacing every `${...}` reference with its
/// resolved value. A string that is *exactly* one reference is replaced
/// with the referenced JSON value (preserving its type); a reference
/// embedded in a larger string is substituted as its scalar text form.
#[must_use]
pub fn resolve_template(value: &Value, ctx: &TemplateContext<'_>) -> Value {
    match value {
        Value::String(s) => resolve_string(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_template(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_template(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, ctx: &TemplateContext<'_>) -> Value {
    if let Some(path) = exact_reference(s) {
        return resolve_path(path, ctx).unwrap_or(Value::Null);
    }

    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let path = &rest[start + 2..start + end];
        let resolved = resolve_path(path, ctx).unwrap_or(Value::Null);
        out.push_str(&scalar_to_string(&resolved));
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    Value::String(out)
}

fn exact_reference(s: &str) -> Option<&str> {
    let trimmed = s.strip_prefix("${")?.strip_suffix('}')?;
    if trimmed.contains("${") {
        None
    } else {
        Some(trimmed)
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn resolve_path(path: &str, ctx: &TemplateContext<'_>) -> Option<Value> {
    let mut parts = path.split('.');
    match parts.next()? {
        "steps" => {
            let step_id = parts.next()?;
            let output = ctx.step_outputs.get(step_id)?;
            let mut rest = parts.peekable();
            if rest.next()? != "output" {
                return None;
            }
            navigate(output, rest)
        }
        "state" => {
            let key = parts.next()?;
            let value = ctx.state.get(key)?;
            navigate(&value, parts)
        }
        _ => None,
    }
}

fn navigate<'a>(value: &Value, path: impl Iterator<Item = &'a str>) -> Option<Value> {
    let mut current = value.clone();
    for segment in path {
        current = match current {
            Value::Object(ref map) => map.get(segment)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_state::SetOptions;
    use serde_json::json;

    #[test]
    fn resolves_exact_step_output_reference_preserving_type() {
        let mut outputs = HashMap::new();
        outputs.insert("fetch".to_string(), json!({ "value": { "count": 3 } }));
        let store = StateStore::new();
        let ctx = TemplateContext {
            step_outputs: &outputs,
            state: &store,
        };
        let resolved = resolve_template(&json!("${steps.fetch.output.value.count}"), &ctx);
        assert_eq!(resolved, json!(3));
    }

    #[test]
    fn resolves_state_reference() {
        let store = StateStore::new();
        store.set("greeting", json!("hello"), SetOptions::default());
        let outputs = HashMap::new();
        let ctx = TemplateContext {
            step_outputs: &outputs,
            state: &store,
        };
        assert_eq!(resolve_template(&json!("${state.greeting}"), &ctx), json!("hello"));
    }

    #[test]
    fn interpolates_reference_inside_a_larger_string() {
        let mut outputs = HashMap::new();
        outputs.insert("fetch".to_string(), json!({ "name": "world" }));
        let store = StateStore::new();
        let ctx = TemplateContext {
            step_outputs: &outputs,
            state: &store,
        };
        let resolved = resolve_template(&json!("hello, ${steps.fetch.output.name}!"), &ctx);
        assert_eq!(resolved, json!("hello, world!"));
    }

    #[test]
    fn missing_reference_resolves_to_null() {
        let outputs = HashMap::new();
        let store = StateStore::new();
        let ctx = TemplateContext {
            step_outputs: &outputs,
            state: &store,
        };
        assert_eq!(resolve_template(&json!("${steps.missing.output.x}"), &ctx), Value::Null);
    }

    #[test]
    fn recurses_into_objects_and_arrays() {
        let mut outputs = HashMap::new();
        outputs.insert("a".to_string(), json!({ "x": 1 }));
        let store = StateStore::new();
        let ctx = TemplateContext {
            step_outputs: &outputs,
            state: &store,
        };
        let template = json!({ "nested": ["${steps.a.output.x}", "literal"] });
        let resolved = resolve_template(&template, &ctx);
        assert_eq!(resolved, json!({ "nested": [1, "literal"] }));
    }
}
