//! `{{ path }}` placeholder rendering for handler configuration.
//!
//! Paths are dotted lookups into a JSON scope, e.g. `{{ input.topic }}`,
//! `{{ results.gather }}` or `{{ results.review.score }}`. Unknown paths are
//! left in place rather than treated as errors.

use serde_json::Value;

/// Look up a dotted path (`a.b.0.c`) in a JSON value.
pub fn lookup<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(scope, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a value for text substitution. Strings are inserted raw, other
/// values as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replace every resolvable `{{ path }}` in `template`.
pub fn render(template: &str, scope: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        let close = open + 2 + close;
        let path = rest[open + 2..close].trim();

        out.push_str(&rest[..open]);
        match lookup(scope, path) {
            Some(value) if !path.is_empty() => out.push_str(&value_to_string(value)),
            _ => out.push_str(&rest[open..close + 2]),
        }
        rest = &rest[close + 2..];
    }

    out.push_str(rest);
    out
}
