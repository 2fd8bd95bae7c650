// src/core/resolver.rs
//
// Placeholder resolution for user-authored text: `${expr}` segments are
// evaluated against the run's variables. Failures never reach the caller,
// a broken placeholder simply renders as an empty string.

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::expression::{self, display_string};

lazy_static::lazy_static! {
    /// `${` up to the next `}`
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\$\{([^}]+)\}").unwrap();
}

/// Resolves a template string.
///
/// - no placeholders (or empty input): returned unchanged as a string
/// - exactly one placeholder spanning the whole input: the typed result
/// - otherwise: each placeholder replaced by the string form of its value
pub fn resolve_template(raw: &str, vars: &Map<String, Value>) -> Value {
    if raw.is_empty() || !raw.contains("${") {
        return Value::String(raw.to_string());
    }

    if let Some(inner) = whole_placeholder(raw) {
        return match expression::evaluate(inner, vars) {
            Ok(value) => value.unwrap_or(Value::Null),
            Err(e) => {
                debug!("Placeholder '{}' failed: {}", inner, e);
                Value::String(String::new())
            }
        };
    }

    let rendered = PLACEHOLDER_RE.replace_all(raw, |caps: &Captures| {
        match expression::evaluate_raw(&caps[1], vars) {
            Ok(value) if value.is_undefined() => String::new(),
            Ok(value) => value.render(),
            Err(e) => {
                debug!("Placeholder '{}' failed: {}", &caps[1], e);
                String::new()
            }
        }
    });
    Value::String(rendered.into_owned())
}

/// Same as [`resolve_template`] but always yields text.
pub fn resolve_string(raw: &str, vars: &Map<String, Value>) -> String {
    match resolve_template(raw, vars) {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => display_string(&other),
    }
}

/// Resolves a configuration value: strings are templates, anything else is
/// already typed and passes through untouched.
pub fn resolve_value(value: &Value, vars: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => resolve_template(s, vars),
        other => other.clone(),
    }
}

/// Inner expression when `raw` is a single placeholder and nothing else.
fn whole_placeholder(raw: &str) -> Option<&str> {
    if raw.len() <= 3 || !raw.starts_with("${") || !raw.ends_with('}') {
        return None;
    }
    if raw[1..].contains("${") {
        return None;
    }
    Some(&raw[2..raw.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_whole_placeholder_keeps_type() {
        let v = vars(json!({ "a": [1, 2, 3], "page": { "n": 4 } }));
        assert_eq!(resolve_template("${a}", &v), json!([1, 2, 3]));
        assert_eq!(resolve_template("${page.n + 1}", &v), json!(5));
        assert_eq!(resolve_template("${page}", &v), json!({ "n": 4 }));
    }

    #[test]
    fn test_interpolation_renders_strings() {
        let v = vars(json!({ "a": [1, 2, 3], "page": 2, "host": "example.com" }));
        assert_eq!(resolve_template("n=${a}", &v), json!("n=1,2,3"));
        assert_eq!(
            resolve_template("https://${host}/list?page=${page}", &v),
            json!("https://example.com/list?page=2")
        );
        assert_eq!(resolve_template("${page}${page}", &v), json!("22"));
    }

    #[test]
    fn test_non_finite_results_render_by_name() {
        let v = vars(json!({ "zero": 0 }));
        assert_eq!(resolve_template("x=${1 / zero}", &v), json!("x=Infinity"));
        assert_eq!(resolve_template("x=${-1 / zero}", &v), json!("x=-Infinity"));
        assert_eq!(resolve_template("x=${'a' * 2}", &v), json!("x=NaN"));
        assert_eq!(resolve_template("x=${null}", &v), json!("x=null"));
        // typed results have no JSON form for them
        assert_eq!(resolve_template("${1 / zero}", &v), Value::Null);
    }

    #[test]
    fn test_failures_render_empty() {
        let v = vars(json!({ "obj": {} }));
        assert_eq!(resolve_template("${missing}", &v), json!(""));
        assert_eq!(resolve_template("x=${missing}!", &v), json!("x=!"));
        assert_eq!(resolve_template("${obj.none}", &v), Value::Null);
        assert_eq!(resolve_template("y=${obj.none}", &v), json!("y="));
        assert_eq!(resolve_template("${1 +}", &v), json!(""));
    }

    #[test]
    fn test_plain_text_is_unchanged() {
        let v = Map::new();
        assert_eq!(resolve_template("", &v), json!(""));
        assert_eq!(resolve_template("plain $text {here}", &v), json!("plain $text {here}"));
        assert_eq!(resolve_template("${}", &v), json!("${}"));
    }

    #[test]
    fn test_resolve_value_passes_typed_config_through() {
        let v = vars(json!({ "n": 3 }));
        assert_eq!(resolve_value(&json!(5), &v), json!(5));
        assert_eq!(resolve_value(&json!("${n}"), &v), json!(3));
        assert_eq!(resolve_string("${n}", &v), "3");
    }
}
