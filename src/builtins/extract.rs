// src/builtins/extract.rs
//
// Extraction engine. Pure functions over the stored `resp` record; the
// document is parsed from `resp.html` for each query.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use super::Step;
use crate::core::context::ExecutionContext;
use crate::core::error::FlowError;
use crate::core::expression::display_string;
use crate::core::graph::ExtractConfig;
use crate::core::resolver::resolve_string;

lazy_static! {
    static ref TITLE_SELECTOR: Selector = Selector::parse("title").unwrap();
    static ref JSONPATH_ROOT: Regex = Regex::new(r"^\$\.?").unwrap();
}

/// Text of the document's `<title>`, empty when there is none.
pub fn document_title(html: &str) -> String {
    let doc = Html::parse_document(html);
    doc.select(&TITLE_SELECTOR)
        .flat_map(|el| el.text())
        .collect()
}

pub fn parse_selector(selector: &str) -> Result<Selector, FlowError> {
    Selector::parse(selector)
        .map_err(|e| FlowError::Data(format!("Invalid selector '{}': {:?}", selector, e)))
}

/// `text` (trimmed), `html` (inner markup) or the named attribute.
pub fn element_value(el: &ElementRef<'_>, attribute: &str) -> String {
    match attribute {
        "text" => el.text().collect::<String>().trim().to_string(),
        "html" => el.inner_html(),
        name => el.value().attr(name).unwrap_or_default().to_string(),
    }
}

/// Every element matching a CSS selector, mapped through `attribute`.
pub fn query_dom(html: &str, selector: &str, attribute: &str) -> Result<Vec<String>, FlowError> {
    let selector = parse_selector(selector)?;
    let doc = Html::parse_document(html);
    Ok(doc
        .select(&selector)
        .map(|el| element_value(&el, attribute))
        .collect())
}

/// All matches of `pattern`; group 1 when it captured something, else the whole match.
pub fn regex_matches(html: &str, pattern: &str) -> Result<Vec<String>, FlowError> {
    let re = Regex::new(pattern)
        .map_err(|e| FlowError::Data(format!("Invalid regular expression: {}", e)))?;
    Ok(re
        .captures_iter(html)
        .map(|caps| {
            caps.get(1)
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| caps.get(0).map(|m| m.as_str()).unwrap_or_default())
                .to_string()
        })
        .collect())
}

/// Minimal path dialect: `$.a.b`, `*` / `[*]` / `a[*]` fan out over arrays,
/// `a[2]` / `[2]` index into them. Leaf arrays fan out too.
pub fn json_path(json: &Value, path: &str) -> Vec<String> {
    let trimmed = JSONPATH_ROOT.replace(path.trim(), "");
    let segments: Vec<&str> = trimmed.split('.').filter(|s| !s.is_empty()).collect();
    let mut out = Vec::new();
    walk(json, &segments, &mut out);
    out
}

fn walk(value: &Value, segments: &[&str], out: &mut Vec<String>) {
    let Some((head, rest)) = segments.split_first() else {
        match value {
            Value::Array(items) => out.extend(items.iter().map(leaf_string)),
            other => out.push(leaf_string(other)),
        }
        return;
    };

    let (key, index) = split_segment(head);
    let target = if key.is_empty() || key == "*" {
        Some(value)
    } else {
        value.as_object().and_then(|obj| obj.get(key))
    };
    let Some(target) = target else {
        return;
    };

    match index {
        None if key == "*" => {
            if let Value::Array(items) = target {
                items.iter().for_each(|item| walk(item, rest, out));
            }
        }
        None => walk(target, rest, out),
        Some("*") => {
            if let Value::Array(items) = target {
                items.iter().for_each(|item| walk(item, rest, out));
            }
        }
        Some(n) => {
            let item = n.trim().parse::<usize>().ok().and_then(|i| target.get(i));
            if let Some(item) = item {
                walk(item, rest, out);
            }
        }
    }
}

/// `key[idx]` -> (`key`, Some(`idx`)); plain `key` -> (`key`, None).
fn split_segment(segment: &str) -> (&str, Option<&str>) {
    if let (Some(open), true) = (segment.find('['), segment.ends_with(']')) {
        (&segment[..open], Some(&segment[open + 1..segment.len() - 1]))
    } else {
        (segment, None)
    }
}

fn leaf_string(value: &Value) -> String {
    match value {
        Value::Object(_) => value.to_string(),
        other => display_string(other),
    }
}

/// Applies one selection strategy to a `resp` record. Unknown strategies match nothing.
pub fn extract_values(
    resp: &Value,
    selector_type: &str,
    selector: &str,
    attribute: &str,
) -> Result<Vec<String>, FlowError> {
    if selector.is_empty() {
        return Ok(Vec::new());
    }
    let html = resp.get("html").and_then(Value::as_str).unwrap_or_default();
    match selector_type {
        "css" | "xpath" => query_dom(html, selector, attribute),
        "regex" => regex_matches(html, selector),
        "jsonpath" => Ok(match resp.get("json") {
            None | Some(Value::Null) => Vec::new(),
            Some(json) => json_path(json, selector),
        }),
        _ => Ok(Vec::new()),
    }
}

fn has_response(ctx: &ExecutionContext) -> bool {
    !matches!(ctx.get("resp"), None | Some(Value::Null))
}

pub fn run_extract(cfg: &ExtractConfig, node_id: &str, ctx: &mut ExecutionContext) -> Step {
    let node = Some(node_id);
    if !has_response(ctx) {
        ctx.error("Extract node: No response available (resp is undefined)", node);
        return Step::Halt;
    }

    let selector = resolve_string(cfg.selector.as_deref().unwrap_or_default(), &ctx.variables);
    let selector_type = cfg.selector_type();
    ctx.info(format!("Extracting with {}: {}", selector_type, selector), node);

    let outcome = match ctx.get("resp") {
        Some(resp) => extract_values(resp, selector_type, &selector, cfg.attribute()),
        None => Ok(Vec::new()),
    };

    match outcome {
        Ok(values) => {
            let output_var = cfg.output_var();
            let summary = if cfg.multiple() {
                let summary = format!("{} items", values.len());
                ctx.set(output_var, Value::from(values));
                summary
            } else {
                let first = values.into_iter().next().unwrap_or_default();
                ctx.set(output_var, Value::String(first));
                "1 item".to_string()
            };
            ctx.info(
                format!("Extracted {} into variable \"{}\"", summary, output_var),
                node,
            );
            Step::Continue
        }
        Err(e) => {
            ctx.error(format!("Extract failed: {}", e), node);
            ctx.set_exception(&e);
            Step::Halt
        }
    }
}
