// src/core/graph.rs
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_DELAY_MIN_MS: u64 = 1_000;
pub const DEFAULT_DELAY_MAX_MS: u64 = 3_000;
pub const MAX_REDIRECTS: usize = 5;

/// A node as it appears in a flow document. `data` is the open configuration map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, alias = "configuration", alias = "config")]
    pub data: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Branch intent carried by an edge leaving a condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    True,
    False,
    Unmarked,
}

impl FlowEdge {
    pub fn branch(&self) -> Branch {
        let handle = self.source_handle.as_deref();
        let label = self.label.as_deref();
        if handle == Some("true") || matches!(label, Some("true") | Some("yes")) {
            Branch::True
        } else if handle == Some("false") || matches!(label, Some("false") | Some("no")) {
            Branch::False
        } else {
            Branch::Unmarked
        }
    }

    /// Whether this edge fires for a condition that evaluated to `result`.
    /// Unmarked edges ride along with the true branch only.
    pub fn fires_on(&self, result: bool) -> bool {
        match self.branch() {
            Branch::True | Branch::Unmarked => result,
            Branch::False => !result,
        }
    }
}

// ---------------------------------------------------------------------------
// Typed node configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<Map<String, Value>>,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub timeout: Option<u64>,
    #[serde(default, deserialize_with = "de::opt_bool")]
    pub follow_redirects: Option<bool>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub retries: Option<u64>,
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub retry_delay: Option<u64>,
}

impl FetchConfig {
    pub fn method(&self) -> String {
        or_default(&self.method, "GET").to_uppercase()
    }

    /// Configured timeout; missing or zero falls back to `default_ms`.
    pub fn timeout_ms(&self, default_ms: u64) -> u64 {
        self.timeout.filter(|t| *t > 0).unwrap_or(default_ms)
    }

    pub fn max_redirects(&self) -> usize {
        if self.follow_redirects.unwrap_or(true) {
            MAX_REDIRECTS
        } else {
            0
        }
    }

    pub fn retries(&self) -> u64 {
        self.retries.unwrap_or(0)
    }

    pub fn retry_delay_ms(&self) -> u64 {
        self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY_MS)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractConfig {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub selector_type: Option<String>,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default, deserialize_with = "de::opt_bool")]
    pub multiple: Option<bool>,
    #[serde(default)]
    pub output_var: Option<String>,
}

impl ExtractConfig {
    pub fn selector_type(&self) -> &str {
        or_default(&self.selector_type, "css")
    }

    pub fn attribute(&self) -> &str {
        or_default(&self.attribute, "text")
    }

    pub fn multiple(&self) -> bool {
        self.multiple.unwrap_or(true)
    }

    pub fn output_var(&self) -> &str {
        or_default(&self.output_var, "extracted")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoExtractConfig {
    #[serde(default)]
    pub extract_type: Option<String>,
    #[serde(default)]
    pub output_var: Option<String>,
    #[serde(default)]
    pub selectors: Vec<String>,
}

impl VideoExtractConfig {
    pub fn extract_type(&self) -> &str {
        or_default(&self.extract_type, "auto")
    }

    pub fn output_var(&self) -> &str {
        or_default(&self.output_var, "videoUrl")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AntiCrawlConfig {
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub delay_min: Option<u64>,
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub delay_max: Option<u64>,
    #[serde(default)]
    pub user_agents: Option<Vec<String>>,
    #[serde(default)]
    pub cookie_str: Option<String>,
}

impl AntiCrawlConfig {
    pub fn strategy(&self) -> &str {
        or_default(&self.strategy, "delay")
    }

    /// Inclusive delay bounds in milliseconds, normalised so that min <= max.
    pub fn delay_range(&self) -> (u64, u64) {
        let min = self.delay_min.unwrap_or(DEFAULT_DELAY_MIN_MS);
        let max = self.delay_max.unwrap_or(DEFAULT_DELAY_MAX_MS);
        if min <= max {
            (min, max)
        } else {
            (max, min)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    #[serde(default)]
    pub source: Option<Value>,
    #[serde(default)]
    pub item_var: Option<String>,
    #[serde(default)]
    pub index_var: Option<String>,
}

impl LoopConfig {
    pub fn item_var(&self) -> &str {
        or_default(&self.item_var, "item")
    }

    pub fn index_var(&self) -> &str {
        or_default(&self.index_var, "index")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConditionConfig {
    #[serde(default)]
    pub expression: Option<String>,
}

impl ConditionConfig {
    pub fn expression(&self) -> &str {
        or_default(&self.expression, "true")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariableConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputItem {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub items: Vec<OutputItem>,
}

/// Per-type behaviour of a node, with its configuration already typed.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Start,
    Fetch(FetchConfig),
    Extract(ExtractConfig),
    VideoExtract(VideoExtractConfig),
    AntiCrawl(AntiCrawlConfig),
    Loop(LoopConfig),
    Condition(ConditionConfig),
    Variable(VariableConfig),
    Output(OutputConfig),
    End,
    Unknown,
    /// Configuration present but not of the expected shape.
    Invalid { reason: String },
}

impl NodeKind {
    pub fn from_raw(node_type: &str, data: &Value) -> NodeKind {
        // editors send `null` or nothing for nodes without settings
        let data = if data.is_null() {
            Value::Object(Map::new())
        } else {
            data.clone()
        };

        fn typed<T: serde::de::DeserializeOwned>(data: Value, wrap: fn(T) -> NodeKind) -> NodeKind {
            match serde_json::from_value::<T>(data) {
                Ok(config) => wrap(config),
                Err(e) => NodeKind::Invalid {
                    reason: e.to_string(),
                },
            }
        }

        match node_type {
            "start" => NodeKind::Start,
            "end" => NodeKind::End,
            "fetch" => typed(data, NodeKind::Fetch),
            "extract" => typed(data, NodeKind::Extract),
            "video_extract" => typed(data, NodeKind::VideoExtract),
            "anti_crawl" => typed(data, NodeKind::AntiCrawl),
            "loop" => typed(data, NodeKind::Loop),
            "condition" => typed(data, NodeKind::Condition),
            "variable" => typed(data, NodeKind::Variable),
            "output" => typed(data, NodeKind::Output),
            _ => NodeKind::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub node_type: String,
    pub kind: NodeKind,
}

impl Node {
    pub fn from_def(def: &FlowNode) -> Self {
        Node {
            id: def.id.clone(),
            label: def.label.clone(),
            node_type: def.node_type.clone(),
            kind: NodeKind::from_raw(&def.node_type, &def.data),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph model
// ---------------------------------------------------------------------------

/// Read-only view of a flow built once per run.
///
/// `graph` holds only the edges whose endpoints both exist; traversal uses
/// `outgoing`, which keeps every edge in document order.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    pub graph: DiGraph<Node, FlowEdge>,
    pub node_map: HashMap<String, NodeIndex>,
    pub start_node: Option<NodeIndex>,
    pub dangling_edges: Vec<FlowEdge>,
    outgoing: HashMap<String, Vec<FlowEdge>>,
}

impl FlowGraph {
    pub fn build(nodes: &[FlowNode], edges: &[FlowEdge]) -> Self {
        let mut flow = FlowGraph::default();

        for def in nodes {
            let idx = flow.graph.add_node(Node::from_def(def));
            // later duplicates shadow earlier ones, the validator reports them
            flow.node_map.insert(def.id.clone(), idx);
            if flow.start_node.is_none() && def.node_type == "start" {
                flow.start_node = Some(idx);
            }
        }

        for edge in edges {
            flow.outgoing
                .entry(edge.source.clone())
                .or_default()
                .push(edge.clone());

            match (flow.node_map.get(&edge.source), flow.node_map.get(&edge.target)) {
                (Some(&from), Some(&to)) => {
                    flow.graph.add_edge(from, to, edge.clone());
                }
                _ => flow.dangling_edges.push(edge.clone()),
            }
        }

        flow
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_map.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn start(&self) -> Option<&Node> {
        self.start_node.map(|idx| &self.graph[idx])
    }

    /// Outgoing edges of `id` in document order, including inert ones.
    pub fn outgoing(&self, id: &str) -> &[FlowEdge] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}

fn or_default<'a>(value: &'a Option<String>, default: &'a str) -> &'a str {
    match value.as_deref() {
        Some(s) if !s.is_empty() => s,
        _ => default,
    }
}

/// Lenient field decoders: form editors emit numbers and booleans as strings.
mod de {
    use super::*;

    pub fn opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => {
                if let Some(u) = n.as_u64() {
                    Ok(Some(u))
                } else if let Some(f) = n.as_f64() {
                    Ok(Some(if f <= 0.0 { 0 } else { f as u64 }))
                } else {
                    Ok(Some(0))
                }
            }
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("expected a number, got \"{}\"", s))),
            Some(other) => Err(serde::de::Error::custom(format!(
                "expected a number, got {}",
                other
            ))),
        }
    }

    pub fn opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(Value::String(s)) => match s.trim() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                "" => Ok(None),
                other => Err(serde::de::Error::custom(format!(
                    "expected a boolean, got \"{}\"",
                    other
                ))),
            },
            Some(other) => Err(serde::de::Error::custom(format!(
                "expected a boolean, got {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, node_type: &str, data: Value) -> FlowNode {
        FlowNode {
            id: id.to_string(),
            node_type: node_type.to_string(),
            label: id.to_string(),
            data,
        }
    }

    fn edge(source: &str, target: &str) -> FlowEdge {
        FlowEdge {
            id: format!("{}-{}", source, target),
            source: source.to_string(),
            target: target.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_outgoing_keeps_document_order() {
        let nodes = vec![
            node("s", "start", Value::Null),
            node("a", "end", Value::Null),
            node("b", "end", Value::Null),
        ];
        let edges = vec![edge("s", "b"), edge("s", "missing"), edge("s", "a")];
        let flow = FlowGraph::build(&nodes, &edges);

        let targets: Vec<&str> = flow.outgoing("s").iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["b", "missing", "a"]);
        assert_eq!(flow.dangling_edges.len(), 1);
        assert_eq!(flow.graph.edge_count(), 2);
        assert_eq!(flow.start().map(|n| n.id.as_str()), Some("s"));
    }

    #[test]
    fn test_branch_classification() {
        let mut e = edge("c", "x");
        assert_eq!(e.branch(), Branch::Unmarked);
        e.label = Some("yes".into());
        assert_eq!(e.branch(), Branch::True);
        e.label = Some("no".into());
        assert_eq!(e.branch(), Branch::False);
        e.label = None;
        e.source_handle = Some("true".into());
        assert_eq!(e.branch(), Branch::True);
        // a "yes" handle is not a branch marker, only labels accept yes/no
        e.source_handle = Some("yes".into());
        assert_eq!(e.branch(), Branch::Unmarked);

        assert!(!edge("c", "x").fires_on(false));
        assert!(edge("c", "x").fires_on(true));
    }

    #[test]
    fn test_fetch_defaults_and_lenient_numbers() {
        let kind = NodeKind::from_raw(
            "fetch",
            &json!({ "url": "https://example.com", "retries": "2", "followRedirects": false }),
        );
        let NodeKind::Fetch(cfg) = kind else {
            panic!("expected fetch config");
        };
        assert_eq!(cfg.method(), "GET");
        assert_eq!(cfg.timeout_ms(DEFAULT_TIMEOUT_MS), DEFAULT_TIMEOUT_MS);
        assert_eq!(cfg.retries(), 2);
        assert_eq!(cfg.retry_delay_ms(), DEFAULT_RETRY_DELAY_MS);
        assert_eq!(cfg.max_redirects(), 0);
    }

    #[test]
    fn test_invalid_config_is_kept() {
        let kind = NodeKind::from_raw("fetch", &json!({ "retries": "many" }));
        assert!(matches!(kind, NodeKind::Invalid { .. }));
        assert!(matches!(NodeKind::from_raw("scrape_more", &json!({})), NodeKind::Unknown));
    }

    #[test]
    fn test_empty_strings_fall_back_to_defaults() {
        let raw = json!({ "outputVar": "" });
        let NodeKind::Extract(cfg) = NodeKind::from_raw("extract", &raw) else {
            panic!("expected extract config");
        };
        assert_eq!(cfg.output_var(), "extracted");
        assert_eq!(cfg.selector_type(), "css");
        assert_eq!(cfg.attribute(), "text");
        assert!(cfg.multiple());

        let NodeKind::AntiCrawl(cfg) =
            NodeKind::from_raw("anti_crawl", &json!({ "delayMin": 5000, "delayMax": 10 }))
        else {
            panic!("expected anti_crawl config");
        };
        assert_eq!(cfg.delay_range(), (10, 5000));
        assert_eq!(cfg.strategy(), "delay");
    }
}
