// src/core/validator.rs
use petgraph::algo::is_cyclic_directed;
use petgraph::Direction;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::core::graph::{FlowGraph, NodeKind};
use crate::core::parser::FlowDocument;

#[derive(Debug, Clone, Serialize)]
pub enum ValidationSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    pub code: String,
    pub message: String,
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        ValidationResult {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, code: &str, message: &str, node_id: Option<&str>) {
        self.is_valid = false;
        self.errors.push(ValidationIssue {
            severity: ValidationSeverity::Error,
            code: code.to_string(),
            message: message.to_string(),
            node_id: node_id.map(|s| s.to_string()),
        });
    }

    pub fn add_warning(&mut self, code: &str, message: &str, node_id: Option<&str>) {
        self.warnings.push(ValidationIssue {
            severity: ValidationSeverity::Warning,
            code: code.to_string(),
            message: message.to_string(),
            node_id: node_id.map(|s| s.to_string()),
        });
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Static checks on a flow document. Nothing here blocks execution: the
/// engine runs whatever it is given, this only reports what will go wrong.
pub struct FlowValidator;

impl FlowValidator {
    pub fn validate(doc: &FlowDocument) -> ValidationResult {
        let mut result = ValidationResult::new();
        let flow = FlowGraph::build(&doc.nodes, &doc.edges);

        Self::check_start_nodes(doc, &mut result);
        Self::check_duplicate_ids(doc, &mut result);
        Self::check_node_configs(&flow, &mut result);
        Self::check_dangling_edges(&flow, &mut result);
        Self::check_unreachable_nodes(&flow, &mut result);
        Self::check_cycles(&flow, &mut result);

        result
    }

    fn check_start_nodes(doc: &FlowDocument, result: &mut ValidationResult) {
        let starts: Vec<&str> = doc
            .nodes
            .iter()
            .filter(|n| n.node_type == "start")
            .map(|n| n.id.as_str())
            .collect();

        match starts.as_slice() {
            [] => result.add_error("E001", "No start node found in flow", None),
            [_] => {}
            [first, rest @ ..] => {
                for extra in rest {
                    result.add_warning(
                        "W001",
                        &format!(
                            "Multiple start nodes; '{}' is ignored, execution begins at '{}'",
                            extra, first
                        ),
                        Some(*extra),
                    );
                }
            }
        }
    }

    fn check_duplicate_ids(doc: &FlowDocument, result: &mut ValidationResult) {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for node in &doc.nodes {
            *counts.entry(node.id.as_str()).or_default() += 1;
        }
        let mut reported = HashSet::new();
        for node in &doc.nodes {
            let id = node.id.as_str();
            if counts[id] > 1 && reported.insert(id) {
                result.add_error(
                    "E002",
                    &format!("Node id '{}' is used by {} nodes", id, counts[id]),
                    Some(id),
                );
            }
        }
    }

    fn check_node_configs(flow: &FlowGraph, result: &mut ValidationResult) {
        for idx in flow.graph.node_indices() {
            let node = &flow.graph[idx];
            match &node.kind {
                NodeKind::Invalid { reason } => result.add_error(
                    "E003",
                    &format!("Invalid configuration for {} node: {}", node.node_type, reason),
                    Some(&node.id),
                ),
                NodeKind::Unknown => result.add_warning(
                    "W005",
                    &format!("Unknown node type '{}'; it will be passed through", node.node_type),
                    Some(&node.id),
                ),
                NodeKind::Fetch(cfg) => {
                    if cfg.url.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                        result.add_warning("W006", "Fetch node has no URL", Some(&node.id));
                    }
                }
                _ => {}
            }
        }
    }

    fn check_dangling_edges(flow: &FlowGraph, result: &mut ValidationResult) {
        for edge in &flow.dangling_edges {
            let missing = if flow.node(&edge.source).is_none() {
                &edge.source
            } else {
                &edge.target
            };
            result.add_warning(
                "W002",
                &format!(
                    "Edge '{}' ({} -> {}) references missing node '{}'",
                    edge.id, edge.source, edge.target, missing
                ),
                None,
            );
        }
    }

    fn check_unreachable_nodes(flow: &FlowGraph, result: &mut ValidationResult) {
        let Some(start) = flow.start_node else {
            return;
        };

        let mut reachable = HashSet::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            if reachable.insert(idx) {
                for neighbor in flow.graph.neighbors_directed(idx, Direction::Outgoing) {
                    if !reachable.contains(&neighbor) {
                        stack.push(neighbor);
                    }
                }
            }
        }

        for idx in flow.graph.node_indices() {
            if !reachable.contains(&idx) {
                let node = &flow.graph[idx];
                result.add_warning(
                    "W003",
                    &format!("Node '{}' is not reachable from the start node", node.id),
                    Some(&node.id),
                );
            }
        }
    }

    fn check_cycles(flow: &FlowGraph, result: &mut ValidationResult) {
        if is_cyclic_directed(&flow.graph) {
            result.add_warning(
                "W004",
                "Flow contains a cycle; execution stops at the depth limit",
                None,
            );
        }
    }
}
