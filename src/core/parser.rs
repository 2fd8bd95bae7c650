// src/core/parser.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::graph::{FlowEdge, FlowNode};

/// A stored or submitted flow. Only `nodes` and `edges` matter to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

impl FlowDocument {
    /// Display name: `name`, then `id`, then a placeholder.
    pub fn title(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("untitled flow")
    }
}

pub struct FlowParser;

impl FlowParser {
    pub fn parse(content: &str) -> Result<FlowDocument> {
        let doc: FlowDocument =
            serde_json::from_str(content).context("Failed to parse flow document")?;
        Ok(doc)
    }

    pub fn from_path(path: &Path) -> Result<FlowDocument> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read flow file: {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Invalid flow file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_editor_document() {
        let content = r#"{
            "id": "f1",
            "name": "Hot list",
            "nodes": [
                { "id": "n1", "type": "start", "label": "Start", "data": {}, "position": { "x": 0, "y": 0 } },
                { "id": "n2", "type": "fetch", "label": "Get", "data": { "url": "https://a.test", "timeout": "5000" } },
                { "id": "n3", "type": "end" }
            ],
            "edges": [
                { "id": "e1", "source": "n1", "target": "n2" },
                { "id": "e2", "source": "n2", "target": "n3", "sourceHandle": "true", "label": "yes" }
            ]
        }"#;
        let doc = FlowParser::parse(content).unwrap();
        assert_eq!(doc.title(), "Hot list");
        assert_eq!(doc.nodes.len(), 3);
        assert_eq!(doc.nodes[2].label, "");
        assert!(doc.nodes[2].data.is_null());
        assert_eq!(doc.edges[1].source_handle.as_deref(), Some("true"));
        assert_eq!(doc.edges[1].label.as_deref(), Some("yes"));
    }

    #[test]
    fn test_configuration_alias() {
        let content = r#"{
            "nodes": [{ "id": "v", "type": "variable", "configuration": { "name": "a", "value": "1" } }],
            "edges": []
        }"#;
        let doc = FlowParser::parse(content).unwrap();
        assert_eq!(doc.nodes[0].data["name"], "a");
        assert_eq!(doc.title(), "untitled flow");
    }

    #[test]
    fn test_missing_lists_are_rejected() {
        assert!(FlowParser::parse(r#"{ "nodes": [] }"#).is_err());
        assert!(FlowParser::parse("not json").is_err());
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.json");
        std::fs::write(&path, r#"{ "nodes": [], "edges": [] }"#).unwrap();
        assert!(FlowParser::from_path(&path).unwrap().nodes.is_empty());
        assert!(FlowParser::from_path(&dir.path().join("missing.json")).is_err());
    }
}
