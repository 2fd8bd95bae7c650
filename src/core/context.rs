// src/core/context.rs
use chrono::{SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::core::error::FlowError;

/// Default recursion budget; `0` disables the check.
pub const DEFAULT_MAX_DEPTH: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

/// Outcome of one run, as handed back to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub data: Vec<Value>,
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Invoked synchronously for every log entry as it is produced.
pub type LogCallback = Arc<dyn Fn(&LogEntry) + Send + Sync>;

/// Run-scoped mutable state. One instance per run, passed by `&mut`
/// through every node invocation.
pub struct ExecutionContext {
    pub variables: Map<String, Value>,
    results: Vec<Value>,
    logs: Vec<LogEntry>,
    rng: StdRng,
    on_log: Option<LogCallback>,
    event_sender: Option<UnboundedSender<LogEntry>>,
    depth: usize,
    max_depth: usize,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Context whose random choices (delays, identity rotation) are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            variables: Map::new(),
            results: Vec::new(),
            logs: Vec::new(),
            rng,
            on_log: None,
            event_sender: None,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_callback(mut self, callback: LogCallback) -> Self {
        self.on_log = Some(callback);
        self
    }

    /// Streams every log entry into `sender` as well.
    pub fn with_sender(mut self, sender: UnboundedSender<LogEntry>) -> Self {
        self.event_sender = Some(sender);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    // --- variables ---

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Records a path-local failure under `variables["ex"]`.
    pub fn set_exception(&mut self, err: &FlowError) {
        self.variables.insert("ex".to_string(), err.to_record());
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    // --- results ---

    pub fn push_result(&mut self, record: Value) {
        self.results.push(record);
    }

    pub fn results(&self) -> &[Value] {
        &self.results
    }

    // --- logging ---

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, node_id: Option<&str>) {
        let entry = LogEntry {
            level,
            message: message.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            node_id: node_id.map(str::to_string),
        };

        let node = entry.node_id.as_deref().unwrap_or("-");
        match level {
            LogLevel::Info => info!(node_id = node, "{}", entry.message),
            LogLevel::Warn => warn!(node_id = node, "{}", entry.message),
            LogLevel::Error => error!(node_id = node, "{}", entry.message),
        }

        if let Some(callback) = &self.on_log {
            callback(&entry);
        }
        if let Some(sender) = &self.event_sender {
            let _ = sender.send(entry.clone());
        }
        self.logs.push(entry);
    }

    pub fn info(&mut self, message: impl Into<String>, node_id: Option<&str>) {
        self.log(LogLevel::Info, message, node_id);
    }

    pub fn warn(&mut self, message: impl Into<String>, node_id: Option<&str>) {
        self.log(LogLevel::Warn, message, node_id);
    }

    pub fn error(&mut self, message: impl Into<String>, node_id: Option<&str>) {
        self.log(LogLevel::Error, message, node_id);
    }

    // --- recursion budget ---

    /// Enters one level of node recursion. Fails once the budget is spent.
    pub fn enter_node(&mut self, node_id: &str) -> Result<(), FlowError> {
        if self.max_depth > 0 && self.depth >= self.max_depth {
            return Err(FlowError::Fatal(format!(
                "Maximum execution depth ({}) exceeded at node '{}'",
                self.max_depth, node_id
            )));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn exit_node(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Consumes the context into the caller-facing result.
    pub fn into_result(self, error: Option<String>) -> RunResult {
        RunResult {
            success: error.is_none(),
            data: self.results,
            logs: self.logs,
            error,
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("variables", &self.variables)
            .field("results", &self.results.len())
            .field("logs", &self.logs.len())
            .field("depth", &self.depth)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_log_reaches_callback_and_channel() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut ctx = ExecutionContext::with_seed(1)
            .with_callback(Arc::new(move |entry: &LogEntry| {
                sink.lock().unwrap().push(entry.message.clone());
            }))
            .with_sender(tx);

        ctx.info("hello", Some("n1"));
        ctx.warn("careful", None);

        assert_eq!(*seen.lock().unwrap(), vec!["hello", "careful"]);
        assert_eq!(rx.try_recv().unwrap().node_id.as_deref(), Some("n1"));
        assert_eq!(rx.try_recv().unwrap().level, LogLevel::Warn);
        assert_eq!(ctx.logs().len(), 2);
    }

    #[test]
    fn test_log_entry_serialization() {
        let mut ctx = ExecutionContext::with_seed(1);
        ctx.error("boom", Some("fetch_1"));
        let value = serde_json::to_value(&ctx.logs()[0]).unwrap();
        assert_eq!(value["level"], "error");
        assert_eq!(value["nodeId"], "fetch_1");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));

        ctx.info("no node", None);
        let value = serde_json::to_value(&ctx.logs()[1]).unwrap();
        assert!(value.get("nodeId").is_none());
    }

    #[test]
    fn test_depth_budget() {
        let mut ctx = ExecutionContext::with_seed(1).with_max_depth(2);
        ctx.enter_node("a").unwrap();
        ctx.enter_node("b").unwrap();
        let err = ctx.enter_node("c").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Maximum execution depth (2) exceeded at node 'c'");

        ctx.exit_node();
        assert!(ctx.enter_node("c").is_ok());

        let mut unlimited = ExecutionContext::with_seed(1).with_max_depth(0);
        for i in 0..1000 {
            unlimited.enter_node(&i.to_string()).unwrap();
        }
        assert_eq!(unlimited.depth(), 1000);
    }

    #[test]
    fn test_into_result() {
        let mut ctx = ExecutionContext::with_seed(1);
        ctx.push_result(json!({ "x": "1" }));
        ctx.set_exception(&FlowError::Data("bad".into()));
        assert_eq!(ctx.get("ex").unwrap()["kind"], "data");

        let result = ctx.into_result(None);
        assert!(result.success);
        assert_eq!(result.data, vec![json!({ "x": "1" })]);
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("error").is_none());
    }
}
