// src/core/executor.rs
use serde_json::{json, Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::builtins::network::{HttpTransport, ReqwestTransport};
use crate::builtins::{anti_crawl, extract, network, video, Step};
use crate::core::context::{ExecutionContext, LogCallback, RunResult};
use crate::core::error::FlowError;
use crate::core::expression;
use crate::core::graph::{
    ConditionConfig, FlowEdge, FlowGraph, FlowNode, LoopConfig, Node, NodeKind, OutputConfig,
    VariableConfig,
};
use crate::core::resolver::resolve_value;
use crate::services::config::SpiderConfig;

/// Walks a flow graph depth-first from its start node.
///
/// Successors run sequentially in edge order and share one context. Node
/// failures end their own path only; a `FlowError::Fatal` aborts the run.
pub struct FlowExecutor {
    transport: Arc<dyn HttpTransport>,
    config: SpiderConfig,
}

impl FlowExecutor {
    pub fn new(config: SpiderConfig) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport))
    }

    pub fn with_transport(config: SpiderConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &SpiderConfig {
        &self.config
    }

    /// A fresh context honouring the engine's seed and depth settings.
    pub fn new_context(&self) -> ExecutionContext {
        let ctx = match self.config.engine.seed {
            Some(seed) => ExecutionContext::with_seed(seed),
            None => ExecutionContext::new(),
        };
        ctx.with_max_depth(self.config.engine.max_depth)
    }

    /// Runs a flow. `on_log` sees every log entry as it is produced.
    pub async fn execute_flow(
        &self,
        nodes: &[FlowNode],
        edges: &[FlowEdge],
        on_log: Option<LogCallback>,
    ) -> RunResult {
        let mut ctx = self.new_context();
        if let Some(callback) = on_log {
            ctx = ctx.with_callback(callback);
        }
        self.run(nodes, edges, ctx).await
    }

    /// Runs a flow against a caller-prepared context.
    pub async fn run(
        &self,
        nodes: &[FlowNode],
        edges: &[FlowEdge],
        mut ctx: ExecutionContext,
    ) -> RunResult {
        let flow = FlowGraph::build(nodes, edges);
        debug!(
            "Built flow graph: {} nodes, {} edges ({} dangling)",
            flow.node_count(),
            edges.len(),
            flow.dangling_edges.len()
        );

        let outcome = match flow.start() {
            None => Err(FlowError::Fatal("No start node found in flow".to_string())),
            Some(start) => {
                ctx.info("Starting flow execution", None);
                self.execute_node(&flow, start, &mut ctx).await
            }
        };

        match outcome {
            Ok(()) => {
                let count = ctx.results().len();
                ctx.info(
                    format!("Flow execution completed. Collected {} result(s)", count),
                    None,
                );
                ctx.into_result(None)
            }
            Err(e) => {
                ctx.error(format!("Flow execution failed: {}", e), None);
                ctx.into_result(Some(e.to_string()))
            }
        }
    }

    pub fn execute_node<'a>(
        &'a self,
        flow: &'a FlowGraph,
        node: &'a Node,
        ctx: &'a mut ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), FlowError>> + Send + 'a>> {
        Box::pin(async move {
            ctx.enter_node(&node.id)?;
            let outcome = self.dispatch(flow, node, ctx).await;
            ctx.exit_node();
            outcome
        })
    }

    async fn dispatch(
        &self,
        flow: &FlowGraph,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<(), FlowError> {
        let id = Some(node.id.as_str());
        ctx.info(
            format!("Executing node: {} ({})", node.label, node.node_type),
            id,
        );

        let step = match &node.kind {
            NodeKind::Start => Step::Continue,
            NodeKind::Fetch(cfg) => {
                network::run_fetch(self.transport.as_ref(), &self.config.http, cfg, &node.id, ctx)
                    .await
            }
            NodeKind::Extract(cfg) => extract::run_extract(cfg, &node.id, ctx),
            NodeKind::VideoExtract(cfg) => video::run_video_extract(cfg, &node.id, ctx),
            NodeKind::AntiCrawl(cfg) => anti_crawl::run_anti_crawl(cfg, &node.id, ctx).await,
            NodeKind::Variable(cfg) => assign_variable(cfg, &node.id, ctx),
            NodeKind::Output(cfg) => collect_output(cfg, &node.id, ctx),
            NodeKind::Loop(cfg) => return self.run_loop(flow, node, cfg, ctx).await,
            NodeKind::Condition(cfg) => return self.run_condition(flow, node, cfg, ctx).await,
            NodeKind::End => {
                ctx.info("Reached end node", id);
                Step::Halt
            }
            NodeKind::Unknown => {
                ctx.warn(format!("Unknown node type: {}", node.node_type), id);
                Step::Continue
            }
            NodeKind::Invalid { reason } => {
                ctx.error(
                    format!("Invalid configuration for {} node: {}", node.node_type, reason),
                    id,
                );
                Step::Halt
            }
        };

        match step {
            Step::Continue => self.continue_all(flow, node, ctx).await,
            Step::Halt => Ok(()),
        }
    }

    /// Executes every existing successor, in edge order.
    async fn continue_all(
        &self,
        flow: &FlowGraph,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<(), FlowError> {
        for edge in flow.outgoing(&node.id) {
            match flow.node(&edge.target) {
                Some(next) => self.execute_node(flow, next, ctx).await?,
                None => debug!("Edge {} -> {} has no target, skipping", edge.source, edge.target),
            }
        }
        Ok(())
    }

    async fn run_loop(
        &self,
        flow: &FlowGraph,
        node: &Node,
        cfg: &LoopConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<(), FlowError> {
        let source = match &cfg.source {
            Some(raw) => resolve_value(raw, &ctx.variables),
            None => Value::String(String::new()),
        };
        let items = match loop_items(source) {
            Ok(items) => items,
            Err(e) => {
                ctx.error(format!("Loop failed: {}", e), Some(node.id.as_str()));
                ctx.set_exception(&e);
                return Ok(());
            }
        };
        ctx.info(format!("Looping over {} items", items.len()), Some(node.id.as_str()));

        for (index, item) in items.into_values().enumerate() {
            ctx.set(cfg.item_var(), item);
            ctx.set(cfg.index_var(), json!(index));
            self.continue_all(flow, node, ctx).await?;
        }
        Ok(())
    }

    async fn run_condition(
        &self,
        flow: &FlowGraph,
        node: &Node,
        cfg: &ConditionConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<(), FlowError> {
        let id = Some(node.id.as_str());
        let source = cfg.expression();
        let result = match expression::evaluate_bool(source, &ctx.variables) {
            Ok(result) => result,
            Err(e) => {
                ctx.error(format!("Condition evaluation failed: {}", e), id);
                false
            }
        };
        ctx.info(format!("Condition \"{}\" evaluated to: {}", source, result), id);

        for edge in flow.outgoing(&node.id) {
            if !edge.fires_on(result) {
                continue;
            }
            if let Some(next) = flow.node(&edge.target) {
                self.execute_node(flow, next, ctx).await?;
            }
        }
        Ok(())
    }
}

/// Largest numeric loop count; the editor runtime rejects longer arrays.
pub const MAX_LOOP_COUNT: u64 = u32::MAX as u64;

/// Sequence a loop iterates over.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopItems {
    /// `0..n`, produced one index at a time.
    Range(u64),
    Items(Vec<Value>),
}

impl LoopItems {
    pub fn len(&self) -> u64 {
        match self {
            LoopItems::Range(n) => *n,
            LoopItems::Items(items) => items.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_values(self) -> Box<dyn Iterator<Item = Value> + Send> {
        match self {
            LoopItems::Range(n) => Box::new((0..n).map(Value::from)),
            LoopItems::Items(items) => Box::new(items.into_iter()),
        }
    }
}

/// Coerces a resolved loop source.
///
/// Arrays as-is, a number N as `0..N`, a string as a JSON array when it
/// parses as one and otherwise as a single element. Anything else is empty.
/// Counts above [`MAX_LOOP_COUNT`] are a data error.
pub fn loop_items(source: Value) -> Result<LoopItems, FlowError> {
    Ok(match source {
        Value::Array(items) => LoopItems::Items(items),
        Value::Number(n) => {
            let count = n.as_f64().unwrap_or(0.0).floor();
            if count < 1.0 {
                LoopItems::Items(Vec::new())
            } else if count > MAX_LOOP_COUNT as f64 {
                return Err(FlowError::Data(format!(
                    "Invalid loop count {} (maximum {})",
                    expression::format_number(count),
                    MAX_LOOP_COUNT
                )));
            } else {
                LoopItems::Range(count as u64)
            }
        }
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Array(items)) => LoopItems::Items(items),
            _ => LoopItems::Items(vec![Value::String(s)]),
        },
        _ => LoopItems::Items(Vec::new()),
    })
}

fn assign_variable(cfg: &VariableConfig, node_id: &str, ctx: &mut ExecutionContext) -> Step {
    let value = match &cfg.value {
        Some(raw) => resolve_value(raw, &ctx.variables),
        None => Value::String(String::new()),
    };
    if let Some(name) = cfg.name.as_deref().filter(|n| !n.is_empty()) {
        ctx.info(format!("Set variable \"{}\" = {}", name, value), Some(node_id));
        ctx.set(name, value);
    }
    Step::Continue
}

fn collect_output(cfg: &OutputConfig, node_id: &str, ctx: &mut ExecutionContext) -> Step {
    let mut record = Map::new();
    for item in &cfg.items {
        record.insert(item.name.clone(), resolve_value(&item.value, &ctx.variables));
    }
    let record = Value::Object(record);
    ctx.info(format!("Output: {}", record), Some(node_id));
    ctx.push_result(record);
    Step::Continue
}
