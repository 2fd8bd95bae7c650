// src/lib.rs

pub mod builtins;
pub mod core;
pub mod services;

pub use builtins::network::{HttpTransport, ReqwestTransport};
pub use core::context::{ExecutionContext, LogCallback, LogEntry, LogLevel, RunResult};
pub use core::error::FlowError;
pub use core::executor::FlowExecutor;
pub use core::graph::{FlowEdge, FlowNode};
pub use core::parser::{FlowDocument, FlowParser};
pub use core::validator::{FlowValidator, ValidationResult};
pub use services::config::SpiderConfig;
