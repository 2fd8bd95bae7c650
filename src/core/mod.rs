// src/core/mod.rs
pub mod context;
pub mod error;
pub mod executor;
pub mod expression;
pub mod graph;
pub mod parser;
pub mod resolver;
pub mod validator;
