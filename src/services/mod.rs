// src/services/mod.rs
pub mod config;
pub mod flow_store;
pub mod web_server;
