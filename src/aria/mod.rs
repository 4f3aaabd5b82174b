//! Aria: multi-agent chat/roundtable/scheduler orchestration runtime built on
//! top of the `cloudllm` client layer.

pub mod chat_engine;
pub mod circuit_breaker;
pub mod config_registry;
pub mod error;
pub mod kernel;
pub mod migrations;
pub mod models;
pub mod retry;
pub mod roundtable;
pub mod runtime;
pub mod scheduler;
pub mod session_store;
pub mod skill_ledger;
pub mod skill_registry;
