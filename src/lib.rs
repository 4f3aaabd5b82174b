// src/lib.rs

// Import the top-level `cloudllm` module.
pub mod cloudllm;

// The Aria orchestration runtime (chat engine, roundtable, scheduler, registries).
pub mod aria;

// Flatten `cloudllm`'s submodules to the crate root so code written against
// `crate::client_wrapper`, `crate::clients`, `crate::tool_protocol`, etc. (the
// paths every module under `src/cloudllm/` itself uses) resolves the same way
// whether called from inside `cloudllm` or from `aria`.
pub use cloudllm::*;

// Convenience re-exports for the handful of types callers reach for most often.
pub use cloudllm::client_wrapper::{ClientWrapper, Message, Role};
