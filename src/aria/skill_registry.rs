//! Dynamic tool dispatch, re-architected per spec §9's REDESIGN FLAG: a registry
//! built once at boot mapping `skill_name → handler`, instead of resolving
//! skill-name strings to callables at call time.
//!
//! Built on the teacher's [`CustomToolProtocol`](crate::cloudllm::tool_protocols::CustomToolProtocol)
//! (`register_async_tool`) so skill execution reuses the same async-function
//! adapter the teacher's tool-protocol layer already provides; this module adds
//! the metadata the Chat Engine needs to build [`ToolDefinition`]s and the Skill
//! Ledger needs to record invocations, which plain `ToolMetadata` does not carry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

use crate::cloudllm::client_wrapper::ToolDefinition;
use crate::cloudllm::tool_protocol::{ToolParameterType, ToolProtocol, ToolResult};
use crate::cloudllm::tool_protocols::{AsyncToolFunction, CustomToolProtocol};

use crate::aria::error::{AriaError, AriaResult};

/// Declared manifest entry for one skill — the static shape the Chat Engine and
/// Skill Ledger both need. `skill_name` groups related tools (e.g. `"calc"` owns
/// tool `"calc.add"`); an agent's `skills` list (spec §3) names skills, not
/// individual tools.
#[derive(Clone)]
pub struct SkillManifestEntry {
    pub skill_name: String,
    pub tool_name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
    pub handler: AsyncToolFunction,
}

/// Built once at boot from declared skill manifests, and rebuilt + atomically
/// swapped on skill reload (spec §9 "Global state": same pattern as the Config
/// Registry's `RwLock<Arc<_>>` snapshot).
pub struct SkillRegistry {
    protocol: Arc<CustomToolProtocol>,
    manifest: RwLock<Arc<HashMap<String, SkillManifestEntry>>>,
}

impl SkillRegistry {
    pub fn empty() -> Self {
        Self {
            protocol: Arc::new(CustomToolProtocol::new()),
            manifest: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Registers one skill's tool. Call during boot for every declared manifest
    /// entry, or during a full rebuild on skill reload.
    pub async fn register(&self, entry: SkillManifestEntry) {
        use crate::cloudllm::tool_protocol::ToolMetadata;

        let mut metadata = ToolMetadata::new(entry.tool_name.clone(), entry.description.clone());
        if let Some(obj) = entry.parameters_schema.get("properties").and_then(|p| p.as_object()) {
            let required: Vec<&str> = entry
                .parameters_schema
                .get("required")
                .and_then(|r| r.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            for (name, schema) in obj {
                let param_type = match schema.get("type").and_then(|t| t.as_str()) {
                    Some("string") => ToolParameterType::String,
                    Some("number") => ToolParameterType::Number,
                    Some("integer") => ToolParameterType::Integer,
                    Some("boolean") => ToolParameterType::Boolean,
                    Some("array") => ToolParameterType::Array,
                    _ => ToolParameterType::Object,
                };
                let mut param = crate::cloudllm::tool_protocol::ToolParameter::new(name.clone(), param_type);
                if required.contains(&name.as_str()) {
                    param = param.required();
                }
                metadata = metadata.with_parameter(param);
            }
        }

        self.protocol
            .register_async_tool(metadata, entry.handler.clone())
            .await;

        let mut guard = self.manifest.write().await;
        let mut next = (**guard).clone();
        next.insert(entry.tool_name.clone(), entry);
        *guard = Arc::new(next);
    }

    /// Atomically replaces the whole registry with a freshly built one — "reload"
    /// per spec §9 means full rebuild + swap, never incremental in-place mutation.
    pub async fn reload(&self, entries: Vec<SkillManifestEntry>) {
        let fresh = Self::empty();
        for entry in entries {
            fresh.register(entry).await;
        }
        let mut guard = self.manifest.write().await;
        *guard = fresh.manifest.read().await.clone();
        // The swapped-in protocol owns the new handlers; callers dispatch through
        // `self.protocol`, which we also refresh by delegating execute() below
        // through the freshly populated map rather than re-pointing `self.protocol`
        // (CustomToolProtocol has no bulk-clear, so unregister anything stale).
        let stale: Vec<String> = self
            .protocol
            .list_tools()
            .await
            .unwrap_or_default()
            .iter()
            .map(|m| m.name.clone())
            .filter(|name| !guard.contains_key(name))
            .collect();
        for old_name in stale {
            self.protocol.unregister_tool(&old_name).await;
        }
    }

    /// Tool schema for the subset of `skill_names` this agent declares (spec
    /// §4.5 step 5: "the tool schema derived from the Agent's declared skills
    /// × the Skill Registry's current tool set").
    pub async fn tool_definitions_for(&self, skill_names: &[String]) -> Vec<ToolDefinition> {
        let manifest = self.manifest.read().await.clone();
        manifest
            .values()
            .filter(|entry| skill_names.iter().any(|s| s == &entry.skill_name))
            .map(|entry| ToolDefinition {
                name: entry.tool_name.clone(),
                description: entry.description.clone(),
                parameters_schema: entry.parameters_schema.clone(),
            })
            .collect()
    }

    /// Resolves which skill owns `tool_name`, for Skill Ledger bookkeeping.
    pub async fn skill_for_tool(&self, tool_name: &str) -> Option<String> {
        self.manifest
            .read()
            .await
            .get(tool_name)
            .map(|e| e.skill_name.clone())
    }

    pub async fn dispatch(&self, tool_name: &str, arguments: JsonValue) -> AriaResult<ToolResult> {
        self.protocol
            .execute(tool_name, arguments)
            .await
            .map_err(|e| AriaError::internal(format!("skill '{tool_name}' dispatch failed: {e}")))
    }

    pub async fn known_tools(&self) -> Vec<String> {
        self.manifest.read().await.keys().cloned().collect()
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::tool_protocol::ToolResult as TR;

    fn handler() -> AsyncToolFunction {
        Arc::new(|params: JsonValue| {
            Box::pin(async move {
                let a = params["a"].as_f64().unwrap_or(0.0);
                let b = params["b"].as_f64().unwrap_or(0.0);
                Ok(TR::success(serde_json::json!({ "result": a + b })))
            })
        })
    }

    #[tokio::test]
    async fn register_and_dispatch() {
        let registry = SkillRegistry::empty();
        registry
            .register(SkillManifestEntry {
                skill_name: "calc".to_string(),
                tool_name: "calc.add".to_string(),
                description: "adds two numbers".to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                }),
                handler: handler(),
            })
            .await;

        let result = registry
            .dispatch("calc.add", serde_json::json!({"a": 2, "b": 2}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["result"], 4.0);
    }

    #[tokio::test]
    async fn tool_definitions_filtered_by_agent_skills() {
        let registry = SkillRegistry::empty();
        registry
            .register(SkillManifestEntry {
                skill_name: "calc".to_string(),
                tool_name: "calc.add".to_string(),
                description: "adds".to_string(),
                parameters_schema: serde_json::json!({"type": "object", "properties": {}}),
                handler: handler(),
            })
            .await;
        registry
            .register(SkillManifestEntry {
                skill_name: "weather".to_string(),
                tool_name: "weather.lookup".to_string(),
                description: "looks up weather".to_string(),
                parameters_schema: serde_json::json!({"type": "object", "properties": {}}),
                handler: handler(),
            })
            .await;

        let defs = registry
            .tool_definitions_for(&["calc".to_string()])
            .await;
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "calc.add");
    }

    #[tokio::test]
    async fn skill_for_tool_resolves() {
        let registry = SkillRegistry::empty();
        registry
            .register(SkillManifestEntry {
                skill_name: "calc".to_string(),
                tool_name: "calc.add".to_string(),
                description: "adds".to_string(),
                parameters_schema: serde_json::json!({"type": "object", "properties": {}}),
                handler: handler(),
            })
            .await;
        assert_eq!(registry.skill_for_tool("calc.add").await, Some("calc".to_string()));
        assert_eq!(registry.skill_for_tool("missing").await, None);
    }
}
