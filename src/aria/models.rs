//! Data model for the orchestration runtime: the entities named in the spec's data
//! model section. Every persisted entity derives `serde::{Serialize, Deserialize}`
//! and `sqlx::FromRow`; in-memory-only entities (Circuit Breaker state, Kernel blobs)
//! live in their own modules instead.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `serde` bridge for `Option<pgvector::Vector>` — the `pgvector` crate's `sqlx`
/// feature gives us `Encode`/`Decode` for the `vector` column type directly, but
/// no `Serialize`/`Deserialize`; `export_session(json)` (spec §4.4) still needs
/// those, so this module round-trips through the plain `Vec<f32>` the vector
/// wraps.
mod vector_serde {
    use pgvector::Vector;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<Vector>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => v.to_vec().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vector>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<Vec<f32>> = Option::deserialize(deserializer)?;
        Ok(opt.map(Vector::from))
    }
}

/// `Agent.agent_type`: orchestrators direct sub-agents, plain agents handle turns
/// directly, sub-agents must carry a `parent_agent_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "agent_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Orchestrator,
    Agent,
    SubAgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "agent_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Disabled,
}

/// `requests-per-window` rate limiting, carried verbatim through sync/CRUD; the
/// core does not itself enforce it (that's a transport concern per spec §1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimit {
    pub requests: u32,
    pub window_seconds: u32,
}

/// Runtime-mutable configuration for one logical actor (spec §3 "Agent").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AgentRecord {
    pub agent_id: String,
    pub display_name: String,
    pub agent_type: AgentType,
    pub parent_agent_id: Option<String>,
    pub model: String,
    pub fallback_model: Option<String>,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: i32,
    pub focus_type: Option<String>,
    pub skills: Vec<String>,
    pub capabilities: Vec<String>,
    pub enabled: bool,
    pub timeout_seconds: i32,
    #[sqlx(json)]
    pub rate_limit: Option<RateLimit>,
    pub app_managed: bool,
    pub status: AgentStatus,
    pub consecutive_failures: i32,
    pub pheromone_score: f32,
}

impl AgentRecord {
    /// Invariant from spec §3: `agent_type = sub_agent ⇒ parent_agent_id ≠ null`.
    pub fn validate(&self) -> Result<(), String> {
        if self.agent_type == AgentType::SubAgent && self.parent_agent_id.is_none() {
            return Err(format!(
                "agent '{}' is a sub_agent but has no parent_agent_id",
                self.agent_id
            ));
        }
        if !(0.0..=1.0).contains(&self.pheromone_score) {
            return Err(format!(
                "agent '{}' pheromone_score {} out of [0,1]",
                self.agent_id, self.pheromone_score
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "model_tier", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Free,
    Premium,
    Local,
    Unknown,
}

/// A selectable LLM target (spec §3 "Model").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModelRecord {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub tier: ModelTier,
    pub reasoning: bool,
    pub vision: bool,
    pub tool_calling: bool,
    pub context_window: i32,
    pub max_tokens: i32,
    pub cost_input: f64,
    pub cost_output: f64,
    pub proxy_model_string: String,
    pub enabled: bool,
    pub sort_order: i32,
    pub app_managed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "session_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Interactive,
    Cron,
    SkillExec,
    Roundtable,
    Swarm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "session_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Error,
    Archived,
}

/// Append-only chat session header (spec §3 "Chat Session").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: Uuid,
    pub agent_id: String,
    pub session_type: SessionType,
    pub title: Option<String>,
    pub system_prompt_snapshot: Option<String>,
    pub model_snapshot: Option<String>,
    pub status: SessionStatus,
    pub message_count: i32,
    pub total_tokens: i64,
    pub total_cost: f64,
    #[sqlx(json)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ChatSession {
    pub fn new(agent_id: impl Into<String>, session_type: SessionType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            session_type,
            title: None,
            system_prompt_snapshot: None,
            model_snapshot: None,
            status: SessionStatus::Active,
            message_count: 0,
            total_tokens: 0,
            total_cost: 0.0,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            ended_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single native tool call request, persisted as JSON inside `tool_calls`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The recorded outcome of one dispatched tool call, persisted inside `tool_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub tool_call_id: String,
    pub name: String,
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub duration_ms: i64,
}

/// One append-only row in a chat session's message log (spec §3 "Chat Message").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub thinking: Option<String>,
    #[sqlx(json)]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    #[sqlx(json)]
    pub tool_results: Option<Vec<ToolResultRecord>>,
    pub model: Option<String>,
    pub tokens_input: i32,
    pub tokens_output: i32,
    pub cost: f64,
    pub latency_ms: i64,
    #[serde(with = "vector_serde")]
    pub embedding: Option<pgvector::Vector>,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(session_id: Uuid, role: MessageRole, content: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            content: content.into(),
            thinking: None,
            tool_calls: None,
            tool_results: None,
            model: None,
            tokens_input: 0,
            tokens_output: 0,
            cost: 0.0,
            latency_ms: 0,
            embedding: None,
            agent_id: agent_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// One agent turn inside a roundtable discussion, ordered by `(round_number, position)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundtableTurn {
    pub agent_id: String,
    pub round_number: u32,
    pub position: u32,
    pub content: String,
    pub duration_ms: i64,
    pub timed_out: bool,
}

/// Full record of one multi-agent discussion (spec §3 "Roundtable Record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundtableRecord {
    pub session_id: Uuid,
    pub topic: String,
    pub participants: Vec<String>,
    pub rounds: u32,
    pub turn_count: u32,
    pub synthesis: String,
    pub synthesizer_id: String,
    pub total_duration_ms: i64,
    pub turns: Vec<RoundtableTurn>,
    pub partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ok,
    Fail,
    Timeout,
    Overlap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "session_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Isolated,
    Persistent,
}

/// How a job's fire time is computed. Exactly one variant per job; the loader
/// rejects a declaration carrying both a `cron` and an `every` field (spec §9
/// Open Question).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Schedule {
    /// 6-field (with seconds) cron expression: `s m h d M w`.
    Cron(String),
    /// `every: <duration>`, e.g. `"15m"`, `"1h"`.
    Every(String),
}

/// A cron/interval background job that synthesizes a chat session (spec §3
/// "Scheduled Job").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    pub schedule: Schedule,
    pub agent_id: String,
    pub payload: String,
    pub session_mode: SessionMode,
    pub max_duration_seconds: u32,
    pub retry_count: u32,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<JobStatus>,
    pub last_duration_ms: Option<i64>,
    pub last_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub success_count: u64,
    pub fail_count: u64,
}

/// Append-only tool-call telemetry row (spec §3 "Skill Invocation").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SkillInvocation {
    pub id: Uuid,
    pub skill_name: String,
    pub tool_name: String,
    pub duration_ms: i64,
    pub success: bool,
    pub error_type: Option<String>,
    pub tokens_used: i32,
    pub model_used: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SkillInvocation {
    pub fn new(skill_name: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            skill_name: skill_name.into(),
            tool_name: tool_name.into(),
            duration_ms: 0,
            success: false,
            error_type: None,
            tokens_used: 0,
            model_used: None,
            created_at: Utc::now(),
        }
    }
}

/// Per-skill health classification thresholds from spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillHealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Slow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillHealth {
    pub skill_name: String,
    pub invocations: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub last_error: Option<String>,
    pub status: SkillHealthStatus,
}

/// Aggregated response for `GET /skills/health/dashboard`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillHealthDashboard {
    pub per_skill: HashMap<String, SkillHealth>,
    pub overall_success_rate: f64,
    pub total_invocations: u64,
}
