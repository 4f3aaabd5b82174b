//! Orchestrates one turn of a chat session: LLM call + tool loop + persistence
//! (spec §4.5, the anchor hard subsystem).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::aria::circuit_breaker::CircuitBreaker;
use crate::aria::config_registry::ConfigRegistry;
use crate::aria::error::{AriaError, AriaResult};
use crate::aria::kernel::Kernel;
use crate::aria::models::{
    AgentRecord, AgentStatus, ChatMessage, MessageRole, ModelRecord, SessionStatus,
    ToolCallRecord, ToolResultRecord,
};
use crate::aria::retry::retry_once_with_jitter;
use crate::aria::session_store::SessionStore;
use crate::aria::skill_ledger::SkillLedger;
use crate::aria::skill_registry::SkillRegistry;
use crate::cloudllm::client_wrapper::{ClientWrapper, Message, NativeToolCall, Role, ToolDefinition};

const DEFAULT_MAX_USER_CONTENT_BYTES: usize = 64 * 1024;
const DEFAULT_MAX_TOOL_ROUNDS: u32 = 6;
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BREAKER_THRESHOLD: u32 = 5;
const DEFAULT_BREAKER_RESET_AFTER: Duration = Duration::from_secs(30);
const DEFAULT_LLM_POOL_PERMITS: usize = 32;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_HONORED_RETRY_AFTER: Duration = Duration::from_secs(5);
const RECENT_MESSAGE_FETCH_LIMIT: i64 = 200;

/// Resolves a [`ClientWrapper`] for a given model record. Kept as a trait so
/// the Chat Engine stays testable without a live LLM proxy: production code
/// supplies a factory that wires `model.proxy_model_string` to a concrete
/// provider client; tests supply a fake one.
pub trait ModelClientFactory: Send + Sync {
    fn client_for(&self, model: &ModelRecord) -> AriaResult<Arc<dyn ClientWrapper>>;
}

/// Cooperative cancellation signal propagated from a transport handler through
/// every awaited call (spec §5). A plain `AtomicBool` is sufficient here — the
/// teacher crate carries no cancellation-token dependency, and the crate's only
/// rule is "check between suspension points", not "kill in-flight work".
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ChatEngineConfig {
    pub max_user_content_bytes: usize,
    pub max_tool_rounds: u32,
    pub tool_default_timeout: Duration,
    pub breaker_threshold: u32,
    pub breaker_reset_after: Duration,
    pub llm_pool_permits: usize,
}

impl Default for ChatEngineConfig {
    fn default() -> Self {
        Self {
            max_user_content_bytes: DEFAULT_MAX_USER_CONTENT_BYTES,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            tool_default_timeout: DEFAULT_TOOL_TIMEOUT,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_reset_after: DEFAULT_BREAKER_RESET_AFTER,
            llm_pool_permits: DEFAULT_LLM_POOL_PERMITS,
        }
    }
}

/// Executes turns against chat sessions. One instance is shared across the
/// whole process; per-session state lives in [`SessionStore`] and the turn-lock
/// map below.
pub struct ChatEngine {
    session_store: Arc<SessionStore>,
    config_registry: Arc<ConfigRegistry>,
    skill_registry: Arc<SkillRegistry>,
    skill_ledger: Arc<SkillLedger>,
    kernel: Arc<Kernel>,
    client_factory: Arc<dyn ModelClientFactory>,
    breakers: StdRwLock<HashMap<String, Arc<CircuitBreaker>>>,
    turn_locks: StdMutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    llm_pool: Arc<tokio::sync::Semaphore>,
    config: ChatEngineConfig,
}

/// Approximate token estimate, one token per four characters — mirrors the
/// teacher's `count_tokens` in `llm_session.rs`.
fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Drops the oldest messages until the remainder's estimated token count fits
/// `max_tokens` (spec §4.5 step 3: "as many recent messages as fit the
/// Model's context window"). Always keeps the newest message, even if it
/// alone exceeds the budget.
fn trim_to_context_window(mut messages: Vec<ChatMessage>, max_tokens: i32) -> Vec<ChatMessage> {
    let budget = max_tokens.max(0) as usize;
    let mut total = 0usize;
    let mut cut = 0usize;
    for (i, message) in messages.iter().enumerate().rev() {
        total += estimate_tokens(&message.content);
        if total > budget && i + 1 < messages.len() {
            cut = i + 1;
            break;
        }
    }
    if cut > 0 {
        messages.drain(0..cut);
    }
    messages
}

impl ChatEngine {
    pub fn new(
        session_store: Arc<SessionStore>,
        config_registry: Arc<ConfigRegistry>,
        skill_registry: Arc<SkillRegistry>,
        skill_ledger: Arc<SkillLedger>,
        kernel: Arc<Kernel>,
        client_factory: Arc<dyn ModelClientFactory>,
        config: ChatEngineConfig,
    ) -> Self {
        let llm_pool = Arc::new(tokio::sync::Semaphore::new(config.llm_pool_permits));
        Self {
            session_store,
            config_registry,
            skill_registry,
            skill_ledger,
            kernel,
            client_factory,
            breakers: StdRwLock::new(HashMap::new()),
            turn_locks: StdMutex::new(HashMap::new()),
            llm_pool,
            config,
        }
    }

    fn breaker_for(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().expect("breakers lock poisoned").get(name) {
            return existing.clone();
        }
        let mut guard = self.breakers.write().expect("breakers lock poisoned");
        guard
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    name.to_string(),
                    self.config.breaker_threshold,
                    self.config.breaker_reset_after,
                ))
            })
            .clone()
    }

    fn turn_lock_for(&self, session_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.turn_locks.lock().expect("turn_locks poisoned");
        locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Executes one turn. Fails fast with `SessionBusy` (`Conflict`) if another
    /// turn on the same session is in flight — it never queues (spec §4.5
    /// "Ordering guarantee").
    pub async fn send_message(
        &self,
        session_id: Uuid,
        user_content: &str,
        enable_tools: bool,
        enable_thinking: bool,
    ) -> AriaResult<ChatMessage> {
        self.send_message_cancellable(session_id, user_content, enable_tools, enable_thinking, &CancellationToken::new())
            .await
    }

    pub async fn send_message_cancellable(
        &self,
        session_id: Uuid,
        user_content: &str,
        enable_tools: bool,
        enable_thinking: bool,
        cancel: &CancellationToken,
    ) -> AriaResult<ChatMessage> {
        if user_content.is_empty() {
            return Err(AriaError::Validation("user_content must be non-empty".to_string()));
        }
        if user_content.len() > self.config.max_user_content_bytes {
            return Err(AriaError::Validation(format!(
                "user_content exceeds max of {} bytes",
                self.config.max_user_content_bytes
            )));
        }

        let lock = self.turn_lock_for(session_id);
        let _guard = lock
            .try_lock()
            .map_err(|_| AriaError::Conflict("SessionBusy: a turn is already in flight for this session".to_string()))?;

        let session = self.session_store.get_session(session_id).await?;
        if session.status != SessionStatus::Active {
            return Err(AriaError::Conflict(format!(
                "session '{session_id}' is not active (status: {:?})",
                session.status
            )));
        }

        let agent = self.config_registry.get_agent(&session.agent_id)?;
        if !agent.enabled || agent.status == AgentStatus::Disabled {
            return Err(AriaError::ConfigurationError(format!("agent '{}' is disabled", agent.agent_id)));
        }

        // The user message is durable before the LLM call begins — cancellation
        // after this point never loses it (spec §5 "Cancellation").
        let user_message = ChatMessage::new(session_id, MessageRole::User, user_content, &agent.agent_id);
        self.session_store.append_message(user_message).await?;

        if cancel.is_cancelled() {
            return Err(AriaError::Cancelled);
        }

        let turn_deadline = Instant::now() + Duration::from_secs(agent.timeout_seconds as u64);
        self.run_turn(&session_id, &agent, enable_tools, enable_thinking, turn_deadline, cancel, false)
            .await
    }

    /// Recursive body of a turn: resolves the model, checks the breaker,
    /// builds the prompt, and runs the tool loop. `already_substituted` blocks
    /// a second fallback substitution (spec §4.5 step 2: "recurse with a
    /// single substitution").
    fn run_turn<'a>(
        &'a self,
        session_id: &'a Uuid,
        agent: &'a AgentRecord,
        enable_tools: bool,
        enable_thinking: bool,
        turn_deadline: Instant,
        cancel: &'a CancellationToken,
        already_substituted: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = AriaResult<ChatMessage>> + Send + 'a>> {
        Box::pin(async move {
            let model_id = if already_substituted {
                agent.fallback_model.as_ref().unwrap_or(&agent.model)
            } else {
                &agent.model
            };
            let model = self
                .config_registry
                .get_model(model_id)
                .map_err(|_| AriaError::ConfigurationError(format!("model '{model_id}' not found")))?;

            let breaker = self.breaker_for(&model.id);
            if breaker.is_open() {
                if !already_substituted && agent.fallback_model.is_some() {
                    log::warn!("breaker open for model '{}', falling back", model.id);
                    return self
                        .run_turn(session_id, agent, enable_tools, enable_thinking, turn_deadline, cancel, true)
                        .await;
                }
                return Err(AriaError::UpstreamUnavailable(format!("model '{}' circuit open", model.id)));
            }

            let recent = self
                .session_store
                .recent_messages(*session_id, RECENT_MESSAGE_FETCH_LIMIT)
                .await?;
            let recent = trim_to_context_window(recent, model.context_window);
            let session = self.session_store.get_session(*session_id).await?;

            let tools = if enable_tools {
                let defs = self.skill_registry.tool_definitions_for(&agent.skills).await;
                if defs.is_empty() { None } else { Some(defs) }
            } else {
                None
            };

            // A single-call fallback target: if this turn is running on the
            // agent's primary model, resolve `fallback_model` up front so a
            // timed-out or 5xx-exhausted call can retry once against it
            // (spec §4.5 failure table) instead of hammering the same
            // endpoint. Already-substituted turns (breaker-open path) have
            // no further fallback to offer.
            let fallback_client = if already_substituted {
                None
            } else {
                agent
                    .fallback_model
                    .as_ref()
                    .and_then(|fallback_id| self.config_registry.get_model(fallback_id).ok())
                    .and_then(|fallback_model| self.client_factory.client_for(&fallback_model).ok())
            };

            self.tool_loop(
                session_id,
                agent,
                &model,
                &breaker,
                recent,
                session.system_prompt_snapshot.clone(),
                tools,
                fallback_client,
                enable_thinking,
                turn_deadline,
                cancel,
                0,
            )
            .await
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn tool_loop(
        &self,
        session_id: &Uuid,
        agent: &AgentRecord,
        model: &ModelRecord,
        breaker: &CircuitBreaker,
        mut history: Vec<ChatMessage>,
        session_prompt_snapshot: Option<String>,
        tools: Option<Vec<ToolDefinition>>,
        fallback_client: Option<Arc<dyn ClientWrapper>>,
        enable_thinking: bool,
        turn_deadline: Instant,
        cancel: &CancellationToken,
        round: u32,
    ) -> AriaResult<ChatMessage> {
        if round >= self.config.max_tool_rounds {
            return Err(AriaError::Internal {
                message: "ToolLoopExhausted: exceeded max_tool_rounds".to_string(),
                incident_id: Uuid::new_v4(),
            });
        }

        let system_prompt = build_system_prompt(&self.kernel, agent, session_prompt_snapshot.as_deref());
        let mut wire_messages = vec![Message { role: Role::System, content: std::sync::Arc::from(system_prompt.as_str()), tool_calls: vec![] }];
        wire_messages.extend(history.iter().map(to_wire_message));

        let remaining = turn_deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(AriaError::UpstreamTimeout(format!("model '{}' call budget exhausted", model.id)));
        }

        let client = self.client_factory.client_for(model)?;
        let call_started = Instant::now();
        let response = self
            .call_llm_with_policy(&client, fallback_client.as_ref(), &wire_messages, tools.clone(), remaining, breaker)
            .await?;
        let call_latency_ms = call_started.elapsed().as_millis() as i64;

        if !response.tool_calls.is_empty() {
            if cancel.is_cancelled() {
                return Err(AriaError::Cancelled);
            }
            let assistant_tool_calls: Vec<ToolCallRecord> = response
                .tool_calls
                .iter()
                .map(|c| ToolCallRecord { id: c.id.clone(), name: c.name.clone(), arguments: c.arguments.clone() })
                .collect();

            let mut assistant_row = ChatMessage::new(*session_id, MessageRole::Assistant, response.content.clone(), &agent.agent_id);
            assistant_row.model = Some(model.id.clone());
            assistant_row.tool_calls = Some(assistant_tool_calls.clone());
            let assistant_row = self.session_store.append_message(assistant_row).await?;
            history.push(assistant_row);

            for call in &response.tool_calls {
                let tool_remaining = turn_deadline.saturating_duration_since(Instant::now());
                let per_tool_timeout = tool_remaining.min(self.config.tool_default_timeout);
                let outcome = self.dispatch_tool(call, per_tool_timeout).await;

                let (success, output, error, duration_ms) = match &outcome {
                    Ok((result, duration)) => (result.success, result.output.clone(), result.error.clone(), *duration),
                    Err((message, duration)) => (false, serde_json::Value::Null, Some(message.clone()), *duration),
                };

                let mut tool_row = ChatMessage::new(
                    *session_id,
                    MessageRole::Tool,
                    output.to_string(),
                    &agent.agent_id,
                );
                tool_row.tool_results = Some(vec![ToolResultRecord {
                    tool_call_id: call.id.clone(),
                    name: call.name.clone(),
                    success,
                    output: output.clone(),
                    error: error.clone(),
                    duration_ms,
                }]);
                let tool_row = self.session_store.append_message(tool_row).await?;
                history.push(tool_row);

                if let Err((message, _)) = &outcome {
                    if message.starts_with("ToolDeadlineExceeded") {
                        let mut partial = ChatMessage::new(*session_id, MessageRole::Assistant, response.content.clone(), &agent.agent_id);
                        partial.model = Some(model.id.clone());
                        return self.session_store.append_message(partial).await;
                    }
                }
            }

            return self
                .tool_loop(
                    session_id,
                    agent,
                    model,
                    breaker,
                    history,
                    session_prompt_snapshot,
                    tools,
                    fallback_client,
                    enable_thinking,
                    turn_deadline,
                    cancel,
                    round + 1,
                )
                .await;
        }

        let mut final_row = ChatMessage::new(*session_id, MessageRole::Assistant, response.content.clone(), &agent.agent_id);
        final_row.model = Some(model.id.clone());
        if enable_thinking {
            final_row.thinking = None; // wire format carries no native thinking field yet
        }
        let usage = client.get_last_usage().await;
        if let Some(u) = &usage {
            final_row.tokens_input = u.input_tokens as i32;
            final_row.tokens_output = u.output_tokens as i32;
            final_row.cost = (u.input_tokens as f64 * model.cost_input + u.output_tokens as f64 * model.cost_output)
                / 1_000_000.0;
        }
        final_row.latency_ms = call_latency_ms;
        let final_row = self.session_store.append_message(final_row).await?;
        breaker.record_success();
        Ok(final_row)
    }

    /// One LLM call honoring the spec §4.5 failure table: at-most-one retry
    /// with jitter on timeout/5xx, immediate failure on 4xx (other than 429),
    /// and `Retry-After` handling on 429.
    async fn call_llm_with_policy(
        &self,
        client: &Arc<dyn ClientWrapper>,
        fallback_client: Option<&Arc<dyn ClientWrapper>>,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
        remaining: Duration,
        breaker: &CircuitBreaker,
    ) -> AriaResult<Message> {
        let _permit = self
            .llm_pool
            .acquire()
            .await
            .map_err(|_| AriaError::internal("llm pool semaphore closed"))?;

        let attempt = |c: Arc<dyn ClientWrapper>| {
            let messages = messages.to_vec();
            let tools = tools.clone();
            async move { c.send_message(&messages, tools).await }
        };

        let outcome = tokio::time::timeout(remaining, attempt(Arc::clone(client))).await;
        match outcome {
            Err(_elapsed) => {
                breaker.record_failure();
                // Retry once: on the fallback model if the agent has one configured,
                // otherwise on the same client (spec §4.5 failure table).
                let retry_client = fallback_client.cloned().unwrap_or_else(|| Arc::clone(client));
                log::warn!(
                    "llm call to '{}' timed out, retrying once on '{}'",
                    client.model_name(),
                    retry_client.model_name()
                );
                let retried = tokio::time::timeout(remaining, attempt(retry_client)).await;
                match retried {
                    Ok(Ok(message)) => Ok(message),
                    _ => Err(AriaError::UpstreamTimeout("llm call exceeded deadline".to_string())),
                }
            }
            Ok(Ok(message)) => Ok(message),
            Ok(Err(err)) => {
                let description = err.to_string();
                if is_rate_limited(&description) {
                    if let Some(retry_after) = parse_retry_after(&description) {
                        if retry_after <= MAX_HONORED_RETRY_AFTER {
                            tokio::time::sleep(retry_after).await;
                            return client
                                .send_message(messages, tools)
                                .await
                                .map_err(|e| AriaError::UpstreamBadRequest(e.to_string()));
                        }
                    }
                    breaker.record_failure();
                    return Err(AriaError::UpstreamBadRequest(format!("rate limited: {description}")));
                }
                if is_client_error(&description) {
                    breaker.record_failure();
                    return Err(AriaError::UpstreamBadRequest(description));
                }
                // Transport/5xx: one retry after a fixed jittered delay.
                breaker.record_failure();
                let retried = retry_once_with_jitter(RETRY_BASE_DELAY, || {
                    let client = Arc::clone(client);
                    let messages = messages.to_vec();
                    let tools = tools.clone();
                    async move { client.send_message(&messages, tools).await.map_err(|e| e.to_string()) }
                })
                .await;
                retried.map_err(AriaError::UpstreamTimeout)
            }
        }
    }

    async fn dispatch_tool(
        &self,
        call: &NativeToolCall,
        timeout: Duration,
    ) -> Result<(crate::cloudllm::tool_protocol::ToolResult, i64), (String, i64)> {
        let skill_name = self
            .skill_registry
            .skill_for_tool(&call.name)
            .await
            .unwrap_or_else(|| call.name.clone());
        let started = Instant::now();
        let breaker = self.breaker_for(&format!("skill:{}", call.name));

        if breaker.is_open() {
            let duration_ms = started.elapsed().as_millis() as i64;
            return Err(("skill circuit open".to_string(), duration_ms));
        }

        let dispatched = tokio::time::timeout(timeout, self.skill_registry.dispatch(&call.name, call.arguments.clone())).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let outcome = match dispatched {
            Err(_elapsed) => {
                breaker.record_failure();
                Err(format!("ToolDeadlineExceeded: tool '{}' exceeded {:?}", call.name, timeout))
            }
            Ok(Err(e)) => {
                breaker.record_failure();
                Err(e.message())
            }
            Ok(Ok(result)) => {
                if result.success {
                    breaker.record_success();
                } else {
                    breaker.record_failure();
                }
                Ok(result)
            }
        };

        let mut invocation = crate::aria::models::SkillInvocation::new(skill_name, call.name.clone());
        invocation.duration_ms = duration_ms;
        invocation.success = outcome.is_ok() && outcome.as_ref().map(|r| r.success).unwrap_or(false);
        invocation.error_type = match &outcome {
            Ok(r) if !r.success => r.error.clone(),
            Err(e) => Some(e.clone()),
            _ => None,
        };
        if let Err(e) = self.skill_ledger.record(&invocation).await {
            log::warn!("failed to record skill invocation: {e}");
        }

        outcome.map(|r| (r, duration_ms)).map_err(|e| (e, duration_ms))
    }
}

fn is_rate_limited(description: &str) -> bool {
    description.contains("429")
}

fn is_client_error(description: &str) -> bool {
    description.contains("400") || description.contains("401") || description.contains("403") || description.contains("404") || description.contains("422")
}

fn parse_retry_after(description: &str) -> Option<Duration> {
    description
        .split("retry_after=")
        .nth(1)
        .and_then(|rest| rest.split(|c: char| !c.is_ascii_digit()).next())
        .and_then(|digits| digits.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Concatenates the kernel's system fragment, the agent's system prompt, and
/// the session's snapshot into exactly one system message (spec §4.5 step 3).
fn build_system_prompt(kernel: &Kernel, agent: &AgentRecord, session_snapshot: Option<&str>) -> String {
    join_system_sections(&kernel.system_prompt_fragment(), agent, session_snapshot)
}

fn join_system_sections(kernel_fragment: &str, agent: &AgentRecord, session_snapshot: Option<&str>) -> String {
    let mut sections = Vec::new();
    if !kernel_fragment.is_empty() {
        sections.push(kernel_fragment.to_string());
    }
    sections.push(agent.system_prompt.clone());
    if let Some(snapshot) = session_snapshot {
        if !snapshot.is_empty() {
            sections.push(snapshot.to_string());
        }
    }
    sections.join("\n\n")
}

fn to_wire_message(message: &ChatMessage) -> Message {
    let role = match message.role {
        MessageRole::System => Role::System,
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
        MessageRole::Tool => Role::Tool {
            call_id: message
                .tool_results
                .as_ref()
                .and_then(|r| r.first())
                .map(|r| r.tool_call_id.clone())
                .unwrap_or_default(),
        },
    };
    Message { role, content: std::sync::Arc::from(message.content.as_str()), tool_calls: vec![] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aria::models::AgentType;

    fn sample_agent() -> AgentRecord {
        AgentRecord {
            agent_id: "aria".to_string(),
            display_name: "Aria".to_string(),
            agent_type: AgentType::Agent,
            parent_agent_id: None,
            model: "gpt".to_string(),
            fallback_model: None,
            system_prompt: "You are Aria.".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            focus_type: None,
            skills: vec![],
            capabilities: vec![],
            enabled: true,
            timeout_seconds: 30,
            rate_limit: None,
            app_managed: false,
            status: AgentStatus::Idle,
            consecutive_failures: 0,
            pheromone_score: 0.5,
        }
    }

    #[test]
    fn estimate_tokens_is_at_least_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert!(estimate_tokens("hello world, this is a longer string") >= 1);
    }

    #[test]
    fn join_system_sections_includes_kernel_agent_and_session() {
        let agent = sample_agent();
        let joined = join_system_sections("kernel says hi", &agent, Some("session topic: onboarding"));
        assert!(joined.contains("kernel says hi"));
        assert!(joined.contains(&agent.system_prompt));
        assert!(joined.contains("onboarding"));
    }

    #[test]
    fn join_system_sections_omits_empty_fragments() {
        let agent = sample_agent();
        let joined = join_system_sections("", &agent, Some(""));
        assert_eq!(joined, agent.system_prompt);
    }

    #[test]
    fn is_client_error_detects_4xx_codes() {
        assert!(is_client_error("HTTP 400 Bad Request"));
        assert!(!is_client_error("HTTP 500 Internal Server Error"));
    }

    #[test]
    fn is_rate_limited_detects_429() {
        assert!(is_rate_limited("received 429 Too Many Requests"));
        assert!(!is_rate_limited("received 500"));
    }

    #[test]
    fn parse_retry_after_extracts_seconds() {
        assert_eq!(parse_retry_after("429 retry_after=3s"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("no header here"), None);
    }

    fn message_with_content(content: &str) -> ChatMessage {
        ChatMessage::new(Uuid::new_v4(), MessageRole::User, content, "aria")
    }

    #[test]
    fn trim_to_context_window_drops_oldest_when_over_budget() {
        let messages = vec![
            message_with_content(&"a".repeat(400)),
            message_with_content(&"b".repeat(400)),
            message_with_content(&"c".repeat(400)),
        ];
        let trimmed = trim_to_context_window(messages, 150);
        assert_eq!(trimmed.len(), 1);
        assert!(trimmed[0].content.starts_with('c'));
    }

    #[test]
    fn trim_to_context_window_keeps_newest_even_if_oversized_alone() {
        let messages = vec![message_with_content(&"z".repeat(4000))];
        let trimmed = trim_to_context_window(messages, 10);
        assert_eq!(trimmed.len(), 1);
    }

    #[test]
    fn trim_to_context_window_keeps_everything_under_budget() {
        let messages = vec![message_with_content("hi"), message_with_content("there")];
        let trimmed = trim_to_context_window(messages, 10_000);
        assert_eq!(trimmed.len(), 2);
    }
}
