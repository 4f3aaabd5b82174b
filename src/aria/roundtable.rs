//! N-agent discussion with strict turn ordering and a final synthesis (spec §4.6,
//! the second anchor hard subsystem). Generalizes the teacher's `CouncilSession`
//! turn-ordering/transcript pattern: instead of calling a raw `ClientWrapper`
//! directly, every turn is a one-shot invocation of the [`ChatEngine`] against a
//! fresh ephemeral child session, so the full tool loop, circuit breaker, and
//! persistence guarantees of a normal chat turn apply to roundtable turns too.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::aria::chat_engine::{CancellationToken, ChatEngine};
use crate::aria::config_registry::ConfigRegistry;
use crate::aria::error::{AriaError, AriaResult};
use crate::aria::models::{
    ChatMessage, ChatSession, MessageRole, RoundtableRecord, RoundtableTurn, SessionStatus, SessionType,
};
use crate::aria::session_store::SessionStore;

/// How long a completed/failed async run's status stays queryable.
const STATUS_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundtableStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
}

#[derive(Clone, Debug)]
pub struct RoundtableStatusReport {
    pub status: RoundtableStatus,
    pub record: Option<RoundtableRecord>,
}

struct TrackedRun {
    status: RoundtableStatus,
    record: Option<RoundtableRecord>,
    finished_at: Option<Instant>,
}

enum TurnOutcome {
    Completed(String),
    TimedOut,
    Cancelled,
    Failed(String),
}

pub struct RoundtableEngine {
    chat_engine: Arc<ChatEngine>,
    session_store: Arc<SessionStore>,
    config_registry: Arc<ConfigRegistry>,
    tracked: StdMutex<HashMap<Uuid, TrackedRun>>,
}

impl RoundtableEngine {
    pub fn new(
        chat_engine: Arc<ChatEngine>,
        session_store: Arc<SessionStore>,
        config_registry: Arc<ConfigRegistry>,
    ) -> Self {
        Self {
            chat_engine,
            session_store,
            config_registry,
            tracked: StdMutex::new(HashMap::new()),
        }
    }

    fn validate_inputs(&self, agent_ids: &[String], rounds: u32, synthesizer_id: &str) -> AriaResult<()> {
        if agent_ids.len() < 2 {
            return Err(AriaError::Validation(
                "roundtable requires at least 2 agent_ids".to_string(),
            ));
        }
        if rounds < 1 {
            return Err(AriaError::Validation("rounds must be >= 1".to_string()));
        }
        for agent_id in agent_ids {
            let agent = self.config_registry.get_agent(agent_id)?;
            if !agent.enabled {
                return Err(AriaError::ConfigurationError(format!(
                    "agent '{agent_id}' is disabled"
                )));
            }
        }
        let synthesizer = self.config_registry.get_agent(synthesizer_id)?;
        if !synthesizer.enabled {
            return Err(AriaError::ConfigurationError(format!(
                "synthesizer agent '{synthesizer_id}' is disabled"
            )));
        }
        Ok(())
    }

    /// Synchronous variant: runs the whole discussion and returns the final record.
    #[allow(clippy::too_many_arguments)]
    pub async fn discuss(
        &self,
        topic: &str,
        agent_ids: &[String],
        rounds: u32,
        synthesizer_id: &str,
        agent_timeout: Duration,
        total_timeout: Duration,
        cancel: &CancellationToken,
    ) -> AriaResult<RoundtableRecord> {
        self.validate_inputs(agent_ids, rounds, synthesizer_id)?;
        let parent = self
            .session_store
            .create_session(ChatSession::new(synthesizer_id, SessionType::Roundtable))
            .await?;
        self.run(topic, agent_ids, rounds, synthesizer_id, agent_timeout, total_timeout, cancel, parent)
            .await
    }

    /// Async variant: creates the parent session synchronously (its id is the
    /// tracking key and the roundtable's id), then runs the discussion in the
    /// background. Status is cached for `STATUS_TTL` after completion.
    #[allow(clippy::too_many_arguments)]
    pub async fn discuss_async(
        self: &Arc<Self>,
        topic: String,
        agent_ids: Vec<String>,
        rounds: u32,
        synthesizer_id: String,
        agent_timeout: Duration,
        total_timeout: Duration,
    ) -> AriaResult<Uuid> {
        self.validate_inputs(&agent_ids, rounds, &synthesizer_id)?;
        let parent = self
            .session_store
            .create_session(ChatSession::new(synthesizer_id.clone(), SessionType::Roundtable))
            .await?;
        let key = parent.id;

        {
            let mut tracked = self.tracked.lock().expect("roundtable tracking lock poisoned");
            prune_expired(&mut tracked);
            tracked.insert(
                key,
                TrackedRun { status: RoundtableStatus::Queued, record: None, finished_at: None },
            );
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            {
                let mut tracked = engine.tracked.lock().expect("roundtable tracking lock poisoned");
                if let Some(entry) = tracked.get_mut(&key) {
                    entry.status = RoundtableStatus::Running;
                }
            }

            let cancel = CancellationToken::new();
            let outcome = engine
                .run(&topic, &agent_ids, rounds, &synthesizer_id, agent_timeout, total_timeout, &cancel, parent)
                .await;

            let mut tracked = engine.tracked.lock().expect("roundtable tracking lock poisoned");
            match outcome {
                Ok(record) => {
                    let status = if record.partial { RoundtableStatus::Timeout } else { RoundtableStatus::Completed };
                    tracked.insert(
                        key,
                        TrackedRun { status, record: Some(record), finished_at: Some(Instant::now()) },
                    );
                }
                Err(e) => {
                    log::warn!("roundtable '{key}' failed: {}", e.message());
                    tracked.insert(
                        key,
                        TrackedRun { status: RoundtableStatus::Failed, record: None, finished_at: Some(Instant::now()) },
                    );
                }
            }
        });

        Ok(key)
    }

    pub fn status(&self, tracking_key: Uuid) -> AriaResult<RoundtableStatusReport> {
        let mut tracked = self.tracked.lock().expect("roundtable tracking lock poisoned");
        prune_expired(&mut tracked);
        tracked
            .get(&tracking_key)
            .map(|entry| RoundtableStatusReport { status: entry.status, record: entry.record.clone() })
            .ok_or_else(|| AriaError::NotFound(format!("no roundtable tracked under '{tracking_key}'")))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        topic: &str,
        agent_ids: &[String],
        rounds: u32,
        synthesizer_id: &str,
        agent_timeout: Duration,
        total_timeout: Duration,
        cancel: &CancellationToken,
        parent: ChatSession,
    ) -> AriaResult<RoundtableRecord> {
        let started = Instant::now();
        let total_deadline = started + total_timeout;
        let mut turns: Vec<RoundtableTurn> = Vec::with_capacity(rounds as usize * agent_ids.len());
        let mut partial = false;

        'rounds: for round_number in 1..=rounds {
            for (position, agent_id) in agent_ids.iter().enumerate() {
                if cancel.is_cancelled() || Instant::now() >= total_deadline {
                    partial = true;
                    break 'rounds;
                }

                let prompt = build_turn_prompt(topic, &turns);
                let turn_started = Instant::now();
                let outcome = self.run_one_turn(agent_id, &prompt, agent_timeout, cancel).await;
                let duration_ms = turn_started.elapsed().as_millis() as i64;

                let turn = match outcome {
                    TurnOutcome::Completed(content) => RoundtableTurn {
                        agent_id: agent_id.clone(),
                        round_number,
                        position: position as u32,
                        content,
                        duration_ms,
                        timed_out: false,
                    },
                    TurnOutcome::TimedOut => RoundtableTurn {
                        agent_id: agent_id.clone(),
                        round_number,
                        position: position as u32,
                        content: format!("[{agent_id} timed out]"),
                        duration_ms,
                        timed_out: true,
                    },
                    TurnOutcome::Failed(reason) => RoundtableTurn {
                        agent_id: agent_id.clone(),
                        round_number,
                        position: position as u32,
                        content: format!("[{agent_id} failed: {reason}]"),
                        duration_ms,
                        timed_out: true,
                    },
                    TurnOutcome::Cancelled => {
                        partial = true;
                        break 'rounds;
                    }
                };

                self.session_store
                    .append_message(ChatMessage::new(parent.id, MessageRole::Assistant, turn.content.clone(), agent_id.clone()))
                    .await?;
                turns.push(turn);
            }
        }

        let synthesis_prompt = build_synthesis_prompt(topic, &turns);
        let synthesis = match self.run_one_turn(synthesizer_id, &synthesis_prompt, agent_timeout, cancel).await {
            TurnOutcome::Completed(content) => content,
            TurnOutcome::TimedOut | TurnOutcome::Failed(_) | TurnOutcome::Cancelled => {
                partial = true;
                "[synthesis unavailable]".to_string()
            }
        };

        self.session_store
            .append_message(ChatMessage::new(parent.id, MessageRole::Assistant, synthesis.clone(), synthesizer_id.to_string()))
            .await?;
        self.session_store.end_session(parent.id, SessionStatus::Completed).await?;

        Ok(RoundtableRecord {
            session_id: parent.id,
            topic: topic.to_string(),
            participants: agent_ids.to_vec(),
            rounds,
            turn_count: turns.len() as u32,
            synthesis,
            synthesizer_id: synthesizer_id.to_string(),
            total_duration_ms: started.elapsed().as_millis() as i64,
            turns,
            partial,
        })
    }

    async fn run_one_turn(
        &self,
        agent_id: &str,
        prompt: &str,
        agent_timeout: Duration,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let child = match self
            .session_store
            .create_session(ChatSession::new(agent_id, SessionType::Roundtable))
            .await
        {
            Ok(session) => session,
            Err(e) => return TurnOutcome::Failed(e.message()),
        };

        let result = tokio::time::timeout(
            agent_timeout,
            self.chat_engine.send_message_cancellable(child.id, prompt, false, false, cancel),
        )
        .await;

        if let Err(e) = self.session_store.end_session(child.id, SessionStatus::Completed).await {
            log::warn!("failed to close ephemeral roundtable session '{}': {}", child.id, e.message());
        }

        match result {
            Err(_) => TurnOutcome::TimedOut,
            Ok(Err(AriaError::Cancelled)) => TurnOutcome::Cancelled,
            Ok(Err(e)) => TurnOutcome::Failed(e.message()),
            Ok(Ok(message)) => TurnOutcome::Completed(message.content),
        }
    }
}

fn prune_expired(tracked: &mut HashMap<Uuid, TrackedRun>) {
    tracked.retain(|_, entry| match entry.finished_at {
        Some(finished_at) => finished_at.elapsed() < STATUS_TTL,
        None => true,
    });
}

fn build_turn_prompt(topic: &str, turns: &[RoundtableTurn]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Roundtable topic: ");
    prompt.push_str(topic);
    if !turns.is_empty() {
        prompt.push_str("\n\nPrior turns:\n");
        for turn in turns {
            prompt.push_str(&format!(
                "[round {}] {}: {}\n",
                turn.round_number, turn.agent_id, turn.content
            ));
        }
    }
    prompt.push_str("\nContribute your turn, building on the discussion so far.");
    prompt
}

fn build_synthesis_prompt(topic: &str, turns: &[RoundtableTurn]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Roundtable topic: ");
    prompt.push_str(topic);
    prompt.push_str("\n\nFull discussion:\n");
    for turn in turns {
        prompt.push_str(&format!(
            "[round {}] {}: {}\n",
            turn.round_number, turn.agent_id, turn.content
        ));
    }
    prompt.push_str("\nSynthesize the discussion above into a single final answer.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_turn_prompt_includes_topic_and_prior_turns() {
        let turns = vec![RoundtableTurn {
            agent_id: "a".to_string(),
            round_number: 1,
            position: 0,
            content: "first point".to_string(),
            duration_ms: 10,
            timed_out: false,
        }];
        let prompt = build_turn_prompt("widgets", &turns);
        assert!(prompt.contains("widgets"));
        assert!(prompt.contains("first point"));
        assert!(prompt.contains("a"));
    }

    #[test]
    fn build_turn_prompt_omits_prior_turns_section_when_empty() {
        let prompt = build_turn_prompt("widgets", &[]);
        assert!(!prompt.contains("Prior turns"));
    }

    #[test]
    fn build_synthesis_prompt_includes_all_turns() {
        let turns = vec![
            RoundtableTurn {
                agent_id: "a".to_string(),
                round_number: 1,
                position: 0,
                content: "alpha".to_string(),
                duration_ms: 5,
                timed_out: false,
            },
            RoundtableTurn {
                agent_id: "b".to_string(),
                round_number: 1,
                position: 1,
                content: "beta".to_string(),
                duration_ms: 5,
                timed_out: false,
            },
        ];
        let prompt = build_synthesis_prompt("widgets", &turns);
        assert!(prompt.contains("alpha"));
        assert!(prompt.contains("beta"));
        assert!(prompt.contains("Synthesize"));
    }

    #[test]
    fn prune_expired_keeps_unfinished_and_recent_entries() {
        let mut tracked = HashMap::new();
        tracked.insert(
            Uuid::new_v4(),
            TrackedRun { status: RoundtableStatus::Running, record: None, finished_at: None },
        );
        tracked.insert(
            Uuid::new_v4(),
            TrackedRun { status: RoundtableStatus::Completed, record: None, finished_at: Some(Instant::now()) },
        );
        prune_expired(&mut tracked);
        assert_eq!(tracked.len(), 2);
    }
}
