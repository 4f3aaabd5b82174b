//! Persists Chat Sessions and Messages with monotone ordering, single-writer-per-
//! session serialization, and tool-call referential integrity (spec §3, §4.4).

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::aria::error::{AriaError, AriaResult};
use crate::aria::models::{
    ChatMessage, ChatSession, MessageRole, SessionStatus, ToolCallRecord,
};
use crate::aria::retry::retry_once_with_jitter;

/// Emitted when a `user`/`assistant` message is appended, for an external
/// embedder to consume (spec §4.4 "Embedding hook", §9 "Session summarization").
/// This crate only publishes the event; it never waits on the response, and an
/// absent embedding is never an error.
#[derive(Debug, Clone)]
pub struct EmbedRequested {
    pub session_id: Uuid,
    pub message_id: Uuid,
    pub content: String,
}

pub enum SessionEvent {
    EmbedRequested(EmbedRequested),
}

/// What `export_session` produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

pub struct SessionStore {
    pool: PgPool,
    write_locks: StdMutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Receiver end is owned by whoever boots the external embedder consumer;
    /// kept here so the channel has somewhere to park until taken.
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

impl SessionStore {
    pub fn new(pool: PgPool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            pool,
            write_locks: StdMutex::new(HashMap::new()),
            events: tx,
            events_rx: StdMutex::new(Some(rx)),
        }
    }

    /// Takes ownership of the embedding-event receiver. Callable exactly once;
    /// a second call returns `None`.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.lock().expect("events_rx lock poisoned").take()
    }

    fn lock_for(&self, session_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.write_locks.lock().expect("write_locks poisoned");
        locks.entry(session_id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub async fn create_session(&self, mut session: ChatSession) -> AriaResult<ChatSession> {
        session.id = Uuid::new_v4();
        session.created_at = Utc::now();
        session.updated_at = session.created_at;
        sqlx::query(
            "INSERT INTO aria_data.chat_sessions
                (id, agent_id, session_type, title, system_prompt_snapshot, model_snapshot,
                 status, message_count, total_tokens, total_cost, metadata, created_at, updated_at, ended_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)",
        )
        .bind(session.id)
        .bind(&session.agent_id)
        .bind(session.session_type)
        .bind(&session.title)
        .bind(&session.system_prompt_snapshot)
        .bind(&session.model_snapshot)
        .bind(session.status)
        .bind(session.message_count)
        .bind(session.total_tokens)
        .bind(session.total_cost)
        .bind(sqlx::types::Json(&session.metadata))
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.ended_at)
        .execute(&self.pool)
        .await?;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> AriaResult<ChatSession> {
        retry_once_with_jitter(std::time::Duration::from_millis(50), || async {
            sqlx::query_as::<_, ChatSession>("SELECT * FROM aria_data.chat_sessions WHERE id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(AriaError::from)
                .and_then(|row| row.ok_or_else(|| AriaError::NotFound(format!("session '{session_id}' not found"))))
        })
        .await
    }

    /// Appends one message. Serialized per-session; rejects a `tool` message
    /// whose `tool_call_id` was never offered by a prior assistant message
    /// (referential-integrity invariant, spec §3, §8).
    pub async fn append_message(&self, mut message: ChatMessage) -> AriaResult<ChatMessage> {
        let lock = self.lock_for(message.session_id);
        let _guard = lock.lock().await;

        if let MessageRole::Tool = message.role {
            let call_id = message
                .tool_calls
                .as_ref()
                .and_then(|calls| calls.first())
                .map(|c| c.id.clone());
            // Tool messages carry the call id they answer in `tool_results[0].tool_call_id`
            // by convention of this store's callers (the Chat Engine); fall back to
            // `tool_calls` for callers that set it there instead.
            let call_id = call_id.or_else(|| {
                message
                    .tool_results
                    .as_ref()
                    .and_then(|results| results.first())
                    .map(|r| r.tool_call_id.clone())
            });
            let call_id = call_id.ok_or_else(|| {
                AriaError::Validation("tool message missing a tool_call_id to verify".to_string())
            })?;
            self.verify_tool_call_id_exists(message.session_id, &call_id).await?;
        }

        message.id = Uuid::new_v4();
        message.created_at = self.next_created_at(message.session_id).await?;

        sqlx::query(
            "INSERT INTO aria_data.chat_messages
                (id, session_id, role, content, thinking, tool_calls, tool_results, model,
                 tokens_input, tokens_output, cost, latency_ms, embedding, agent_id, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.role)
        .bind(&message.content)
        .bind(&message.thinking)
        .bind(sqlx::types::Json(&message.tool_calls))
        .bind(sqlx::types::Json(&message.tool_results))
        .bind(&message.model)
        .bind(message.tokens_input)
        .bind(message.tokens_output)
        .bind(message.cost)
        .bind(message.latency_ms)
        .bind(&message.embedding)
        .bind(&message.agent_id)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE aria_data.chat_sessions
             SET message_count = message_count + 1,
                 total_tokens = total_tokens + $2,
                 total_cost = total_cost + $3,
                 updated_at = $4
             WHERE id = $1",
        )
        .bind(message.session_id)
        .bind((message.tokens_input + message.tokens_output) as i64)
        .bind(message.cost)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        if matches!(message.role, MessageRole::User | MessageRole::Assistant) {
            let _ = self.events.send(SessionEvent::EmbedRequested(EmbedRequested {
                session_id: message.session_id,
                message_id: message.id,
                content: message.content.clone(),
            }));
        }

        Ok(message)
    }

    /// Ensures `created_at` is strictly increasing per session even when the
    /// wall clock does not advance between two rapid appends (spec §5: "use a
    /// server-side clock sequence where needed").
    async fn next_created_at(&self, session_id: Uuid) -> AriaResult<DateTime<Utc>> {
        let last: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT created_at FROM aria_data.chat_messages WHERE session_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let now = Utc::now();
        Ok(match last {
            Some((prev,)) if prev >= now => prev + chrono::Duration::microseconds(1),
            _ => now,
        })
    }

    async fn verify_tool_call_id_exists(&self, session_id: Uuid, call_id: &str) -> AriaResult<()> {
        let assistant_messages: Vec<ChatMessage> = sqlx::query_as(
            "SELECT * FROM aria_data.chat_messages WHERE session_id = $1 AND role = 'assistant'",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let found = assistant_messages.iter().any(|m| {
            m.tool_calls
                .as_ref()
                .map(|calls| calls.iter().any(|c: &ToolCallRecord| c.id == call_id))
                .unwrap_or(false)
        });

        if found {
            Ok(())
        } else {
            Err(AriaError::Validation(format!(
                "tool message references unknown tool_call_id '{call_id}'"
            )))
        }
    }

    pub async fn list_messages(&self, session_id: Uuid, limit: i64, offset: i64) -> AriaResult<Vec<ChatMessage>> {
        let rows: Vec<ChatMessage> = sqlx::query_as(
            "SELECT * FROM aria_data.chat_messages
             WHERE session_id = $1 ORDER BY created_at ASC LIMIT $2 OFFSET $3",
        )
        .bind(session_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Loads up to `max_messages` most-recent messages, newest-last (spec §4.5
    /// step 3), for building the next turn's prompt.
    pub async fn recent_messages(&self, session_id: Uuid, max_messages: i64) -> AriaResult<Vec<ChatMessage>> {
        let mut rows: Vec<ChatMessage> = sqlx::query_as(
            "SELECT * FROM aria_data.chat_messages
             WHERE session_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(session_id)
        .bind(max_messages)
        .fetch_all(&self.pool)
        .await?;
        rows.reverse();
        Ok(rows)
    }

    pub async fn end_session(&self, session_id: Uuid, status: SessionStatus) -> AriaResult<()> {
        if status == SessionStatus::Active {
            return Err(AriaError::Validation("end_session cannot set status back to active".to_string()));
        }
        sqlx::query("UPDATE aria_data.chat_sessions SET status = $2, ended_at = $3, updated_at = $3 WHERE id = $1")
            .bind(session_id)
            .bind(status)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_session(&self, session_id: Uuid) -> AriaResult<()> {
        sqlx::query("DELETE FROM aria_data.chat_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        self.write_locks.lock().expect("write_locks poisoned").remove(&session_id);
        Ok(())
    }

    /// `export_session(format)` from spec §4.4. JSON export round-trips to an
    /// equivalent message list (modulo embeddings, per spec §8's invariant);
    /// markdown is a flattened transcript for human reading.
    pub async fn export_session(&self, session_id: Uuid, format: ExportFormat) -> AriaResult<String> {
        let session = self.get_session(session_id).await?;
        let messages = self.list_messages(session_id, i64::MAX, 0).await?;
        match format {
            ExportFormat::Json => {
                let payload = serde_json::json!({ "session": session, "messages": messages });
                serde_json::to_string_pretty(&payload)
                    .map_err(|e| AriaError::internal(format!("export serialization failed: {e}")))
            }
            ExportFormat::Markdown => {
                let mut out = format!("# Session {}\n\n", session.id);
                for message in &messages {
                    let role = match message.role {
                        MessageRole::System => "System",
                        MessageRole::User => "User",
                        MessageRole::Assistant => "Assistant",
                        MessageRole::Tool => "Tool",
                    };
                    out.push_str(&format!("**{role}** ({}):\n\n{}\n\n", message.created_at, message.content));
                }
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_format_round_trips_json_shape() {
        // Pure structural check: a JSON export round-trip must preserve the
        // message list modulo embeddings (spec §8 "Export round-trip").
        let msg = ChatMessage::new(Uuid::new_v4(), MessageRole::User, "hi", "agent-1");
        let json = serde_json::to_value(&msg).unwrap();
        let back: ChatMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.content, msg.content);
        assert_eq!(back.role, msg.role);
    }
}
