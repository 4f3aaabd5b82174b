//! Cron/interval job runner that synthesizes chat sessions on a tick (spec §4.7).
//!
//! The job table is owned exclusively by the tick loop; operators submit edits
//! through [`Scheduler::submit_edit`], a thread-safe queue drained at the top of
//! every tick, per the concurrency contract in spec §5 ("Scheduler job table:
//! modified only by the scheduler loop; operator edits go through the admin API
//! which publishes to the loop via a thread-safe queue").

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule as CronSchedule;
use sqlx::PgPool;
use uuid::Uuid;

use crate::aria::chat_engine::{CancellationToken, ChatEngine};
use crate::aria::error::{AriaError, AriaResult};
use crate::aria::models::{ChatSession, JobStatus, Schedule, ScheduledJob, SessionMode, SessionStatus, SessionType};
use crate::aria::session_store::SessionStore;

const TICK_RESOLUTION: StdDuration = StdDuration::from_secs(1);

pub enum JobEdit {
    Upsert(ScheduledJob),
    Delete(String),
    SetEnabled(String, bool),
}

/// Counts returned by [`Scheduler::sync_jobs`], mirroring Config Registry's sync report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSyncCounts {
    pub inserted: u32,
    pub updated: u32,
}

pub struct Scheduler {
    pool: PgPool,
    chat_engine: Arc<ChatEngine>,
    session_store: Arc<SessionStore>,
    jobs: StdMutex<Vec<ScheduledJob>>,
    pending_edits: StdMutex<Vec<JobEdit>>,
    in_flight: StdMutex<HashSet<String>>,
    persistent_sessions: StdMutex<HashMap<(String, String), Uuid>>,
}

impl Scheduler {
    pub fn new(pool: PgPool, chat_engine: Arc<ChatEngine>, session_store: Arc<SessionStore>) -> Self {
        Self {
            pool,
            chat_engine,
            session_store,
            jobs: StdMutex::new(Vec::new()),
            pending_edits: StdMutex::new(Vec::new()),
            in_flight: StdMutex::new(HashSet::new()),
            persistent_sessions: StdMutex::new(HashMap::new()),
        }
    }

    /// Loads the full job table from `aria_engine.scheduled_jobs`, e.g. at boot
    /// after [`Scheduler::sync_jobs`] has reconciled the YAML source into it.
    pub async fn load_from_db(&self) -> AriaResult<()> {
        let jobs = fetch_all_jobs(&self.pool).await?;
        *self.jobs.lock().expect("scheduler job table lock poisoned") = jobs;
        Ok(())
    }

    /// Startup YAML→DB reconciliation, analogous to Config Registry's sync:
    /// declared jobs absent from the DB are inserted; declared jobs already
    /// present have their definition fields updated while runtime/stat fields
    /// (`last_run_at`, counters, `next_run_at`, ...) are preserved. Never deletes.
    pub async fn sync_jobs(&self, declared: Vec<ScheduledJob>) -> AriaResult<JobSyncCounts> {
        let existing = fetch_all_jobs(&self.pool).await?;
        let mut by_id: HashMap<String, ScheduledJob> = existing.into_iter().map(|j| (j.id.clone(), j)).collect();

        let mut counts = JobSyncCounts::default();
        for mut declared_job in declared {
            match by_id.remove(&declared_job.id) {
                None => {
                    if declared_job.next_run_at.is_none() {
                        declared_job.next_run_at = compute_next_run_at(&declared_job.schedule, Utc::now()).ok();
                    }
                    insert_job_row(&self.pool, &declared_job).await?;
                    counts.inserted += 1;
                }
                Some(current) => {
                    declared_job.last_run_at = current.last_run_at;
                    declared_job.last_status = current.last_status;
                    declared_job.last_duration_ms = current.last_duration_ms;
                    declared_job.last_error = current.last_error;
                    declared_job.next_run_at = current.next_run_at;
                    declared_job.run_count = current.run_count;
                    declared_job.success_count = current.success_count;
                    declared_job.fail_count = current.fail_count;
                    update_job_row(&self.pool, &declared_job).await?;
                    counts.updated += 1;
                }
            }
        }
        Ok(counts)
    }

    /// Seeds the in-memory job table directly, bypassing the DB. Mainly useful
    /// for tests; production startup should prefer [`Scheduler::sync_jobs`]
    /// followed by [`Scheduler::load_from_db`].
    pub fn load_jobs(&self, jobs: Vec<ScheduledJob>) {
        let mut table = self.jobs.lock().expect("scheduler job table lock poisoned");
        *table = jobs;
    }

    /// Enqueues an operator edit; applied at the start of the next tick.
    pub fn submit_edit(&self, edit: JobEdit) {
        self.pending_edits.lock().expect("scheduler edit queue lock poisoned").push(edit);
    }

    pub fn snapshot(&self) -> Vec<ScheduledJob> {
        self.jobs.lock().expect("scheduler job table lock poisoned").clone()
    }

    /// Runs the 1-second tick loop until `cancel` fires.
    pub async fn run(self: &Arc<Self>, cancel: &CancellationToken) {
        loop {
            tokio::time::sleep(TICK_RESOLUTION).await;
            if cancel.is_cancelled() {
                log::info!("scheduler tick loop stopping on cancellation");
                return;
            }
            self.tick(Utc::now()).await;
        }
    }

    async fn tick(self: &Arc<Self>, now: DateTime<Utc>) {
        self.apply_pending_edits(now);

        let due: Vec<ScheduledJob> = {
            let jobs = self.jobs.lock().expect("scheduler job table lock poisoned");
            jobs.iter()
                .filter(|job| job.enabled && job.next_run_at.map(|t| t <= now).unwrap_or(true))
                .cloned()
                .collect()
        };

        for job in due {
            let overlapping = {
                let in_flight = self.in_flight.lock().expect("scheduler in-flight lock poisoned");
                in_flight.contains(&job.id)
            };

            let next_run_at = match compute_next_run_at(&job.schedule, now) {
                Ok(t) => Some(t),
                Err(e) => {
                    log::error!("job '{}' has an invalid schedule: {}", job.id, e.message());
                    None
                }
            };

            if overlapping {
                log::warn!("job '{}' skipped: previous run still in flight", job.id);
                if let Some(updated) = self.update_job(&job.id, |j| {
                    j.last_status = Some(JobStatus::Overlap);
                    j.next_run_at = next_run_at.or(j.next_run_at);
                }) {
                    self.persist(&updated).await;
                }
                continue;
            }

            if let Some(updated) = self.update_job(&job.id, |j| {
                j.last_run_at = Some(now);
                j.next_run_at = next_run_at.or(j.next_run_at);
            }) {
                self.persist(&updated).await;
            }
            self.in_flight.lock().expect("scheduler in-flight lock poisoned").insert(job.id.clone());

            let engine = Arc::clone(self);
            tokio::spawn(async move {
                engine.execute_job(job).await;
            });
        }
    }

    fn apply_pending_edits(&self, now: DateTime<Utc>) {
        let edits: Vec<JobEdit> =
            std::mem::take(&mut *self.pending_edits.lock().expect("scheduler edit queue lock poisoned"));
        if edits.is_empty() {
            return;
        }
        let mut jobs = self.jobs.lock().expect("scheduler job table lock poisoned");
        for edit in edits {
            match edit {
                JobEdit::Upsert(mut job) => {
                    if job.next_run_at.is_none() {
                        job.next_run_at = compute_next_run_at(&job.schedule, now).ok();
                    }
                    if let Some(existing) = jobs.iter_mut().find(|j| j.id == job.id) {
                        *existing = job;
                    } else {
                        jobs.push(job);
                    }
                }
                JobEdit::Delete(id) => jobs.retain(|j| j.id != id),
                JobEdit::SetEnabled(id, enabled) => {
                    if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
                        job.enabled = enabled;
                    }
                }
            }
        }
    }

    /// Mutates the in-memory row for `id`, if present, and returns a clone for
    /// the caller to persist (mutating and persisting can't share one lock
    /// guard across an `.await`).
    fn update_job(&self, id: &str, f: impl FnOnce(&mut ScheduledJob)) -> Option<ScheduledJob> {
        let mut jobs = self.jobs.lock().expect("scheduler job table lock poisoned");
        let job = jobs.iter_mut().find(|j| j.id == id)?;
        f(job);
        Some(job.clone())
    }

    async fn persist(&self, job: &ScheduledJob) {
        if let Err(e) = update_job_row(&self.pool, job).await {
            log::warn!("failed to persist scheduled job '{}': {}", job.id, e.message());
        }
    }

    async fn execute_job(self: Arc<Self>, job: ScheduledJob) {
        let started = Instant::now();
        let outcome = self.run_one_fire(&job).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let updated = self.update_job(&job.id, |j| {
            j.run_count += 1;
            j.last_duration_ms = Some(duration_ms);
            match &outcome {
                Ok(()) => {
                    j.last_status = Some(JobStatus::Ok);
                    j.last_error = None;
                    j.success_count += 1;
                }
                Err(JobFireError::Timeout) => {
                    j.last_status = Some(JobStatus::Timeout);
                    j.last_error = Some("job exceeded max_duration_seconds".to_string());
                    j.fail_count += 1;
                }
                Err(JobFireError::Failed(message)) => {
                    j.last_status = Some(JobStatus::Fail);
                    j.last_error = Some(message.clone());
                    j.fail_count += 1;
                }
            }
        });
        if let Some(updated) = updated {
            self.persist(&updated).await;
        }

        self.in_flight.lock().expect("scheduler in-flight lock poisoned").remove(&job.id);
    }

    async fn run_one_fire(&self, job: &ScheduledJob) -> Result<(), JobFireError> {
        let session_id = self
            .resolve_session(job)
            .await
            .map_err(|e| JobFireError::Failed(e.message()))?;

        let deadline = StdDuration::from_secs(job.max_duration_seconds.max(1) as u64);
        let result = tokio::time::timeout(
            deadline,
            self.chat_engine.send_message(session_id, &job.payload, true, false),
        )
        .await;

        match result {
            Err(_) => Err(JobFireError::Timeout),
            Ok(Err(e)) => Err(JobFireError::Failed(e.message())),
            Ok(Ok(_message)) => Ok(()),
        }
    }

    async fn resolve_session(&self, job: &ScheduledJob) -> AriaResult<Uuid> {
        match job.session_mode {
            SessionMode::Isolated => {
                let session = self
                    .session_store
                    .create_session(ChatSession::new(job.agent_id.clone(), SessionType::Cron))
                    .await?;
                Ok(session.id)
            }
            SessionMode::Persistent => {
                let key = (job.id.clone(), job.agent_id.clone());
                let existing = self.persistent_sessions.lock().expect("persistent session map lock poisoned").get(&key).copied();

                if let Some(session_id) = existing {
                    if let Ok(session) = self.session_store.get_session(session_id).await {
                        if session.status == SessionStatus::Active {
                            return Ok(session_id);
                        }
                    }
                }

                let session = self
                    .session_store
                    .create_session(ChatSession::new(job.agent_id.clone(), SessionType::Cron))
                    .await?;
                self.persistent_sessions
                    .lock()
                    .expect("persistent session map lock poisoned")
                    .insert(key, session.id);
                Ok(session.id)
            }
        }
    }
}

enum JobFireError {
    Timeout,
    Failed(String),
}

/// Wire shape of `aria_engine.scheduled_jobs`: `Schedule` is a sum type, so it
/// can't derive `sqlx::FromRow` directly; this row splits it into two nullable
/// columns and [`ScheduledJobRow::into_job`] reassembles the enum.
#[derive(sqlx::FromRow)]
struct ScheduledJobRow {
    id: String,
    name: String,
    cron_expression: Option<String>,
    every_spec: Option<String>,
    agent_id: String,
    payload: String,
    session_mode: SessionMode,
    max_duration_seconds: i32,
    retry_count: i32,
    enabled: bool,
    last_run_at: Option<DateTime<Utc>>,
    last_status: Option<JobStatus>,
    last_duration_ms: Option<i64>,
    last_error: Option<String>,
    next_run_at: Option<DateTime<Utc>>,
    run_count: i64,
    success_count: i64,
    fail_count: i64,
}

impl ScheduledJobRow {
    fn into_job(self) -> AriaResult<ScheduledJob> {
        let schedule = schedule_from_columns(&self.id, self.cron_expression, self.every_spec)?;
        Ok(ScheduledJob {
            id: self.id,
            name: self.name,
            schedule,
            agent_id: self.agent_id,
            payload: self.payload,
            session_mode: self.session_mode,
            max_duration_seconds: self.max_duration_seconds.max(0) as u32,
            retry_count: self.retry_count.max(0) as u32,
            enabled: self.enabled,
            last_run_at: self.last_run_at,
            last_status: self.last_status,
            last_duration_ms: self.last_duration_ms,
            last_error: self.last_error,
            next_run_at: self.next_run_at,
            run_count: self.run_count.max(0) as u64,
            success_count: self.success_count.max(0) as u64,
            fail_count: self.fail_count.max(0) as u64,
        })
    }
}

/// Exactly one of `cron`/`every` must be set (spec §9 Open Question: reject at
/// load if both or neither are present).
fn schedule_from_columns(job_id: &str, cron: Option<String>, every: Option<String>) -> AriaResult<Schedule> {
    match (cron, every) {
        (Some(expr), None) => Ok(Schedule::Cron(expr)),
        (None, Some(spec)) => Ok(Schedule::Every(spec)),
        _ => Err(AriaError::ConfigurationError(format!(
            "job '{job_id}' must set exactly one of cron or every"
        ))),
    }
}

fn schedule_to_columns(schedule: &Schedule) -> (Option<&str>, Option<&str>) {
    match schedule {
        Schedule::Cron(expr) => (Some(expr.as_str()), None),
        Schedule::Every(spec) => (None, Some(spec.as_str())),
    }
}

async fn fetch_all_jobs(pool: &PgPool) -> AriaResult<Vec<ScheduledJob>> {
    let rows: Vec<ScheduledJobRow> = sqlx::query_as("SELECT * FROM aria_engine.scheduled_jobs")
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(ScheduledJobRow::into_job).collect()
}

async fn insert_job_row(pool: &PgPool, job: &ScheduledJob) -> AriaResult<()> {
    let (cron_expression, every_spec) = schedule_to_columns(&job.schedule);
    sqlx::query(
        "INSERT INTO aria_engine.scheduled_jobs
            (id, name, cron_expression, every_spec, agent_id, payload, session_mode,
             max_duration_seconds, retry_count, enabled, last_run_at, last_status,
             last_duration_ms, last_error, next_run_at, run_count, success_count, fail_count)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)",
    )
    .bind(&job.id)
    .bind(&job.name)
    .bind(cron_expression)
    .bind(every_spec)
    .bind(&job.agent_id)
    .bind(&job.payload)
    .bind(job.session_mode)
    .bind(job.max_duration_seconds as i32)
    .bind(job.retry_count as i32)
    .bind(job.enabled)
    .bind(job.last_run_at)
    .bind(job.last_status)
    .bind(job.last_duration_ms)
    .bind(&job.last_error)
    .bind(job.next_run_at)
    .bind(job.run_count as i64)
    .bind(job.success_count as i64)
    .bind(job.fail_count as i64)
    .execute(pool)
    .await?;
    Ok(())
}

async fn update_job_row(pool: &PgPool, job: &ScheduledJob) -> AriaResult<()> {
    let (cron_expression, every_spec) = schedule_to_columns(&job.schedule);
    sqlx::query(
        "UPDATE aria_engine.scheduled_jobs SET
            name=$2, cron_expression=$3, every_spec=$4, agent_id=$5, payload=$6, session_mode=$7,
            max_duration_seconds=$8, retry_count=$9, enabled=$10, last_run_at=$11, last_status=$12,
            last_duration_ms=$13, last_error=$14, next_run_at=$15, run_count=$16, success_count=$17,
            fail_count=$18
         WHERE id=$1",
    )
    .bind(&job.id)
    .bind(&job.name)
    .bind(cron_expression)
    .bind(every_spec)
    .bind(&job.agent_id)
    .bind(&job.payload)
    .bind(job.session_mode)
    .bind(job.max_duration_seconds as i32)
    .bind(job.retry_count as i32)
    .bind(job.enabled)
    .bind(job.last_run_at)
    .bind(job.last_status)
    .bind(job.last_duration_ms)
    .bind(&job.last_error)
    .bind(job.next_run_at)
    .bind(job.run_count as i64)
    .bind(job.success_count as i64)
    .bind(job.fail_count as i64)
    .execute(pool)
    .await?;
    Ok(())
}

fn compute_next_run_at(schedule: &Schedule, from: DateTime<Utc>) -> AriaResult<DateTime<Utc>> {
    match schedule {
        Schedule::Cron(expr) => {
            let parsed = CronSchedule::from_str(expr)
                .map_err(|e| AriaError::ConfigurationError(format!("invalid cron expression '{expr}': {e}")))?;
            parsed
                .after(&from)
                .next()
                .ok_or_else(|| AriaError::ConfigurationError(format!("cron expression '{expr}' has no future occurrences")))
        }
        Schedule::Every(spec) => {
            let duration = parse_duration_spec(spec)?;
            Ok(from + duration)
        }
    }
}

/// Parses `every:` interval specs like `"15m"`, `"1h"`, `"30s"`, `"2d"`.
fn parse_duration_spec(spec: &str) -> AriaResult<ChronoDuration> {
    let spec = spec.trim();
    let (digits, unit) = spec.split_at(spec.len().saturating_sub(1));
    let amount: i64 = digits
        .parse()
        .map_err(|_| AriaError::ConfigurationError(format!("invalid duration spec '{spec}'")))?;
    match unit {
        "s" => Ok(ChronoDuration::seconds(amount)),
        "m" => Ok(ChronoDuration::minutes(amount)),
        "h" => Ok(ChronoDuration::hours(amount)),
        "d" => Ok(ChronoDuration::days(amount)),
        _ => Err(AriaError::ConfigurationError(format!(
            "unsupported duration unit in '{spec}' (expected s, m, h, or d)"
        ))),
    }
}

/// Parses `cron_jobs.yaml` (spec §6: `{jobs: [{name, agent, session, text,
/// (every|cron), enabled}]}`) into declared [`ScheduledJob`]s ready for
/// [`Scheduler::sync_jobs`]. The job's stable `id` is its `name`, matching how
/// the file has no separate id field.
pub fn parse_cron_jobs_yaml(source: &str) -> AriaResult<Vec<ScheduledJob>> {
    #[derive(serde::Deserialize)]
    struct CronJobsFile {
        #[serde(default)]
        jobs: Vec<CronJobEntry>,
    }
    #[derive(serde::Deserialize)]
    struct CronJobEntry {
        name: String,
        agent: String,
        #[serde(default)]
        session: Option<SessionMode>,
        text: String,
        #[serde(default)]
        cron: Option<String>,
        #[serde(default)]
        every: Option<String>,
        #[serde(default = "default_enabled")]
        enabled: bool,
        #[serde(default = "default_max_duration_seconds")]
        max_duration_seconds: u32,
    }
    fn default_enabled() -> bool {
        true
    }
    fn default_max_duration_seconds() -> u32 {
        120
    }

    let parsed: CronJobsFile = serde_yaml::from_str(source)
        .map_err(|e| AriaError::ConfigurationError(format!("cron_jobs.yaml parse error: {e}")))?;

    parsed
        .jobs
        .into_iter()
        .map(|entry| {
            let schedule = match (entry.cron, entry.every) {
                (Some(cron), None) => Schedule::Cron(cron),
                (None, Some(every)) => Schedule::Every(every),
                (Some(_), Some(_)) => {
                    return Err(AriaError::ConfigurationError(format!(
                        "cron_jobs.yaml: job '{}' declares both 'cron' and 'every'",
                        entry.name
                    )))
                }
                (None, None) => {
                    return Err(AriaError::ConfigurationError(format!(
                        "cron_jobs.yaml: job '{}' declares neither 'cron' nor 'every'",
                        entry.name
                    )))
                }
            };
            Ok(ScheduledJob {
                id: entry.name.clone(),
                name: entry.name,
                schedule,
                agent_id: entry.agent,
                payload: entry.text,
                session_mode: entry.session.unwrap_or(SessionMode::Isolated),
                max_duration_seconds: entry.max_duration_seconds,
                retry_count: 0,
                enabled: entry.enabled,
                last_run_at: None,
                last_status: None,
                last_duration_ms: None,
                last_error: None,
                next_run_at: None,
                run_count: 0,
                success_count: 0,
                fail_count: 0,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_spec_minutes() {
        assert_eq!(parse_duration_spec("15m").unwrap(), ChronoDuration::minutes(15));
    }

    #[test]
    fn parse_duration_spec_hours() {
        assert_eq!(parse_duration_spec("1h").unwrap(), ChronoDuration::hours(1));
    }

    #[test]
    fn parse_duration_spec_seconds() {
        assert_eq!(parse_duration_spec("30s").unwrap(), ChronoDuration::seconds(30));
    }

    #[test]
    fn parse_duration_spec_rejects_unknown_unit() {
        assert!(parse_duration_spec("15x").is_err());
    }

    #[test]
    fn compute_next_run_at_every_advances_from_now() {
        let now = Utc::now();
        let next = compute_next_run_at(&Schedule::Every("15m".to_string()), now).unwrap();
        assert_eq!(next, now + ChronoDuration::minutes(15));
    }

    #[test]
    fn compute_next_run_at_cron_yields_a_future_time() {
        let now = Utc::now();
        let next = compute_next_run_at(&Schedule::Cron("0 0 * * * *".to_string()), now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn compute_next_run_at_rejects_invalid_cron() {
        assert!(compute_next_run_at(&Schedule::Cron("not a cron".to_string()), Utc::now()).is_err());
    }

    #[test]
    fn parse_cron_jobs_yaml_basic() {
        let yaml = r#"
jobs:
  - name: daily-digest
    agent: researcher
    session: isolated
    text: "Summarize yesterday's activity."
    cron: "0 0 6 * * *"
    enabled: true
  - name: heartbeat
    agent: monitor
    text: "Check system health."
    every: "5m"
"#;
        let jobs = parse_cron_jobs_yaml(yaml).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "daily-digest");
        assert_eq!(jobs[0].schedule, Schedule::Cron("0 0 6 * * *".to_string()));
        assert_eq!(jobs[0].session_mode, SessionMode::Isolated);
        assert_eq!(jobs[1].schedule, Schedule::Every("5m".to_string()));
        assert_eq!(jobs[1].run_count, 0);
    }

    #[test]
    fn parse_cron_jobs_yaml_rejects_both_cron_and_every() {
        let yaml = r#"
jobs:
  - name: bad
    agent: researcher
    text: "x"
    cron: "0 0 * * * *"
    every: "5m"
"#;
        assert!(parse_cron_jobs_yaml(yaml).is_err());
    }

    #[test]
    fn parse_cron_jobs_yaml_rejects_neither_cron_nor_every() {
        let yaml = r#"
jobs:
  - name: bad
    agent: researcher
    text: "x"
"#;
        assert!(parse_cron_jobs_yaml(yaml).is_err());
    }
}
