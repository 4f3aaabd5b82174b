//! Append-only tool-call telemetry (spec §3 "Skill Invocation", §4.3).
//!
//! Every Chat Engine tool dispatch wraps its call with a timer and writes one
//! row here; rows are never mutated after insert. The ledger's only reads are
//! the aggregations this module exposes.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;

use crate::aria::error::AriaResult;
use crate::aria::models::{SkillHealth, SkillHealthDashboard, SkillHealthStatus, SkillInvocation};

const UNHEALTHY_SUCCESS_RATE: f64 = 0.7;
const DEGRADED_SUCCESS_RATE: f64 = 0.9;
const SLOW_P95_MS: f64 = 5000.0;
const COLD_START_SCORE: f64 = 0.5;
const EXPERT_HALF_LIFE_DAYS: f64 = 7.0;
const EXPERT_WINDOW_DAYS: i64 = 30;

/// A legacy telemetry source the one-shot startup backfill can read from. Each
/// method corresponds to one of the three sources named in spec §4.3 (generic
/// activity log, session metadata, model usage `skill:*` markers); the crate
/// ships the dedup/merge logic and a no-op default here, since the actual
/// legacy stores are CSV importers and one-off scripts (out of scope, spec §1).
#[async_trait::async_trait]
pub trait Backfillable: Send + Sync {
    async fn from_activity_log(&self) -> AriaResult<Vec<SkillInvocation>> {
        Ok(Vec::new())
    }
    async fn from_session_metadata(&self) -> AriaResult<Vec<SkillInvocation>> {
        Ok(Vec::new())
    }
    async fn from_model_usage_markers(&self) -> AriaResult<Vec<SkillInvocation>> {
        Ok(Vec::new())
    }
}

/// No-op default: nothing to backfill unless a caller supplies a real source.
pub struct NoBackfill;

impl Backfillable for NoBackfill {}

pub struct SkillLedger {
    pool: PgPool,
}

impl SkillLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends one row. Never mutated afterwards.
    pub async fn record(&self, invocation: &SkillInvocation) -> AriaResult<()> {
        sqlx::query(
            "INSERT INTO aria_data.skill_invocations
                (id, skill_name, tool_name, duration_ms, success, error_type, tokens_used, model_used, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(invocation.id)
        .bind(&invocation.skill_name)
        .bind(&invocation.tool_name)
        .bind(invocation.duration_ms)
        .bind(invocation.success)
        .bind(&invocation.error_type)
        .bind(invocation.tokens_used)
        .bind(&invocation.model_used)
        .bind(invocation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// One-shot, idempotent backfill run at startup. Inserts only rows not
    /// already present, keyed by `(skill_name, tool_name, created_at)`.
    pub async fn backfill(&self, source: &dyn Backfillable) -> AriaResult<u64> {
        let mut candidates = Vec::new();
        candidates.extend(source.from_activity_log().await?);
        candidates.extend(source.from_session_metadata().await?);
        candidates.extend(source.from_model_usage_markers().await?);

        let mut inserted = 0u64;
        for candidate in candidates {
            let exists: Option<(i64,)> = sqlx::query_as(
                "SELECT 1 FROM aria_data.skill_invocations
                 WHERE skill_name = $1 AND tool_name = $2 AND created_at = $3",
            )
            .bind(&candidate.skill_name)
            .bind(&candidate.tool_name)
            .bind(candidate.created_at)
            .fetch_optional(&self.pool)
            .await?;
            if exists.is_none() {
                self.record(&candidate).await?;
                inserted += 1;
            }
        }
        log::info!("skill ledger backfill inserted {inserted} rows");
        Ok(inserted)
    }

    async fn window_rows(&self, hours: i64) -> AriaResult<Vec<SkillInvocation>> {
        let since = Utc::now() - ChronoDuration::hours(hours);
        let rows: Vec<SkillInvocation> = sqlx::query_as(
            "SELECT id, skill_name, tool_name, duration_ms, success, error_type,
                    tokens_used, model_used, created_at
             FROM aria_data.skill_invocations WHERE created_at >= $1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Per-skill health over the trailing `hours` window, classified by the
    /// fixed thresholds from spec §4.3.
    pub async fn health(&self, hours: i64) -> AriaResult<SkillHealthDashboard> {
        let rows = self.window_rows(hours).await?;
        let mut by_skill: HashMap<String, Vec<&SkillInvocation>> = HashMap::new();
        for row in &rows {
            by_skill.entry(row.skill_name.clone()).or_default().push(row);
        }

        let mut per_skill = HashMap::new();
        let mut total = 0u64;
        let mut total_success = 0u64;
        for (skill_name, invocations) in by_skill {
            let n = invocations.len() as u64;
            let successes = invocations.iter().filter(|i| i.success).count() as u64;
            let success_rate = successes as f64 / n as f64;
            let avg_duration_ms =
                invocations.iter().map(|i| i.duration_ms as f64).sum::<f64>() / n as f64;
            let p95_duration_ms = percentile(&invocations.iter().map(|i| i.duration_ms as f64).collect::<Vec<_>>(), 0.95);
            let last_error = invocations
                .iter()
                .filter(|i| !i.success)
                .max_by_key(|i| i.created_at)
                .and_then(|i| i.error_type.clone());

            let status = if success_rate < UNHEALTHY_SUCCESS_RATE {
                SkillHealthStatus::Unhealthy
            } else if success_rate < DEGRADED_SUCCESS_RATE {
                SkillHealthStatus::Degraded
            } else if p95_duration_ms > SLOW_P95_MS {
                SkillHealthStatus::Slow
            } else {
                SkillHealthStatus::Healthy
            };

            total += n;
            total_success += successes;
            per_skill.insert(
                skill_name.clone(),
                SkillHealth {
                    skill_name,
                    invocations: n,
                    success_rate,
                    avg_duration_ms,
                    p95_duration_ms,
                    last_error,
                    status,
                },
            );
        }

        let overall_success_rate = if total > 0 {
            total_success as f64 / total as f64
        } else {
            1.0
        };

        Ok(SkillHealthDashboard {
            per_skill,
            overall_success_rate,
            total_invocations: total,
        })
    }

    /// Recency-weighted score per candidate for `task_type`, used by routing to
    /// pick an expert agent/skill. Exponential decay with a 7-day half-life over
    /// the last 30 days; candidates with no data get the fixed cold-start score.
    pub async fn expert_for(&self, task_type: &str, candidates: &[String]) -> AriaResult<HashMap<String, f64>> {
        let rows = self.window_rows(EXPERT_WINDOW_DAYS * 24).await?;
        let mut scores = HashMap::new();

        for candidate in candidates {
            let matching: Vec<&SkillInvocation> = rows
                .iter()
                .filter(|r| r.skill_name == *candidate || r.tool_name == *task_type)
                .collect();

            if matching.is_empty() {
                scores.insert(candidate.clone(), COLD_START_SCORE);
                continue;
            }

            let mut weighted_sum = 0.0;
            let mut weight_total = 0.0;
            for row in matching {
                let age_days = age_in_days(row.created_at);
                let weight = (-std::f64::consts::LN_2 * age_days / EXPERT_HALF_LIFE_DAYS).exp();
                let outcome = if row.success { 1.0 } else { 0.0 };
                weighted_sum += outcome * weight;
                weight_total += weight;
            }
            let score = if weight_total > 0.0 {
                weighted_sum / weight_total
            } else {
                COLD_START_SCORE
            };
            scores.insert(candidate.clone(), score);
        }
        Ok(scores)
    }
}

/// Nearest-rank percentile over an unsorted sample; returns 0 for an empty slice.
fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = ((p * sorted.len() as f64).ceil() as usize).saturating_sub(1).min(sorted.len() - 1);
    sorted[rank]
}

/// Kept for bookkeeping that needs "how long ago" without a DB round trip.
pub fn age_in_days(created_at: DateTime<Utc>) -> f64 {
    (Utc::now() - created_at).num_seconds() as f64 / 86_400.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_handles_single_value() {
        assert_eq!(percentile(&[42.0], 0.95), 42.0);
    }

    #[test]
    fn percentile_p95_of_sorted_run() {
        let values: Vec<f64> = (1..=100).map(|n| n as f64).collect();
        let p95 = percentile(&values, 0.95);
        assert_eq!(p95, 95.0);
    }

    #[test]
    fn percentile_empty_is_zero() {
        assert_eq!(percentile(&[], 0.95), 0.0);
    }
}
