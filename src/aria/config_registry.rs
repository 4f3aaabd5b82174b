//! Authoritative, hot-reloadable catalog of Agents and Models (spec §3, §4.2).
//!
//! Sync direction is source → DB with opt-in preservation: an operator edit sets
//! `app_managed = true`; subsequent syncs skip that row unless `force = true`.
//! The published snapshot is `Arc<RegistrySnapshot>` behind a `RwLock` — the
//! teacher has no atomic-pointer crate, and a `RwLock<Arc<_>>` gives the same
//! "readers see old or new, never partial" guarantee (spec §5) in the teacher's
//! own dependency-minimal style.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::PgPool;

use crate::aria::error::{AriaError, AriaResult};
use crate::aria::models::{AgentRecord, ModelRecord};

/// Counts returned by a sync pass (spec §4.2 step 5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncCounts {
    pub inserted: u32,
    pub updated: u32,
    pub skipped: u32,
}

/// Implemented by `AgentRecord` and `ModelRecord` so the registry can run one
/// generic `sync<T: Syncable>` routine for both entity kinds (SPEC_FULL §4.2).
pub trait Syncable: Clone {
    fn id(&self) -> &str;
    fn app_managed(&self) -> bool;
    /// Copies everything *except* runtime state from `source` onto `self` — the
    /// sync algorithm preserves `status`/counters/pheromone on update.
    fn apply_declared_fields(&mut self, source: &Self);
    fn set_app_managed(&mut self, value: bool);
}

impl Syncable for AgentRecord {
    fn id(&self) -> &str {
        &self.agent_id
    }
    fn app_managed(&self) -> bool {
        self.app_managed
    }
    fn apply_declared_fields(&mut self, source: &Self) {
        self.display_name = source.display_name.clone();
        self.agent_type = source.agent_type;
        self.parent_agent_id = source.parent_agent_id.clone();
        self.model = source.model.clone();
        self.fallback_model = source.fallback_model.clone();
        self.system_prompt = source.system_prompt.clone();
        self.temperature = source.temperature;
        self.max_tokens = source.max_tokens;
        self.focus_type = source.focus_type.clone();
        self.skills = source.skills.clone();
        self.capabilities = source.capabilities.clone();
        self.enabled = source.enabled;
        self.timeout_seconds = source.timeout_seconds;
        self.rate_limit = source.rate_limit.clone();
        // status, consecutive_failures, pheromone_score: runtime state, preserved.
    }
    fn set_app_managed(&mut self, value: bool) {
        self.app_managed = value;
    }
}

impl Syncable for ModelRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn app_managed(&self) -> bool {
        self.app_managed
    }
    fn apply_declared_fields(&mut self, source: &Self) {
        self.name = source.name.clone();
        self.provider = source.provider.clone();
        self.tier = source.tier;
        self.reasoning = source.reasoning;
        self.vision = source.vision;
        self.tool_calling = source.tool_calling;
        self.context_window = source.context_window;
        self.max_tokens = source.max_tokens;
        self.cost_input = source.cost_input;
        self.cost_output = source.cost_output;
        self.proxy_model_string = source.proxy_model_string.clone();
        self.enabled = source.enabled;
        self.sort_order = source.sort_order;
    }
    fn set_app_managed(&mut self, value: bool) {
        self.app_managed = value;
    }
}

/// Filters accepted by `list_models`/`list_agents`.
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub enabled_only: bool,
    pub provider: Option<String>,
}

/// The read-mostly snapshot published to readers. Cloned wholesale on every
/// sync; readers hold an `Arc` so a concurrent sync never hands back a
/// partially updated view.
#[derive(Debug, Clone, Default)]
struct RegistrySnapshot {
    models: HashMap<String, ModelRecord>,
    agents: HashMap<String, AgentRecord>,
}

pub struct ConfigRegistry {
    pool: PgPool,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
}

impl ConfigRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    /// Loads the current DB state into the published snapshot. Called once at
    /// boot after migrations, and again after every mutating call.
    pub async fn refresh(&self) -> AriaResult<()> {
        let models: Vec<ModelRecord> = sqlx::query_as("SELECT * FROM aria_engine.models").fetch_all(&self.pool).await?;
        let agents: Vec<AgentRecord> = sqlx::query_as("SELECT * FROM aria_engine.agents").fetch_all(&self.pool).await?;

        let snapshot = RegistrySnapshot {
            models: models.into_iter().map(|m| (m.id.clone(), m)).collect(),
            agents: agents.into_iter().map(|a| (a.agent_id.clone(), a)).collect(),
        };
        let mut guard = self.snapshot.write().expect("registry snapshot lock poisoned");
        *guard = Arc::new(snapshot);
        Ok(())
    }

    fn current(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().expect("registry snapshot lock poisoned").clone()
    }

    pub fn list_models(&self, filters: &ListFilters) -> Vec<ModelRecord> {
        let snap = self.current();
        let mut models: Vec<ModelRecord> = snap
            .models
            .values()
            .filter(|m| !filters.enabled_only || m.enabled)
            .filter(|m| filters.provider.as_deref().map_or(true, |p| m.provider == p))
            .cloned()
            .collect();
        models.sort_by_key(|m| m.sort_order);
        models
    }

    pub fn get_model(&self, id: &str) -> AriaResult<ModelRecord> {
        self.current()
            .models
            .get(id)
            .cloned()
            .ok_or_else(|| AriaError::NotFound(format!("model '{id}' not found")))
    }

    pub fn list_agents(&self, filters: &ListFilters) -> Vec<AgentRecord> {
        let snap = self.current();
        snap.agents
            .values()
            .filter(|a| !filters.enabled_only || a.enabled)
            .cloned()
            .collect()
    }

    pub fn get_agent(&self, id: &str) -> AriaResult<AgentRecord> {
        self.current()
            .agents
            .get(id)
            .cloned()
            .ok_or_else(|| AriaError::NotFound(format!("agent '{id}' not found")))
    }

    pub async fn create_model(&self, model: ModelRecord) -> AriaResult<ModelRecord> {
        if self.current().models.contains_key(&model.id) {
            return Err(AriaError::Conflict(format!("model '{}' already exists", model.id)));
        }
        insert_model(&self.pool, &model).await?;
        self.refresh().await?;
        Ok(model)
    }

    pub async fn update_model(&self, id: &str, mut patch: ModelRecord) -> AriaResult<ModelRecord> {
        patch.id = id.to_string();
        patch.app_managed = true;
        update_model_row(&self.pool, &patch).await?;
        self.refresh().await?;
        Ok(patch)
    }

    pub async fn delete_model(&self, id: &str) -> AriaResult<()> {
        sqlx::query("DELETE FROM aria_engine.models WHERE id = $1").bind(id).execute(&self.pool).await?;
        self.refresh().await?;
        Ok(())
    }

    pub async fn create_agent(&self, agent: AgentRecord) -> AriaResult<AgentRecord> {
        agent.validate().map_err(AriaError::Validation)?;
        if self.current().agents.contains_key(&agent.agent_id) {
            return Err(AriaError::Conflict(format!("agent '{}' already exists", agent.agent_id)));
        }
        self.check_no_parent_cycle(&agent)?;
        insert_agent(&self.pool, &agent).await?;
        self.refresh().await?;
        Ok(agent)
    }

    pub async fn update_agent(&self, id: &str, mut patch: AgentRecord) -> AriaResult<AgentRecord> {
        patch.agent_id = id.to_string();
        patch.app_managed = true;
        patch.validate().map_err(AriaError::Validation)?;
        self.check_no_parent_cycle(&patch)?;
        update_agent_row(&self.pool, &patch).await?;
        self.refresh().await?;
        Ok(patch)
    }

    pub async fn delete_agent(&self, id: &str) -> AriaResult<()> {
        sqlx::query("DELETE FROM aria_engine.agents WHERE agent_id = $1").bind(id).execute(&self.pool).await?;
        self.refresh().await?;
        Ok(())
    }

    /// Invariant from spec §3: cycles in the parent relation are forbidden.
    fn check_no_parent_cycle(&self, candidate: &AgentRecord) -> AriaResult<()> {
        let snapshot = self.current();
        let mut seen = std::collections::HashSet::new();
        seen.insert(candidate.agent_id.clone());
        let mut current = candidate.parent_agent_id.clone();
        while let Some(parent_id) = current {
            if !seen.insert(parent_id.clone()) {
                return Err(AriaError::Validation(format!(
                    "agent '{}' parent chain contains a cycle at '{}'",
                    candidate.agent_id, parent_id
                )));
            }
            current = snapshot.agents.get(&parent_id).and_then(|a| a.parent_agent_id.clone());
        }
        Ok(())
    }

    /// Runs the sync algorithm (spec §4.2) for models declared in `source`.
    pub async fn sync_models(&self, source: Vec<ModelRecord>, force: bool) -> AriaResult<SyncCounts> {
        self.sync_generic(
            source,
            force,
            |snap| snap.models.clone(),
            |pool, rec| Box::pin(insert_model(pool, rec)),
            |pool, rec| Box::pin(update_model_row(pool, rec)),
        )
        .await
    }

    /// Runs the sync algorithm (spec §4.2) for agents declared in `source`.
    pub async fn sync_agents(&self, source: Vec<AgentRecord>, force: bool) -> AriaResult<SyncCounts> {
        for agent in &source {
            agent.validate().map_err(AriaError::Validation)?;
        }
        self.sync_generic(
            source,
            force,
            |snap| snap.agents.clone(),
            |pool, rec| Box::pin(insert_agent(pool, rec)),
            |pool, rec| Box::pin(update_agent_row(pool, rec)),
        )
        .await
    }

    async fn sync_generic<T, FExisting, FInsert, FUpdate>(
        &self,
        source: Vec<T>,
        force: bool,
        existing: FExisting,
        insert: FInsert,
        update: FUpdate,
    ) -> AriaResult<SyncCounts>
    where
        T: Syncable,
        FExisting: Fn(&RegistrySnapshot) -> HashMap<String, T>,
        FInsert: for<'a> Fn(&'a PgPool, &'a T) -> std::pin::Pin<Box<dyn std::future::Future<Output = AriaResult<()>> + Send + 'a>>,
        FUpdate: for<'a> Fn(&'a PgPool, &'a T) -> std::pin::Pin<Box<dyn std::future::Future<Output = AriaResult<()>> + Send + 'a>>,
    {
        let mut seen_ids = std::collections::HashSet::new();
        for record in &source {
            if !seen_ids.insert(record.id().to_string()) {
                return Err(AriaError::Validation(format!("duplicate id '{}' in source", record.id())));
            }
        }

        let current_snapshot = self.current();
        let db_records = existing(&current_snapshot);

        let mut counts = SyncCounts::default();
        for declared in source {
            match db_records.get(declared.id()) {
                None => {
                    insert(&self.pool, &declared).await?;
                    counts.inserted += 1;
                }
                Some(existing_record) => {
                    if !existing_record.app_managed() || force {
                        let mut merged = existing_record.clone();
                        merged.apply_declared_fields(&declared);
                        if force {
                            merged.set_app_managed(false);
                        }
                        update(&self.pool, &merged).await?;
                        counts.updated += 1;
                    } else {
                        counts.skipped += 1;
                    }
                }
            }
        }
        self.refresh().await?;
        log::info!(
            "config registry sync: inserted={} updated={} skipped={}",
            counts.inserted,
            counts.updated,
            counts.skipped
        );
        Ok(counts)
    }
}

async fn insert_model(pool: &PgPool, m: &ModelRecord) -> AriaResult<()> {
    sqlx::query(
        "INSERT INTO aria_engine.models
            (id, name, provider, tier, reasoning, vision, tool_calling, context_window,
             max_tokens, cost_input, cost_output, proxy_model_string, enabled, sort_order, app_managed)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
    )
    .bind(&m.id)
    .bind(&m.name)
    .bind(&m.provider)
    .bind(m.tier)
    .bind(m.reasoning)
    .bind(m.vision)
    .bind(m.tool_calling)
    .bind(m.context_window)
    .bind(m.max_tokens)
    .bind(m.cost_input)
    .bind(m.cost_output)
    .bind(&m.proxy_model_string)
    .bind(m.enabled)
    .bind(m.sort_order)
    .bind(m.app_managed)
    .execute(pool)
    .await?;
    Ok(())
}

async fn update_model_row(pool: &PgPool, m: &ModelRecord) -> AriaResult<()> {
    sqlx::query(
        "UPDATE aria_engine.models SET name=$2, provider=$3, tier=$4, reasoning=$5, vision=$6,
            tool_calling=$7, context_window=$8, max_tokens=$9, cost_input=$10, cost_output=$11,
            proxy_model_string=$12, enabled=$13, sort_order=$14, app_managed=$15
         WHERE id=$1",
    )
    .bind(&m.id)
    .bind(&m.name)
    .bind(&m.provider)
    .bind(m.tier)
    .bind(m.reasoning)
    .bind(m.vision)
    .bind(m.tool_calling)
    .bind(m.context_window)
    .bind(m.max_tokens)
    .bind(m.cost_input)
    .bind(m.cost_output)
    .bind(&m.proxy_model_string)
    .bind(m.enabled)
    .bind(m.sort_order)
    .bind(m.app_managed)
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_agent(pool: &PgPool, a: &AgentRecord) -> AriaResult<()> {
    sqlx::query(
        "INSERT INTO aria_engine.agents
            (agent_id, display_name, agent_type, parent_agent_id, model, fallback_model,
             system_prompt, temperature, max_tokens, focus_type, skills, capabilities, enabled,
             timeout_seconds, rate_limit, app_managed, status, consecutive_failures, pheromone_score)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)",
    )
    .bind(&a.agent_id)
    .bind(&a.display_name)
    .bind(a.agent_type)
    .bind(&a.parent_agent_id)
    .bind(&a.model)
    .bind(&a.fallback_model)
    .bind(&a.system_prompt)
    .bind(a.temperature)
    .bind(a.max_tokens)
    .bind(&a.focus_type)
    .bind(&a.skills)
    .bind(&a.capabilities)
    .bind(a.enabled)
    .bind(a.timeout_seconds)
    .bind(sqlx::types::Json(&a.rate_limit))
    .bind(a.app_managed)
    .bind(a.status)
    .bind(a.consecutive_failures)
    .bind(a.pheromone_score)
    .execute(pool)
    .await?;
    Ok(())
}

async fn update_agent_row(pool: &PgPool, a: &AgentRecord) -> AriaResult<()> {
    sqlx::query(
        "UPDATE aria_engine.agents SET display_name=$2, agent_type=$3, parent_agent_id=$4,
            model=$5, fallback_model=$6, system_prompt=$7, temperature=$8, max_tokens=$9,
            focus_type=$10, skills=$11, capabilities=$12, enabled=$13, timeout_seconds=$14,
            rate_limit=$15, app_managed=$16, status=$17, consecutive_failures=$18, pheromone_score=$19
         WHERE agent_id=$1",
    )
    .bind(&a.agent_id)
    .bind(&a.display_name)
    .bind(a.agent_type)
    .bind(&a.parent_agent_id)
    .bind(&a.model)
    .bind(&a.fallback_model)
    .bind(&a.system_prompt)
    .bind(a.temperature)
    .bind(a.max_tokens)
    .bind(&a.focus_type)
    .bind(&a.skills)
    .bind(&a.capabilities)
    .bind(a.enabled)
    .bind(a.timeout_seconds)
    .bind(sqlx::types::Json(&a.rate_limit))
    .bind(a.app_managed)
    .bind(a.status)
    .bind(a.consecutive_failures)
    .bind(a.pheromone_score)
    .execute(pool)
    .await?;
    Ok(())
}

/// Parses `models.yaml` (spec §6: `schema_version`, `models: {id: {...}}`,
/// `routing`, `criteria`) into declared [`ModelRecord`]s. Only the `models` map
/// is converted into records; `routing`/`criteria` are surfaced verbatim for a
/// transport-layer selector to read, since this crate's only use of the file is
/// the sync algorithm.
pub fn parse_models_yaml(source: &str) -> AriaResult<Vec<ModelRecord>> {
    #[derive(serde::Deserialize)]
    struct ModelsFile {
        #[serde(default = "default_schema_version")]
        schema_version: u32,
        #[serde(default)]
        models: HashMap<String, ModelYamlEntry>,
    }
    fn default_schema_version() -> u32 {
        1
    }
    #[derive(serde::Deserialize)]
    struct ModelYamlEntry {
        name: String,
        provider: String,
        #[serde(default)]
        tier: Option<crate::aria::models::ModelTier>,
        #[serde(default)]
        reasoning: bool,
        #[serde(default)]
        vision: bool,
        #[serde(default)]
        tool_calling: bool,
        #[serde(default)]
        context_window: i32,
        #[serde(default)]
        max_tokens: i32,
        #[serde(default)]
        cost_input: f64,
        #[serde(default)]
        cost_output: f64,
        proxy_model_string: String,
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default)]
        sort_order: i32,
    }
    fn default_true() -> bool {
        true
    }

    let parsed: ModelsFile = serde_yaml::from_str(source)
        .map_err(|e| AriaError::ConfigurationError(format!("models.yaml parse error: {e}")))?;
    if parsed.schema_version == 0 {
        return Err(AriaError::ConfigurationError("models.yaml schema_version must be >= 1".to_string()));
    }

    Ok(parsed
        .models
        .into_iter()
        .map(|(id, entry)| ModelRecord {
            id,
            name: entry.name,
            provider: entry.provider,
            tier: entry.tier.unwrap_or(crate::aria::models::ModelTier::Unknown),
            reasoning: entry.reasoning,
            vision: entry.vision,
            tool_calling: entry.tool_calling,
            context_window: entry.context_window,
            max_tokens: entry.max_tokens,
            cost_input: entry.cost_input,
            cost_output: entry.cost_output,
            proxy_model_string: entry.proxy_model_string,
            enabled: entry.enabled,
            sort_order: entry.sort_order,
            app_managed: false,
        })
        .collect())
}

/// Parses the agents markdown manifest (spec §6: "per-agent YAML blocks each
/// with `id, focus, model, fallback, parent, skills, capabilities, timeout,
/// rate_limit`"). Shape: one `## <agent_id>` section per agent, free-form
/// prose above the section's fenced ```yaml block becomes `system_prompt`,
/// and the fenced block itself carries the declared fields. `display_name`
/// isn't part of the declared field list; it defaults to the agent id.
pub fn parse_agents_manifest(source: &str) -> AriaResult<Vec<AgentRecord>> {
    #[derive(serde::Deserialize, Default)]
    struct AgentYamlBlock {
        model: String,
        #[serde(default)]
        fallback: Option<String>,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        skills: Vec<String>,
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default = "default_timeout")]
        timeout: i32,
        #[serde(default)]
        rate_limit: Option<crate::aria::models::RateLimit>,
        #[serde(default)]
        focus: Option<String>,
    }
    fn default_timeout() -> i32 {
        60
    }

    let mut agents = Vec::new();
    for section in source.split("\n## ").skip(1) {
        let (header, rest) = section.split_once('\n').unwrap_or((section, ""));
        let agent_id = header.trim().to_string();
        if agent_id.is_empty() {
            continue;
        }

        let (prose, yaml_block) = extract_yaml_block(rest).ok_or_else(|| {
            AriaError::ConfigurationError(format!("agents manifest: agent '{agent_id}' has no yaml block"))
        })?;

        let block: AgentYamlBlock = serde_yaml::from_str(yaml_block)
            .map_err(|e| AriaError::ConfigurationError(format!("agents manifest: agent '{agent_id}': {e}")))?;

        let agent_type = if block.parent.is_some() {
            crate::aria::models::AgentType::SubAgent
        } else {
            crate::aria::models::AgentType::Agent
        };

        agents.push(AgentRecord {
            agent_id: agent_id.clone(),
            display_name: agent_id,
            agent_type,
            parent_agent_id: block.parent,
            model: block.model,
            fallback_model: block.fallback,
            system_prompt: prose.trim().to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            focus_type: block.focus,
            skills: block.skills,
            capabilities: block.capabilities,
            enabled: true,
            timeout_seconds: block.timeout,
            rate_limit: block.rate_limit,
            app_managed: false,
            status: crate::aria::models::AgentStatus::Idle,
            consecutive_failures: 0,
            pheromone_score: 0.5,
        });
    }
    Ok(agents)
}

/// Splits a section's body into the prose preceding its fenced ```yaml block
/// and the block's inner contents. Returns `None` if no fenced yaml block is
/// present.
fn extract_yaml_block(body: &str) -> Option<(&str, &str)> {
    let fence_start = body.find("```yaml")?;
    let (prose, after_fence) = body.split_at(fence_start);
    let after_open = &after_fence[after_fence.find('\n')? + 1..];
    let fence_end = after_open.find("```")?;
    Some((prose, &after_open[..fence_end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agent(id: &str) -> AgentRecord {
        AgentRecord {
            agent_id: id.to_string(),
            display_name: id.to_string(),
            agent_type: crate::aria::models::AgentType::Agent,
            parent_agent_id: None,
            model: "gpt".to_string(),
            fallback_model: None,
            system_prompt: "hi".to_string(),
            temperature: 0.5,
            max_tokens: 100,
            focus_type: None,
            skills: vec![],
            capabilities: vec![],
            enabled: true,
            timeout_seconds: 30,
            rate_limit: None,
            app_managed: false,
            status: crate::aria::models::AgentStatus::Idle,
            consecutive_failures: 0,
            pheromone_score: 0.5,
        }
    }

    #[test]
    fn sub_agent_without_parent_is_invalid() {
        let mut agent = sample_agent("child");
        agent.agent_type = crate::aria::models::AgentType::SubAgent;
        assert!(agent.validate().is_err());
    }

    #[test]
    fn parse_models_yaml_basic() {
        let yaml = r#"
schema_version: 1
models:
  kimi:
    name: Kimi K2
    provider: moonshot
    proxy_model_string: kimi-k2
    enabled: true
"#;
        let models = parse_models_yaml(yaml).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "kimi");
        assert!(models[0].enabled);
        assert!(!models[0].app_managed);
    }

    #[test]
    fn parse_models_yaml_rejects_schema_zero() {
        let yaml = "schema_version: 0\nmodels: {}\n";
        assert!(parse_models_yaml(yaml).is_err());
    }

    #[test]
    fn parse_agents_manifest_basic() {
        let manifest = r#"
## researcher

You are a careful researcher who verifies claims before asserting them.

```yaml
model: kimi
fallback: gpt-mini
skills: [web_search]
capabilities: [research]
timeout: 120
focus: research
```

## researcher.fact_checker

Double-checks the researcher's citations.

```yaml
model: kimi
parent: researcher
timeout: 45
```
"#;
        let agents = parse_agents_manifest(manifest).unwrap();
        assert_eq!(agents.len(), 2);

        let researcher = agents.iter().find(|a| a.agent_id == "researcher").unwrap();
        assert_eq!(researcher.model, "kimi");
        assert_eq!(researcher.fallback_model.as_deref(), Some("gpt-mini"));
        assert_eq!(researcher.agent_type, crate::aria::models::AgentType::Agent);
        assert!(researcher.system_prompt.contains("careful researcher"));
        assert_eq!(researcher.timeout_seconds, 120);

        let child = agents.iter().find(|a| a.agent_id == "researcher.fact_checker").unwrap();
        assert_eq!(child.agent_type, crate::aria::models::AgentType::SubAgent);
        assert_eq!(child.parent_agent_id.as_deref(), Some("researcher"));
        assert!(child.validate().is_ok());
    }

    #[test]
    fn parse_agents_manifest_missing_yaml_block_errors() {
        let manifest = "## broken\n\nno yaml block here\n";
        assert!(parse_agents_manifest(manifest).is_err());
    }
}
