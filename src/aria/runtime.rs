//! Composition root: wires the Kernel, registries, engines, and scheduler
//! into one runnable set of handles, and performs the boot-time sequence
//! (migrate → load kernel → sync declared config → load job table) a
//! transport binary calls once before serving requests.
//!
//! This module owns no transport concerns (spec §1) — it stops at handing
//! back `Arc`s a REST/WebSocket layer can call into.

use std::path::Path;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::aria::chat_engine::{ChatEngine, ChatEngineConfig, ModelClientFactory};
use crate::aria::config_registry::{parse_agents_manifest, parse_models_yaml, ConfigRegistry};
use crate::aria::error::{AriaError, AriaResult};
use crate::aria::kernel::Kernel;
use crate::aria::migrations;
use crate::aria::models::ModelRecord;
use crate::aria::roundtable::RoundtableEngine;
use crate::aria::scheduler::{parse_cron_jobs_yaml, Scheduler};
use crate::aria::session_store::SessionStore;
use crate::aria::skill_ledger::SkillLedger;
use crate::aria::skill_registry::SkillRegistry;
use crate::cloudllm::client_wrapper::ClientWrapper;
use crate::cloudllm::clients::openai::OpenAIClient;

/// Environment-sourced settings (spec §6 "Configuration sources" → Environment:
/// "database DSN, API key, LLM proxy URL + key, admin token, tracing endpoint").
/// The admin token and tracing endpoint are transport-layer concerns and are
/// not read here; this crate only needs what it calls directly.
pub struct RuntimeConfig {
    pub database_url: String,
    pub llm_proxy_url: String,
    pub llm_proxy_key: String,
    pub kernel_root: std::path::PathBuf,
    pub db_max_connections: u32,
}

impl RuntimeConfig {
    /// Reads `ARIA_DATABASE_URL`, `ARIA_LLM_PROXY_URL`, `ARIA_LLM_PROXY_KEY`,
    /// and `ARIA_KERNEL_ROOT` from the process environment. Missing required
    /// variables surface as `ConfigurationError`, matching spec §6's exit
    /// code 1 ("unhandled config error") at the layer that reads this struct.
    pub fn from_env() -> AriaResult<Self> {
        let get = |key: &str| {
            std::env::var(key).map_err(|_| AriaError::ConfigurationError(format!("missing environment variable {key}")))
        };
        Ok(Self {
            database_url: get("ARIA_DATABASE_URL")?,
            llm_proxy_url: get("ARIA_LLM_PROXY_URL")?,
            llm_proxy_key: get("ARIA_LLM_PROXY_KEY")?,
            kernel_root: std::path::PathBuf::from(get("ARIA_KERNEL_ROOT")?),
            db_max_connections: std::env::var("ARIA_DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        })
    }
}

/// Builds one `ClientWrapper` per model by pointing the teacher's OpenAI-
/// compatible client at the configured LLM proxy (spec §1: the proxy process
/// itself is an external collaborator; this crate only ever talks to it
/// through the wire shape the teacher's `OpenAIClient` already speaks).
pub struct ProxyClientFactory {
    proxy_url: String,
    proxy_key: String,
}

impl ProxyClientFactory {
    pub fn new(proxy_url: impl Into<String>, proxy_key: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            proxy_key: proxy_key.into(),
        }
    }
}

impl ModelClientFactory for ProxyClientFactory {
    fn client_for(&self, model: &ModelRecord) -> AriaResult<Arc<dyn ClientWrapper>> {
        let client = OpenAIClient::new_with_base_url(&self.proxy_key, &model.proxy_model_string, &self.proxy_url);
        Ok(Arc::new(client))
    }
}

/// Handles to every long-lived component, assembled by [`Runtime::bootstrap`].
/// Cheaply cloneable — every field is an `Arc`.
#[derive(Clone)]
pub struct Runtime {
    pub pool: PgPool,
    pub kernel: Arc<Kernel>,
    pub config_registry: Arc<ConfigRegistry>,
    pub session_store: Arc<SessionStore>,
    pub skill_registry: Arc<SkillRegistry>,
    pub skill_ledger: Arc<SkillLedger>,
    pub chat_engine: Arc<ChatEngine>,
    pub roundtable_engine: Arc<RoundtableEngine>,
    pub scheduler: Arc<Scheduler>,
}

impl Runtime {
    /// Boot sequence: connect, migrate, load the kernel, reconcile declared
    /// config into the database, then load the job table. Declared-config
    /// sources (`models.yaml`, the agents manifest, `cron_jobs.yaml`) are
    /// optional — when `None`, sync is skipped and only what's already in the
    /// database is used, so a redeploy with unchanged catalogs doesn't need
    /// the source files present.
    pub async fn bootstrap(config: RuntimeConfig, declared: DeclaredConfig<'_>) -> AriaResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(&config.database_url)
            .await
            .map_err(AriaError::from)?;

        migrations::run(&pool).await?;

        let kernel = Arc::new(Kernel::load(&config.kernel_root)?);
        if !kernel.verify_integrity() {
            return Err(AriaError::ConfigurationError(
                "kernel blob checksum mismatch at boot".to_string(),
            ));
        }

        let config_registry = Arc::new(ConfigRegistry::new(pool.clone()));
        config_registry.refresh().await?;
        if let Some(models_yaml) = declared.models_yaml {
            let models = parse_models_yaml(models_yaml)?;
            config_registry.sync_models(models, false).await?;
        }
        if let Some(agents_manifest) = declared.agents_manifest {
            let agents = parse_agents_manifest(agents_manifest)?;
            config_registry.sync_agents(agents, false).await?;
        }
        config_registry.refresh().await?;

        let session_store = Arc::new(SessionStore::new(pool.clone()));
        let skill_registry = Arc::new(SkillRegistry::empty());
        let skill_ledger = Arc::new(SkillLedger::new(pool.clone()));

        let client_factory = Arc::new(ProxyClientFactory::new(config.llm_proxy_url, config.llm_proxy_key));
        let chat_engine = Arc::new(ChatEngine::new(
            session_store.clone(),
            config_registry.clone(),
            skill_registry.clone(),
            skill_ledger.clone(),
            kernel.clone(),
            client_factory,
            ChatEngineConfig::default(),
        ));

        let roundtable_engine = Arc::new(RoundtableEngine::new(
            chat_engine.clone(),
            session_store.clone(),
            config_registry.clone(),
        ));

        let scheduler = Arc::new(Scheduler::new(pool.clone(), chat_engine.clone(), session_store.clone()));
        if let Some(cron_jobs_yaml) = declared.cron_jobs_yaml {
            let jobs = parse_cron_jobs_yaml(cron_jobs_yaml)?;
            scheduler.sync_jobs(jobs).await?;
        }
        scheduler.load_from_db().await?;

        Ok(Self {
            pool,
            kernel,
            config_registry,
            session_store,
            skill_registry,
            skill_ledger,
            chat_engine,
            roundtable_engine,
            scheduler,
        })
    }
}

/// Declared-config source text, read from disk by the caller (this crate
/// parses the contents; file discovery/watching is external per spec §1).
#[derive(Default)]
pub struct DeclaredConfig<'a> {
    pub models_yaml: Option<&'a str>,
    pub agents_manifest: Option<&'a str>,
    pub cron_jobs_yaml: Option<&'a str>,
}

/// Convenience loader for the common case of reading each source from a path
/// on disk, tolerating any of the three being absent.
pub fn load_declared_config_from_dir(dir: impl AsRef<Path>) -> AriaResult<(Option<String>, Option<String>, Option<String>)> {
    let dir = dir.as_ref();
    let read = |name: &str| -> AriaResult<Option<String>> {
        let path = dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| AriaError::ConfigurationError(format!("reading {}: {e}", path.display())))
    };
    Ok((read("models.yaml")?, read("agents.md")?, read("cron_jobs.yaml")?))
}
