//! Persistence for the steward runtime.
//!
//! Four repository capabilities, each behind a trait with an in-memory
//! adapter (tests, ephemeral runs) and a SQLite document adapter (durable
//! runs). The backend is selected at boot via the `DATABASE` environment
//! variable.

pub mod chunk;
pub mod in_memory;
pub mod llm_call;
pub mod review_cache;
pub mod review_config;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use steward_core::agent::{AgentContext, AgentState};
use steward_core::function::FunctionRegistry;
use steward_core::StoreError;

pub use chunk::{plan_chunks, ChunkPlan, CHUNK_ENVELOPE, MAX_DOC_SIZE};
pub use in_memory::{
    InMemoryAgentStore, InMemoryLlmCallStore, InMemoryReviewCacheStore, InMemoryReviewConfigStore,
};
pub use llm_call::{LlmCall, LlmCallDoc};
pub use review_cache::{cache_doc_id, MergeRequestFingerprintCache, ProjectId};
pub use review_config::CodeReviewConfig;
pub use sqlite::SqliteStores;

/// Summary projection of an agent context for list views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub name: String,
    pub state: AgentState,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_update: i64,
    pub user_prompt: String,
    pub input_prompt: String,
    pub user_id: String,
}

impl AgentSummary {
    pub fn of(ctx: &AgentContext) -> Self {
        Self {
            agent_id: ctx.agent_id.clone(),
            name: ctx.name.clone(),
            state: ctx.state,
            cost: ctx.cost,
            error: ctx.error.clone(),
            last_update: ctx.last_update,
            user_prompt: ctx.user_prompt.clone(),
            input_prompt: ctx.input_prompt.clone(),
            user_id: ctx.user.id.clone(),
        }
    }
}

/// Persistence and querying of agent contexts.
#[async_trait]
pub trait AgentStateStore: Send + Sync {
    /// Persist a context. When `parent_agent_id` is set this is a
    /// transactional two-write: the parent gains the child id and both are
    /// written together, or neither is. A missing parent fails with
    /// `ParentMissing`.
    async fn save(&self, ctx: &AgentContext) -> Result<(), StoreError>;

    /// Partial write of `state` and `last_update` only. The in-memory `ctx`
    /// is mutated after the write succeeds.
    async fn update_state(
        &self,
        ctx: &mut AgentContext,
        state: AgentState,
    ) -> Result<(), StoreError>;

    async fn load(&self, agent_id: &str) -> Result<Option<AgentContext>, StoreError>;

    /// Summaries for the current (ambient) user, newest first.
    async fn list(&self) -> Result<Vec<AgentSummary>, StoreError>;

    /// Summaries of non-terminal agents for the current user, ordered by
    /// state ascending then `last_update` descending. Callers needing strict
    /// recency must re-sort client-side.
    async fn list_running(&self) -> Result<Vec<AgentSummary>, StoreError>;

    /// Delete agents owned by the current user that are not executing and
    /// have no parent; each deletion cascades to the agent's listed children
    /// in the same batch. Everything else in `ids` is skipped.
    async fn delete(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Replace an agent's capability set. Names absent from `registry` are
    /// skipped with a warning.
    async fn update_functions(
        &self,
        agent_id: &str,
        names: &[String],
        registry: &FunctionRegistry,
    ) -> Result<(), StoreError>;
}

/// Durable record of every LLM interaction, with transparent chunking.
#[async_trait]
pub trait LlmCallStore: Send + Sync {
    /// Persist the request-side record. Overwrites any prior documents for
    /// the same call id.
    async fn save_request(&self, call: &LlmCall) -> Result<(), StoreError>;

    /// Persist the full record after the response arrived. Merge semantics
    /// on the head document, overwrite on chunks.
    async fn save_response(&self, call: &LlmCall) -> Result<(), StoreError>;

    /// Load and reassemble one call.
    async fn get_call(&self, llm_call_id: &str) -> Result<Option<LlmCall>, StoreError>;

    /// Reassembled calls for an agent, newest request first.
    async fn get_calls_for_agent(&self, agent_id: &str) -> Result<Vec<LlmCall>, StoreError>;

    /// Reassembled calls matching a description, newest request first.
    async fn get_calls_by_description(&self, description: &str)
        -> Result<Vec<LlmCall>, StoreError>;

    /// Remove the head and every chunk for one call id.
    async fn delete_call(&self, llm_call_id: &str) -> Result<(), StoreError>;
}

/// Review-rule configuration store.
#[async_trait]
pub trait CodeReviewConfigStore: Send + Sync {
    async fn list(&self) -> Result<Vec<CodeReviewConfig>, StoreError>;
    async fn get(&self, id: &str) -> Result<Option<CodeReviewConfig>, StoreError>;
    async fn save(&self, config: &CodeReviewConfig) -> Result<(), StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Per-MR fingerprint cache store.
#[async_trait]
pub trait ReviewCacheStore: Send + Sync {
    /// An absent or malformed document yields the empty-cache sentinel.
    async fn get(
        &self,
        project: &ProjectId,
        mr_iid: i64,
    ) -> Result<MergeRequestFingerprintCache, StoreError>;

    /// Overwrite the document, converting the set to an array and stamping
    /// `last_updated` to now.
    async fn update(
        &self,
        project: &ProjectId,
        mr_iid: i64,
        cache: &MergeRequestFingerprintCache,
    ) -> Result<(), StoreError>;
}

/// The bundle of repositories the runtime runs against.
#[derive(Clone)]
pub struct Stores {
    pub agents: Arc<dyn AgentStateStore>,
    pub llm_calls: Arc<dyn LlmCallStore>,
    pub review_configs: Arc<dyn CodeReviewConfigStore>,
    pub review_caches: Arc<dyn ReviewCacheStore>,
}

impl Stores {
    /// Ephemeral in-memory stores.
    pub fn memory() -> Self {
        Self {
            agents: Arc::new(InMemoryAgentStore::new()),
            llm_calls: Arc::new(InMemoryLlmCallStore::new()),
            review_configs: Arc::new(InMemoryReviewConfigStore::new()),
            review_caches: Arc::new(InMemoryReviewCacheStore::new()),
        }
    }

    /// Durable SQLite-backed stores at `path`.
    pub async fn sqlite(path: &str) -> Result<Self, StoreError> {
        let backend = SqliteStores::connect(path).await?;
        Ok(backend.into_stores())
    }

    /// Select a backend from the `DATABASE` environment variable
    /// (`memory` | `sqlite`, default `memory`).
    pub async fn from_env(sqlite_path: &str) -> Result<Self, StoreError> {
        match std::env::var("DATABASE").as_deref() {
            Ok("sqlite") => Self::sqlite(sqlite_path).await,
            Ok("memory") | Err(_) => Ok(Self::memory()),
            Ok(other) => Err(StoreError::Backend(format!(
                "Unknown DATABASE backend '{other}' (expected 'memory' or 'sqlite')"
            ))),
        }
    }
}
