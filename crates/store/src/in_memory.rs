//! In-memory adapters — useful for testing and ephemeral sessions.
//!
//! The agent, LLM-call, review-config, and review-cache repositories all
//! store plain maps behind a `tokio::sync::RwLock`. The LLM-call adapter
//! persists the same head/chunk document layout as the durable backend so
//! the chunking invariants are exercised identically.

use std::collections::HashMap;

use async_trait::async_trait;
use steward_core::agent::{AgentContext, AgentState};
use steward_core::ambient::current_user;
use steward_core::function::FunctionRegistry;
use steward_core::user::User;
use steward_core::StoreError;
use tokio::sync::RwLock;

use crate::llm_call::{from_documents, to_documents, LlmCall, LlmCallDoc};
use crate::review_cache::{
    cache_doc_id, parse_stored_cache, to_stored_cache, MergeRequestFingerprintCache, ProjectId,
};
use crate::review_config::CodeReviewConfig;
use crate::{AgentStateStore, AgentSummary, CodeReviewConfigStore, LlmCallStore, ReviewCacheStore};

fn ambient_user() -> Result<User, StoreError> {
    current_user().map_err(|_| StoreError::Unauthorized("no user bound on this task".into()))
}

// ── Agent contexts ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryAgentStore {
    contexts: RwLock<HashMap<String, AgentContext>>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStateStore for InMemoryAgentStore {
    async fn save(&self, ctx: &AgentContext) -> Result<(), StoreError> {
        let mut contexts = self.contexts.write().await;
        if let Some(parent_id) = &ctx.parent_agent_id {
            let parent = contexts
                .get_mut(parent_id)
                .ok_or_else(|| StoreError::ParentMissing {
                    agent_id: ctx.agent_id.clone(),
                    parent_id: parent_id.clone(),
                })?;
            parent.child_agents.insert(ctx.agent_id.clone());
            parent.touch();
        }
        contexts.insert(ctx.agent_id.clone(), ctx.clone());
        Ok(())
    }

    async fn update_state(
        &self,
        ctx: &mut AgentContext,
        state: AgentState,
    ) -> Result<(), StoreError> {
        let last_update = {
            let mut contexts = self.contexts.write().await;
            let stored = contexts
                .get_mut(&ctx.agent_id)
                .ok_or_else(|| StoreError::NotFound {
                    kind: "agent",
                    id: ctx.agent_id.clone(),
                })?;
            stored.state = state;
            stored.touch();
            stored.last_update
        };
        ctx.state = state;
        ctx.last_update = last_update;
        Ok(())
    }

    async fn load(&self, agent_id: &str) -> Result<Option<AgentContext>, StoreError> {
        Ok(self.contexts.read().await.get(agent_id).cloned())
    }

    async fn list(&self) -> Result<Vec<AgentSummary>, StoreError> {
        let user = ambient_user()?;
        let contexts = self.contexts.read().await;
        let mut summaries: Vec<AgentSummary> = contexts
            .values()
            .filter(|c| c.user.id == user.id)
            .map(AgentSummary::of)
            .collect();
        summaries.sort_by(|a, b| b.last_update.cmp(&a.last_update));
        Ok(summaries)
    }

    async fn list_running(&self) -> Result<Vec<AgentSummary>, StoreError> {
        let user = ambient_user()?;
        let contexts = self.contexts.read().await;
        let mut summaries: Vec<AgentSummary> = contexts
            .values()
            .filter(|c| c.user.id == user.id && c.state.is_executing())
            .map(AgentSummary::of)
            .collect();
        // Primary sort on the inequality-filtered field, the document-store
        // rule; callers wanting strict recency re-sort client-side.
        summaries.sort_by(|a, b| {
            a.state
                .tag()
                .cmp(b.state.tag())
                .then(b.last_update.cmp(&a.last_update))
        });
        Ok(summaries)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        let user = ambient_user()?;
        let mut contexts = self.contexts.write().await;

        let mut to_remove: Vec<String> = Vec::new();
        for id in ids {
            let Some(ctx) = contexts.get(id) else {
                continue;
            };
            if ctx.user.id != user.id {
                tracing::warn!(agent_id = %id, "Skipping delete of agent owned by another user");
                continue;
            }
            if ctx.state.is_executing() {
                tracing::warn!(agent_id = %id, state = %ctx.state, "Skipping delete of executing agent");
                continue;
            }
            if ctx.parent_agent_id.is_some() {
                tracing::warn!(agent_id = %id, "Skipping delete of child agent");
                continue;
            }
            to_remove.push(id.clone());
            to_remove.extend(ctx.child_agents.iter().cloned());
        }

        for id in to_remove {
            contexts.remove(&id);
        }
        Ok(())
    }

    async fn update_functions(
        &self,
        agent_id: &str,
        names: &[String],
        registry: &FunctionRegistry,
    ) -> Result<(), StoreError> {
        let mut contexts = self.contexts.write().await;
        let ctx = contexts
            .get_mut(agent_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "agent",
                id: agent_id.to_string(),
            })?;
        ctx.functions = registry.known(names);
        ctx.touch();
        Ok(())
    }
}

// ── LLM calls ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryLlmCallStore {
    /// Documents keyed by document id, head and chunks alike.
    docs: RwLock<HashMap<String, LlmCallDoc>>,
}

impl InMemoryLlmCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn reconstruct(docs: &HashMap<String, LlmCallDoc>, head: &LlmCallDoc) -> LlmCall {
        if head.call.chunk_count == 0 {
            return head.call.clone();
        }
        let chunks: Vec<LlmCallDoc> = docs
            .values()
            .filter(|d| d.llm_call_id() == head.llm_call_id() && d.chunk_index.is_some())
            .cloned()
            .collect();
        from_documents(head.clone(), chunks)
    }
}

#[async_trait]
impl LlmCallStore for InMemoryLlmCallStore {
    async fn save_request(&self, call: &LlmCall) -> Result<(), StoreError> {
        let new_docs = to_documents(call)?;
        let mut docs = self.docs.write().await;
        docs.retain(|_, d| d.llm_call_id() != call.llm_call_id);
        for doc in new_docs {
            docs.insert(doc.doc_id().to_string(), doc);
        }
        Ok(())
    }

    async fn save_response(&self, call: &LlmCall) -> Result<(), StoreError> {
        let new_docs = to_documents(call)?;
        let mut docs = self.docs.write().await;
        // Merge on the head, overwrite chunks; the record layout carries the
        // complete call, so insertion covers both.
        for doc in new_docs {
            docs.insert(doc.doc_id().to_string(), doc);
        }
        Ok(())
    }

    async fn get_call(&self, llm_call_id: &str) -> Result<Option<LlmCall>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs.get(llm_call_id).map(|head| Self::reconstruct(&docs, head)))
    }

    async fn get_calls_for_agent(&self, agent_id: &str) -> Result<Vec<LlmCall>, StoreError> {
        let docs = self.docs.read().await;
        let mut calls: Vec<LlmCall> = docs
            .values()
            .filter(|d| d.is_head() && d.call.agent_id.as_deref() == Some(agent_id))
            .map(|head| Self::reconstruct(&docs, head))
            .collect();
        calls.sort_by(|a, b| b.request_time.cmp(&a.request_time));
        Ok(calls)
    }

    async fn get_calls_by_description(
        &self,
        description: &str,
    ) -> Result<Vec<LlmCall>, StoreError> {
        let docs = self.docs.read().await;
        let mut calls: Vec<LlmCall> = docs
            .values()
            .filter(|d| d.is_head() && d.call.description.as_deref() == Some(description))
            .map(|head| Self::reconstruct(&docs, head))
            .collect();
        calls.sort_by(|a, b| b.request_time.cmp(&a.request_time));
        Ok(calls)
    }

    async fn delete_call(&self, llm_call_id: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        docs.retain(|_, d| d.llm_call_id() != llm_call_id);
        Ok(())
    }
}

// ── Review configs ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryReviewConfigStore {
    configs: RwLock<HashMap<String, CodeReviewConfig>>,
}

impl InMemoryReviewConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CodeReviewConfigStore for InMemoryReviewConfigStore {
    async fn list(&self) -> Result<Vec<CodeReviewConfig>, StoreError> {
        let configs = self.configs.read().await;
        let mut all: Vec<CodeReviewConfig> = configs.values().cloned().collect();
        all.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(all)
    }

    async fn get(&self, id: &str) -> Result<Option<CodeReviewConfig>, StoreError> {
        Ok(self.configs.read().await.get(id).cloned())
    }

    async fn save(&self, config: &CodeReviewConfig) -> Result<(), StoreError> {
        self.configs
            .write()
            .await
            .insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.configs.write().await.remove(id);
        Ok(())
    }
}

// ── Review fingerprint caches ───────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryReviewCacheStore {
    /// Raw JSON documents keyed by cache doc id, so the lenient-parse path
    /// is identical to the durable backend's.
    docs: RwLock<HashMap<String, String>>,
}

impl InMemoryReviewCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[doc(hidden)]
    pub async fn put_raw(&self, doc_id: &str, raw: &str) {
        self.docs
            .write()
            .await
            .insert(doc_id.to_string(), raw.to_string());
    }
}

#[async_trait]
impl ReviewCacheStore for InMemoryReviewCacheStore {
    async fn get(
        &self,
        project: &ProjectId,
        mr_iid: i64,
    ) -> Result<MergeRequestFingerprintCache, StoreError> {
        let doc_id = cache_doc_id(project, mr_iid);
        let docs = self.docs.read().await;
        Ok(docs
            .get(&doc_id)
            .map(|raw| parse_stored_cache(raw))
            .unwrap_or_else(MergeRequestFingerprintCache::empty))
    }

    async fn update(
        &self,
        project: &ProjectId,
        mr_iid: i64,
        cache: &MergeRequestFingerprintCache,
    ) -> Result<(), StoreError> {
        let doc_id = cache_doc_id(project, mr_iid);
        let raw = serde_json::to_string(&to_stored_cache(cache))?;
        self.docs.write().await.insert(doc_id, raw);
        Ok(())
    }
}
