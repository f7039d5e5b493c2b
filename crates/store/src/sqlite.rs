//! SQLite document adapters for all four repositories.
//!
//! Each entity is a JSON document column plus the few fields the queries
//! filter and sort on. One pooled WAL-mode database file backs the whole
//! runtime; migrations run at open. Chunking and lenient cache parsing are
//! shared with the in-memory adapters, so the two backends are
//! behavior-identical.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use steward_core::agent::{AgentContext, AgentState};
use steward_core::ambient::current_user;
use steward_core::function::FunctionRegistry;
use steward_core::user::User;
use steward_core::StoreError;
use tracing::{debug, info};

use crate::llm_call::{from_documents, to_documents, LlmCall, LlmCallDoc};
use crate::review_cache::{
    cache_doc_id, parse_stored_cache, to_stored_cache, MergeRequestFingerprintCache, ProjectId,
};
use crate::review_config::CodeReviewConfig;
use crate::{
    AgentStateStore, AgentSummary, CodeReviewConfigStore, LlmCallStore, ReviewCacheStore, Stores,
};

fn backend_err(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("{context}: {e}"))
}

fn ambient_user() -> Result<User, StoreError> {
    current_user().map_err(|_| StoreError::Unauthorized("no user bound on this task".into()))
}

fn state_from_tag(tag: &str) -> Result<AgentState, StoreError> {
    serde_json::from_str(&format!("\"{tag}\"")).map_err(StoreError::Serialization)
}

/// The shared SQLite backend.
pub struct SqliteStores {
    pool: SqlitePool,
}

impl SqliteStores {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| backend_err("invalid SQLite path", e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| backend_err("failed to open SQLite", e))?;

        let backend = Self { pool };
        backend.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(backend)
    }

    /// Wrap the pool as the repository bundle.
    pub fn into_stores(self) -> Stores {
        let pool = self.pool;
        Stores {
            agents: Arc::new(SqliteAgentStore { pool: pool.clone() }),
            llm_calls: Arc::new(SqliteLlmCallStore { pool: pool.clone() }),
            review_configs: Arc::new(SqliteReviewConfigStore { pool: pool.clone() }),
            review_caches: Arc::new(SqliteReviewCacheStore { pool }),
        }
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_contexts (
                agent_id        TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL,
                state           TEXT NOT NULL,
                parent_agent_id TEXT,
                cost            REAL NOT NULL DEFAULT 0,
                last_update     INTEGER NOT NULL,
                data            TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| backend_err("agent_contexts table", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_agent_contexts_user
             ON agent_contexts(user_id, last_update DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| backend_err("agent_contexts index", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS llm_call_docs (
                doc_id       TEXT PRIMARY KEY,
                llm_call_id  TEXT NOT NULL,
                chunk_index  INTEGER,
                agent_id     TEXT,
                description  TEXT,
                request_time INTEGER NOT NULL,
                data         TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| backend_err("llm_call_docs table", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_llm_call_docs_call
             ON llm_call_docs(llm_call_id, chunk_index)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| backend_err("llm_call_docs index", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS review_configs (
                id   TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| backend_err("review_configs table", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS review_caches (
                doc_id       TEXT PRIMARY KEY,
                last_updated INTEGER NOT NULL,
                data         TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| backend_err("review_caches table", e))?;

        debug!("SQLite migrations complete");
        Ok(())
    }
}

// ── Agent contexts ──────────────────────────────────────────────────────

pub struct SqliteAgentStore {
    pool: SqlitePool,
}

impl SqliteAgentStore {
    async fn upsert_row(
        conn: &mut sqlx::SqliteConnection,
        ctx: &AgentContext,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_string(ctx)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO agent_contexts
                (agent_id, user_id, state, parent_agent_id, cost, last_update, data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&ctx.agent_id)
        .bind(&ctx.user.id)
        .bind(ctx.state.tag())
        .bind(&ctx.parent_agent_id)
        .bind(ctx.cost)
        .bind(ctx.last_update)
        .bind(data)
        .execute(&mut *conn)
        .await
        .map_err(|e| backend_err("upsert agent", e))?;
        Ok(())
    }

    fn summary_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AgentSummary, StoreError> {
        let state_tag: String = row
            .try_get("state")
            .map_err(|e| backend_err("state column", e))?;
        Ok(AgentSummary {
            agent_id: row
                .try_get("agent_id")
                .map_err(|e| backend_err("agent_id column", e))?,
            name: row
                .try_get::<Option<String>, _>("name")
                .map_err(|e| backend_err("name column", e))?
                .unwrap_or_default(),
            state: state_from_tag(&state_tag)?,
            cost: row
                .try_get("cost")
                .map_err(|e| backend_err("cost column", e))?,
            error: row
                .try_get("error")
                .map_err(|e| backend_err("error column", e))?,
            last_update: row
                .try_get("last_update")
                .map_err(|e| backend_err("last_update column", e))?,
            user_prompt: row
                .try_get::<Option<String>, _>("user_prompt")
                .map_err(|e| backend_err("user_prompt column", e))?
                .unwrap_or_default(),
            input_prompt: row
                .try_get::<Option<String>, _>("input_prompt")
                .map_err(|e| backend_err("input_prompt column", e))?
                .unwrap_or_default(),
            user_id: row
                .try_get("user_id")
                .map_err(|e| backend_err("user_id column", e))?,
        })
    }
}

const SUMMARY_SELECT: &str = r#"
    SELECT agent_id, state, cost, last_update, user_id,
           json_extract(data, '$.name')         AS name,
           json_extract(data, '$.user_prompt')  AS user_prompt,
           json_extract(data, '$.input_prompt') AS input_prompt,
           json_extract(data, '$.error')        AS error
    FROM agent_contexts
"#;

#[async_trait]
impl AgentStateStore for SqliteAgentStore {
    async fn save(&self, ctx: &AgentContext) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_err("begin save tx", e))?;

        if let Some(parent_id) = &ctx.parent_agent_id {
            let parent_data: Option<String> =
                sqlx::query_scalar("SELECT data FROM agent_contexts WHERE agent_id = ?1")
                    .bind(parent_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| backend_err("read parent", e))?;

            let Some(parent_data) = parent_data else {
                return Err(StoreError::ParentMissing {
                    agent_id: ctx.agent_id.clone(),
                    parent_id: parent_id.clone(),
                });
            };
            let mut parent: AgentContext = serde_json::from_str(&parent_data)?;
            parent.child_agents.insert(ctx.agent_id.clone());
            parent.touch();
            Self::upsert_row(&mut *tx, &parent).await?;
        }

        Self::upsert_row(&mut *tx, ctx).await?;
        tx.commit().await.map_err(|e| backend_err("commit save", e))?;
        Ok(())
    }

    async fn update_state(
        &self,
        ctx: &mut AgentContext,
        state: AgentState,
    ) -> Result<(), StoreError> {
        let last_update = steward_core::agent::now_ms();
        let result = sqlx::query(
            r#"
            UPDATE agent_contexts
            SET state = ?1,
                last_update = ?2,
                data = json_set(data, '$.state', ?1, '$.last_update', ?2)
            WHERE agent_id = ?3
            "#,
        )
        .bind(state.tag())
        .bind(last_update)
        .bind(&ctx.agent_id)
        .execute(&self.pool)
        .await
        .map_err(|e| backend_err("update state", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "agent",
                id: ctx.agent_id.clone(),
            });
        }
        ctx.state = state;
        ctx.last_update = last_update;
        Ok(())
    }

    async fn load(&self, agent_id: &str) -> Result<Option<AgentContext>, StoreError> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM agent_contexts WHERE agent_id = ?1")
                .bind(agent_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| backend_err("load agent", e))?;
        match data {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<AgentSummary>, StoreError> {
        let user = ambient_user()?;
        let rows = sqlx::query(&format!(
            "{SUMMARY_SELECT} WHERE user_id = ?1 ORDER BY last_update DESC"
        ))
        .bind(&user.id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend_err("list agents", e))?;
        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn list_running(&self) -> Result<Vec<AgentSummary>, StoreError> {
        let user = ambient_user()?;
        // Sorting leads with the inequality-filtered field; callers wanting
        // strict recency re-sort client-side.
        let rows = sqlx::query(&format!(
            "{SUMMARY_SELECT}
             WHERE user_id = ?1 AND state NOT IN ('completed', 'shutdown', 'timeout')
             ORDER BY state ASC, last_update DESC"
        ))
        .bind(&user.id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend_err("list running agents", e))?;
        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        let user = ambient_user()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_err("begin delete tx", e))?;

        let mut to_remove: Vec<String> = Vec::new();
        for id in ids {
            let row = sqlx::query(
                r#"
                SELECT user_id, state, parent_agent_id,
                       json_extract(data, '$.child_agents') AS child_agents
                FROM agent_contexts WHERE agent_id = ?1
                "#,
            )
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| backend_err("read delete candidate", e))?;

            let Some(row) = row else { continue };
            let owner: String = row
                .try_get("user_id")
                .map_err(|e| backend_err("user_id column", e))?;
            let state_tag: String = row
                .try_get("state")
                .map_err(|e| backend_err("state column", e))?;
            let parent: Option<String> = row
                .try_get("parent_agent_id")
                .map_err(|e| backend_err("parent column", e))?;

            if owner != user.id {
                tracing::warn!(agent_id = %id, "Skipping delete of agent owned by another user");
                continue;
            }
            if state_from_tag(&state_tag)?.is_executing() {
                tracing::warn!(agent_id = %id, state = %state_tag, "Skipping delete of executing agent");
                continue;
            }
            if parent.is_some() {
                tracing::warn!(agent_id = %id, "Skipping delete of child agent");
                continue;
            }

            to_remove.push(id.clone());
            let children: Option<String> = row
                .try_get("child_agents")
                .map_err(|e| backend_err("child_agents column", e))?;
            if let Some(raw) = children {
                let children: Vec<String> = serde_json::from_str(&raw)?;
                to_remove.extend(children);
            }
        }

        if !to_remove.is_empty() {
            let placeholders = vec!["?"; to_remove.len()].join(", ");
            let sql = format!("DELETE FROM agent_contexts WHERE agent_id IN ({placeholders})");
            let mut query = sqlx::query(&sql);
            for id in &to_remove {
                query = query.bind(id);
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| backend_err("delete batch", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| backend_err("commit delete", e))?;
        Ok(())
    }

    async fn update_functions(
        &self,
        agent_id: &str,
        names: &[String],
        registry: &FunctionRegistry,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_err("begin functions tx", e))?;
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM agent_contexts WHERE agent_id = ?1")
                .bind(agent_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| backend_err("read agent", e))?;
        let Some(raw) = data else {
            return Err(StoreError::NotFound {
                kind: "agent",
                id: agent_id.to_string(),
            });
        };
        let mut ctx: AgentContext = serde_json::from_str(&raw)?;
        ctx.functions = registry.known(names);
        ctx.touch();
        Self::upsert_row(&mut *tx, &ctx).await?;
        tx.commit()
            .await
            .map_err(|e| backend_err("commit functions", e))?;
        Ok(())
    }
}

// ── LLM calls ───────────────────────────────────────────────────────────

pub struct SqliteLlmCallStore {
    pool: SqlitePool,
}

impl SqliteLlmCallStore {
    async fn insert_docs(
        conn: &mut sqlx::SqliteConnection,
        docs: &[LlmCallDoc],
    ) -> Result<(), StoreError> {
        for doc in docs {
            let data = serde_json::to_string(doc)?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO llm_call_docs
                    (doc_id, llm_call_id, chunk_index, agent_id, description, request_time, data)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(doc.doc_id())
            .bind(doc.llm_call_id())
            .bind(doc.chunk_index)
            .bind(doc.call.agent_id.as_deref())
            .bind(doc.call.description.as_deref())
            .bind(doc.call.request_time)
            .bind(data)
            .execute(&mut *conn)
            .await
            .map_err(|e| backend_err("insert llm call doc", e))?;
        }
        Ok(())
    }

    async fn chunks_for(&self, llm_call_id: &str) -> Result<Vec<LlmCallDoc>, StoreError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT data FROM llm_call_docs
             WHERE llm_call_id = ?1 AND chunk_index IS NOT NULL
             ORDER BY chunk_index ASC",
        )
        .bind(llm_call_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend_err("read chunks", e))?;
        rows.iter()
            .map(|raw| serde_json::from_str(raw).map_err(StoreError::Serialization))
            .collect()
    }

    async fn reconstruct(&self, head: LlmCallDoc) -> Result<LlmCall, StoreError> {
        if head.call.chunk_count == 0 {
            return Ok(head.call);
        }
        let chunks = self.chunks_for(head.llm_call_id()).await?;
        Ok(from_documents(head, chunks))
    }

    async fn heads_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Vec<LlmCall>, StoreError> {
        let rows: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT data FROM llm_call_docs
             WHERE {column} = ?1 AND chunk_index IS NULL
             ORDER BY request_time DESC"
        ))
        .bind(value)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend_err("query heads", e))?;

        let mut calls = Vec::with_capacity(rows.len());
        for raw in rows {
            let head: LlmCallDoc = serde_json::from_str(&raw)?;
            calls.push(self.reconstruct(head).await?);
        }
        calls.sort_by(|a, b| b.request_time.cmp(&a.request_time));
        Ok(calls)
    }
}

#[async_trait]
impl LlmCallStore for SqliteLlmCallStore {
    async fn save_request(&self, call: &LlmCall) -> Result<(), StoreError> {
        let docs = to_documents(call)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_err("begin request tx", e))?;
        sqlx::query("DELETE FROM llm_call_docs WHERE llm_call_id = ?1")
            .bind(&call.llm_call_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| backend_err("clear stale docs", e))?;
        Self::insert_docs(&mut *tx, &docs).await?;
        tx.commit()
            .await
            .map_err(|e| backend_err("commit request", e))?;
        Ok(())
    }

    async fn save_response(&self, call: &LlmCall) -> Result<(), StoreError> {
        let docs = to_documents(call)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_err("begin response tx", e))?;
        // Merge on the head, overwrite chunks: the docs carry the complete
        // record, so INSERT OR REPLACE covers both.
        Self::insert_docs(&mut *tx, &docs).await?;
        tx.commit()
            .await
            .map_err(|e| backend_err("commit response", e))?;
        Ok(())
    }

    async fn get_call(&self, llm_call_id: &str) -> Result<Option<LlmCall>, StoreError> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT data FROM llm_call_docs WHERE llm_call_id = ?1 AND chunk_index IS NULL",
        )
        .bind(llm_call_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend_err("read head", e))?;

        match raw {
            Some(raw) => {
                let head: LlmCallDoc = serde_json::from_str(&raw)?;
                Ok(Some(self.reconstruct(head).await?))
            }
            None => Ok(None),
        }
    }

    async fn get_calls_for_agent(&self, agent_id: &str) -> Result<Vec<LlmCall>, StoreError> {
        self.heads_where("agent_id", agent_id).await
    }

    async fn get_calls_by_description(
        &self,
        description: &str,
    ) -> Result<Vec<LlmCall>, StoreError> {
        self.heads_where("description", description).await
    }

    async fn delete_call(&self, llm_call_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM llm_call_docs WHERE llm_call_id = ?1")
            .bind(llm_call_id)
            .execute(&self.pool)
            .await
            .map_err(|e| backend_err("delete call", e))?;
        Ok(())
    }
}

// ── Review configs ──────────────────────────────────────────────────────

pub struct SqliteReviewConfigStore {
    pool: SqlitePool,
}

#[async_trait]
impl CodeReviewConfigStore for SqliteReviewConfigStore {
    async fn list(&self) -> Result<Vec<CodeReviewConfig>, StoreError> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT data FROM review_configs")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend_err("list review configs", e))?;
        let mut configs: Vec<CodeReviewConfig> = rows
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(StoreError::Serialization))
            .collect::<Result<_, _>>()?;
        configs.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(configs)
    }

    async fn get(&self, id: &str) -> Result<Option<CodeReviewConfig>, StoreError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT data FROM review_configs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend_err("get review config", e))?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, config: &CodeReviewConfig) -> Result<(), StoreError> {
        let data = serde_json::to_string(config)?;
        sqlx::query("INSERT OR REPLACE INTO review_configs (id, data) VALUES (?1, ?2)")
            .bind(&config.id)
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(|e| backend_err("save review config", e))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM review_configs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| backend_err("delete review config", e))?;
        Ok(())
    }
}

// ── Review fingerprint caches ───────────────────────────────────────────

pub struct SqliteReviewCacheStore {
    pool: SqlitePool,
}

#[async_trait]
impl ReviewCacheStore for SqliteReviewCacheStore {
    async fn get(
        &self,
        project: &ProjectId,
        mr_iid: i64,
    ) -> Result<MergeRequestFingerprintCache, StoreError> {
        let doc_id = cache_doc_id(project, mr_iid);
        let raw: Option<String> =
            sqlx::query_scalar("SELECT data FROM review_caches WHERE doc_id = ?1")
                .bind(&doc_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| backend_err("get review cache", e))?;
        Ok(raw
            .map(|raw| parse_stored_cache(&raw))
            .unwrap_or_else(MergeRequestFingerprintCache::empty))
    }

    async fn update(
        &self,
        project: &ProjectId,
        mr_iid: i64,
        cache: &MergeRequestFingerprintCache,
    ) -> Result<(), StoreError> {
        let doc_id = cache_doc_id(project, mr_iid);
        let stored = to_stored_cache(cache);
        let data = serde_json::to_string(&stored)?;
        sqlx::query(
            "INSERT OR REPLACE INTO review_caches (doc_id, last_updated, data) VALUES (?1, ?2, ?3)",
        )
        .bind(&doc_id)
        .bind(stored.last_updated)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| backend_err("update review cache", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{serialized_size, MAX_DOC_SIZE};
    use steward_core::agent::AgentType;
    use steward_core::ambient::run_with_user;
    use steward_core::message::LlmMessage;

    async fn stores(dir: &tempfile::TempDir) -> Stores {
        let path = dir.path().join("steward.db");
        let backend = SqliteStores::connect(path.to_str().unwrap()).await.unwrap();
        backend.into_stores()
    }

    fn user(id: &str) -> User {
        User::new(id, format!("{id}@example.com"))
    }

    fn message_of_size(target: usize) -> LlmMessage {
        let base = serialized_size(&LlmMessage::user("")).unwrap();
        LlmMessage::user("a".repeat(target - base))
    }

    #[tokio::test]
    async fn agent_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let stores = stores(&dir).await;

        let mut ctx = AgentContext::new(user("u1"), AgentType::Codegen, "durable", "prompt");
        ctx.memory.insert("k".into(), "v".into());
        ctx.messages.push(LlmMessage::user("hello"));
        stores.agents.save(&ctx).await.unwrap();

        let loaded = stores.agents.load(&ctx.agent_id).await.unwrap().unwrap();
        assert_eq!(loaded, ctx);
    }

    #[tokio::test]
    async fn parent_child_writes_are_transactional() {
        let dir = tempfile::tempdir().unwrap();
        let stores = stores(&dir).await;
        let u = user("u1");

        let orphan = AgentContext::new(u.clone(), AgentType::Workflow, "orphan", "p")
            .with_parent("missing");
        assert!(matches!(
            stores.agents.save(&orphan).await,
            Err(StoreError::ParentMissing { .. })
        ));
        // The failed child write must not have left a row behind.
        assert!(stores.agents.load(&orphan.agent_id).await.unwrap().is_none());

        let parent = AgentContext::new(u.clone(), AgentType::Workflow, "parent", "p");
        stores.agents.save(&parent).await.unwrap();
        let child = AgentContext::new(u, AgentType::Workflow, "child", "p")
            .with_parent(parent.agent_id.clone());
        stores.agents.save(&child).await.unwrap();

        let parent = stores.agents.load(&parent.agent_id).await.unwrap().unwrap();
        assert!(parent.child_agents.contains(&child.agent_id));
    }

    #[tokio::test]
    async fn update_state_patches_document() {
        let dir = tempfile::tempdir().unwrap();
        let stores = stores(&dir).await;

        let mut ctx = AgentContext::new(user("u1"), AgentType::Codegen, "patch", "p");
        stores.agents.save(&ctx).await.unwrap();
        stores
            .agents
            .update_state(&mut ctx, AgentState::Hil)
            .await
            .unwrap();

        // The document itself reflects the partial write, not just columns.
        let loaded = stores.agents.load(&ctx.agent_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, AgentState::Hil);
        assert_eq!(loaded.last_update, ctx.last_update);
    }

    #[tokio::test]
    async fn list_running_ordering_matches_memory_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let stores = stores(&dir).await;
        let u = user("u1");

        let mut f_old = AgentContext::new(u.clone(), AgentType::Codegen, "functions-old", "p");
        f_old.state = AgentState::Functions;
        f_old.last_update = 100;
        let mut f_new = AgentContext::new(u.clone(), AgentType::Codegen, "functions-new", "p");
        f_new.state = AgentState::Functions;
        f_new.last_update = 300;
        let mut a_mid = AgentContext::new(u.clone(), AgentType::Codegen, "agent-mid", "p");
        a_mid.state = AgentState::Agent;
        a_mid.last_update = 200;
        let mut done = AgentContext::new(u.clone(), AgentType::Codegen, "done", "p");
        done.state = AgentState::Completed;
        for ctx in [&f_old, &f_new, &a_mid, &done] {
            stores.agents.save(ctx).await.unwrap();
        }

        let summaries = run_with_user(u, stores.agents.list_running()).await.unwrap();
        let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["agent-mid", "functions-new", "functions-old"]);
    }

    #[tokio::test]
    async fn delete_cascade_in_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let stores = stores(&dir).await;
        let u = user("u1");

        let mut parent = AgentContext::new(u.clone(), AgentType::Codegen, "parent", "p");
        parent.state = AgentState::Completed;
        stores.agents.save(&parent).await.unwrap();
        for name in ["child-a", "child-b"] {
            let mut child = AgentContext::new(u.clone(), AgentType::Codegen, name, "p")
                .with_parent(parent.agent_id.clone());
            child.state = AgentState::Completed;
            stores.agents.save(&child).await.unwrap();
        }

        run_with_user(u.clone(), stores.agents.delete(std::slice::from_ref(&parent.agent_id)))
            .await
            .unwrap();
        assert!(stores.agents.load(&parent.agent_id).await.unwrap().is_none());
        let remaining = run_with_user(u, stores.agents.list()).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn chunked_llm_call_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let stores = stores(&dir).await;

        let size = MAX_DOC_SIZE * 6 / 10;
        let messages = vec![
            message_of_size(size),
            message_of_size(size),
            message_of_size(size),
        ];
        let mut call = LlmCall::request("sonnet", messages.clone())
            .with_attribution(Some("agent-7".into()), Some("u1".into()), None);
        stores.llm_calls.save_request(&call).await.unwrap();
        call.record_response(LlmMessage::assistant("done"));
        stores.llm_calls.save_response(&call).await.unwrap();

        let loaded = stores
            .llm_calls
            .get_call(&call.llm_call_id)
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.chunk_count >= 2);
        assert_eq!(loaded.messages.len(), 4);
        assert_eq!(&loaded.messages[..3], &messages[..]);

        let by_agent = stores.llm_calls.get_calls_for_agent("agent-7").await.unwrap();
        assert_eq!(by_agent.len(), 1);
        assert_eq!(by_agent[0].messages.len(), 4);

        stores.llm_calls.delete_call(&call.llm_call_id).await.unwrap();
        assert!(stores
            .llm_calls
            .get_call(&call.llm_call_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn review_config_and_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let stores = stores(&dir).await;

        let mut rule = CodeReviewConfig::new("No console.log", "Remove debug logging");
        rule.file_extensions.include.push(".ts".into());
        stores.review_configs.save(&rule).await.unwrap();
        assert_eq!(stores.review_configs.list().await.unwrap().len(), 1);

        let project = ProjectId::Path("group/project name!".into());
        let mut cache = MergeRequestFingerprintCache::empty();
        cache.fingerprints.insert("fp".into());
        stores.review_caches.update(&project, 101, &cache).await.unwrap();

        let loaded = stores.review_caches.get(&project, 101).await.unwrap();
        assert_eq!(loaded.fingerprints, cache.fingerprints);
        assert!(loaded.last_updated > 0);
    }
}
