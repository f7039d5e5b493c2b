//! Boot-time wiring: stores, LLM stack, registry, runner.

use std::sync::Arc;

use steward_agent::{register_builtins, AgentRunner};
use steward_core::function::FunctionRegistry;
use steward_core::llm::Llm;
use steward_core::Error;
use steward_llm::{default_chain, RecordingLlm};
use steward_store::Stores;

use crate::config::AppConfig;

pub struct Runtime {
    pub config: AppConfig,
    pub stores: Stores,
    pub llm: Arc<dyn Llm>,
    pub registry: Arc<FunctionRegistry>,
    pub runner: AgentRunner,
}

impl Runtime {
    /// Wire the configured backends together.
    pub async fn boot(config: AppConfig) -> Result<Self, Error> {
        steward_core::ambient::set_single_user_mode(config.auth == "single_user");

        let sqlite_path = config.sqlite_path();
        let stores = match config.database.as_str() {
            "sqlite" => {
                if let Some(parent) = sqlite_path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| Error::Internal(format!("creating system dir: {e}")))?;
                }
                Stores::sqlite(sqlite_path.to_str().unwrap_or("steward.db")).await?
            }
            _ => Stores::memory(),
        };

        let llm: Arc<dyn Llm> = Arc::new(RecordingLlm::new(
            Arc::new(default_chain()?),
            stores.llm_calls.clone(),
        ));

        let mut registry = FunctionRegistry::new();
        register_builtins(&mut registry);
        let registry = Arc::new(registry);

        let runner = AgentRunner::new(stores.agents.clone(), llm.clone(), registry.clone());

        Ok(Self {
            config,
            stores,
            llm,
            registry,
            runner,
        })
    }
}
