//! `steward calls <agent_id>` — inspect recorded LLM calls.

use steward_core::Error;
use steward_store::LlmCallStore;

use crate::config::AppConfig;
use crate::runtime::Runtime;

pub async fn run(config: AppConfig, agent_id: &str) -> Result<(), Error> {
    let runtime = Runtime::boot(config).await?;
    let calls = runtime.stores.llm_calls.get_calls_for_agent(agent_id).await?;

    if calls.is_empty() {
        println!("no recorded calls for {agent_id}");
        return Ok(());
    }

    for call in calls {
        println!(
            "{}  {:<28} msgs={:<3} in={:<6} out={:<6} ${:.5}  {}",
            call.llm_call_id,
            call.llm_id,
            call.messages.len(),
            call.input_tokens.unwrap_or(0),
            call.output_tokens.unwrap_or(0),
            call.cost.unwrap_or(0.0),
            call.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
