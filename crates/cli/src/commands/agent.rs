//! `steward agent` — start, list, resume, stop, delete.

use clap::Subcommand;
use steward_agent::{Resume as ResumePayload, StartSpec};
use steward_core::agent::AgentType;
use steward_core::ambient::run_with_user;
use steward_core::user::User;
use steward_core::Error;
use steward_store::AgentStateStore;

use crate::config::AppConfig;
use crate::runtime::Runtime;

#[derive(Subcommand)]
pub enum AgentAction {
    /// Start a new agent and run it to its first gate or terminal state
    Start {
        /// Agent name
        #[arg(short, long)]
        name: String,

        /// The task prompt
        #[arg(short, long)]
        prompt: String,

        /// Run as a workflow agent instead of codegen
        #[arg(long)]
        workflow: bool,

        /// Additional function class names to bind
        #[arg(short, long)]
        functions: Vec<String>,

        /// Override the configured cost gate (USD)
        #[arg(long)]
        hil_budget: Option<f64>,

        /// Override the configured iteration gate
        #[arg(long)]
        hil_count: Option<u32>,
    },

    /// List agents (newest first)
    List {
        /// Only agents in executing states
        #[arg(long)]
        running: bool,
    },

    /// Resume a waiting or errored agent
    Resume {
        agent_id: String,

        /// Feedback text (required when the agent asked a question)
        #[arg(short, long)]
        feedback: Option<String>,
    },

    /// Ask a running agent to stop at its next gate
    Stop { agent_id: String },

    /// Delete agents (with their children)
    Delete { agent_ids: Vec<String> },
}

pub async fn run(config: AppConfig, action: AgentAction) -> Result<(), Error> {
    let runtime = Runtime::boot(config).await?;
    let user = User::single();

    match action {
        AgentAction::Start {
            name,
            prompt,
            workflow,
            functions,
            hil_budget,
            hil_count,
        } => {
            let spec = StartSpec::new(name, prompt)
                .with_functions(functions)
                .with_hil(
                    hil_budget.unwrap_or(runtime.config.hil.budget),
                    hil_count.unwrap_or(runtime.config.hil.count),
                );
            let spec = StartSpec {
                agent_type: if workflow {
                    AgentType::Workflow
                } else {
                    AgentType::Codegen
                },
                ..spec
            };

            let ctx = run_with_user(user, runtime.runner.start(User::single(), spec)).await?;
            println!("{} {} [{}] cost=${:.4}", ctx.agent_id, ctx.name, ctx.state, ctx.cost);
        }

        AgentAction::List { running } => {
            let summaries = run_with_user(user, async {
                if running {
                    runtime.stores.agents.list_running().await
                } else {
                    runtime.stores.agents.list().await
                }
            })
            .await?;

            // The running query sorts by state first; re-sort by recency for
            // display.
            let mut summaries = summaries;
            summaries.sort_by(|a, b| b.last_update.cmp(&a.last_update));

            for s in summaries {
                println!(
                    "{}  {:<24} {:<14} ${:<8.4} {}",
                    s.agent_id, s.name, s.state.tag(), s.cost,
                    s.error.as_deref().unwrap_or("")
                );
            }
        }

        AgentAction::Resume { agent_id, feedback } => {
            let payload = match feedback {
                Some(text) => ResumePayload::Feedback(text),
                None => ResumePayload::Acknowledge,
            };
            let ctx = run_with_user(user, runtime.runner.resume(&agent_id, payload)).await?;
            println!("{} resumed -> {}", ctx.agent_id, ctx.state);
        }

        AgentAction::Stop { agent_id } => {
            runtime.runner.request_stop(&agent_id);
            println!("stop requested for {agent_id}");
        }

        AgentAction::Delete { agent_ids } => {
            run_with_user(user, runtime.stores.agents.delete(&agent_ids)).await?;
            println!("deleted {} agent(s) (skipping executing/foreign/child)", agent_ids.len());
        }
    }

    Ok(())
}
