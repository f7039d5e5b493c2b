//! The agent execution loop and state machine.
//!
//! One runner drives any number of agents, one execution at a time per
//! agent. Each iteration checkpoints, applies the human-in-the-loop gates,
//! drains queued user messages, consults the planning LLM, executes the
//! emitted function calls, and checkpoints again. Terminal states are sinks;
//! waiting states return control to the caller until a resume arrives.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use steward_core::agent::{now_ms, AgentContext, AgentState, AgentType};
use steward_core::ambient::run_with_agent;
use steward_core::function::{FunctionCall, FunctionCallResult, FunctionRegistry};
use steward_core::llm::{GenerateOpts, Llm};
use steward_core::message::LlmMessage;
use steward_core::trace::with_span;
use steward_core::user::User;
use steward_core::{AgentError, Error, StoreError};
use steward_store::AgentStateStore;
use tracing::{info, warn};

use crate::builtins::{
    builtin_names, AGENT_COMPLETED, AGENT_DELETE_MEMORY, AGENT_REQUEST_FEEDBACK, AGENT_SAVE_MEMORY,
};
use crate::completed::CompletedHandlerRegistry;
use crate::planning;

/// Metadata key holding a tool call awaiting human confirmation.
const PENDING_TOOL_CALL: &str = "pending_tool_call";
/// Metadata key holding the note passed to `agent_completed`.
const COMPLETION_NOTE: &str = "completion_note";
/// Metadata key holding the question passed to `agent_request_feedback`.
const FEEDBACK_REQUEST: &str = "feedback_request";

/// Parameters for starting a new agent.
#[derive(Debug, Clone)]
pub struct StartSpec {
    pub name: String,
    pub prompt: String,
    pub agent_type: AgentType,
    /// Function class names beyond the built-ins.
    pub functions: Vec<String>,
    pub hil_budget: f64,
    pub hil_count: u32,
    pub completed_handler_id: Option<String>,
}

impl StartSpec {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            agent_type: AgentType::Codegen,
            functions: Vec::new(),
            hil_budget: 0.0,
            hil_count: 0,
            completed_handler_id: None,
        }
    }

    pub fn with_functions(mut self, functions: Vec<String>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_hil(mut self, budget: f64, count: u32) -> Self {
        self.hil_budget = budget;
        self.hil_count = count;
        self
    }

    pub fn with_completed_handler(mut self, id: impl Into<String>) -> Self {
        self.completed_handler_id = Some(id.into());
        self
    }
}

/// What a resume carries.
#[derive(Debug, Clone)]
pub enum Resume {
    /// Acknowledge a gate (`hil`, `hitl_threshold`, `hitl_tool`, `error`).
    Acknowledge,
    /// Answer a feedback request.
    Feedback(String),
}

/// How a dispatched batch of calls left the loop.
enum Flow {
    Continue,
    /// A waiting state was entered; control returns to the caller.
    Paused,
    /// A terminal state was entered.
    Finished,
}

#[derive(Clone, Default)]
struct StopFlags(Arc<Mutex<HashSet<String>>>);

impl StopFlags {
    fn request(&self, agent_id: &str) {
        self.0.lock().unwrap().insert(agent_id.to_string());
    }

    fn take(&self, agent_id: &str) -> bool {
        self.0.lock().unwrap().remove(agent_id)
    }
}

/// Drives agent executions against a state store and a planning LLM.
pub struct AgentRunner {
    store: Arc<dyn AgentStateStore>,
    llm: Arc<dyn Llm>,
    registry: Arc<FunctionRegistry>,
    handlers: Arc<CompletedHandlerRegistry>,
    stop_flags: StopFlags,
    wall_clock_budget: Option<Duration>,
}

impl AgentRunner {
    pub fn new(
        store: Arc<dyn AgentStateStore>,
        llm: Arc<dyn Llm>,
        registry: Arc<FunctionRegistry>,
    ) -> Self {
        Self {
            store,
            llm,
            registry,
            handlers: Arc::new(CompletedHandlerRegistry::new()),
            stop_flags: StopFlags::default(),
            wall_clock_budget: None,
        }
    }

    pub fn with_wall_clock_budget(mut self, budget: Duration) -> Self {
        self.wall_clock_budget = Some(budget);
        self
    }

    pub fn handlers(&self) -> &Arc<CompletedHandlerRegistry> {
        &self.handlers
    }

    /// Create, persist, and run a new agent for `user`.
    pub async fn start(&self, user: User, spec: StartSpec) -> Result<AgentContext, Error> {
        let mut functions = builtin_names();
        functions.extend(self.registry.known(&spec.functions));

        let mut ctx = AgentContext::new(user, spec.agent_type, spec.name, spec.prompt)
            .with_functions(functions)
            .with_hil(spec.hil_budget, spec.hil_count);
        ctx.completed_handler_id = spec.completed_handler_id;

        info!(agent_id = %ctx.agent_id, name = %ctx.name, "Starting agent");
        self.store.save(&ctx).await?;
        self.run(ctx).await
    }

    /// Resume a waiting or errored agent under a fresh execution id.
    pub async fn resume(&self, agent_id: &str, payload: Resume) -> Result<AgentContext, Error> {
        let mut ctx = self
            .store
            .load(agent_id)
            .await?
            .ok_or(StoreError::NotFound {
                kind: "agent",
                id: agent_id.to_string(),
            })?;

        match (ctx.state, &payload) {
            (AgentState::HitlThreshold, _) => ctx.iterations = 0,
            (AgentState::Hil, _) => ctx.clear_cost_gate(),
            (AgentState::HitlFeedback, Resume::Feedback(text)) => {
                ctx.pending_messages.push(text.clone());
            }
            (AgentState::HitlFeedback, Resume::Acknowledge) => {
                return Err(AgentError::Runtime(
                    "resuming a feedback request requires feedback text".into(),
                )
                .into());
            }
            (AgentState::HitlTool, _) => {}
            (AgentState::Error, _) => ctx.error = None,
            (state, _) => {
                return Err(AgentError::NotResumable(format!("{agent_id} is {state}")).into())
            }
        }

        ctx.begin_execution();
        info!(agent_id = %ctx.agent_id, execution_id = %ctx.execution_id, "Resuming agent");

        if ctx.state == AgentState::HitlTool {
            if let Some(value) = ctx.metadata.remove(PENDING_TOOL_CALL) {
                match serde_json::from_value::<FunctionCall>(value) {
                    Ok(call) => {
                        if let Some(Flow::Paused | Flow::Finished) =
                            self.execute_call(&mut ctx, call, true).await?
                        {
                            return Ok(ctx);
                        }
                    }
                    Err(e) => warn!(agent_id = %ctx.agent_id, error = %e, "Dropping unparseable pending tool call"),
                }
            }
        }

        self.run(ctx).await
    }

    /// Ask a running agent to stop at its next gate.
    pub fn request_stop(&self, agent_id: &str) {
        self.stop_flags.request(agent_id);
    }

    /// Queue a user message for delivery between iterations.
    pub async fn deliver_message(&self, agent_id: &str, text: &str) -> Result<(), Error> {
        let mut ctx = self
            .store
            .load(agent_id)
            .await?
            .ok_or(StoreError::NotFound {
                kind: "agent",
                id: agent_id.to_string(),
            })?;
        ctx.pending_messages.push(text.to_string());
        self.store.save(&ctx).await?;
        Ok(())
    }

    /// Run one deterministic workflow step under `ctx`.
    ///
    /// The agent waits in `workflow` while the step runs with the context
    /// bound ambiently, then returns to planning.
    pub async fn run_workflow<F, Fut, T>(
        &self,
        ctx: &mut AgentContext,
        name: &str,
        step: F,
    ) -> Result<T, Error>
    where
        F: FnOnce(Arc<AgentContext>) -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        self.store.update_state(ctx, AgentState::Workflow).await?;
        ctx.call_stack.push(name.to_string());
        let snapshot = Arc::new(ctx.clone());
        let result = run_with_agent(snapshot.clone(), step(snapshot)).await;
        ctx.call_stack.pop();
        self.store.update_state(ctx, AgentState::Agent).await?;
        result
    }

    /// Spawn child agents under `parent` and wait for all of them to reach a
    /// terminal state. The parent waits in `child_agents` and returns to
    /// planning afterwards.
    pub async fn spawn_children(
        &self,
        parent: &mut AgentContext,
        specs: Vec<StartSpec>,
    ) -> Result<Vec<AgentContext>, Error> {
        self.store
            .update_state(parent, AgentState::ChildAgents)
            .await?;

        let mut children = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut functions = builtin_names();
            functions.extend(self.registry.known(&spec.functions));
            let child = AgentContext::new(
                parent.user.clone(),
                spec.agent_type,
                spec.name,
                spec.prompt,
            )
            .with_functions(functions)
            .with_hil(spec.hil_budget, spec.hil_count)
            .with_parent(parent.agent_id.clone());

            self.store.save(&child).await?;
            let done = Box::pin(self.run(child)).await?;
            children.push(done);
        }

        // Pick up the child links the two-phase saves added.
        if let Some(stored) = self.store.load(&parent.agent_id).await? {
            parent.child_agents = stored.child_agents;
        }
        self.store.update_state(parent, AgentState::Agent).await?;
        Ok(children)
    }

    /// The iteration loop. Returns when the agent reaches a terminal state
    /// or parks in a waiting state.
    pub async fn run(&self, mut ctx: AgentContext) -> Result<AgentContext, Error> {
        let started = Instant::now();

        loop {
            // Pick up messages delivered since the last checkpoint, then
            // checkpoint the iteration start.
            if let Some(stored) = self.store.load(&ctx.agent_id).await? {
                ctx.pending_messages = stored.pending_messages;
            }
            self.store.save(&ctx).await?;

            if self.stop_flags.take(&ctx.agent_id) {
                info!(agent_id = %ctx.agent_id, "Stop requested, shutting down");
                ctx.state = AgentState::Shutdown;
                ctx.touch();
                break;
            }
            if let Some(budget) = self.wall_clock_budget {
                if started.elapsed() >= budget {
                    warn!(agent_id = %ctx.agent_id, "Wall-clock budget exceeded");
                    ctx.state = AgentState::Timeout;
                    ctx.touch();
                    break;
                }
            }

            // Human gates fire before the LLM is consulted.
            if ctx.hil_count > 0 && ctx.iterations >= ctx.hil_count {
                info!(agent_id = %ctx.agent_id, iterations = ctx.iterations, "Iteration gate");
                self.store
                    .update_state(&mut ctx, AgentState::HitlThreshold)
                    .await?;
                return Ok(ctx);
            }
            if ctx.hil_budget > 0.0 && ctx.cost_since_hil > ctx.hil_budget {
                info!(
                    agent_id = %ctx.agent_id,
                    cost = ctx.cost_since_hil,
                    budget = ctx.hil_budget,
                    "Cost gate"
                );
                self.store.update_state(&mut ctx, AgentState::Hil).await?;
                return Ok(ctx);
            }

            ctx.drain_pending_messages();
            if ctx.state != AgentState::Agent {
                self.store.update_state(&mut ctx, AgentState::Agent).await?;
            }

            // Planning.
            let schemas = self.registry.schemas(&ctx.functions);
            let request = planning::build_planning_messages(&ctx, &schemas);
            let opts = GenerateOpts::with_id("agent-plan");
            let snapshot = Arc::new(ctx.clone());
            let llm = Arc::clone(&self.llm);
            let result = run_with_agent(
                snapshot,
                with_span("agent_plan", async move { llm.generate(&request, &opts).await }),
            )
            .await;

            let mut assistant = match result {
                Ok(message) => message,
                Err(e) => {
                    warn!(agent_id = %ctx.agent_id, error = %e, "Planning failed, entering error state");
                    ctx.error = Some(e.to_string());
                    ctx.state = AgentState::Error;
                    ctx.touch();
                    self.store.save(&ctx).await?;
                    return Ok(ctx);
                }
            };

            if let Some(stats) = &assistant.stats {
                ctx.add_cost(stats.cost);
            }
            if assistant.function_calls.is_empty() {
                assistant.function_calls = planning::parse_function_calls(&assistant.text());
            }
            let calls = assistant.function_calls.clone();
            ctx.append_message(assistant);

            match self.dispatch(&mut ctx, calls).await? {
                Flow::Continue => {}
                Flow::Paused => return Ok(ctx),
                Flow::Finished => break,
            }

            ctx.iterations += 1;
            ctx.touch();
            self.store.save(&ctx).await?;
        }

        self.store.save(&ctx).await?;
        Ok(ctx)
    }

    /// Route one batch of planner intents.
    async fn dispatch(
        &self,
        ctx: &mut AgentContext,
        calls: Vec<FunctionCall>,
    ) -> Result<Flow, Error> {
        if let Some(call) = calls.iter().find(|c| c.function_name == AGENT_COMPLETED) {
            let note = call.str_arg("note").unwrap_or_default().to_string();
            ctx.metadata
                .insert(COMPLETION_NOTE.into(), serde_json::Value::String(note));
            ctx.state = AgentState::Completed;
            ctx.touch();
            self.store.save(ctx).await?;
            self.handlers.notify(ctx).await;
            return Ok(Flow::Finished);
        }

        if let Some(call) = calls
            .iter()
            .find(|c| c.function_name == AGENT_REQUEST_FEEDBACK)
        {
            let request = call.str_arg("request").unwrap_or_default().to_string();
            ctx.metadata
                .insert(FEEDBACK_REQUEST.into(), serde_json::Value::String(request));
            self.store
                .update_state(ctx, AgentState::HitlFeedback)
                .await?;
            self.handlers.notify(ctx).await;
            return Ok(Flow::Paused);
        }

        if calls.is_empty() {
            // The planner answered in prose; steer it back to the contract.
            ctx.append_message(LlmMessage::user(
                "Respond with at least one function call; call agent_completed if the task is done.",
            ));
            return Ok(Flow::Continue);
        }

        self.store.update_state(ctx, AgentState::Functions).await?;
        for call in calls {
            if let Some(flow) = self.execute_call(ctx, call, false).await? {
                return Ok(flow);
            }
        }
        Ok(Flow::Continue)
    }

    /// Execute one function call, recording its result. Returns a `Flow`
    /// when the call changes the loop's course.
    ///
    /// `confirmed` marks a call resuming from `hitl_tool`; it skips the
    /// confirmation check that parked the agent in the first place.
    async fn execute_call(
        &self,
        ctx: &mut AgentContext,
        call: FunctionCall,
        confirmed: bool,
    ) -> Result<Option<Flow>, Error> {
        let request_time = now_ms();
        let name = call.function_name.clone();

        // Memory built-ins mutate the context directly.
        match name.as_str() {
            AGENT_SAVE_MEMORY => {
                let outcome = match (call.str_arg("key"), call.str_arg("content")) {
                    (Ok(key), Ok(content)) => {
                        ctx.memory.insert(key.to_string(), content.to_string());
                        Ok(format!("Stored memory key '{key}'"))
                    }
                    (Err(e), _) | (_, Err(e)) => Err(e.to_string()),
                };
                self.record_result(ctx, &call, request_time, outcome);
                return Ok(None);
            }
            AGENT_DELETE_MEMORY => {
                let outcome = match call.str_arg("key") {
                    Ok(key) => {
                        ctx.memory.remove(key);
                        Ok(format!("Removed memory key '{key}'"))
                    }
                    Err(e) => Err(e.to_string()),
                };
                self.record_result(ctx, &call, request_time, outcome);
                return Ok(None);
            }
            _ => {}
        }

        let Some(function) = self.registry.get(&name) else {
            warn!(agent_id = %ctx.agent_id, function = %name, "Planner called an unbound function");
            self.record_result(
                ctx,
                &call,
                request_time,
                Err(format!("Function '{name}' is not bound to this agent")),
            );
            return Ok(None);
        };

        if !confirmed && function.confirmation_required() {
            info!(agent_id = %ctx.agent_id, function = %name, "Tool requires human confirmation");
            ctx.metadata
                .insert(PENDING_TOOL_CALL.into(), serde_json::to_value(&call)?);
            self.store.update_state(ctx, AgentState::HitlTool).await?;
            return Ok(Some(Flow::Paused));
        }

        ctx.call_stack.push(name.clone());
        let snapshot = Arc::new(ctx.clone());
        let outcome = run_with_agent(snapshot, function.call(&call)).await;
        ctx.call_stack.pop();

        match outcome {
            Ok(result) => {
                self.record_result(ctx, &call, request_time, Ok(result.output));
                Ok(None)
            }
            Err(e) if e.is_fatal() => {
                warn!(agent_id = %ctx.agent_id, function = %name, error = %e, "Fatal function failure");
                ctx.error = Some(e.to_string());
                ctx.state = AgentState::Error;
                ctx.touch();
                self.store.save(ctx).await?;
                Ok(Some(Flow::Paused))
            }
            Err(e) => {
                self.record_result(ctx, &call, request_time, Err(e.to_string()));
                Ok(None)
            }
        }
    }

    /// Append a `FunctionCallResult` and the tool message the planner will
    /// see next iteration.
    fn record_result(
        &self,
        ctx: &mut AgentContext,
        call: &FunctionCall,
        request_time: i64,
        outcome: Result<String, String>,
    ) {
        let (stdout, stderr) = match outcome {
            Ok(out) => (Some(out), None),
            Err(err) => (None, Some(err)),
        };
        let body = match (&stdout, &stderr) {
            (Some(out), _) => format!("{} output:\n{out}", call.function_name),
            (_, Some(err)) => format!("{} failed:\n{err}", call.function_name),
            _ => unreachable!(),
        };
        ctx.record_function_result(FunctionCallResult {
            function_name: call.function_name.clone(),
            parameters: call.parameters.clone(),
            stdout,
            stderr,
            request_time,
            completed_time: now_ms(),
        });
        ctx.append_message(LlmMessage::tool(body));
    }
}
