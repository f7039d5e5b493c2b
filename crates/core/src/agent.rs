//! Agent context — the durable record of a single agent's identity, state,
//! memory, messages, and capabilities.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::function::FunctionCallResult;
use crate::message::LlmMessage;
use crate::user::User;

/// What kind of work the agent performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Codegen,
    Workflow,
}

/// The runner state machine.
///
/// Terminal states (`Completed`, `Shutdown`, `Timeout`) are sinks: nothing
/// transitions out of them except a new execution with a fresh execution id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Planning: consulting the LLM for the next step.
    Agent,
    /// Executing the function calls the planner emitted.
    Functions,
    /// Running a deterministic workflow step.
    Workflow,
    /// Waiting for spawned child agents to reach a terminal state.
    ChildAgents,
    /// A called tool requested human confirmation.
    HitlTool,
    /// The LLM requested feedback from a human.
    HitlFeedback,
    /// The iteration-count gate fired.
    HitlThreshold,
    /// The cost gate fired.
    Hil,
    /// An uncaught failure; resumable by a human.
    Error,
    Completed,
    Shutdown,
    Timeout,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentState::Completed | AgentState::Shutdown | AgentState::Timeout
        )
    }

    /// Executing states are everything "running" queries should include.
    pub fn is_executing(self) -> bool {
        !self.is_terminal()
    }

    /// The terminal state names, in the tag form used by the stores.
    pub const TERMINAL_TAGS: [&'static str; 3] = ["completed", "shutdown", "timeout"];

    /// The serde tag for this state.
    pub fn tag(self) -> &'static str {
        match self {
            AgentState::Agent => "agent",
            AgentState::Functions => "functions",
            AgentState::Workflow => "workflow",
            AgentState::ChildAgents => "child_agents",
            AgentState::HitlTool => "hitl_tool",
            AgentState::HitlFeedback => "hitl_feedback",
            AgentState::HitlThreshold => "hitl_threshold",
            AgentState::Hil => "hil",
            AgentState::Error => "error",
            AgentState::Completed => "completed",
            AgentState::Shutdown => "shutdown",
            AgentState::Timeout => "timeout",
        }
    }

    /// Whether the runner may move from `self` to `to` within one execution.
    ///
    /// Terminal states are sinks. `Completed` is only reached from planning,
    /// and `HitlTool` only from function execution; stop and timeout are
    /// reachable from any executing state.
    pub fn can_transition_to(self, to: AgentState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            AgentState::Shutdown | AgentState::Timeout | AgentState::Hil | AgentState::Error => {
                true
            }
            AgentState::Completed => matches!(self, AgentState::Agent),
            AgentState::HitlTool => matches!(self, AgentState::Functions),
            AgentState::HitlThreshold | AgentState::HitlFeedback | AgentState::ChildAgents => {
                matches!(self, AgentState::Agent)
            }
            AgentState::Functions => matches!(self, AgentState::Agent | AgentState::HitlTool),
            AgentState::Agent | AgentState::Workflow => true,
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Snapshot of the agent's working-directory state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemState {
    pub base_path: PathBuf,
    pub working_directory: PathBuf,
}

/// The durable record of a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    /// Opaque, unique, immutable.
    pub agent_id: String,

    /// Regenerated on every resume so stale writers can be detected.
    pub execution_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_agent_id: Option<String>,

    /// Invariant: for every child, the child's `parent_agent_id` is this
    /// agent; both sides are updated atomically by the store.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub child_agents: BTreeSet<String>,

    /// Immutable after creation.
    pub user: User,

    #[serde(rename = "type")]
    pub agent_type: AgentType,

    pub state: AgentState,

    pub name: String,
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub input_prompt: String,

    /// Append-only within a single execution.
    #[serde(default)]
    pub messages: Vec<LlmMessage>,

    #[serde(default)]
    pub function_call_history: Vec<FunctionCallResult>,

    /// Top of stack is the most recent call.
    #[serde(default)]
    pub call_stack: Vec<String>,

    /// Agent-visible scratch space.
    #[serde(default)]
    pub memory: BTreeMap<String, String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Function class names bound into this agent.
    #[serde(default)]
    pub functions: Vec<String>,

    /// User-supplied messages delivered between iterations.
    #[serde(default)]
    pub pending_messages: Vec<String>,

    /// Cost the agent may accrue between human gates, USD.
    #[serde(default)]
    pub hil_budget: f64,

    /// Planning iterations between human gates; 0 disables the gate.
    #[serde(default)]
    pub hil_count: u32,

    /// Lifetime cost, USD. Monotonically non-decreasing.
    #[serde(default)]
    pub cost: f64,

    /// Cost accrued since the last human gate.
    #[serde(default)]
    pub cost_since_hil: f64,

    /// Planning iterations since the last threshold gate.
    #[serde(default)]
    pub iterations: u32,

    /// Epoch ms of the last mutation.
    pub last_update: i64,

    /// Registered terminal-notification sink, by handler id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_handler_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system: Option<FileSystemState>,

    /// File paths the agent has declared live.
    #[serde(default)]
    pub live_files: BTreeSet<String>,

    /// Last error captured when entering the error state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Current epoch time in milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl AgentContext {
    pub fn new(
        user: User,
        agent_type: AgentType,
        name: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        let user_prompt = user_prompt.into();
        Self {
            agent_id: Uuid::new_v4().to_string(),
            execution_id: Uuid::new_v4().to_string(),
            parent_agent_id: None,
            child_agents: BTreeSet::new(),
            user,
            agent_type,
            state: AgentState::Agent,
            name: name.into(),
            input_prompt: user_prompt.clone(),
            user_prompt,
            messages: Vec::new(),
            function_call_history: Vec::new(),
            call_stack: Vec::new(),
            memory: BTreeMap::new(),
            metadata: BTreeMap::new(),
            functions: Vec::new(),
            pending_messages: Vec::new(),
            hil_budget: 0.0,
            hil_count: 0,
            cost: 0.0,
            cost_since_hil: 0.0,
            iterations: 0,
            last_update: now_ms(),
            completed_handler_id: None,
            file_system: None,
            live_files: BTreeSet::new(),
            error: None,
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

    pub fn with_parent(mut self, parent_agent_id: impl Into<String>) -> Self {
        self.parent_agent_id = Some(parent_agent_id.into());
        self
    }

    pub fn with_completed_handler(mut self, handler_id: impl Into<String>) -> Self {
        self.completed_handler_id = Some(handler_id.into());
        self
    }

    /// Begin a fresh execution: regenerates the execution id so any writer
    /// still holding the old one is detectably stale.
    pub fn begin_execution(&mut self) {
        self.execution_id = Uuid::new_v4().to_string();
        self.touch();
    }

    /// Record spend. `cost` never decreases; negative adjustments are
    /// ignored.
    pub fn add_cost(&mut self, amount: f64) {
        if amount > 0.0 {
            self.cost += amount;
            self.cost_since_hil += amount;
        }
        self.touch();
    }

    /// Budget left before the cost gate fires.
    pub fn budget_remaining(&self) -> f64 {
        (self.hil_budget - self.cost_since_hil).max(0.0)
    }

    /// Clear the cost accumulator after a human acknowledged the gate.
    pub fn clear_cost_gate(&mut self) {
        self.cost_since_hil = 0.0;
        self.touch();
    }

    pub fn append_message(&mut self, message: LlmMessage) {
        self.messages.push(message);
        self.touch();
    }

    pub fn record_function_result(&mut self, result: FunctionCallResult) {
        self.function_call_history.push(result);
        self.touch();
    }

    /// Move queued user messages into the conversation, in arrival order.
    pub fn drain_pending_messages(&mut self) {
        if self.pending_messages.is_empty() {
            return;
        }
        for text in std::mem::take(&mut self.pending_messages) {
            self.messages.push(LlmMessage::user(text));
        }
        self.touch();
    }

    pub fn is_executing(&self) -> bool {
        self.state.is_executing()
    }

    pub fn touch(&mut self) {
        self.last_update = now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AgentContext {
        AgentContext::new(
            User::new("u1", "u1@example.com"),
            AgentType::Codegen,
            "test-agent",
            "do the thing",
        )
    }

    #[test]
    fn terminal_states_are_sinks() {
        for terminal in [
            AgentState::Completed,
            AgentState::Shutdown,
            AgentState::Timeout,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(AgentState::Agent));
            assert!(!terminal.can_transition_to(AgentState::Shutdown));
        }
    }

    #[test]
    fn executing_states_cover_everything_else() {
        for state in [
            AgentState::Agent,
            AgentState::Functions,
            AgentState::Workflow,
            AgentState::ChildAgents,
            AgentState::HitlTool,
            AgentState::HitlFeedback,
            AgentState::HitlThreshold,
            AgentState::Hil,
            AgentState::Error,
        ] {
            assert!(state.is_executing(), "{state} should be executing");
        }
    }

    #[test]
    fn completed_only_from_planning() {
        assert!(AgentState::Agent.can_transition_to(AgentState::Completed));
        assert!(!AgentState::Functions.can_transition_to(AgentState::Completed));
    }

    #[test]
    fn tool_confirmation_only_from_functions() {
        assert!(AgentState::Functions.can_transition_to(AgentState::HitlTool));
        assert!(!AgentState::Agent.can_transition_to(AgentState::HitlTool));
    }

    #[test]
    fn shutdown_from_any_executing_state() {
        for state in [AgentState::Agent, AgentState::Functions, AgentState::Hil] {
            assert!(state.can_transition_to(AgentState::Shutdown));
        }
    }

    #[test]
    fn state_tags_are_snake_case() {
        assert_eq!(AgentState::ChildAgents.tag(), "child_agents");
        assert_eq!(AgentState::HitlThreshold.tag(), "hitl_threshold");
        let json = serde_json::to_string(&AgentState::HitlTool).unwrap();
        assert_eq!(json, "\"hitl_tool\"");
    }

    #[test]
    fn cost_is_monotone() {
        let mut c = ctx();
        c.add_cost(0.5);
        c.add_cost(-1.0);
        c.add_cost(0.25);
        assert!((c.cost - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn budget_remaining_never_negative() {
        let mut c = ctx().with_hil(1.0, 0);
        c.add_cost(2.5);
        assert_eq!(c.budget_remaining(), 0.0);
        c.clear_cost_gate();
        assert!((c.budget_remaining() - 1.0).abs() < f64::EPSILON);
        assert!((c.cost - 2.5).abs() < f64::EPSILON, "lifetime cost untouched");
    }

    #[test]
    fn drain_preserves_arrival_order() {
        let mut c = ctx();
        c.pending_messages = vec!["first".into(), "second".into()];
        c.drain_pending_messages();
        assert!(c.pending_messages.is_empty());
        assert_eq!(c.messages.len(), 2);
        assert_eq!(c.messages[0].text(), "first");
        assert_eq!(c.messages[1].text(), "second");
    }

    #[test]
    fn begin_execution_rotates_id() {
        let mut c = ctx();
        let first = c.execution_id.clone();
        c.begin_execution();
        assert_ne!(c.execution_id, first);
        assert_eq!(c.agent_id, c.agent_id.clone());
    }

    #[test]
    fn context_roundtrips_through_json() {
        let mut c = ctx().with_functions(vec!["echo".into()]).with_hil(5.0, 3);
        c.memory.insert("key".into(), "value".into());
        c.child_agents.insert("child-1".into());
        let json = serde_json::to_string(&c).unwrap();
        let back: AgentContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
