//! Planning prompt assembly and function-call extraction.
//!
//! The planner LLM sees the agent's capability schemas in its system prompt
//! and answers with a JSON object carrying zero or more function-call
//! intents. Extraction tolerates fenced blocks, bare objects, and
//! surrounding prose; anything unparseable yields an empty intent list.

use serde::Deserialize;
use steward_core::agent::AgentContext;
use steward_core::function::{FunctionCall, FunctionSchema};
use steward_core::message::LlmMessage;

/// Assemble the message array for one planning call: a fresh system prompt
/// (task, memory, capabilities, response contract) followed by the durable
/// conversation.
pub fn build_planning_messages(ctx: &AgentContext, schemas: &[FunctionSchema]) -> Vec<LlmMessage> {
    let mut system = String::new();
    system.push_str(&format!(
        "You are the autonomous agent \"{}\".\n\nTask:\n{}\n",
        ctx.name, ctx.user_prompt
    ));

    if !ctx.memory.is_empty() {
        system.push_str("\nMemory:\n");
        for (key, value) in &ctx.memory {
            system.push_str(&format!("- {key}: {value}\n"));
        }
    }

    system.push_str("\nAvailable functions (JSON schemas):\n");
    for schema in schemas {
        system.push_str(&serde_json::to_string(schema).unwrap_or_default());
        system.push('\n');
    }

    system.push_str(
        "\nRespond with a single JSON object:\n\
         {\"reasoning\": \"<your plan>\", \"function_calls\": \
         [{\"function_name\": \"<name>\", \"parameters\": {...}}]}\n\
         Call agent_completed when the task is finished; call \
         agent_request_feedback when you need a human decision.",
    );

    let mut messages = Vec::with_capacity(ctx.messages.len() + 1);
    messages.push(LlmMessage::system(system).cached());
    messages.extend(ctx.messages.iter().cloned());
    messages
}

#[derive(Debug, Deserialize)]
struct PlanningResponse {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

/// Extract function-call intents from a planner response.
///
/// Tries, in order: the whole text as JSON, the first fenced code block, and
/// the outermost brace-delimited span. Unparseable responses produce no
/// intents.
pub fn parse_function_calls(text: &str) -> Vec<FunctionCall> {
    for candidate in candidates(text) {
        if let Ok(parsed) = serde_json::from_str::<PlanningResponse>(candidate) {
            return parsed.function_calls;
        }
    }
    tracing::debug!("No function calls parsed from planner response");
    Vec::new()
}

fn candidates(text: &str) -> Vec<&str> {
    let mut out = vec![text.trim()];
    if let Some(fenced) = fenced_block(text) {
        out.push(fenced);
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            out.push(&text[start..=end]);
        }
    }
    out
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_core::agent::AgentType;
    use steward_core::user::User;

    #[test]
    fn bare_json_parses() {
        let calls = parse_function_calls(
            r#"{"reasoning": "list first", "function_calls": [{"function_name": "fs_list", "parameters": {"path": "."}}]}"#,
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_name, "fs_list");
        assert_eq!(calls[0].parameters["path"], ".");
    }

    #[test]
    fn fenced_json_parses() {
        let text = "Here is my plan.\n```json\n{\"function_calls\": [{\"function_name\": \"agent_completed\", \"parameters\": {\"note\": \"done\"}}]}\n```\nThanks.";
        let calls = parse_function_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_name, "agent_completed");
    }

    #[test]
    fn prose_wrapped_json_parses() {
        let text = "I will call the function now: {\"function_calls\": []} — nothing to do.";
        let calls = parse_function_calls(text);
        assert!(calls.is_empty());
    }

    #[test]
    fn garbage_yields_no_calls() {
        assert!(parse_function_calls("I am not sure what to do.").is_empty());
        assert!(parse_function_calls("").is_empty());
    }

    #[test]
    fn system_prompt_carries_schemas_and_memory() {
        let mut ctx = AgentContext::new(User::single(), AgentType::Codegen, "builder", "ship it");
        ctx.memory.insert("branch".into(), "feature/x".into());
        ctx.messages.push(LlmMessage::user("go"));

        let schemas = vec![FunctionSchema::new("fs_list", "List files").param(
            "path",
            "string",
            "Directory",
            true,
        )];
        let messages = build_planning_messages(&ctx, &schemas);

        assert_eq!(messages.len(), 2);
        let system = messages[0].text();
        assert!(system.contains("ship it"));
        assert!(system.contains("branch: feature/x"));
        assert!(system.contains("fs_list"));
        assert!(system.contains("agent_completed"));
        assert_eq!(messages[1].text(), "go");
    }
}
