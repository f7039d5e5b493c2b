//! Function abstraction — the capabilities an agent can call.
//!
//! Functions are what let the agent act: file access, issue trackers,
//! sub-agent control. Each implementation carries an explicit schema that is
//! sent to the planning LLM, and a process-wide registry maps function class
//! names back to callable instances when an agent context is rehydrated from
//! the store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FunctionError;

/// A single parameter in a function schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParam {
    pub name: String,
    /// JSON-ish type name: "string", "number", "boolean", "array", "object".
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// The schema of a callable function, as presented to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    /// Unique class name, e.g. "agent_completed" or "jira_get_issue".
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<FunctionParam>,
}

impl FunctionSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(
        mut self,
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.parameters.push(FunctionParam {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required,
        });
        self
    }
}

/// A function-call intent emitted by the planning LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// The function class name to invoke.
    pub function_name: String,

    /// Arguments keyed by parameter name. The runtime trusts the schema and
    /// passes these through positionally-by-name.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl FunctionCall {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            parameters: serde_json::Map::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Fetch a required string argument.
    pub fn str_arg(&self, name: &str) -> std::result::Result<&str, FunctionError> {
        self.parameters
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| FunctionError::InvalidArguments {
                function: self.function_name.clone(),
                reason: format!("missing string argument '{name}'"),
            })
    }
}

/// The durable record of one executed function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResult {
    pub function_name: String,

    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    /// Epoch ms when the call was issued.
    pub request_time: i64,

    /// Epoch ms when the call finished.
    pub completed_time: i64,
}

/// The outcome a function returns to the loop.
#[derive(Debug, Clone, Default)]
pub struct FunctionOutcome {
    /// Output shown to the LLM on the next iteration.
    pub output: String,
}

/// The core function trait.
///
/// Implementations are registered in the [`FunctionRegistry`] and bound into
/// agents by class name.
#[async_trait]
pub trait AgentFunction: Send + Sync {
    /// The schema presented to the LLM. `schema().name` is the registry key.
    fn schema(&self) -> &FunctionSchema;

    /// Whether a human must confirm before this function runs.
    fn confirmation_required(&self) -> bool {
        false
    }

    /// Execute with arguments keyed by parameter name.
    async fn call(
        &self,
        call: &FunctionCall,
    ) -> std::result::Result<FunctionOutcome, FunctionError>;
}

/// A process-wide mapping from function class name to callable instance.
///
/// Consulted at deserialization time to rebuild an agent's capability set;
/// names missing from the registry log a warning and are skipped.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn AgentFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Register a function. Replaces any existing entry with the same name.
    pub fn register(&mut self, function: Arc<dyn AgentFunction>) {
        let name = function.schema().name.clone();
        self.functions.insert(name, function);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Resolve a list of class names to instances.
    ///
    /// Unknown names are skipped with a warning; the agent keeps running with
    /// the capabilities that still exist.
    pub fn resolve(&self, names: &[String]) -> Vec<Arc<dyn AgentFunction>> {
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            match self.get(name) {
                Some(f) => resolved.push(f),
                None => {
                    tracing::warn!(function = %name, "Unknown function class, skipping")
                }
            }
        }
        resolved
    }

    /// Filter a list of class names to those present in the registry.
    pub fn known(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|n| {
                let present = self.contains(n);
                if !present {
                    tracing::warn!(function = %n, "Unknown function class, skipping");
                }
                present
            })
            .cloned()
            .collect()
    }

    /// All schemas, for presenting the capability set to the LLM.
    pub fn schemas(&self, names: &[String]) -> Vec<FunctionSchema> {
        names
            .iter()
            .filter_map(|n| self.get(n).map(|f| f.schema().clone()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoFunction {
        schema: FunctionSchema,
    }

    impl EchoFunction {
        fn new() -> Self {
            Self {
                schema: FunctionSchema::new("echo", "Echoes back the input").param(
                    "text",
                    "string",
                    "The text to echo",
                    true,
                ),
            }
        }
    }

    #[async_trait]
    impl AgentFunction for EchoFunction {
        fn schema(&self) -> &FunctionSchema {
            &self.schema
        }

        async fn call(
            &self,
            call: &FunctionCall,
        ) -> std::result::Result<FunctionOutcome, FunctionError> {
            Ok(FunctionOutcome {
                output: call.str_arg("text")?.to_string(),
            })
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = FunctionRegistry::new();
        registry.register(Arc::new(EchoFunction::new()));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn resolve_skips_unknown_names() {
        let mut registry = FunctionRegistry::new();
        registry.register(Arc::new(EchoFunction::new()));
        let resolved = registry.resolve(&["echo".into(), "ghost".into()]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].schema().name, "echo");
    }

    #[test]
    fn known_filters_to_registered() {
        let mut registry = FunctionRegistry::new();
        registry.register(Arc::new(EchoFunction::new()));
        let kept = registry.known(&["ghost".into(), "echo".into()]);
        assert_eq!(kept, vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn call_with_arguments() {
        let f = EchoFunction::new();
        let call = FunctionCall::new("echo").arg("text", "hello");
        let outcome = f.call(&call).await.unwrap();
        assert_eq!(outcome.output, "hello");
    }

    #[tokio::test]
    async fn missing_argument_is_invalid() {
        let f = EchoFunction::new();
        let call = FunctionCall::new("echo");
        let err = f.call(&call).await.unwrap_err();
        assert!(matches!(err, FunctionError::InvalidArguments { .. }));
    }

    #[test]
    fn schemas_follow_binding_order() {
        let mut registry = FunctionRegistry::new();
        registry.register(Arc::new(EchoFunction::new()));
        let schemas = registry.schemas(&["echo".into(), "ghost".into()]);
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].parameters[0].name, "text");
    }
}
