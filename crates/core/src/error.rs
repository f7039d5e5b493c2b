//! Error types for the steward domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all steward operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- LLM errors ---
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Function errors ---
    #[error("Function error: {0}")]
    Function(#[from] FunctionError),

    // --- Agent errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Review errors ---
    #[error("Review error: {0}")]
    Review(#[from] ReviewError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("All providers in the composite failed; last: {last}")]
    AllProvidersFailed { last: String },

    #[error("Output truncated at max_tokens for {llm_id}")]
    MaxTokensExceeded {
        llm_id: String,
        /// The truncated assistant message, kept for optional replay.
        partial: Box<crate::message::LlmMessage>,
    },

    #[error("Transient provider failure: {0}")]
    Retryable(#[source] Box<LlmError>),

    #[error("Response failed shape check: {0}")]
    InvalidResponse(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl LlmError {
    /// Whether the caller's retry policy should handle this error.
    ///
    /// HTTP 429 (rate limit) and 529 (overloaded) are transient, as are
    /// transport-level failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Retryable(_) => true,
            LlmError::Api { status_code, .. } => matches!(status_code, 429 | 529),
            LlmError::Network(_) | LlmError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Wrap a transient failure so the retry layer can introspect the cause.
    pub fn retryable(inner: LlmError) -> Self {
        LlmError::Retryable(Box::new(inner))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Cannot save agent {agent_id}: parent {parent_id} does not exist")]
    ParentMissing { agent_id: String, parent_id: String },

    #[error("Message of {size} bytes exceeds the {limit}-byte document ceiling")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("Function not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments for {function}: {reason}")]
    InvalidArguments { function: String, reason: String },

    #[error("Function execution failed: {function} — {reason}")]
    ExecutionFailed {
        function: String,
        reason: String,
        /// Fatal failures abort the agent loop instead of being reported
        /// back to the LLM as stderr.
        fatal: bool,
    },
}

impl FunctionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FunctionError::ExecutionFailed { fatal: true, .. })
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("No ambient user or agent is bound on this task")]
    NotBound,

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Agent {0} is not in a resumable state")]
    NotResumable(String),

    #[error("Agent runtime error: {0}")]
    Runtime(String),
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Source control error: {0}")]
    SourceControl(String),

    #[error("Unparseable diff hunk header in {file}")]
    BadHunkHeader { file: String },

    #[error("Review pipeline error: {0}")]
    Pipeline(String),
}
