//! # steward core
//!
//! Domain types, traits, and error definitions for the steward agent
//! runtime. This crate defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod ambient;
pub mod error;
pub mod function;
pub mod llm;
pub mod message;
pub mod token;
pub mod trace;
pub mod user;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentContext, AgentState, AgentType, FileSystemState};
pub use error::{AgentError, Error, FunctionError, LlmError, Result, ReviewError, StoreError};
pub use function::{
    AgentFunction, FunctionCall, FunctionCallResult, FunctionOutcome, FunctionRegistry,
    FunctionSchema,
};
pub use llm::{GenerateOpts, Llm, ThinkingLevel};
pub use message::{CacheMarker, ContentPart, GenerationStats, LlmMessage, MessageContent, MessageRole};
pub use user::User;
