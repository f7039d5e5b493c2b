//! Merge-request code review for the steward runtime.
//!
//! The [`ReviewEngine`] runs the per-unit pipeline — applicability filter,
//! code preparation, fingerprint cache, LLM review, de-duplicated comments —
//! against any [`SourceControl`] implementation.

pub mod config;
pub mod diff;
pub mod engine;
pub mod fingerprint;
pub mod gitlab;
pub mod scm;

pub use config::applies;
pub use diff::{line_commenter, parse_hunk_start, prepare_code, PreparedCode};
pub use engine::{ReviewEngine, ReviewOutcome};
pub use fingerprint::{
    context_hash, extract_identifiers, rule_version, unit_fingerprint, violation_identifier,
};
pub use gitlab::GitLabSourceControl;
pub use scm::{
    CreatedMergeRequest, DiffRefs, Discussion, MergeRequest, MrDiff, Note, Position, Project,
    SourceControl,
};
