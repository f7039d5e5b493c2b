//! Code review rule configuration entity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A worked example attached to a review rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewExample {
    pub code: String,
    pub review_comment: String,
}

/// File-extension applicability filter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileExtensions {
    /// A diff applies when its new path ends with any of these.
    #[serde(default)]
    pub include: Vec<String>,
}

/// Literal-text applicability filter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Requires {
    /// A diff applies when any of these literals appears in the diff text.
    #[serde(default)]
    pub text: Vec<String>,
}

/// One configured review rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeReviewConfig {
    pub id: String,
    pub title: String,
    pub enabled: bool,
    pub description: String,

    #[serde(default)]
    pub file_extensions: FileExtensions,

    #[serde(default)]
    pub requires: Requires,

    /// Glob patterns; empty means all projects.
    #[serde(default)]
    pub project_paths: Vec<String>,

    #[serde(default)]
    pub examples: Vec<ReviewExample>,
}

impl CodeReviewConfig {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            enabled: true,
            description: description.into(),
            file_extensions: FileExtensions::default(),
            requires: Requires::default(),
            project_paths: Vec::new(),
            examples: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rule_is_enabled() {
        let rule = CodeReviewConfig::new("No console.log", "Remove debug logging");
        assert!(rule.enabled);
        assert!(!rule.id.is_empty());
    }

    #[test]
    fn config_roundtrips() {
        let mut rule = CodeReviewConfig::new("rule", "desc");
        rule.file_extensions.include.push(".ts".into());
        rule.requires.text.push("console.log".into());
        rule.project_paths.push("group/*".into());
        rule.examples.push(ReviewExample {
            code: "console.log('x')".into(),
            review_comment: "Use the logger".into(),
        });
        let json = serde_json::to_string(&rule).unwrap();
        let back: CodeReviewConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }
}
