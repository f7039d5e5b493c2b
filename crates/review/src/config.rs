//! Rule applicability — which `(diff, rule)` pairs become review units.

use glob::Pattern;
use steward_store::review_config::CodeReviewConfig;

use crate::scm::MrDiff;

/// Whether `rule` applies to `diff` in the project at `project_path`.
///
/// Empty filter lists are unconstraining; a populated list must match.
pub fn applies(rule: &CodeReviewConfig, project_path: &str, diff: &MrDiff) -> bool {
    if !rule.enabled {
        return false;
    }
    if diff.deleted_file {
        return false;
    }

    if !rule.project_paths.is_empty() {
        let matched = rule.project_paths.iter().any(|p| {
            Pattern::new(p)
                .map(|pattern| pattern.matches(project_path))
                .unwrap_or_else(|e| {
                    tracing::warn!(pattern = %p, error = %e, "Invalid project path glob");
                    false
                })
        });
        if !matched {
            return false;
        }
    }

    if !rule.file_extensions.include.is_empty()
        && !rule
            .file_extensions
            .include
            .iter()
            .any(|ext| diff.new_path.ends_with(ext.as_str()))
    {
        return false;
    }

    if !rule.requires.text.is_empty()
        && !rule.requires.text.iter().any(|t| diff.diff.contains(t.as_str()))
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(new_path: &str, body: &str) -> MrDiff {
        MrDiff {
            old_path: new_path.to_string(),
            new_path: new_path.to_string(),
            diff: body.to_string(),
            new_file: false,
            deleted_file: false,
            renamed_file: false,
        }
    }

    fn rule() -> CodeReviewConfig {
        let mut rule = CodeReviewConfig::new("No console.log", "Remove debug logging");
        rule.file_extensions.include.push(".ts".into());
        rule.requires.text.push("console.log".into());
        rule
    }

    #[test]
    fn all_filters_passing_applies() {
        assert!(applies(
            &rule(),
            "group/web",
            &diff("src/app.ts", "+console.log('x')")
        ));
    }

    #[test]
    fn disabled_rule_never_applies() {
        let mut r = rule();
        r.enabled = false;
        assert!(!applies(&r, "group/web", &diff("src/app.ts", "+console.log('x')")));
    }

    #[test]
    fn extension_mismatch_rejects() {
        assert!(!applies(
            &rule(),
            "group/web",
            &diff("src/app.py", "+console.log('x')")
        ));
    }

    #[test]
    fn missing_required_text_rejects() {
        assert!(!applies(&rule(), "group/web", &diff("src/app.ts", "+let x = 1;")));
    }

    #[test]
    fn project_glob_filters() {
        let mut r = rule();
        r.project_paths.push("group/*".into());
        let d = diff("src/app.ts", "+console.log('x')");
        assert!(applies(&r, "group/web", &d));
        assert!(!applies(&r, "other/web", &d));
    }

    #[test]
    fn deleted_file_rejects() {
        let mut d = diff("src/app.ts", "+console.log('x')");
        d.deleted_file = true;
        assert!(!applies(&rule(), "group/web", &d));
    }
}
