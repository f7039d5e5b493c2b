//! Review-unit fingerprints and violation context hashes.
//!
//! The unit fingerprint excludes line numbers and head SHAs: a cosmetic
//! re-push that leaves the kept content unchanged produces the same
//! fingerprint and hits the cache. Violation context hashes anchor posted
//! comments so re-reviews do not duplicate them.

use sha1::Sha1;
use sha2::{Digest, Sha256};
use steward_store::review_config::CodeReviewConfig;
use steward_store::ProjectId;

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// A short version tag for a rule, derived from its reviewable substance.
/// Editing a rule's title or description invalidates its cached units.
pub fn rule_version(rule: &CodeReviewConfig) -> String {
    sha256_hex(&format!("{}|{}", rule.title, rule.description))[..8].to_string()
}

/// The fingerprint of one `(project, MR, file, rule, content)` unit.
pub fn unit_fingerprint(
    project: &ProjectId,
    mr_iid: i64,
    file: &str,
    rule: &CodeReviewConfig,
    code_without_lines: &str,
) -> String {
    let content_hash = sha256_hex(code_without_lines);
    sha256_hex(&format!(
        "prj:{project}|mr:{mr_iid}|file:{file}|rule:{rule_id}|ruleVer:{rule_ver}|content:{content_hash}",
        rule_id = rule.id,
        rule_ver = rule_version(rule),
    ))
}

/// 16-hex-char hash of a violation's surroundings.
pub fn context_hash(rule_id: &str, file: &str, line: u32, context: &str) -> String {
    let digest = Sha1::digest(format!("{rule_id}|{file}|{line}|{context}").as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// The identifier embedded in every bot comment, scanned on later runs to
/// dedupe violations.
pub fn violation_identifier(rule_id: &str, file: &str, context_hash: &str) -> String {
    format!("bot-review-id: rule={rule_id}, file={file}, contextHash={context_hash}")
}

/// Extract every embedded identifier from a comment body.
pub fn extract_identifiers(body: &str) -> Vec<String> {
    body.match_indices("bot-review-id:")
        .map(|(start, _)| {
            let rest = &body[start..];
            let end = rest
                .find("-->")
                .or_else(|| rest.find('\n'))
                .unwrap_or(rest.len());
            rest[..end].trim().to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> CodeReviewConfig {
        let mut rule = CodeReviewConfig::new("No console.log", "Remove debug logging");
        rule.id = "rule-7".into();
        rule
    }

    #[test]
    fn fingerprint_is_stable_across_invocations() {
        let project = ProjectId::Id(123);
        let a = unit_fingerprint(&project, 101, "src/a.ts", &rule(), "const x = 1;\n");
        let b = unit_fingerprint(&project, 101, "src/a.ts", &rule(), "const x = 1;\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_varies_with_content_and_rule() {
        let project = ProjectId::Id(123);
        let base = unit_fingerprint(&project, 101, "src/a.ts", &rule(), "const x = 1;\n");

        let changed_code = unit_fingerprint(&project, 101, "src/a.ts", &rule(), "const x = 2;\n");
        assert_ne!(base, changed_code);

        let mut edited = rule();
        edited.description = "Remove all logging".into();
        let changed_rule = unit_fingerprint(&project, 101, "src/a.ts", &edited, "const x = 1;\n");
        assert_ne!(base, changed_rule);
    }

    #[test]
    fn context_hash_is_sixteen_hex_chars() {
        let hash = context_hash("rule-7", "src/a.ts", 42, "line a\nline b");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn identifier_roundtrips_through_comment_body() {
        let identifier = violation_identifier("rule-7", "src/a.ts", "abcd1234abcd1234");
        let body = format!("<!-- {identifier} -->\n\nPlease remove this log statement.");
        let found = extract_identifiers(&body);
        assert_eq!(found, vec![identifier]);
    }

    #[test]
    fn plain_comment_has_no_identifiers() {
        assert!(extract_identifiers("Looks good to me!").is_empty());
    }
}
