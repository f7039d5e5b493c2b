//! The merge-request review pipeline.
//!
//! Per `(diff × enabled rule)`: applicability filter → code preparation →
//! fingerprint → cache check → LLM review → de-duplicated inline comments.
//! Unit LLM calls run concurrently; result handling is serial so cache and
//! comment mutation stay race-free.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Deserialize;
use steward_core::llm::{GenerateOpts, Llm};
use steward_core::message::LlmMessage;
use steward_core::trace::with_span_id;
use steward_core::Error;
use steward_store::review_config::CodeReviewConfig;
use steward_store::{CodeReviewConfigStore, ProjectId, ReviewCacheStore};
use tracing::{debug, info, warn};

use crate::config::applies;
use crate::diff::{prepare_code, PreparedCode};
use crate::fingerprint::{context_hash, extract_identifiers, unit_fingerprint, violation_identifier};
use crate::scm::{MergeRequest, MrDiff, Position, SourceControl};

/// Kept lines either side of a violation that feed its context hash.
const CONTEXT_RADIUS: usize = 3;

/// What one review run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub units_enumerated: usize,
    pub units_skipped_cached: usize,
    pub llm_reviews: usize,
    pub violations_posted: usize,
}

/// One applicable `(diff, rule)` pair.
struct ReviewUnit {
    old_path: String,
    new_path: String,
    rule: CodeReviewConfig,
    prepared: PreparedCode,
    fingerprint: String,
}

#[derive(Debug, Deserialize)]
struct UnitReviewResponse {
    #[serde(default)]
    #[allow(dead_code)]
    thinking: String,
    violations: Vec<Violation>,
}

#[derive(Debug, Deserialize)]
struct Violation {
    #[serde(rename = "lineNumber")]
    line_number: u32,
    comment: String,
}

pub struct ReviewEngine {
    scm: Arc<dyn SourceControl>,
    llm: Arc<dyn Llm>,
    configs: Arc<dyn CodeReviewConfigStore>,
    caches: Arc<dyn ReviewCacheStore>,
}

impl ReviewEngine {
    pub fn new(
        scm: Arc<dyn SourceControl>,
        llm: Arc<dyn Llm>,
        configs: Arc<dyn CodeReviewConfigStore>,
        caches: Arc<dyn ReviewCacheStore>,
    ) -> Self {
        Self {
            scm,
            llm,
            configs,
            caches,
        }
    }

    /// Review one merge request end to end.
    pub async fn review_merge_request(
        &self,
        project: &ProjectId,
        mr_iid: i64,
    ) -> Result<ReviewOutcome, Error> {
        let project_info = self.scm.get_project(project).await?;
        let mr = self.scm.get_merge_request(project, mr_iid).await?;
        let diffs = self.scm.get_diffs(project, mr_iid).await?;
        let discussions = self.scm.get_discussions(project, mr_iid).await?;
        let cache = self.caches.get(project, mr_iid).await?;

        // Identifiers of violations already posted by earlier runs.
        let mut existing_identifiers: HashSet<String> = discussions
            .iter()
            .flat_map(|d| d.notes.iter())
            .flat_map(|n| extract_identifiers(&n.body))
            .collect();

        let rules: Vec<CodeReviewConfig> = self
            .configs
            .list()
            .await?
            .into_iter()
            .filter(|r| r.enabled)
            .collect();

        let units = self.enumerate_units(project, mr_iid, &project_info.path_with_namespace, &diffs, &rules);
        let mut outcome = ReviewOutcome {
            units_enumerated: units.len(),
            ..ReviewOutcome::default()
        };

        // Working copy of the fingerprint set for this run.
        let mut working: HashSet<String> = cache.fingerprints.clone();
        let mut dirty = false;

        let (cached, to_review): (Vec<_>, Vec<_>) = units
            .into_iter()
            .partition(|u| working.contains(&u.fingerprint));
        outcome.units_skipped_cached = cached.len();
        for unit in &cached {
            debug!(file = %unit.new_path, rule = %unit.rule.id, "Unit fingerprint cached, skipping");
        }
        // A cache hit refreshes the document's timestamp on persist.
        let had_hits = !cached.is_empty();

        // Concurrent LLM reviews; results come back in unit order.
        outcome.llm_reviews = to_review.len();
        let reviews = join_all(to_review.iter().map(|u| self.review_unit(u))).await;

        // Serial result handling keeps the cache and comment set race-free.
        for (unit, review) in to_review.iter().zip(reviews) {
            let Some(review) = review else {
                // Invalid response shape: unit skipped, no cache write.
                continue;
            };

            if review.violations.is_empty() {
                working.insert(unit.fingerprint.clone());
                dirty = true;
                continue;
            }

            for violation in review.violations {
                let posted = self
                    .post_violation(project, mr_iid, &mr, unit, &violation, &mut existing_identifiers)
                    .await?;
                if posted {
                    outcome.violations_posted += 1;
                }
            }
        }

        if dirty || had_hits {
            let mut updated = cache;
            updated.fingerprints = working;
            if let Err(e) = self.caches.update(project, mr_iid, &updated).await {
                warn!(error = %e, "Failed to persist fingerprint cache");
            }
        }

        info!(
            mr_iid,
            units = outcome.units_enumerated,
            cached = outcome.units_skipped_cached,
            reviews = outcome.llm_reviews,
            violations = outcome.violations_posted,
            "Review run complete"
        );
        Ok(outcome)
    }

    fn enumerate_units(
        &self,
        project: &ProjectId,
        mr_iid: i64,
        project_path: &str,
        diffs: &[MrDiff],
        rules: &[CodeReviewConfig],
    ) -> Vec<ReviewUnit> {
        let mut units = Vec::new();
        for diff in diffs {
            for rule in rules {
                if !applies(rule, project_path, diff) {
                    continue;
                }
                let prepared = match prepare_code(&diff.diff, &diff.new_path) {
                    Ok(prepared) => prepared,
                    Err(e) => {
                        warn!(file = %diff.new_path, rule = %rule.id, error = %e, "Unit failed code preparation");
                        continue;
                    }
                };
                let fingerprint = unit_fingerprint(
                    project,
                    mr_iid,
                    &diff.new_path,
                    rule,
                    &prepared.without_lines,
                );
                units.push(ReviewUnit {
                    old_path: diff.old_path.clone(),
                    new_path: diff.new_path.clone(),
                    rule: rule.clone(),
                    prepared,
                    fingerprint,
                });
            }
        }
        units
    }

    /// One unit's LLM review. Any failure — provider error or response shape
    /// — yields `None`: the unit is skipped and nothing is cached.
    async fn review_unit(&self, unit: &ReviewUnit) -> Option<UnitReviewResponse> {
        let messages = [
            LlmMessage::system(
                "You are a precise code reviewer. Evaluate the code against exactly one rule \
                 and report every violation. Lines are preceded by comments carrying their \
                 line numbers; report the line number of the offending code line. Respond \
                 with a single JSON object: {\"thinking\": \"<analysis>\", \"violations\": \
                 [{\"lineNumber\": <n>, \"comment\": \"<review comment>\"}]} and nothing else.",
            ),
            LlmMessage::user(format!(
                "{}\n\nCode under review ({}):\n```\n{}```",
                rule_as_xml(&unit.rule),
                unit.new_path,
                unit.prepared.with_lines
            )),
        ];
        let opts = GenerateOpts::with_id(format!("code-review:{}", unit.rule.id));

        let response = with_span_id("review_unit", &unit.rule.id, async {
            self.llm.generate(&messages, &opts).await
        })
        .await;

        let text = match response {
            Ok(message) => message.text(),
            Err(e) => {
                warn!(rule = %unit.rule.id, file = %unit.new_path, error = %e, "Unit review LLM call failed");
                return None;
            }
        };
        let parsed = parse_review_response(&text);
        if parsed.is_none() {
            warn!(rule = %unit.rule.id, file = %unit.new_path, "Unit review response failed shape check");
        }
        parsed
    }

    /// Post one violation unless an identical one already exists.
    /// Returns whether a comment was created.
    async fn post_violation(
        &self,
        project: &ProjectId,
        mr_iid: i64,
        mr: &MergeRequest,
        unit: &ReviewUnit,
        violation: &Violation,
        existing_identifiers: &mut HashSet<String>,
    ) -> Result<bool, Error> {
        let line = unit.prepared.nearest_code_line(violation.line_number);
        let context = line
            .map(|l| unit.prepared.context_window(l, CONTEXT_RADIUS))
            .unwrap_or_default();
        let hash = context_hash(
            &unit.rule.id,
            &unit.new_path,
            line.unwrap_or(violation.line_number),
            &context,
        );
        let identifier = violation_identifier(&unit.rule.id, &unit.new_path, &hash);

        if existing_identifiers.contains(&identifier) {
            debug!(identifier = %identifier, "Violation already posted, skipping");
            return Ok(false);
        }

        let body = format!("<!-- {identifier} -->\n\n{}", violation.comment);
        let position = match (&mr.diff_refs, line) {
            (Some(refs), Some(new_line)) => Some(Position {
                base_sha: refs.base_sha.clone(),
                head_sha: refs.head_sha.clone(),
                start_sha: refs.start_sha.clone(),
                old_path: unit.old_path.clone(),
                new_path: unit.new_path.clone(),
                new_line,
            }),
            _ => None,
        };

        self.scm
            .create_discussion(project, mr_iid, &body, position)
            .await?;
        existing_identifiers.insert(identifier);
        Ok(true)
    }
}

/// Render a rule as the XML block embedded in review prompts.
fn rule_as_xml(rule: &CodeReviewConfig) -> String {
    let mut xml = format!(
        "<rule id=\"{}\" title=\"{}\">\n  <description>{}</description>\n",
        rule.id, rule.title, rule.description
    );
    if !rule.examples.is_empty() {
        xml.push_str("  <examples>\n");
        for example in &rule.examples {
            xml.push_str(&format!(
                "    <example>\n      <code>{}</code>\n      <reviewComment>{}</reviewComment>\n    </example>\n",
                example.code, example.review_comment
            ));
        }
        xml.push_str("  </examples>\n");
    }
    xml.push_str("</rule>");
    xml
}

/// Extract the JSON object from a review response: whole text, fenced
/// block, then outermost braces.
fn parse_review_response(text: &str) -> Option<UnitReviewResponse> {
    let mut candidates: Vec<&str> = vec![text.trim()];
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        if let Some(nl) = after.find('\n') {
            let body = &after[nl + 1..];
            if let Some(end) = body.find("```") {
                candidates.push(body[..end].trim());
            }
        }
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            candidates.push(&text[start..=end]);
        }
    }
    candidates
        .into_iter()
        .find_map(|c| serde_json::from_str(c).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use steward_core::LlmError;
    use steward_core::ReviewError;
    use steward_store::{InMemoryReviewCacheStore, InMemoryReviewConfigStore};

    use crate::scm::{CreatedMergeRequest, DiffRefs, Discussion, Note, Project};

    struct FakeScm {
        diffs: Vec<MrDiff>,
        discussions: Mutex<Vec<Discussion>>,
        positioned: Mutex<Vec<Option<Position>>>,
    }

    impl FakeScm {
        fn new(diffs: Vec<MrDiff>) -> Arc<Self> {
            Arc::new(Self {
                diffs,
                discussions: Mutex::new(Vec::new()),
                positioned: Mutex::new(Vec::new()),
            })
        }

        fn discussion_count(&self) -> usize {
            self.discussions.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SourceControl for FakeScm {
        async fn get_projects(&self) -> Result<Vec<Project>, ReviewError> {
            Ok(vec![])
        }

        async fn get_project(&self, _project: &ProjectId) -> Result<Project, ReviewError> {
            Ok(Project {
                id: 123,
                path_with_namespace: "group/web".into(),
                default_branch: Some("main".into()),
            })
        }

        async fn clone_project(
            &self,
            _path: &str,
            _branch: Option<&str>,
        ) -> Result<std::path::PathBuf, ReviewError> {
            Err(ReviewError::SourceControl("not supported in fake".into()))
        }

        async fn create_merge_request(
            &self,
            _project: &ProjectId,
            _title: &str,
            _description: &str,
            _source: &str,
            _target: &str,
        ) -> Result<CreatedMergeRequest, ReviewError> {
            Err(ReviewError::SourceControl("not supported in fake".into()))
        }

        async fn get_job_logs(
            &self,
            _project: &ProjectId,
            _job_id: i64,
        ) -> Result<String, ReviewError> {
            Ok(String::new())
        }

        async fn get_merge_request(
            &self,
            _project: &ProjectId,
            mr_iid: i64,
        ) -> Result<MergeRequest, ReviewError> {
            Ok(MergeRequest {
                id: 1,
                iid: mr_iid,
                project_id: 123,
                title: "Add feature".into(),
                web_url: "https://example.com/mr/101".into(),
                diff_refs: Some(DiffRefs {
                    base_sha: "base".into(),
                    head_sha: "head".into(),
                    start_sha: "start".into(),
                }),
            })
        }

        async fn get_diffs(
            &self,
            _project: &ProjectId,
            _mr_iid: i64,
        ) -> Result<Vec<MrDiff>, ReviewError> {
            Ok(self.diffs.clone())
        }

        async fn get_discussions(
            &self,
            _project: &ProjectId,
            _mr_iid: i64,
        ) -> Result<Vec<Discussion>, ReviewError> {
            Ok(self.discussions.lock().unwrap().clone())
        }

        async fn create_discussion(
            &self,
            _project: &ProjectId,
            _mr_iid: i64,
            body: &str,
            position: Option<Position>,
        ) -> Result<(), ReviewError> {
            let mut discussions = self.discussions.lock().unwrap();
            let id = discussions.len() as i64;
            discussions.push(Discussion {
                id: format!("d{id}"),
                notes: vec![Note {
                    id,
                    body: body.to_string(),
                }],
            });
            self.positioned.lock().unwrap().push(position);
            Ok(())
        }
    }

    struct CountingLlm {
        response: String,
        calls: Mutex<usize>,
    }

    impl CountingLlm {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.to_string(),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Llm for CountingLlm {
        fn id(&self) -> &str {
            "counting"
        }
        fn is_configured(&self) -> bool {
            true
        }
        fn max_input_tokens(&self) -> usize {
            1_000_000
        }
        async fn generate(
            &self,
            _messages: &[LlmMessage],
            _opts: &GenerateOpts,
        ) -> Result<LlmMessage, LlmError> {
            *self.calls.lock().unwrap() += 1;
            Ok(LlmMessage::assistant(self.response.clone()))
        }
    }

    fn ts_diff() -> MrDiff {
        MrDiff {
            old_path: "src/app.ts".into(),
            new_path: "src/app.ts".into(),
            diff: "@@ -1,2 +1,3 @@\n const a = 1;\n+console.log('debug');\n const b = 2;".into(),
            new_file: false,
            deleted_file: false,
            renamed_file: false,
        }
    }

    async fn rule_store() -> Arc<InMemoryReviewConfigStore> {
        let store = Arc::new(InMemoryReviewConfigStore::new());
        let mut rule = CodeReviewConfig::new("No console.log", "Remove debug logging");
        rule.file_extensions.include.push(".ts".into());
        rule.requires.text.push("console.log".into());
        steward_store::CodeReviewConfigStore::save(store.as_ref(), &rule)
            .await
            .unwrap();
        store
    }

    const CLEAN: &str = r#"{"thinking": "looks fine", "violations": []}"#;
    const ONE_VIOLATION: &str =
        r#"{"thinking": "found one", "violations": [{"lineNumber": 2, "comment": "Remove this log"}]}"#;

    #[tokio::test]
    async fn clean_unit_caches_and_second_run_skips_llm() {
        let scm = FakeScm::new(vec![ts_diff()]);
        let llm = CountingLlm::new(CLEAN);
        let configs = rule_store().await;
        let caches = Arc::new(InMemoryReviewCacheStore::new());
        let engine = ReviewEngine::new(scm, llm.clone(), configs, caches.clone());

        let project = ProjectId::Id(123);
        let first = engine.review_merge_request(&project, 101).await.unwrap();
        assert_eq!(first.units_enumerated, 1);
        assert_eq!(first.llm_reviews, 1);
        assert_eq!(first.violations_posted, 0);
        assert_eq!(llm.calls(), 1);

        let cache_after_first = caches.get(&project, 101).await.unwrap();
        assert_eq!(cache_after_first.fingerprints.len(), 1);

        // Second run over unchanged diffs: zero LLM calls, same fingerprint,
        // refreshed timestamp.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = engine.review_merge_request(&project, 101).await.unwrap();
        assert_eq!(second.llm_reviews, 0);
        assert_eq!(second.units_skipped_cached, 1);
        assert_eq!(llm.calls(), 1, "no further LLM calls");

        let cache_after_second = caches.get(&project, 101).await.unwrap();
        assert_eq!(
            cache_after_second.fingerprints,
            cache_after_first.fingerprints
        );
        assert!(cache_after_second.last_updated >= cache_after_first.last_updated);
    }

    #[tokio::test]
    async fn violation_posts_anchored_comment_once() {
        let scm = FakeScm::new(vec![ts_diff()]);
        let llm = CountingLlm::new(ONE_VIOLATION);
        let configs = rule_store().await;
        let caches = Arc::new(InMemoryReviewCacheStore::new());
        let engine = ReviewEngine::new(scm.clone(), llm.clone(), configs, caches.clone());

        let project = ProjectId::Id(123);
        let first = engine.review_merge_request(&project, 101).await.unwrap();
        assert_eq!(first.violations_posted, 1);
        assert_eq!(scm.discussion_count(), 1);

        let body = scm.discussions.lock().unwrap()[0].notes[0].body.clone();
        assert!(body.starts_with("<!-- bot-review-id: rule="));
        assert!(body.contains("Remove this log"));
        let position = scm.positioned.lock().unwrap()[0].clone().unwrap();
        assert_eq!(position.new_line, 2);
        assert_eq!(position.head_sha, "head");

        // Violations do not populate the cache.
        assert!(caches.get(&project, 101).await.unwrap().fingerprints.is_empty());

        // A re-run re-reviews the unit but the identifier dedupe suppresses
        // the duplicate comment.
        let second = engine.review_merge_request(&project, 101).await.unwrap();
        assert_eq!(second.llm_reviews, 1);
        assert_eq!(second.violations_posted, 0);
        assert_eq!(scm.discussion_count(), 1);
    }

    #[tokio::test]
    async fn invalid_response_skips_unit_without_cache_write() {
        let scm = FakeScm::new(vec![ts_diff()]);
        let llm = CountingLlm::new("I could not produce JSON, sorry.");
        let configs = rule_store().await;
        let caches = Arc::new(InMemoryReviewCacheStore::new());
        let engine = ReviewEngine::new(scm.clone(), llm.clone(), configs, caches.clone());

        let project = ProjectId::Id(123);
        let outcome = engine.review_merge_request(&project, 101).await.unwrap();
        assert_eq!(outcome.llm_reviews, 1);
        assert_eq!(outcome.violations_posted, 0);
        assert_eq!(scm.discussion_count(), 0);
        assert!(caches.get(&project, 101).await.unwrap().fingerprints.is_empty());
    }

    #[tokio::test]
    async fn unparseable_hunk_header_fails_unit_before_llm() {
        let mut diff = ts_diff();
        diff.diff = "+console.log('no hunk header')".into();
        let scm = FakeScm::new(vec![diff]);
        let llm = CountingLlm::new(CLEAN);
        let configs = rule_store().await;
        let caches = Arc::new(InMemoryReviewCacheStore::new());
        let engine = ReviewEngine::new(scm, llm.clone(), configs, caches);

        let outcome = engine
            .review_merge_request(&ProjectId::Id(123), 101)
            .await
            .unwrap();
        assert_eq!(outcome.units_enumerated, 0);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn non_matching_diff_produces_no_units() {
        let mut diff = ts_diff();
        diff.new_path = "src/app.py".into();
        diff.old_path = "src/app.py".into();
        let scm = FakeScm::new(vec![diff]);
        let llm = CountingLlm::new(CLEAN);
        let configs = rule_store().await;
        let caches = Arc::new(InMemoryReviewCacheStore::new());
        let engine = ReviewEngine::new(scm, llm.clone(), configs, caches);

        let outcome = engine
            .review_merge_request(&ProjectId::Id(123), 101)
            .await
            .unwrap();
        assert_eq!(outcome.units_enumerated, 0);
        assert_eq!(llm.calls(), 0);
    }

    #[test]
    fn review_response_parses_from_fenced_block() {
        let text = format!("Here you go:\n```json\n{ONE_VIOLATION}\n```");
        let parsed = parse_review_response(&text).unwrap();
        assert_eq!(parsed.violations.len(), 1);
        assert_eq!(parsed.violations[0].line_number, 2);
    }

    #[test]
    fn review_response_rejects_wrong_shape() {
        assert!(parse_review_response(r#"{"violations": "none"}"#).is_none());
        assert!(parse_review_response("plain prose").is_none());
    }

    #[test]
    fn rule_xml_embeds_examples() {
        let mut rule = CodeReviewConfig::new("No console.log", "Remove debug logging");
        rule.examples.push(steward_store::review_config::ReviewExample {
            code: "console.log('x')".into(),
            review_comment: "Use the logger".into(),
        });
        let xml = rule_as_xml(&rule);
        assert!(xml.contains("<description>Remove debug logging</description>"));
        assert!(xml.contains("<reviewComment>Use the logger</reviewComment>"));
    }
}
