//! `steward review <project> <mr_iid>` — run the code-review pipeline.

use std::sync::Arc;

use steward_core::Error;
use steward_review::{GitLabSourceControl, ReviewEngine};
use steward_store::ProjectId;

use crate::config::AppConfig;
use crate::runtime::Runtime;

pub async fn run(config: AppConfig, project: &str, mr_iid: i64) -> Result<(), Error> {
    let runtime = Runtime::boot(config).await?;

    let project: ProjectId = match project.parse::<i64>() {
        Ok(id) => ProjectId::Id(id),
        Err(_) => ProjectId::Path(project.to_string()),
    };

    let scm = Arc::new(GitLabSourceControl::from_env()?);
    let engine = ReviewEngine::new(
        scm,
        runtime.llm.clone(),
        runtime.stores.review_configs.clone(),
        runtime.stores.review_caches.clone(),
    );

    let outcome = engine.review_merge_request(&project, mr_iid).await?;
    println!(
        "units={} cached={} reviewed={} violations_posted={}",
        outcome.units_enumerated,
        outcome.units_skipped_cached,
        outcome.llm_reviews,
        outcome.violations_posted
    );
    Ok(())
}
