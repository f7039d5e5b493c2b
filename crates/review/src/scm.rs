//! Source-control interface — the surface the review engine and agent
//! functions consume from GitLab-shaped hosts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use steward_core::ReviewError;
use steward_store::ProjectId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub path_with_namespace: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// The commit anchors a positioned discussion needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRefs {
    pub base_sha: String,
    pub head_sha: String,
    pub start_sha: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: i64,
    pub iid: i64,
    pub project_id: i64,
    pub title: String,
    pub web_url: String,
    #[serde(default)]
    pub diff_refs: Option<DiffRefs>,
}

/// One changed file in an MR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MrDiff {
    pub old_path: String,
    pub new_path: String,
    /// Unified diff text including hunk headers.
    pub diff: String,
    #[serde(default)]
    pub new_file: bool,
    #[serde(default)]
    pub deleted_file: bool,
    #[serde(default)]
    pub renamed_file: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discussion {
    pub id: String,
    #[serde(default)]
    pub notes: Vec<Note>,
}

/// Anchor for an inline discussion on the new side of a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub base_sha: String,
    pub head_sha: String,
    pub start_sha: String,
    pub old_path: String,
    pub new_path: String,
    pub new_line: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedMergeRequest {
    pub id: i64,
    pub iid: i64,
    pub url: String,
    pub title: String,
}

/// A source-control host.
#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn get_projects(&self) -> Result<Vec<Project>, ReviewError>;

    async fn get_project(&self, project: &ProjectId) -> Result<Project, ReviewError>;

    /// Clone (or update) a project working copy; returns the local path.
    async fn clone_project(
        &self,
        path_with_namespace: &str,
        branch_or_commit: Option<&str>,
    ) -> Result<std::path::PathBuf, ReviewError>;

    async fn create_merge_request(
        &self,
        project: &ProjectId,
        title: &str,
        description: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<CreatedMergeRequest, ReviewError>;

    async fn get_job_logs(&self, project: &ProjectId, job_id: i64) -> Result<String, ReviewError>;

    async fn get_merge_request(
        &self,
        project: &ProjectId,
        mr_iid: i64,
    ) -> Result<MergeRequest, ReviewError>;

    async fn get_diffs(
        &self,
        project: &ProjectId,
        mr_iid: i64,
    ) -> Result<Vec<MrDiff>, ReviewError>;

    async fn get_discussions(
        &self,
        project: &ProjectId,
        mr_iid: i64,
    ) -> Result<Vec<Discussion>, ReviewError>;

    /// Post a discussion note, anchored when a position is given.
    async fn create_discussion(
        &self,
        project: &ProjectId,
        mr_iid: i64,
        body: &str,
        position: Option<Position>,
    ) -> Result<(), ReviewError>;
}
