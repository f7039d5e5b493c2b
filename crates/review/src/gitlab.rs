//! GitLab REST adapter for [`SourceControl`].
//!
//! Configured from `GITLAB_HOST`, `GITLAB_TOKEN`, and optionally
//! `GITLAB_GROUPS` (comma-separated groups for project listing). Clones land
//! under the shared system directory.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use steward_core::ReviewError;
use steward_store::ProjectId;
use tracing::{debug, info};

use crate::scm::{
    CreatedMergeRequest, Discussion, MergeRequest, MrDiff, Position, Project, SourceControl,
};

pub struct GitLabSourceControl {
    host: String,
    token: String,
    groups: Vec<String>,
    clone_root: PathBuf,
    client: reqwest::Client,
}

fn scm_err(context: &str, e: impl std::fmt::Display) -> ReviewError {
    ReviewError::SourceControl(format!("{context}: {e}"))
}

impl GitLabSourceControl {
    /// Build from the standard environment variables.
    pub fn from_env() -> Result<Self, ReviewError> {
        let host = std::env::var("GITLAB_HOST").unwrap_or_else(|_| "https://gitlab.com".into());
        let token = std::env::var("GITLAB_TOKEN")
            .map_err(|_| ReviewError::SourceControl("GITLAB_TOKEN is not set".into()))?;
        let groups = std::env::var("GITLAB_GROUPS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        let clone_root = std::env::var("STEWARD_SYS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
            .join(".steward")
            .join("gitlab");
        Self::new(host, token, groups, clone_root)
    }

    pub fn new(
        host: impl Into<String>,
        token: impl Into<String>,
        groups: Vec<String>,
        clone_root: PathBuf,
    ) -> Result<Self, ReviewError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| scm_err("failed to build HTTP client", e))?;
        Ok(Self {
            host: host.into().trim_end_matches('/').to_string(),
            token: token.into(),
            groups,
            clone_root,
            client,
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4/{path}", self.host)
    }

    /// GitLab accepts either the numeric id or the URL-encoded full path.
    fn project_ref(project: &ProjectId) -> String {
        match project {
            ProjectId::Id(id) => id.to_string(),
            ProjectId::Path(path) => path.replace('/', "%2F"),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, ReviewError> {
        let response = self
            .client
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| scm_err("request failed", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReviewError::SourceControl(format!(
                "GET {url} returned {status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| scm_err("invalid JSON from GitLab", e))
    }
}

#[derive(Debug, Deserialize)]
struct WireDiscussion {
    id: String,
    #[serde(default)]
    notes: Vec<WireNote>,
}

#[derive(Debug, Deserialize)]
struct WireNote {
    id: i64,
    #[serde(default)]
    body: String,
}

#[async_trait]
impl SourceControl for GitLabSourceControl {
    async fn get_projects(&self) -> Result<Vec<Project>, ReviewError> {
        let mut projects = Vec::new();
        for group in &self.groups {
            let url = self.api(&format!(
                "groups/{}/projects?per_page=100&include_subgroups=true",
                group.replace('/', "%2F")
            ));
            let mut page: Vec<Project> = self.get_json(&url).await?;
            projects.append(&mut page);
        }
        Ok(projects)
    }

    async fn get_project(&self, project: &ProjectId) -> Result<Project, ReviewError> {
        let url = self.api(&format!("projects/{}", Self::project_ref(project)));
        self.get_json(&url).await
    }

    async fn clone_project(
        &self,
        path_with_namespace: &str,
        branch_or_commit: Option<&str>,
    ) -> Result<PathBuf, ReviewError> {
        let target = self.clone_root.join(path_with_namespace);
        let host_no_scheme = self
            .host
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let remote = format!(
            "https://oauth2:{}@{}/{}.git",
            self.token, host_no_scheme, path_with_namespace
        );

        if target.join(".git").exists() {
            debug!(path = %target.display(), "Clone exists, fetching");
            run_git(&["fetch", "--all"], Some(&target)).await?;
        } else {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| scm_err("creating clone directory", e))?;
            }
            info!(project = %path_with_namespace, "Cloning project");
            run_git(
                &["clone", &remote, target.to_str().unwrap_or_default()],
                None,
            )
            .await?;
        }

        if let Some(rev) = branch_or_commit {
            run_git(&["checkout", rev], Some(&target)).await?;
        }
        Ok(target)
    }

    async fn create_merge_request(
        &self,
        project: &ProjectId,
        title: &str,
        description: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<CreatedMergeRequest, ReviewError> {
        #[derive(Deserialize)]
        struct WireMr {
            id: i64,
            iid: i64,
            web_url: String,
            title: String,
        }

        let url = self.api(&format!(
            "projects/{}/merge_requests",
            Self::project_ref(project)
        ));
        let response = self
            .client
            .post(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .form(&[
                ("title", title),
                ("description", description),
                ("source_branch", source_branch),
                ("target_branch", target_branch),
            ])
            .send()
            .await
            .map_err(|e| scm_err("create merge request", e))?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(ReviewError::SourceControl(format!(
                "POST {url} returned {status}"
            )));
        }
        let mr: WireMr = response
            .json()
            .await
            .map_err(|e| scm_err("invalid MR response", e))?;
        Ok(CreatedMergeRequest {
            id: mr.id,
            iid: mr.iid,
            url: mr.web_url,
            title: mr.title,
        })
    }

    async fn get_job_logs(&self, project: &ProjectId, job_id: i64) -> Result<String, ReviewError> {
        let url = self.api(&format!(
            "projects/{}/jobs/{job_id}/trace",
            Self::project_ref(project)
        ));
        let response = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| scm_err("fetch job logs", e))?;
        response.text().await.map_err(|e| scm_err("job log body", e))
    }

    async fn get_merge_request(
        &self,
        project: &ProjectId,
        mr_iid: i64,
    ) -> Result<MergeRequest, ReviewError> {
        let url = self.api(&format!(
            "projects/{}/merge_requests/{mr_iid}",
            Self::project_ref(project)
        ));
        self.get_json(&url).await
    }

    async fn get_diffs(
        &self,
        project: &ProjectId,
        mr_iid: i64,
    ) -> Result<Vec<MrDiff>, ReviewError> {
        let url = self.api(&format!(
            "projects/{}/merge_requests/{mr_iid}/diffs?per_page=100",
            Self::project_ref(project)
        ));
        self.get_json(&url).await
    }

    async fn get_discussions(
        &self,
        project: &ProjectId,
        mr_iid: i64,
    ) -> Result<Vec<Discussion>, ReviewError> {
        let url = self.api(&format!(
            "projects/{}/merge_requests/{mr_iid}/discussions?per_page=100",
            Self::project_ref(project)
        ));
        let wire: Vec<WireDiscussion> = self.get_json(&url).await?;
        Ok(wire
            .into_iter()
            .map(|d| Discussion {
                id: d.id,
                notes: d
                    .notes
                    .into_iter()
                    .map(|n| crate::scm::Note {
                        id: n.id,
                        body: n.body,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn create_discussion(
        &self,
        project: &ProjectId,
        mr_iid: i64,
        body: &str,
        position: Option<Position>,
    ) -> Result<(), ReviewError> {
        let url = self.api(&format!(
            "projects/{}/merge_requests/{mr_iid}/discussions",
            Self::project_ref(project)
        ));

        let mut form: Vec<(String, String)> = vec![("body".into(), body.to_string())];
        if let Some(p) = position {
            form.push(("position[position_type]".into(), "text".into()));
            form.push(("position[base_sha]".into(), p.base_sha));
            form.push(("position[head_sha]".into(), p.head_sha));
            form.push(("position[start_sha]".into(), p.start_sha));
            form.push(("position[old_path]".into(), p.old_path));
            form.push(("position[new_path]".into(), p.new_path));
            form.push(("position[new_line]".into(), p.new_line.to_string()));
        }

        let response = self
            .client
            .post(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .form(&form)
            .send()
            .await
            .map_err(|e| scm_err("create discussion", e))?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(ReviewError::SourceControl(format!(
                "POST {url} returned {status}"
            )));
        }
        Ok(())
    }
}

async fn run_git(args: &[&str], cwd: Option<&std::path::Path>) -> Result<(), ReviewError> {
    let mut command = tokio::process::Command::new("git");
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let output = command
        .output()
        .await
        .map_err(|e| scm_err("spawning git", e))?;
    if !output.status.success() {
        return Err(ReviewError::SourceControl(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_ref_encodes_paths() {
        assert_eq!(GitLabSourceControl::project_ref(&ProjectId::Id(42)), "42");
        assert_eq!(
            GitLabSourceControl::project_ref(&ProjectId::Path("group/sub/project".into())),
            "group%2Fsub%2Fproject"
        );
    }

    #[test]
    fn api_urls_are_rooted_at_v4() {
        let scm = GitLabSourceControl::new(
            "https://gitlab.example.com/",
            "token",
            vec![],
            PathBuf::from("/tmp/clones"),
        )
        .unwrap();
        assert_eq!(
            scm.api("projects/1"),
            "https://gitlab.example.com/api/v4/projects/1"
        );
    }
}
