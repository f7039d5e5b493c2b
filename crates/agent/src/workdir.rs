//! Working-directory scopes and the on-disk system layout.
//!
//! File-system operations acquire a working-directory scope whose previous
//! directory is restored on every exit path, including panics, via `Drop`.
//! Git-root detection is cached process-wide.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Root of steward's on-disk state: `${STEWARD_SYS_DIR || cwd}/.steward/`.
pub fn system_dir() -> PathBuf {
    let base = std::env::var("STEWARD_SYS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    base.join(".steward")
}

/// Working directory for one agent: `<systemDir>/agents/<agentId>/`.
pub fn agent_dir(agent_id: &str) -> PathBuf {
    system_dir().join("agents").join(agent_id)
}

/// Shared clone location for a source-control project:
/// `<systemDir>/<scm>/<projectPathWithNamespace>`.
pub fn scm_clone_dir(scm: &str, path_with_namespace: &str) -> PathBuf {
    system_dir().join(scm).join(path_with_namespace)
}

/// Scoped working-directory change.
///
/// The process-wide cwd is changed on acquisition and restored when the
/// guard drops, so nested operations cannot leak a directory change past
/// their scope.
pub struct WorkingDirGuard {
    previous: PathBuf,
}

impl WorkingDirGuard {
    pub fn enter(dir: &Path) -> std::io::Result<Self> {
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(dir)?;
        Ok(Self { previous })
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.previous) {
            tracing::error!(
                previous = %self.previous.display(),
                error = %e,
                "Failed to restore working directory"
            );
        }
    }
}

static GIT_ROOTS: OnceLock<Mutex<HashMap<PathBuf, Option<PathBuf>>>> = OnceLock::new();

/// The repository root containing `dir`, walking upward for a `.git` entry.
///
/// Results, including misses, are cached process-wide.
pub fn git_root(dir: &Path) -> Option<PathBuf> {
    let cache = GIT_ROOTS.get_or_init(|| Mutex::new(HashMap::new()));
    if let Some(cached) = cache.lock().unwrap().get(dir) {
        return cached.clone();
    }

    let mut current = Some(dir.to_path_buf());
    let mut found = None;
    while let Some(candidate) = current {
        if candidate.join(".git").exists() {
            found = Some(candidate);
            break;
        }
        current = candidate.parent().map(Path::to_path_buf);
    }

    cache
        .lock()
        .unwrap()
        .insert(dir.to_path_buf(), found.clone());
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_dir_nests_under_system_dir() {
        let dir = agent_dir("abc-123");
        assert!(dir.ends_with(".steward/agents/abc-123") || dir.ends_with("agents/abc-123"));
    }

    #[test]
    fn guard_restores_on_drop() {
        let original = std::env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        {
            let _guard = WorkingDirGuard::enter(tmp.path()).unwrap();
            let inside = std::env::current_dir().unwrap();
            assert_eq!(
                inside.canonicalize().unwrap(),
                tmp.path().canonicalize().unwrap()
            );
        }
        assert_eq!(std::env::current_dir().unwrap(), original);
    }

    #[test]
    fn git_root_finds_marker_and_caches() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        let nested = repo.join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir(repo.join(".git")).unwrap();

        assert_eq!(git_root(&nested), Some(repo.clone()));
        // Second call hits the cache; result must be stable.
        assert_eq!(git_root(&nested), Some(repo));
    }
}
