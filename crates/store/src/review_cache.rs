//! Per-merge-request fingerprint cache.
//!
//! One document per MR holds the set of fingerprints whose review units came
//! back clean. The backing store has no native set type, so the stored
//! representation is an array; in memory it is a `HashSet`. A missing or
//! malformed document reads as a fresh empty cache, never an error.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use steward_core::agent::now_ms;

/// A source-control project reference: numeric id or path with namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProjectId {
    Id(i64),
    Path(String),
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectId::Id(id) => write!(f, "{id}"),
            ProjectId::Path(p) => f.write_str(p),
        }
    }
}

impl From<i64> for ProjectId {
    fn from(id: i64) -> Self {
        ProjectId::Id(id)
    }
}

impl From<&str> for ProjectId {
    fn from(path: &str) -> Self {
        ProjectId::Path(path.to_string())
    }
}

/// The fingerprints of review units already known clean for one MR.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeRequestFingerprintCache {
    /// Epoch ms of the last write.
    pub last_updated: i64,
    pub fingerprints: HashSet<String>,
}

impl MergeRequestFingerprintCache {
    /// The empty-cache sentinel used for absent or malformed documents.
    pub fn empty() -> Self {
        Self {
            last_updated: 0,
            fingerprints: HashSet::new(),
        }
    }
}

/// Stored shape: fingerprints as a sorted array for a stable representation.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredFingerprintCache {
    pub last_updated: i64,
    pub fingerprints: Vec<String>,
}

impl From<&MergeRequestFingerprintCache> for StoredFingerprintCache {
    fn from(cache: &MergeRequestFingerprintCache) -> Self {
        let mut fingerprints: Vec<String> = cache.fingerprints.iter().cloned().collect();
        fingerprints.sort();
        Self {
            last_updated: cache.last_updated,
            fingerprints,
        }
    }
}

impl From<StoredFingerprintCache> for MergeRequestFingerprintCache {
    fn from(stored: StoredFingerprintCache) -> Self {
        Self {
            last_updated: stored.last_updated,
            fingerprints: stored.fingerprints.into_iter().collect(),
        }
    }
}

/// Parse a stored document leniently: any shape failure yields the empty
/// sentinel.
pub fn parse_stored_cache(raw: &str) -> MergeRequestFingerprintCache {
    match serde_json::from_str::<StoredFingerprintCache>(raw) {
        Ok(stored) => stored.into(),
        Err(e) => {
            tracing::warn!(error = %e, "Malformed fingerprint cache document, starting fresh");
            MergeRequestFingerprintCache::empty()
        }
    }
}

/// Serialize a cache for storage, stamping `last_updated` to now.
pub fn to_stored_cache(cache: &MergeRequestFingerprintCache) -> StoredFingerprintCache {
    let mut stored = StoredFingerprintCache::from(cache);
    stored.last_updated = now_ms();
    stored
}

/// Derive the document id for `(project, mr_iid)`.
///
/// String project ids may contain path separators and punctuation the store
/// cannot accept in ids; anything outside `[A-Za-z0-9_-]` becomes `_`.
/// Numeric ids pass through unchanged.
pub fn cache_doc_id(project: &ProjectId, mr_iid: i64) -> String {
    let safe = match project {
        ProjectId::Id(id) => id.to_string(),
        ProjectId::Path(path) => path
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect(),
    };
    format!("proj_{safe}_mr_{mr_iid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_for_numeric_project() {
        assert_eq!(cache_doc_id(&ProjectId::Id(123), 101), "proj_123_mr_101");
    }

    #[test]
    fn doc_id_sanitizes_path_project() {
        let project = ProjectId::Path("group/project name!".into());
        assert_eq!(cache_doc_id(&project, 101), "proj_group_project_name__mr_101");
    }

    #[test]
    fn stored_roundtrip_preserves_membership() {
        let mut cache = MergeRequestFingerprintCache::empty();
        cache.fingerprints.insert("abc123".into());
        cache.fingerprints.insert("def456".into());

        let raw = serde_json::to_string(&to_stored_cache(&cache)).unwrap();
        let back = parse_stored_cache(&raw);
        assert_eq!(back.fingerprints, cache.fingerprints);
        assert!(back.last_updated > 0);
    }

    #[test]
    fn malformed_document_returns_empty_sentinel() {
        let back = parse_stored_cache(r#"{"last_updated": 5, "fingerprints": "not-an-array"}"#);
        assert_eq!(back, MergeRequestFingerprintCache::empty());

        let back = parse_stored_cache("not json at all");
        assert_eq!(back, MergeRequestFingerprintCache::empty());
    }

    #[test]
    fn stored_fingerprints_are_sorted() {
        let mut cache = MergeRequestFingerprintCache::empty();
        cache.fingerprints.insert("zzz".into());
        cache.fingerprints.insert("aaa".into());
        let stored = StoredFingerprintCache::from(&cache);
        assert_eq!(stored.fingerprints, vec!["aaa".to_string(), "zzz".to_string()]);
    }
}
