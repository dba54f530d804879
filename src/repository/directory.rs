//! Problems stored as `<root>/<id>.json`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{ProblemId, ProblemRecord, ProblemRepository, ProblemSummary, RepositoryError};

pub struct DirectoryRepository {
    root: PathBuf,
}

impl DirectoryRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn problem_path(&self, id: &str) -> Option<PathBuf> {
        if !is_safe_id(id) {
            return None;
        }
        Some(self.root.join(format!("{}.json", id)))
    }

    async fn read_record(&self, id: &str, path: &Path) -> Result<ProblemRecord, RepositoryError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepositoryError::NotFound(id.to_string()))
            }
            Err(e) => {
                return Err(RepositoryError::Unavailable(format!(
                    "failed to read {:?}: {}",
                    path, e
                )))
            }
        };

        let mut record: ProblemRecord = serde_json::from_str(&content)
            .map_err(|e| RepositoryError::Malformed(format!("{}: {}", id, e)))?;
        // The file name is the id
        if record.id.is_none() {
            record.id = Some(ProblemId::new(id));
        }
        Ok(record)
    }
}

/// A problem id must name a file directly under the root
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && !id.contains("..")
        && !id.contains('/')
        && !id.contains('\\')
        && !id.contains('\0')
}

#[async_trait]
impl ProblemRepository for DirectoryRepository {
    async fn fetch_problem(&self, id: &str) -> Result<ProblemRecord, RepositoryError> {
        let Some(path) = self.problem_path(id) else {
            warn!("Rejected problem id {:?}", id);
            return Err(RepositoryError::NotFound(id.to_string()));
        };
        debug!("Loading problem from {:?}", path);
        self.read_record(id, &path).await
    }

    async fn list_problems(&self) -> Result<Vec<ProblemSummary>, RepositoryError> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            RepositoryError::Unavailable(format!("failed to read {:?}: {}", self.root, e))
        })?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.fetch_problem(&id).await {
                Ok(record) => {
                    let title = record.title().unwrap_or_else(|| id.clone());
                    summaries.push(ProblemSummary {
                        id: Some(ProblemId::new(id)),
                        title: Some(title),
                    });
                }
                Err(e) => warn!("Skipping problem {}: {}", id, e),
            }
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_problem(dir: &TempDir, id: &str, value: serde_json::Value) {
        std::fs::write(dir.path().join(format!("{}.json", id)), value.to_string()).unwrap();
    }

    fn sample() -> serde_json::Value {
        json!({
            "function": "add",
            "description": "Return a + b",
            "params": ["a", "b"],
            "problem": {"title": "Addition", "example": "add(1, 2) == 3"},
            "tests": [{"input": [2, 3], "expected": 5}]
        })
    }

    #[tokio::test]
    async fn test_fetch_problem() {
        let dir = TempDir::new().unwrap();
        write_problem(&dir, "2024-05-01", sample());
        let repo = DirectoryRepository::new(dir.path());

        let record = repo.fetch_problem("2024-05-01").await.unwrap();
        assert_eq!(record.id, Some(ProblemId::new("2024-05-01")));
        assert_eq!(record.title().as_deref(), Some("Addition"));

        let descriptor = record.descriptor().unwrap();
        assert_eq!(descriptor.target_name, "add");
        assert_eq!(descriptor.cases.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_unsafe_ids() {
        let dir = TempDir::new().unwrap();
        let repo = DirectoryRepository::new(dir.path());

        for id in ["nope", "", "../secret", "a/b", "..", "a\\b"] {
            let err = repo.fetch_problem(id).await.unwrap_err();
            assert!(matches!(err, RepositoryError::NotFound(_)), "{:?}: {}", id, err);
        }
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        let repo = DirectoryRepository::new(dir.path());

        let err = repo.fetch_problem("bad").await.unwrap_err();
        assert!(matches!(err, RepositoryError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_list_problems_sorted_with_title_fallback() {
        let dir = TempDir::new().unwrap();
        write_problem(&dir, "b", sample());
        write_problem(&dir, "a", json!({"function": "f", "tests": []}));
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("broken.json"), "[").unwrap();
        let repo = DirectoryRepository::new(dir.path());

        let list = repo.list_problems().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, Some(ProblemId::new("a")));
        assert_eq!(list[0].title.as_deref(), Some("a"));
        assert_eq!(list[1].title.as_deref(), Some("Addition"));
    }

    #[tokio::test]
    async fn test_list_missing_root_is_unavailable() {
        let repo = DirectoryRepository::new("/nonexistent/problems/dir");
        let err = repo.list_problems().await.unwrap_err();
        assert!(matches!(err, RepositoryError::Unavailable(_)));
    }
}
