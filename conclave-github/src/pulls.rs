//! Pull request changes from the GitHub REST API

use async_trait::async_trait;
use conclave_core::tools::diff::parse_hunks;
use conclave_core::tools::{ChangeSet, FileChange, SourceControl, ToolResult};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{parse_github_url, Error, GitHubClient, Result};

/// Files GitHub returns per page of `pulls/{n}/files`
const PAGE_SIZE: usize = 100;

/// GitHub stops listing pull request files after this many pages
const MAX_PAGES: usize = 30;

/// One entry of `GET /repos/{owner}/{repo}/pulls/{number}/files`
#[derive(Debug, Clone, Deserialize)]
struct PullFile {
    filename: String,
    status: String,
    /// Absent for binary files and very large diffs
    #[serde(default)]
    patch: Option<String>,
}

impl From<PullFile> for FileChange {
    fn from(file: PullFile) -> Self {
        FileChange {
            hunks: file.patch.as_deref().map(parse_hunks).unwrap_or_default(),
            path: file.filename,
            status: file.status,
        }
    }
}

/// Source control backed by GitHub pull requests
#[derive(Debug, Clone)]
pub struct GitHubSourceControl {
    github: GitHubClient,
}

impl GitHubSourceControl {
    pub fn new(github: GitHubClient) -> Self {
        Self { github }
    }

    async fn changes(&self, repo: &str, pr: u64) -> Result<ChangeSet> {
        let (owner, name) = parse_github_url(repo)?;
        let label = format!("{}/{}#{}", owner, name, pr);
        debug!(pr = %label, "Fetching pull request");

        let pull = self
            .github
            .client()
            .pulls(&owner, &name)
            .get(pr)
            .await
            .map_err(|e| match Error::from_octocrab(e, &label) {
                Error::NotFound(_) => Error::PrNotFound(label.clone()),
                other => other,
            })?;

        let mut files = Vec::new();
        for page in 1..=MAX_PAGES {
            let route = format!(
                "/repos/{}/{}/pulls/{}/files?per_page={}&page={}",
                owner, name, pr, PAGE_SIZE, page
            );
            let batch: Vec<PullFile> = self
                .github
                .client()
                .get(route, None::<&()>)
                .await
                .map_err(|e| Error::from_octocrab(e, &label))?;
            let last = batch.len() < PAGE_SIZE;
            files.extend(batch.into_iter().map(FileChange::from));
            if last {
                break;
            }
            if page == MAX_PAGES {
                warn!(pr = %label, files = files.len(), "Pull request file list truncated");
            }
        }

        info!(pr = %label, files = files.len(), "Fetched pull request changes");
        Ok(ChangeSet {
            repo: Some(format!("{}/{}", owner, name)),
            pr: Some(pr),
            branch: Some(pull.head.ref_field),
            files,
        })
    }
}

#[async_trait]
impl SourceControl for GitHubSourceControl {
    async fn pull_request_changes(&self, repo: &str, pr: u64) -> ToolResult<ChangeSet> {
        Ok(self.changes(repo, pr).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_file_into_change() {
        let json = r#"[
            {"filename": "calc.py", "status": "modified", "additions": 1, "deletions": 1,
             "patch": "@@ -1,2 +1,2 @@ def add(a, b):\n-    return a + b\n+    return b + a"},
            {"filename": "logo.png", "status": "added"}
        ]"#;
        let files: Vec<PullFile> = serde_json::from_str(json).unwrap();
        let changes: Vec<FileChange> = files.into_iter().map(FileChange::from).collect();

        assert_eq!(changes[0].path, "calc.py");
        assert_eq!(changes[0].hunks.len(), 1);
        assert_eq!(changes[0].hunks[0].header, "def add(a, b):");
        assert!(changes[1].hunks.is_empty());
        assert_eq!(changes[1].status, "added");
    }
}
