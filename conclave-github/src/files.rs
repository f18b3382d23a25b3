//! Repository listing and file contents from the GitHub REST API

use async_trait::async_trait;
use conclave_core::tools::{FileStore, ToolResult};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{parse_github_url, Error, GitHubClient, Result};

/// Response of `GET /repos/{owner}/{repo}/git/trees/{ref}?recursive=1`
#[derive(Debug, Deserialize)]
struct Tree {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl Tree {
    /// Paths of the files (blobs) in the tree, sorted
    fn file_paths(self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| entry.path)
            .collect();
        paths.sort();
        paths
    }
}

/// File store backed by a GitHub repository
#[derive(Debug, Clone)]
pub struct GitHubFileStore {
    github: GitHubClient,
}

impl GitHubFileStore {
    pub fn new(github: GitHubClient) -> Self {
        Self { github }
    }

    async fn tree(&self, repo: &str, branch: &str) -> Result<Vec<String>> {
        let (owner, name) = parse_github_url(repo)?;
        let route = format!("/repos/{}/{}/git/trees/{}?recursive=1", owner, name, branch);
        let tree: Tree = self
            .github
            .client()
            .get(route, None::<&()>)
            .await
            .map_err(|e| Error::from_octocrab(e, &format!("{}/{}@{}", owner, name, branch)))?;

        if tree.truncated {
            warn!(repo = %repo, branch = %branch, "Repository tree truncated by GitHub");
        }
        let paths = tree.file_paths();
        debug!(repo = %repo, branch = %branch, files = paths.len(), "Listed repository files");
        Ok(paths)
    }

    async fn content(&self, repo: &str, branch: &str, path: &str) -> Result<String> {
        let (owner, name) = parse_github_url(repo)?;
        let what = format!("{} in {}/{}@{}", path, owner, name, branch);
        let mut items = self
            .github
            .client()
            .repos(&owner, &name)
            .get_content()
            .path(path)
            .r#ref(branch)
            .send()
            .await
            .map_err(|e| Error::from_octocrab(e, &what))?
            .items;

        // a directory lists its entries; a file comes back alone
        if items.len() != 1 || items[0].r#type != "file" {
            return Err(Error::NotFound(format!("{} (not a file)", what)));
        }
        items
            .remove(0)
            .decoded_content()
            .ok_or_else(|| Error::Other(format!("{} has no decodable content", what)))
    }
}

#[async_trait]
impl FileStore for GitHubFileStore {
    async fn list_files(&self, repo: &str, branch: &str) -> ToolResult<Vec<String>> {
        Ok(self.tree(repo, branch).await?)
    }

    async fn read_file(&self, repo: &str, branch: &str, path: &str) -> ToolResult<String> {
        Ok(self.content(repo, branch, path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_keeps_blobs_only() {
        let json = r#"{
            "sha": "abc",
            "tree": [
                {"path": "src", "mode": "040000", "type": "tree", "sha": "1"},
                {"path": "src/lib.rs", "mode": "100644", "type": "blob", "sha": "2"},
                {"path": "README.md", "mode": "100644", "type": "blob", "sha": "3"},
                {"path": "vendor/dep", "mode": "160000", "type": "commit", "sha": "4"}
            ],
            "truncated": false
        }"#;
        let tree: Tree = serde_json::from_str(json).unwrap();
        assert_eq!(tree.file_paths(), vec!["README.md", "src/lib.rs"]);
    }
}
