//! Filesystem-backed collaborators for a checked-out repository

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::diff::{enclosing_declaration, parse_hunks, unified_diff};
use super::{
    ChangeSet, DocLocator, FileChange, FileStore, SourceControl, ToolError, ToolErrorKind,
    ToolResult,
};

/// Directories never listed
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", "__pycache__", ".venv"];

/// Extensions treated as documentation
const DOC_EXTENSIONS: &[&str] = &["md", "rst", "txt"];

/// Resolve a repository-relative path, refusing to leave the root
fn resolve(root: &Path, relative: &str) -> ToolResult<PathBuf> {
    let relative = Path::new(relative);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || relative.as_os_str().is_empty() {
        return Err(ToolError::invalid_params(format!(
            "path must stay inside the repository: {}",
            relative.display()
        )));
    }
    Ok(root.join(relative))
}

async fn read_text(root: &Path, relative: &str) -> ToolResult<String> {
    let path = resolve(root, relative)?;
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ToolError::not_found(format!("no such file: {}", relative)))
        }
        Err(e) => Err(ToolError::execution(format!(
            "failed to read {}: {}",
            relative, e
        ))),
    }
}

/// Every file below `root`, as sorted `/`-separated relative paths
async fn walk(root: &Path) -> ToolResult<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            ToolError::execution(format!("failed to list {}: {}", dir.display(), e))
        })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ToolError::execution(e.to_string()))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ToolError::execution(e.to_string()))?;
            if file_type.is_dir() {
                let name = entry.file_name();
                if !SKIPPED_DIRS.contains(&name.to_string_lossy().as_ref()) {
                    pending.push(path);
                }
            } else if file_type.is_file() {
                if let Ok(relative) = path.strip_prefix(root) {
                    let parts: Vec<String> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    files.push(parts.join("/"));
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Compares files of a working tree
#[derive(Debug, Clone)]
pub struct LocalSourceControl {
    root: PathBuf,
}

impl LocalSourceControl {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SourceControl for LocalSourceControl {
    async fn pull_request_changes(&self, repo: &str, pr: u64) -> ToolResult<ChangeSet> {
        Err(ToolError::new(
            ToolErrorKind::Unsupported,
            format!("pull request {}#{} needs a hosted backend", repo, pr),
        ))
    }

    async fn compare(&self, old: &str, new: &str) -> ToolResult<ChangeSet> {
        let old_text = read_text(&self.root, old).await?;
        let new_text = read_text(&self.root, new).await?;

        let patch = unified_diff(&old_text, &new_text, old, new);
        let old_lines: Vec<&str> = old_text.lines().collect();
        let mut hunks = parse_hunks(&patch);
        for hunk in &mut hunks {
            if hunk.header.is_empty() && hunk.old_start > 0 {
                let index = hunk.old_start as usize - 1;
                if let Some(declaration) = enclosing_declaration(&old_lines, index) {
                    hunk.header = declaration.to_string();
                }
            }
        }
        debug!(old, new, hunks = hunks.len(), "Compared files");

        let status = if hunks.is_empty() {
            "unchanged"
        } else {
            "modified"
        };
        Ok(ChangeSet {
            files: vec![FileChange {
                path: new.to_string(),
                status: status.to_string(),
                hunks,
            }],
            ..ChangeSet::default()
        })
    }
}

/// Lists and reads files of a working tree
///
/// The tree is a single checkout, so `repo` and `branch` are ignored.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn list_files(&self, _repo: &str, _branch: &str) -> ToolResult<Vec<String>> {
        walk(&self.root).await
    }

    async fn read_file(&self, _repo: &str, _branch: &str, path: &str) -> ToolResult<String> {
        read_text(&self.root, path).await
    }
}

/// Finds documentation mentioning changed files
#[derive(Debug, Clone)]
pub struct LocalDocLocator {
    root: PathBuf,
}

impl LocalDocLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn is_doc(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| DOC_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn stem(path: &str) -> Option<&str> {
    Path::new(path).file_stem().and_then(|s| s.to_str())
}

#[async_trait]
impl DocLocator for LocalDocLocator {
    async fn locate(
        &self,
        _repo: &str,
        _branch: &str,
        changed: &[String],
    ) -> ToolResult<Vec<String>> {
        let stems: Vec<&str> = changed.iter().filter_map(|p| stem(p)).collect();
        let mut found = BTreeSet::new();
        let mut readme = None;

        for doc in walk(&self.root).await?.into_iter().filter(|p| is_doc(p)) {
            if stem(&doc).is_some_and(|s| s.eq_ignore_ascii_case("readme")) && readme.is_none() {
                readme = Some(doc.clone());
            }
            let Ok(content) = read_text(&self.root, &doc).await else {
                continue;
            };
            if stems.iter().any(|s| content.contains(s)) {
                found.insert(doc);
            }
        }

        if found.is_empty() {
            found.extend(readme);
        }
        Ok(found.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(dir.path().join("README.md"), "# Calculator").unwrap();
        fs::write(
            dir.path().join("docs/usage.md"),
            "Call `calculator.add` to add numbers.",
        )
        .unwrap();
        fs::write(
            dir.path().join("src/calculator.py"),
            "def add(a, b):\n    return a + b\n\n\ndef multiply(a, b):\n    x = 1\n    return a * b\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("src/calculator_v2.py"),
            "def add(a, b):\n    return a + b\n\n\ndef multiply(a, b):\n    x = 1\n    return b * a\n",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_list_files_skips_git() {
        let dir = repo();
        let files = LocalFileStore::new(dir.path())
            .list_files("any", "main")
            .await
            .unwrap();
        assert_eq!(
            files,
            vec![
                "README.md",
                "docs/usage.md",
                "src/calculator.py",
                "src/calculator_v2.py"
            ]
        );
    }

    #[tokio::test]
    async fn test_read_file_errors() {
        let dir = repo();
        let store = LocalFileStore::new(dir.path());
        let missing = store.read_file("r", "main", "nope.py").await.unwrap_err();
        assert_eq!(missing.kind, ToolErrorKind::NotFound);

        let escape = store.read_file("r", "main", "../etc/passwd").await.unwrap_err();
        assert_eq!(escape.kind, ToolErrorKind::InvalidParams);
    }

    #[tokio::test]
    async fn test_compare_names_enclosing_function() {
        let dir = repo();
        let changes = LocalSourceControl::new(dir.path())
            .compare("src/calculator.py", "src/calculator_v2.py")
            .await
            .unwrap();
        let file = &changes.files[0];
        assert_eq!(file.status, "modified");
        assert_eq!(file.hunks.len(), 1);

        let changed = crate::tools::diff::changed_functions(&file.hunks);
        assert!(changed.contains("multiply"));
        assert!(!changed.contains("add"));
    }

    #[tokio::test]
    async fn test_compare_finds_function_declared_above_the_hunk() {
        let dir = TempDir::new().unwrap();
        let body = |last: &str| {
            format!(
                "def multiply(a, b):\n    x = 1\n    y = 2\n    z = 3\n    w = 4\n    v = 5\n    {}\n",
                last
            )
        };
        fs::write(dir.path().join("old.py"), body("return a * b")).unwrap();
        fs::write(dir.path().join("new.py"), body("return b * a")).unwrap();

        let changes = LocalSourceControl::new(dir.path())
            .compare("old.py", "new.py")
            .await
            .unwrap();
        let hunks = &changes.files[0].hunks;
        assert_eq!(hunks[0].header, "def multiply(a, b):");
        let changed = crate::tools::diff::changed_functions(hunks);
        assert!(changed.contains("multiply"), "changed: {:?}", changed);
    }

    #[tokio::test]
    async fn test_pull_requests_unsupported_locally() {
        let dir = repo();
        let err = LocalSourceControl::new(dir.path())
            .pull_request_changes("o/r", 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_locate_docs_by_mention() {
        let dir = repo();
        let docs = LocalDocLocator::new(dir.path())
            .locate("r", "main", &["src/calculator.py".to_string()])
            .await
            .unwrap();
        assert_eq!(docs, vec!["docs/usage.md"]);
    }

    #[tokio::test]
    async fn test_locate_docs_falls_back_to_readme() {
        let dir = repo();
        let docs = LocalDocLocator::new(dir.path())
            .locate("r", "main", &["src/unrelated.py".to_string()])
            .await
            .unwrap();
        assert_eq!(docs, vec!["README.md"]);
    }
}
