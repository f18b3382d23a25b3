//! Pull request checkouts in a local clone cache
//!
//! Each repository is cloned once under the cache directory. Checking out
//! a PR fetches `refs/pull/<n>/head` into a local `pr-<n>` branch and moves
//! the working tree there, replacing any earlier checkout of that branch.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use git2::build::CheckoutBuilder;
use git2::{ErrorClass, ErrorCode, FetchOptions, RemoteCallbacks, Repository};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Checkout, RepoCheckout, ToolError, ToolErrorKind, ToolResult};
use crate::config::CheckoutConfig;

/// Clones repositories and checks out pull request heads with git2
#[derive(Debug)]
pub struct GitCheckout {
    cache_dir: PathBuf,
    remote_base: String,
    /// Serializes checkouts; they share working trees
    lock: Mutex<()>,
}

impl GitCheckout {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            remote_base: CheckoutConfig::default().remote_base,
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &CheckoutConfig) -> crate::Result<Self> {
        Ok(Self::new(config.cache_dir()?).with_remote_base(config.remote_base.clone()))
    }

    /// Clone from `<base>/<owner>/<repo>` instead of GitHub
    pub fn with_remote_base(mut self, base: impl Into<String>) -> Self {
        self.remote_base = base.into();
        self
    }

    fn clone_url(&self, owner: &str, name: &str) -> String {
        format!("{}/{}/{}", self.remote_base.trim_end_matches('/'), owner, name)
    }
}

/// Split `owner/repo`, refusing anything that would leave the cache
fn split_repo(repo: &str) -> ToolResult<(&str, &str)> {
    let invalid = || ToolError::invalid_params(format!("expected owner/repo, got '{}'", repo));
    let (owner, name) = repo.split_once('/').ok_or_else(invalid)?;
    let name = name.trim_end_matches(".git");
    let safe = |part: &str| {
        !part.is_empty()
            && !part.contains('/')
            && matches!(
                Path::new(part).components().next(),
                Some(Component::Normal(_))
            )
    };
    if safe(owner) && safe(name) {
        Ok((owner, name))
    } else {
        Err(invalid())
    }
}

fn git_error(err: git2::Error, what: &str) -> ToolError {
    let kind = match (err.code(), err.class()) {
        (ErrorCode::NotFound, _) => ToolErrorKind::NotFound,
        (ErrorCode::Auth, _) | (_, ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh) => {
            ToolErrorKind::Unavailable
        }
        _ => ToolErrorKind::Execution,
    };
    ToolError::new(kind, format!("{}: {}", what, err.message()))
}

fn open_or_clone(path: &Path, url: &str) -> ToolResult<Repository> {
    if path.join(".git").exists() {
        debug!(path = %path.display(), "Reusing cached clone");
        return Repository::open(path).map_err(|e| git_error(e, "failed to open clone"));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ToolError::execution(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }
    info!(url, path = %path.display(), "Cloning repository");
    Repository::clone(url, path).map_err(|e| git_error(e, &format!("failed to clone {}", url)))
}

fn checkout_blocking(path: &Path, url: &str, pr: u64) -> ToolResult<Checkout> {
    let repo = open_or_clone(path, url)?;
    let branch = format!("pr-{}", pr);
    let local_ref = format!("refs/heads/{}", branch);

    // git refuses to update the checked-out branch, so detach and drop it
    if let Some(oid) = repo.head().ok().and_then(|head| head.target()) {
        repo.set_head_detached(oid)
            .map_err(|e| git_error(e, "failed to detach HEAD"))?;
    }
    if let Ok(mut stale) = repo.find_reference(&local_ref) {
        stale
            .delete()
            .map_err(|e| git_error(e, &format!("failed to delete {}", branch)))?;
    }

    let mut remote = repo
        .find_remote("origin")
        .map_err(|e| git_error(e, "remote 'origin' not found"))?;
    let mut callbacks = RemoteCallbacks::new();
    callbacks.transfer_progress(|_| true);
    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    let refspec = format!("+refs/pull/{}/head:{}", pr, local_ref);
    remote
        .fetch(&[refspec.as_str()], Some(&mut options), None)
        .map_err(|e| git_error(e, &format!("failed to fetch pull request #{}", pr)))?;

    let reference = repo.find_reference(&local_ref).map_err(|_| {
        ToolError::not_found(format!("pull request #{} not found at {}", pr, url))
    })?;
    let commit = reference
        .peel_to_commit()
        .map_err(|e| git_error(e, "PR head is not a commit"))?;
    repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))
        .map_err(|e| git_error(e, "failed to check out PR head"))?;
    repo.set_head(&local_ref)
        .map_err(|e| git_error(e, "failed to move HEAD"))?;

    Ok(Checkout {
        path: path.display().to_string(),
        branch,
        commit: commit.id().to_string(),
    })
}

#[async_trait]
impl RepoCheckout for GitCheckout {
    async fn checkout_pr(&self, repo: &str, pr: u64) -> ToolResult<Checkout> {
        let (owner, name) = split_repo(repo)?;
        let path = self.cache_dir.join(owner).join(name);
        let url = self.clone_url(owner, name);

        let _guard = self.lock.lock().await;
        let checkout = tokio::task::spawn_blocking(move || checkout_blocking(&path, &url, pr))
            .await
            .map_err(|e| ToolError::execution(format!("checkout task failed: {}", e)))??;
        info!(repo, pr, path = %checkout.path, commit = %checkout.commit, "Checked out pull request");
        Ok(checkout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Commit, Oid, Signature};
    use std::fs;
    use tempfile::TempDir;

    fn commit_file(
        repo: &Repository,
        content: &str,
        update_ref: &str,
        parents: &[&Commit<'_>],
    ) -> Oid {
        let workdir = repo.workdir().unwrap();
        fs::write(workdir.join("calc.py"), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("calc.py")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        repo.commit(Some(update_ref), &sig, &sig, "change calc", &tree, parents)
            .unwrap()
    }

    /// `<root>/upstream/octo/calc` with a main commit and PR #7 on top of it
    fn upstream(root: &Path) -> String {
        let path = root.join("upstream/octo/calc");
        fs::create_dir_all(&path).unwrap();
        let repo = Repository::init(&path).unwrap();
        let base = commit_file(&repo, "def add(a, b):\n    return a + b\n", "HEAD", &[]);
        let base = repo.find_commit(base).unwrap();
        commit_file(
            &repo,
            "def add(a, b):\n    return b + a\n",
            "refs/pull/7/head",
            &[&base],
        );
        repo.checkout_head(Some(CheckoutBuilder::new().force()))
            .unwrap();
        root.join("upstream").display().to_string()
    }

    #[test]
    fn test_split_repo() {
        assert_eq!(split_repo("octo/calc.git").unwrap(), ("octo", "calc"));
        for bad in ["calc", "../calc", "octo/..", "octo/a/b", "/calc"] {
            let err = split_repo(bad).unwrap_err();
            assert_eq!(err.kind, ToolErrorKind::InvalidParams, "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_checkout_pr_head() {
        let dir = TempDir::new().unwrap();
        let base = upstream(dir.path());
        let checkout = GitCheckout::new(dir.path().join("cache")).with_remote_base(base);

        let first = checkout.checkout_pr("octo/calc", 7).await.unwrap();
        assert_eq!(first.branch, "pr-7");
        let content = fs::read_to_string(Path::new(&first.path).join("calc.py")).unwrap();
        assert!(content.contains("return b + a"));

        // the cached clone is reused and the branch replaced
        let second = checkout.checkout_pr("octo/calc", 7).await.unwrap();
        assert_eq!(second.path, first.path);
        assert_eq!(second.commit, first.commit);
    }

    #[tokio::test]
    async fn test_checkout_missing_pr_fails() {
        let dir = TempDir::new().unwrap();
        let base = upstream(dir.path());
        let checkout = GitCheckout::new(dir.path().join("cache")).with_remote_base(base);
        assert!(checkout.checkout_pr("octo/calc", 99).await.is_err());
    }
}
