//! Tools agents invoke through the gateway
//!
//! External capabilities are described by collaborator traits
//! ([`SourceControl`], [`FileStore`], [`TestExecutor`], [`DocLocator`],
//! [`RepoCheckout`]).
//! Adapters in [`adapters`] expose them as uniform JSON [`Tool`]s that the
//! [`ToolGateway`] dispatches by name.

pub mod adapters;
pub mod checkout;
pub mod diff;
mod gateway;
pub mod local;
pub mod test_exec;
mod types;

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

pub use gateway::{CallStatus, ToolCall, ToolGateway};
pub use types::{
    ChangeSet, Checkout, FileChange, Hunk, TestCaseResult, TestRun, TestStatus, ToolError, ToolErrorKind,
    ToolOutcome, ToolResult,
};

/// Well-known tool names
pub mod names {
    pub const GET_PR_CHANGES: &str = "get_pr_changes";
    pub const COMPARE_FILES: &str = "compare_files";
    pub const LIST_FILES: &str = "list_files";
    pub const READ_FILE: &str = "read_file";
    pub const LIST_TESTS: &str = "list_tests";
    pub const RUN_TESTS: &str = "run_tests";
    pub const LOCATE_DOCS: &str = "locate_docs";
    pub const CHECKOUT_PR: &str = "checkout_pr";
}

/// A named tool taking and returning JSON
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, params: Value) -> ToolResult<Value>;
}

/// Source-control collaborator
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Changed files of a pull request, with parsed hunks
    async fn pull_request_changes(&self, repo: &str, pr: u64) -> ToolResult<ChangeSet>;

    /// Diff of two files known to the backend
    async fn compare(&self, old: &str, new: &str) -> ToolResult<ChangeSet> {
        let _ = (old, new);
        Err(ToolError::new(
            ToolErrorKind::Unsupported,
            "this source-control backend cannot compare arbitrary files",
        ))
    }
}

/// File listing and content collaborator
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Flat list of file paths in a branch
    async fn list_files(&self, repo: &str, branch: &str) -> ToolResult<Vec<String>>;

    /// Decoded content of one file
    async fn read_file(&self, repo: &str, branch: &str, path: &str) -> ToolResult<String>;
}

/// Test-execution collaborator
///
/// `workdir` selects another working tree, such as a PR checkout; `None`
/// uses the executor's own.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Identifiers of all known tests
    async fn discover(&self, workdir: Option<&Path>) -> ToolResult<Vec<String>>;

    /// Execute the given tests
    async fn run(&self, tests: &[String], workdir: Option<&Path>) -> ToolResult<TestRun>;
}

/// Documentation-location collaborator
#[async_trait]
pub trait DocLocator: Send + Sync {
    /// Documentation files plausibly describing the changed paths
    async fn locate(&self, repo: &str, branch: &str, changed: &[String]) -> ToolResult<Vec<String>>;
}

/// Pull request checkout collaborator
#[async_trait]
pub trait RepoCheckout: Send + Sync {
    /// Check out the head of a pull request locally
    async fn checkout_pr(&self, repo: &str, pr: u64) -> ToolResult<Checkout>;
}
