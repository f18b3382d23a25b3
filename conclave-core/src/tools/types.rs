//! Tool result envelope and collaborator data types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result type of a tool collaborator
pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Category of a tool failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// No tool, file, PR or test by that name
    NotFound,
    /// Parameters did not match the tool's schema
    InvalidParams,
    /// The tool ran and failed (crash, non-zero exit without results)
    Execution,
    /// Backend unreachable or rate limited
    Unavailable,
    /// The tool did not finish in time
    Timeout,
    /// The backend does not support this operation
    Unsupported,
}

/// A typed tool failure
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidParams, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Execution, message)
    }

    /// Whether the orchestrator may reasonably try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ToolErrorKind::Unavailable | ToolErrorKind::Timeout
        )
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::invalid_params(err.to_string())
    }
}

/// Outcome of a gateway call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(Value),
    Failed(ToolError),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }

    pub fn into_result(self) -> ToolResult<Value> {
        match self {
            ToolOutcome::Success(v) => Ok(v),
            ToolOutcome::Failed(e) => Err(e),
        }
    }
}

impl From<ToolResult<Value>> for ToolOutcome {
    fn from(result: ToolResult<Value>) -> Self {
        match result {
            Ok(v) => ToolOutcome::Success(v),
            Err(e) => ToolOutcome::Failed(e),
        }
    }
}

/// One hunk of a unified diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    /// Section heading after the `@@` range, usually the enclosing function
    pub header: String,
    /// Body lines including their ` `, `+` or `-` prefix
    pub lines: Vec<String>,
}

/// A changed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    /// added, modified, removed, renamed
    pub status: String,
    pub hunks: Vec<Hunk>,
}

/// The files a change touches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub repo: Option<String>,
    pub pr: Option<u64>,
    /// Head branch of the change, if any
    pub branch: Option<String>,
    pub files: Vec<FileChange>,
}

impl ChangeSet {
    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

/// A pull request checked out in a local clone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    /// Absolute path of the working tree
    pub path: String,
    /// Local branch holding the PR head, `pr-<number>`
    pub branch: String,
    /// Commit the working tree is at
    pub commit: String,
}

/// Status of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

/// Result of a single test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub id: String,
    pub status: TestStatus,
    /// Note from the runner, e.g. why it was skipped
    #[serde(default)]
    pub note: Option<String>,
}

/// Results of one test execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    pub results: Vec<TestCaseResult>,
    /// Captured runner output
    pub output: String,
    pub duration_ms: u64,
}

impl TestRun {
    pub fn count(&self, status: TestStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ToolError::new(ToolErrorKind::Unavailable, "rate limited").is_retryable());
        assert!(!ToolError::execution("crash").is_retryable());
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: ToolOutcome = Ok(serde_json::json!(1)).into();
        assert!(ok.is_success());

        let failed: ToolOutcome = Err(ToolError::not_found("nope")).into();
        assert_eq!(
            failed.into_result().unwrap_err().kind,
            ToolErrorKind::NotFound
        );
    }

    #[test]
    fn test_run_counts() {
        let run = TestRun {
            results: vec![
                TestCaseResult {
                    id: "a".into(),
                    status: TestStatus::Passed,
                    note: None,
                },
                TestCaseResult {
                    id: "b".into(),
                    status: TestStatus::Failed,
                    note: None,
                },
            ],
            ..TestRun::default()
        };
        assert_eq!(run.count(TestStatus::Passed), 1);
        assert_eq!(run.count(TestStatus::Skipped), 0);
    }
}
