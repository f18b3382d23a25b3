//! Typed requests and reports exchanged between roles
//!
//! Every type travels as a [`Structured`] payload tagged with its `KIND`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::broker::{Payload, Structured};
use crate::tools::{TestCaseResult, TestStatus};
use crate::{Error, Result};

/// A request or report with a fixed kind tag
pub trait TypedPayload: Serialize + DeserializeOwned {
    const KIND: &'static str;

    /// One-line plain-text rendering
    fn summary(&self) -> String;

    fn to_request(&self) -> Result<Payload> {
        Ok(Payload::Request(Structured::encode(
            Self::KIND,
            self.summary(),
            self,
        )?))
    }

    fn to_result(&self) -> Result<Payload> {
        Ok(Payload::Result(Structured::encode(
            Self::KIND,
            self.summary(),
            self,
        )?))
    }

    fn from_payload(payload: &Payload) -> Result<Self> {
        match payload {
            Payload::Request(s) | Payload::Result(s) => s.decode(Self::KIND),
            Payload::Text(text) => Err(Error::Workflow(format!(
                "Expected '{}' payload, got text: {}",
                Self::KIND,
                text
            ))),
        }
    }
}

/// Error message carried by an error reply, if the payload is one
pub fn error_reply(payload: &Payload) -> Option<String> {
    match payload {
        Payload::Result(s) if s.kind == ErrorReport::KIND => ErrorReport::from_payload(payload)
            .map(|r| r.message)
            .ok()
            .or_else(|| Some(s.summary.clone())),
        _ => None,
    }
}

/// Reply sent when a role fails to handle a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Kind of the request that failed
    pub request: Option<String>,
    pub message: String,
}

impl TypedPayload for ErrorReport {
    const KIND: &'static str = "error";

    fn summary(&self) -> String {
        format!("error: {}", self.message)
    }
}

/// Ask the diff reviewer for the changes of a PR or of two local files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DiffRequest {
    PullRequest { repo: String, pr: u64 },
    Files { old: String, new: String },
}

impl TypedPayload for DiffRequest {
    const KIND: &'static str = "diff_request";

    fn summary(&self) -> String {
        match self {
            DiffRequest::PullRequest { repo, pr } => format!("review diff of {}#{}", repo, pr),
            DiffRequest::Files { old, new } => format!("review diff of {} against {}", new, old),
        }
    }
}

/// Changed functions of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub status: String,
    pub functions: Vec<String>,
}

/// Diff reviewer's answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub repo: Option<String>,
    pub pr: Option<u64>,
    pub branch: Option<String>,
    pub files: Vec<FileDiff>,
    /// Union of the functions of all files, sorted
    pub changed_functions: Vec<String>,
    /// Conventional test names for the changed functions
    pub suggested_tests: Vec<String>,
}

impl DiffReport {
    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

impl TypedPayload for DiffReport {
    const KIND: &'static str = "diff_report";

    fn summary(&self) -> String {
        format!(
            "{} file(s) changed, functions: {}",
            self.files.len(),
            if self.changed_functions.is_empty() {
                "none".to_string()
            } else {
                self.changed_functions.join(", ")
            }
        )
    }
}

/// Ask the test runner to run the tests of the changed functions
///
/// With `repo` and `pr` set the tests run in a checkout of the PR head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunRequest {
    pub changed_functions: Vec<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub pr: Option<u64>,
}

impl TypedPayload for TestRunRequest {
    const KIND: &'static str = "test_run_request";

    fn summary(&self) -> String {
        format!("run tests for: {}", self.changed_functions.join(", "))
    }
}

/// Per-test outcome of a test run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    /// Every known test, executed or skipped
    pub results: Vec<TestCaseResult>,
    /// Problems that kept tests from running normally
    pub notes: Vec<String>,
    /// Tail of the captured runner output
    #[serde(default)]
    pub output: String,
    /// Checkout the tests ran in, `<branch>@<commit>`
    #[serde(default)]
    pub checkout: Option<String>,
    pub duration_ms: u64,
}

impl TestReport {
    pub fn with_status(&self, status: TestStatus) -> Vec<&TestCaseResult> {
        self.results.iter().filter(|r| r.status == status).collect()
    }
}

impl TypedPayload for TestReport {
    const KIND: &'static str = "test_report";

    fn summary(&self) -> String {
        format!(
            "{} passed, {} failed, {} skipped",
            self.with_status(TestStatus::Passed).len(),
            self.with_status(TestStatus::Failed).len(),
            self.with_status(TestStatus::Skipped).len()
        )
    }
}

/// Ask the doc checker which docs describe the changed code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocCheckRequest {
    pub repo: String,
    pub branch: String,
    pub paths: Vec<String>,
    #[serde(default)]
    pub functions: Vec<String>,
}

impl TypedPayload for DocCheckRequest {
    const KIND: &'static str = "doc_check_request";

    fn summary(&self) -> String {
        format!("check docs for {} changed file(s)", self.paths.len())
    }
}

/// A document that mentions changed code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocFinding {
    pub path: String,
    /// Changed files or functions the document mentions
    pub mentions: Vec<String>,
}

/// Doc checker's answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocReport {
    /// Documents that likely need an update
    pub findings: Vec<DocFinding>,
    /// Candidate documents that mention nothing changed
    pub unaffected: Vec<String>,
    pub notes: Vec<String>,
}

impl TypedPayload for DocReport {
    const KIND: &'static str = "doc_report";

    fn summary(&self) -> String {
        if self.findings.is_empty() {
            "no documentation needs review".to_string()
        } else {
            let paths: Vec<&str> = self.findings.iter().map(|f| f.path.as_str()).collect();
            format!("review documentation: {}", paths.join(", "))
        }
    }
}

/// Ask the repo summarizer for an overview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub repo: String,
    pub branch: String,
}

impl TypedPayload for SummaryRequest {
    const KIND: &'static str = "summary_request";

    fn summary(&self) -> String {
        format!("summarize {}@{}", self.repo, self.branch)
    }
}

/// Repo summarizer's answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub repo: String,
    pub branch: String,
    pub files_total: usize,
    pub files_read: Vec<String>,
    pub unreadable: Vec<String>,
    /// Number of observations folded into the digest
    pub folded: usize,
    pub summary: String,
}

impl TypedPayload for SummaryReport {
    const KIND: &'static str = "summary_report";

    fn summary(&self) -> String {
        format!(
            "read {} of {} file(s) in {}",
            self.files_read.len(),
            self.files_total,
            self.repo
        )
    }
}

/// Ask the test advisor which tests a PR is missing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdviceRequest {
    pub repo: String,
    pub pr: u64,
    /// Diff reviewer to ask; the advisor's default when unset
    #[serde(default)]
    pub diff_reviewer: Option<AgentId>,
}

impl TypedPayload for AdviceRequest {
    const KIND: &'static str = "advice_request";

    fn summary(&self) -> String {
        format!("advise unit tests for {}#{}", self.repo, self.pr)
    }
}

/// Test advice for one changed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAdvice {
    pub path: String,
    /// Changed functions that already have a test
    pub covered: Vec<String>,
    /// Suggested names of missing tests
    pub missing: Vec<String>,
}

/// Test advisor's answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdviceReport {
    pub files: Vec<FileAdvice>,
    /// Set when the advice is incomplete
    pub notice: Option<String>,
}

impl TypedPayload for AdviceReport {
    const KIND: &'static str = "advice_report";

    fn summary(&self) -> String {
        if let Some(notice) = &self.notice {
            return notice.clone();
        }
        let missing: usize = self.files.iter().map(|f| f.missing.len()).sum();
        format!(
            "{} missing test(s) across {} file(s)",
            missing,
            self.files.len()
        )
    }
}

/// Outcome of a collaborator step in a final report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    pub agent: AgentId,
    pub summary: String,
}

/// Interface's aggregated report of one instruction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    pub title: String,
    pub sections: Vec<ReportSection>,
    /// Supporting lines, e.g. per-file advice
    pub details: Vec<String>,
    /// Collaborators that never answered
    pub unresponsive: Vec<AgentId>,
    /// Failed items, one line each
    pub failures: Vec<String>,
    /// Skipped items, one line each
    pub skipped: Vec<String>,
}

impl FinalReport {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Whether every collaborator answered and nothing failed
    pub fn is_clean(&self) -> bool {
        self.unresponsive.is_empty() && self.failures.is_empty()
    }

    /// Multi-line plain-text rendering
    pub fn render(&self) -> String {
        let mut out = format!("# {}\n", self.title);
        for section in &self.sections {
            out.push_str(&format!("\n[{}] {}", section.agent, section.summary));
        }
        if !self.details.is_empty() {
            out.push('\n');
            for line in &self.details {
                out.push_str(&format!("\n{}", line));
            }
        }
        if !self.unresponsive.is_empty() {
            let ids: Vec<&str> = self.unresponsive.iter().map(AgentId::as_str).collect();
            out.push_str(&format!("\n\nNo response from: {}", ids.join(", ")));
        }
        if !self.failures.is_empty() {
            out.push_str("\n\nFailures:");
            for failure in &self.failures {
                out.push_str(&format!("\n- {}", failure));
            }
        }
        if !self.skipped.is_empty() {
            out.push_str("\n\nSkipped:");
            for skipped in &self.skipped {
                out.push_str(&format!("\n- {}", skipped));
            }
        }
        out
    }
}

impl TypedPayload for FinalReport {
    const KIND: &'static str = "final_report";

    fn summary(&self) -> String {
        self.render()
    }
}
