//! Test advisor: suggests the unit tests a pull request is missing
//!
//! The advisor asks the diff reviewer for the PR's changed functions, then
//! reviews each changed file against the tests already in the repository.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::{AgentId, AgentRole};
use crate::broker::{Message, Payload};
use crate::tools::adapters::{ListFilesParams, ReadFileParams};
use crate::tools::diff::{function_name, test_name_for, test_targets};
use crate::tools::names;
use crate::workflow::context::AgentContext;
use crate::workflow::requests::{
    error_reply, AdviceReport, AdviceRequest, DiffReport, DiffRequest, FileAdvice, TypedPayload,
};
use crate::workflow::runner::RoleHandler;
use crate::workflow::state::{StateMachine, Workflow};
use crate::Result;

/// Phases of the test advisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AdvisorPhase {
    #[default]
    Idle,
    AwaitingDiff,
    DiffReceived,
    PerFileReview,
    Aggregating,
    Reporting,
}

impl AdvisorPhase {
    pub fn description(&self) -> &'static str {
        match self {
            AdvisorPhase::Idle => "Idle",
            AdvisorPhase::AwaitingDiff => "Waiting for the PR diff",
            AdvisorPhase::DiffReceived => "Diff received",
            AdvisorPhase::PerFileReview => "Reviewing changed files against existing tests",
            AdvisorPhase::Aggregating => "Aggregating advice",
            AdvisorPhase::Reporting => "Reporting advice",
        }
    }
}

impl std::fmt::Display for AdvisorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Whether a path looks like a test file
pub fn is_test_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.starts_with("test_")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
        || path.split('/').any(|dir| dir == "tests" || dir == "test")
}

/// Names of the test functions declared in a file
fn declared_tests(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .filter_map(function_name)
        .filter(|name| name.to_ascii_lowercase().starts_with("test"))
}

/// Split each file's changed functions into covered and missing tests
pub fn advise(diff: &DiffReport, existing_tests: &BTreeSet<String>) -> Vec<FileAdvice> {
    diff.files
        .iter()
        .filter(|file| !file.functions.is_empty() && !is_test_file(&file.path))
        .map(|file| {
            let (covered, uncovered): (Vec<String>, Vec<String>) =
                file.functions.iter().cloned().partition(|f| {
                    existing_tests.iter().any(|test| test_targets(test, f))
                });
            FileAdvice {
                path: file.path.clone(),
                covered,
                missing: uncovered.iter().map(|f| test_name_for(f)).collect(),
            }
        })
        .collect()
}

/// The test advisor role
#[derive(Debug)]
pub struct TestAdvisor {
    phases: StateMachine<AdvisorPhase>,
    diff_reviewer: AgentId,
}

impl TestAdvisor {
    pub fn new(agent: AgentId) -> Self {
        use AdvisorPhase::*;
        Self {
            phases: StateMachine::new(Idle)
                .for_agent(agent)
                .add_cycle(&[
                    Idle,
                    AwaitingDiff,
                    DiffReceived,
                    PerFileReview,
                    Aggregating,
                    Reporting,
                ])
                .add_transition(AwaitingDiff, Reporting),
            diff_reviewer: AgentRole::DiffReviewer.default_id(),
        }
    }

    /// Ask a different agent for diffs
    pub fn with_diff_reviewer(mut self, agent: AgentId) -> Self {
        self.diff_reviewer = agent;
        self
    }

    pub fn phase(&self) -> AdvisorPhase {
        *self.phases.current_phase()
    }

    /// The agent to ask for a request's diff
    fn reviewer_for(&self, request: &AdviceRequest) -> AgentId {
        request
            .diff_reviewer
            .clone()
            .unwrap_or_else(|| self.diff_reviewer.clone())
    }

    fn report(&mut self, report: AdviceReport) -> Result<Payload> {
        self.phases.transition_to(AdvisorPhase::Reporting)?;
        let payload = report.to_result()?;
        self.phases.transition_to(AdvisorPhase::Idle)?;
        Ok(payload)
    }

    fn report_notice(&mut self, notice: String) -> Result<Payload> {
        self.report(AdviceReport {
            files: Vec::new(),
            notice: Some(notice),
        })
    }

    /// Every test function declared in the branch's test files
    async fn existing_tests(
        &self,
        ctx: &AgentContext,
        repo: &str,
        branch: &str,
        notes: &mut Vec<String>,
    ) -> Result<BTreeSet<String>> {
        let params = ListFilesParams {
            repo: repo.to_string(),
            branch: branch.to_string(),
        };
        let files: Vec<String> = match ctx.call(names::LIST_FILES, &params).await? {
            Ok(files) => files,
            Err(e) => {
                notes.push(format!("could not list files: {}", e.message));
                return Ok(BTreeSet::new());
            }
        };

        let max_files = ctx.config().workflow.max_files;
        let mut tests = BTreeSet::new();
        for path in files.into_iter().filter(|p| is_test_file(p)).take(max_files) {
            let params = ReadFileParams {
                repo: repo.to_string(),
                branch: branch.to_string(),
                path: path.clone(),
            };
            match ctx.call::<_, String>(names::READ_FILE, &params).await? {
                Ok(content) => tests.extend(declared_tests(&content)),
                Err(e) => notes.push(format!("could not read {}: {}", path, e.message)),
            }
        }
        Ok(tests)
    }
}

#[async_trait]
impl RoleHandler for TestAdvisor {
    fn role(&self) -> AgentRole {
        AgentRole::TestAdvisor
    }

    fn on_failed(&mut self) {
        self.phases.reset();
    }

    async fn handle(&mut self, ctx: &mut AgentContext, request: &Message) -> Result<Payload> {
        let advice = AdviceRequest::from_payload(&request.payload)?;
        self.phases.transition_to(AdvisorPhase::AwaitingDiff)?;

        let diff_request = DiffRequest::PullRequest {
            repo: advice.repo.clone(),
            pr: advice.pr,
        }
        .to_request()?;
        let reviewer = self.reviewer_for(&advice);
        let mentions = [reviewer.clone()];
        if let Err(e) = ctx.post(&request.thread_id, &mentions, diff_request).await {
            warn!(agent = %ctx.id(), error = %e, "Could not ask for the diff");
            return self.report_notice(format!(
                "no diff available: could not reach {}: {}",
                reviewer, e
            ));
        }

        let attempts = ctx.config().workflow.reply_attempts;
        let reply = ctx
            .await_reply(&request.thread_id, &reviewer, attempts)
            .await?;
        let Some(reply) = reply else {
            warn!(agent = %ctx.id(), from = %reviewer, attempts, "Diff never arrived");
            return self.report_notice(format!(
                "no diff received from {} after {} attempts",
                reviewer, attempts
            ));
        };
        if let Some(message) = error_reply(&reply.payload) {
            return self.report_notice(format!(
                "{} could not produce the diff: {}",
                reviewer, message
            ));
        }
        let diff = DiffReport::from_payload(&reply.payload)?;
        self.phases.transition_to(AdvisorPhase::DiffReceived)?;
        info!(agent = %ctx.id(), files = diff.files.len(), "Diff received");

        self.phases.transition_to(AdvisorPhase::PerFileReview)?;
        let branch = diff.branch.clone().unwrap_or_else(|| "main".to_string());
        let mut notes = Vec::new();
        let existing = self
            .existing_tests(ctx, &advice.repo, &branch, &mut notes)
            .await?;
        let files = advise(&diff, &existing);

        self.phases.transition_to(AdvisorPhase::Aggregating)?;
        let notice = (!notes.is_empty()).then(|| notes.join("; "));
        self.report(AdviceReport { files, notice })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::requests::FileDiff;

    #[test]
    fn test_is_test_file() {
        assert!(is_test_file("tests/test_calc.py"));
        assert!(is_test_file("pkg/calc_test.go"));
        assert!(is_test_file("src/app.spec.ts"));
        assert!(!is_test_file("src/calc.py"));
    }

    #[test]
    fn test_declared_tests() {
        let content = "import calc\n\ndef test_add():\n    pass\n\ndef helper():\n    pass\n";
        let tests: Vec<String> = declared_tests(content).collect();
        assert_eq!(tests, vec!["test_add"]);
    }

    #[test]
    fn test_advise_missing_tests() {
        let diff = DiffReport {
            files: vec![
                FileDiff {
                    path: "calc.py".into(),
                    status: "modified".into(),
                    functions: vec!["add".into(), "multiply".into()],
                },
                FileDiff {
                    path: "tests/test_calc.py".into(),
                    status: "modified".into(),
                    functions: vec!["test_add".into()],
                },
            ],
            ..DiffReport::default()
        };
        let existing: BTreeSet<String> = ["test_add".to_string()].into_iter().collect();

        let advice = advise(&diff, &existing);
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].covered, vec!["add"]);
        assert_eq!(advice[0].missing, vec!["test_multiply"]);
    }

    #[test]
    fn test_reviewer_from_request_wins() {
        let advisor = TestAdvisor::new("repo_unit_test_advisor_agent".into());
        let mut request = AdviceRequest {
            repo: "o/r".into(),
            pr: 1,
            diff_reviewer: None,
        };
        assert_eq!(
            advisor.reviewer_for(&request),
            AgentRole::DiffReviewer.default_id()
        );
        request.diff_reviewer = Some("reviewer_2".into());
        assert_eq!(advisor.reviewer_for(&request), AgentId::from("reviewer_2"));
    }

    #[test]
    fn test_timeout_path_reports_notice() {
        let mut advisor = TestAdvisor::new("repo_unit_test_advisor_agent".into());
        advisor.phases.transition_to(AdvisorPhase::AwaitingDiff).unwrap();
        let payload = advisor.report_notice("no diff".into()).unwrap();
        let report = AdviceReport::from_payload(&payload).unwrap();
        assert_eq!(report.notice.as_deref(), Some("no diff"));
        assert_eq!(advisor.phase(), AdvisorPhase::Idle);
    }
}
