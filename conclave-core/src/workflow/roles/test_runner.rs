//! Test runner: runs the tests of changed functions, skips the rest
//!
//! When the request names a pull request and a `checkout_pr` tool is
//! registered, tests are listed and run in a checkout of the PR head.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::{AgentId, AgentRole};
use crate::broker::{Message, Payload};
use crate::tools::adapters::{CheckoutPrParams, ListTestsParams, RunTestsParams};
use crate::tools::diff::test_targets;
use crate::tools::{names, Checkout, TestCaseResult, TestRun, TestStatus, ToolResult};
use crate::workflow::context::AgentContext;
use crate::workflow::requests::{TestReport, TestRunRequest, TypedPayload};
use crate::workflow::runner::RoleHandler;
use crate::workflow::state::{StateMachine, Workflow};
use crate::Result;

/// Phases of the test runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TestRunnerPhase {
    #[default]
    Idle,
    AwaitingChangeSet,
    CheckingOut,
    SelectingTests,
    Executing,
    ReportingResults,
}

impl TestRunnerPhase {
    pub fn description(&self) -> &'static str {
        match self {
            TestRunnerPhase::Idle => "Idle",
            TestRunnerPhase::AwaitingChangeSet => "Waiting for changed functions",
            TestRunnerPhase::CheckingOut => "Checking out the pull request",
            TestRunnerPhase::SelectingTests => "Selecting tests for changed functions",
            TestRunnerPhase::Executing => "Running selected tests",
            TestRunnerPhase::ReportingResults => "Reporting test results",
        }
    }
}

impl std::fmt::Display for TestRunnerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Split discovered tests into those targeting a changed function and the rest
pub fn select_tests(discovered: &[String], functions: &[String]) -> (Vec<String>, Vec<String>) {
    discovered
        .iter()
        .cloned()
        .partition(|test| functions.iter().any(|f| test_targets(test, f)))
}

/// Results for the selected tests, one per test
///
/// Tests the executor did not report on are failures with a note.
fn executed_results(selected: &[String], run: TestRun) -> Vec<TestCaseResult> {
    let mut reported = run.results;
    selected
        .iter()
        .map(|id| match reported.iter().position(|r| &r.id == id) {
            Some(pos) => reported.swap_remove(pos),
            None => TestCaseResult {
                id: id.clone(),
                status: TestStatus::Failed,
                note: Some("no result reported by the test runner".to_string()),
            },
        })
        .collect()
}

/// Last `max` bytes of runner output, cut on a char boundary
fn output_tail(output: &str, max: usize) -> String {
    let output = output.trim();
    if output.len() <= max {
        return output.to_string();
    }
    let mut start = output.len() - max;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &output[start..])
}

/// Check out the PR the request names, if it names one and checkouts are available
async fn checkout_for(
    ctx: &AgentContext,
    request: &TestRunRequest,
) -> Result<ToolResult<Option<Checkout>>> {
    let (Some(repo), Some(pr)) = (&request.repo, request.pr) else {
        return Ok(Ok(None));
    };
    if !ctx.gateway().has_tool(names::CHECKOUT_PR) {
        debug!(agent = %ctx.id(), repo = %repo, pr, "No checkout tool, using the executor's tree");
        return Ok(Ok(None));
    }
    let params = CheckoutPrParams {
        repo: repo.clone(),
        pr,
    };
    Ok(ctx
        .call::<_, Checkout>(names::CHECKOUT_PR, &params)
        .await?
        .map(Some))
}

/// The test runner role
#[derive(Debug)]
pub struct TestRunner {
    phases: StateMachine<TestRunnerPhase>,
}

impl TestRunner {
    pub fn new(agent: AgentId) -> Self {
        use TestRunnerPhase::*;
        Self {
            phases: StateMachine::new(Idle)
                .for_agent(agent)
                .add_cycle(&[
                    Idle,
                    AwaitingChangeSet,
                    CheckingOut,
                    SelectingTests,
                    Executing,
                    ReportingResults,
                ])
                .add_transition(CheckingOut, ReportingResults)
                .add_transition(SelectingTests, ReportingResults),
        }
    }

    pub fn phase(&self) -> TestRunnerPhase {
        *self.phases.current_phase()
    }

    fn finish(&mut self, report: TestReport) -> Result<Payload> {
        self.phases.transition_to(TestRunnerPhase::ReportingResults)?;
        let payload = report.to_result()?;
        self.phases.transition_to(TestRunnerPhase::Idle)?;
        Ok(payload)
    }
}

#[async_trait]
impl RoleHandler for TestRunner {
    fn role(&self) -> AgentRole {
        AgentRole::TestRunner
    }

    fn on_waiting(&mut self) -> Result<()> {
        if self.phase() == TestRunnerPhase::Idle {
            self.phases.transition_to(TestRunnerPhase::AwaitingChangeSet)?;
        }
        Ok(())
    }

    fn on_failed(&mut self) {
        self.phases.reset();
    }

    async fn handle(&mut self, ctx: &mut AgentContext, request: &Message) -> Result<Payload> {
        let request = TestRunRequest::from_payload(&request.payload)?;
        self.phases.transition_to(TestRunnerPhase::CheckingOut)?;

        let mut report = TestReport::default();
        let checkout = match checkout_for(ctx, &request).await? {
            Ok(checkout) => checkout,
            Err(e) => {
                warn!(agent = %ctx.id(), error = %e, "Could not check out the pull request");
                report.notes.push(format!(
                    "could not check out {}#{}: {}",
                    request.repo.as_deref().unwrap_or_default(),
                    request.pr.unwrap_or_default(),
                    e.message
                ));
                return self.finish(report);
            }
        };
        let workdir = checkout.as_ref().map(|c| c.path.clone());
        report.checkout = checkout.map(|c| format!("{}@{}", c.branch, c.commit));

        self.phases.transition_to(TestRunnerPhase::SelectingTests)?;
        let params = ListTestsParams {
            workdir: workdir.clone(),
        };
        let discovered: Vec<String> = match ctx.call(names::LIST_TESTS, &params).await? {
            Ok(tests) => tests,
            Err(e) => {
                warn!(agent = %ctx.id(), error = %e, "Could not list tests");
                report.notes.push(format!("could not list tests: {}", e.message));
                return self.finish(report);
            }
        };
        let (selected, skipped) = select_tests(&discovered, &request.changed_functions);
        info!(
            agent = %ctx.id(),
            selected = selected.len(),
            skipped = skipped.len(),
            "Selected tests for changed functions"
        );

        self.phases.transition_to(TestRunnerPhase::Executing)?;
        if !selected.is_empty() {
            let params = RunTestsParams {
                tests: selected.clone(),
                workdir,
            };
            match ctx.call::<_, TestRun>(names::RUN_TESTS, &params).await? {
                Ok(run) => {
                    report.duration_ms = run.duration_ms;
                    let max_output = ctx.config().workflow.max_output_bytes;
                    report.output = output_tail(&run.output, max_output);
                    report.results = executed_results(&selected, run);
                }
                Err(e) => {
                    warn!(agent = %ctx.id(), error = %e, "Test execution failed");
                    report
                        .notes
                        .push(format!("test execution failed: {}", e.message));
                    report.results = selected
                        .iter()
                        .map(|id| TestCaseResult {
                            id: id.clone(),
                            status: TestStatus::Failed,
                            note: Some(format!("not run, test runner failed: {}", e.message)),
                        })
                        .collect();
                }
            }
        }

        report
            .results
            .extend(skipped.into_iter().map(|id| TestCaseResult {
                id,
                status: TestStatus::Skipped,
                note: Some("not related to the changed functions".to_string()),
            }));
        self.finish(report)
    }
}
