//! Interface agent: turns a user instruction into collaborator requests
//!
//! The interface opens one thread per instruction, asks the collaborators
//! it needs in turn, and posts a [`FinalReport`] to the thread. A
//! collaborator that never answers is listed as unresponsive rather than
//! failing the whole instruction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::{AgentId, AgentRole};
use crate::broker::ThreadId;
use crate::tools::TestStatus;
use crate::workflow::context::AgentContext;
use crate::workflow::requests::{
    error_reply, AdviceReport, AdviceRequest, DiffReport, DiffRequest, DocCheckRequest,
    DocReport, FinalReport, ReportSection, SummaryReport, SummaryRequest, TestReport,
    TestRunRequest, TypedPayload,
};
use crate::workflow::state::{StateMachine, Workflow};
use crate::Result;

/// Phases of the interface agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InterfacePhase {
    #[default]
    Idle,
    Dispatching,
    AwaitingCollaborator,
    Aggregating,
    Reporting,
}

impl InterfacePhase {
    pub fn description(&self) -> &'static str {
        match self {
            InterfacePhase::Idle => "Idle",
            InterfacePhase::Dispatching => "Dispatching requests",
            InterfacePhase::AwaitingCollaborator => "Waiting for a collaborator",
            InterfacePhase::Aggregating => "Aggregating results",
            InterfacePhase::Reporting => "Posting the final report",
        }
    }
}

impl std::fmt::Display for InterfacePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A user instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "instruction", rename_all = "snake_case")]
pub enum Instruction {
    /// Run the tests of the functions a pull request changes
    PrTests { repo: String, pr: u64 },
    /// Find documentation a pull request may have made stale
    DocCheck { repo: String, pr: u64 },
    /// Summarize a repository branch
    RepoSummary { repo: String, branch: String },
    /// Suggest the unit tests a pull request is missing
    TestAdvice { repo: String, pr: u64 },
}

impl Instruction {
    pub fn title(&self) -> String {
        match self {
            Instruction::PrTests { repo, pr } => format!("Tests for {}#{}", repo, pr),
            Instruction::DocCheck { repo, pr } => format!("Doc check for {}#{}", repo, pr),
            Instruction::RepoSummary { repo, branch } => {
                format!("Summary of {}@{}", repo, branch)
            }
            Instruction::TestAdvice { repo, pr } => format!("Test advice for {}#{}", repo, pr),
        }
    }

    /// Collaborator roles the instruction needs
    pub fn roles(&self) -> &'static [AgentRole] {
        match self {
            Instruction::PrTests { .. } => &[AgentRole::DiffReviewer, AgentRole::TestRunner],
            Instruction::DocCheck { .. } => &[AgentRole::DiffReviewer, AgentRole::DocChecker],
            Instruction::RepoSummary { .. } => &[AgentRole::RepoSummarizer],
            Instruction::TestAdvice { .. } => &[AgentRole::TestAdvisor, AgentRole::DiffReviewer],
        }
    }
}

/// Live agent for each role, preferring the conventional id
fn pick_collaborators(
    agents: &[crate::agent::AgentInfo],
    roles: &[AgentRole],
) -> (HashMap<AgentRole, AgentId>, Vec<AgentId>) {
    let mut found = HashMap::new();
    let mut missing = Vec::new();
    for role in roles {
        let mut candidates: Vec<&AgentId> = agents
            .iter()
            .filter(|a| a.role == *role && a.is_live())
            .map(|a| &a.id)
            .collect();
        candidates.sort();
        let preferred = role.default_id();
        let chosen = candidates
            .iter()
            .find(|id| ***id == preferred)
            .or_else(|| candidates.first())
            .map(|id| (*id).clone());
        match chosen {
            Some(id) => {
                found.insert(*role, id);
            }
            None => missing.push(preferred),
        }
    }
    (found, missing)
}

/// Fold a test report into the final report
///
/// Notes of a run that produced no results are failures.
fn record_tests(report: &mut FinalReport, tests: &TestReport) {
    if let Some(checkout) = &tests.checkout {
        report.details.push(format!("ran in checkout {}", checkout));
    }
    for result in &tests.results {
        match result.status {
            TestStatus::Failed => report.failures.push(format!(
                "{}: {}",
                result.id,
                result.note.as_deref().unwrap_or("failed")
            )),
            TestStatus::Skipped => report.skipped.push(result.id.clone()),
            TestStatus::Passed => report.details.push(format!("passed: {}", result.id)),
        }
    }
    if tests.results.is_empty() {
        report.failures.extend(tests.notes.iter().cloned());
    } else {
        report.details.extend(tests.notes.iter().cloned());
    }
    if !tests.output.is_empty() {
        report.details.push(format!("output:\n{}", tests.output));
    }
}

fn record_docs(report: &mut FinalReport, docs: &DocReport) {
    for finding in &docs.findings {
        report.details.push(format!(
            "{} mentions {}; check it is still accurate",
            finding.path,
            finding.mentions.join(", ")
        ));
    }
    report.details.extend(docs.notes.iter().cloned());
}

fn record_advice(report: &mut FinalReport, advisor: &AgentId, advice: &AdviceReport) {
    for file in &advice.files {
        if file.missing.is_empty() {
            report.details.push(format!("{}: covered", file.path));
        } else {
            report.details.push(format!(
                "{}: missing {}",
                file.path,
                file.missing.join(", ")
            ));
        }
    }
    if let Some(notice) = &advice.notice {
        report.failures.push(format!("{}: {}", advisor, notice));
    }
}

/// The interface role
#[derive(Debug)]
pub struct InterfaceAgent {
    ctx: AgentContext,
    phases: StateMachine<InterfacePhase>,
}

impl InterfaceAgent {
    pub fn new(ctx: AgentContext) -> Self {
        use InterfacePhase::*;
        let phases = StateMachine::new(Idle)
            .for_agent(ctx.id().clone())
            .add_transitions(vec![
                (Idle, Dispatching),
                (Dispatching, AwaitingCollaborator),
                (AwaitingCollaborator, Dispatching),
                (Dispatching, Aggregating),
                (Aggregating, Reporting),
                (Reporting, Idle),
            ]);
        Self { ctx, phases }
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn phase(&self) -> InterfacePhase {
        *self.phases.current_phase()
    }

    /// Carry out an instruction and post its final report
    pub async fn execute(&mut self, instruction: Instruction) -> Result<FinalReport> {
        match self.run(&instruction).await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(agent = %self.ctx.id(), error = %e, "Instruction failed");
                self.phases.reset();
                Err(e)
            }
        }
    }

    async fn run(&mut self, instruction: &Instruction) -> Result<FinalReport> {
        self.phases.transition_to(InterfacePhase::Dispatching)?;
        let mut report = FinalReport::new(instruction.title());

        let agents = self.ctx.client().list_agents().await?;
        let (crew, missing) = pick_collaborators(&agents, instruction.roles());
        for id in &missing {
            warn!(agent = %self.ctx.id(), collaborator = %id, "Collaborator not registered");
        }
        report.unresponsive.extend(missing);

        let participants: Vec<AgentId> = crew.values().cloned().collect();
        let thread = if participants.is_empty() {
            None
        } else {
            Some(
                self.ctx
                    .client()
                    .create_thread(&instruction.title(), &participants)
                    .await?,
            )
        };

        if let Some(thread) = &thread {
            info!(agent = %self.ctx.id(), thread = %thread, instruction = %instruction.title(), "Dispatching instruction");
            self.dispatch(instruction, thread, &crew, &mut report).await?;
        }

        self.phases.transition_to(InterfacePhase::Aggregating)?;
        self.finish(thread.as_ref(), &report).await?;
        Ok(report)
    }

    async fn dispatch(
        &mut self,
        instruction: &Instruction,
        thread: &ThreadId,
        crew: &HashMap<AgentRole, AgentId>,
        report: &mut FinalReport,
    ) -> Result<()> {
        let attempts = self.ctx.config().workflow.reply_attempts;
        match instruction {
            Instruction::PrTests { repo, pr } => {
                let Some(diff) = self.diff_of(thread, crew, repo, *pr, report).await? else {
                    return Ok(());
                };
                if diff.changed_functions.is_empty() {
                    report
                        .details
                        .push("no changed functions, no tests to run".to_string());
                    return Ok(());
                }
                let Some(runner) = crew.get(&AgentRole::TestRunner) else {
                    return Ok(());
                };
                let request = TestRunRequest {
                    changed_functions: diff.changed_functions.clone(),
                    repo: Some(repo.clone()),
                    pr: Some(*pr),
                };
                if let Some(tests) = self
                    .ask::<_, TestReport>(thread, runner, &request, attempts, report)
                    .await?
                {
                    record_tests(report, &tests);
                }
            }
            Instruction::DocCheck { repo, pr } => {
                let Some(diff) = self.diff_of(thread, crew, repo, *pr, report).await? else {
                    return Ok(());
                };
                let Some(checker) = crew.get(&AgentRole::DocChecker) else {
                    return Ok(());
                };
                let request = DocCheckRequest {
                    repo: repo.clone(),
                    branch: diff.branch.clone().unwrap_or_else(|| "main".to_string()),
                    paths: diff.paths(),
                    functions: diff.changed_functions.clone(),
                };
                if let Some(docs) = self
                    .ask::<_, DocReport>(thread, checker, &request, attempts, report)
                    .await?
                {
                    record_docs(report, &docs);
                }
            }
            Instruction::RepoSummary { repo, branch } => {
                let Some(summarizer) = crew.get(&AgentRole::RepoSummarizer) else {
                    return Ok(());
                };
                let request = SummaryRequest {
                    repo: repo.clone(),
                    branch: branch.clone(),
                };
                if let Some(summary) = self
                    .ask::<_, SummaryReport>(thread, summarizer, &request, attempts, report)
                    .await?
                {
                    report.details.push(summary.summary.clone());
                    report.skipped.extend(
                        summary
                            .unreadable
                            .iter()
                            .map(|path| format!("{} (unreadable)", path)),
                    );
                }
            }
            Instruction::TestAdvice { repo, pr } => {
                let Some(advisor) = crew.get(&AgentRole::TestAdvisor) else {
                    return Ok(());
                };
                let request = AdviceRequest {
                    repo: repo.clone(),
                    pr: *pr,
                    diff_reviewer: crew.get(&AgentRole::DiffReviewer).cloned(),
                };
                // the advisor waits on the diff reviewer in turn
                let attempts = attempts.saturating_mul(2);
                if let Some(advice) = self
                    .ask::<_, AdviceReport>(thread, advisor, &request, attempts, report)
                    .await?
                {
                    record_advice(report, advisor, &advice);
                }
            }
        }
        Ok(())
    }

    async fn diff_of(
        &mut self,
        thread: &ThreadId,
        crew: &HashMap<AgentRole, AgentId>,
        repo: &str,
        pr: u64,
        report: &mut FinalReport,
    ) -> Result<Option<DiffReport>> {
        let Some(reviewer) = crew.get(&AgentRole::DiffReviewer) else {
            return Ok(None);
        };
        let request = DiffRequest::PullRequest {
            repo: repo.to_string(),
            pr,
        };
        let attempts = self.ctx.config().workflow.reply_attempts;
        self.ask(thread, reviewer, &request, attempts, report).await
    }

    /// Send a request to one collaborator and wait for its reply
    ///
    /// Silence, error replies and undecodable replies end up in `report`
    /// and yield `None`.
    async fn ask<Req, Rep>(
        &mut self,
        thread: &ThreadId,
        agent: &AgentId,
        request: &Req,
        attempts: u32,
        report: &mut FinalReport,
    ) -> Result<Option<Rep>>
    where
        Req: TypedPayload,
        Rep: TypedPayload,
    {
        if let Err(e) = self
            .ctx
            .post(thread, std::slice::from_ref(agent), request.to_request()?)
            .await
        {
            warn!(agent = %self.ctx.id(), collaborator = %agent, error = %e, "Could not send request");
            report
                .failures
                .push(format!("{}: request not delivered: {}", agent, e));
            return Ok(None);
        }

        self.phases
            .transition_to(InterfacePhase::AwaitingCollaborator)?;
        let reply = self.ctx.await_reply(thread, agent, attempts).await?;
        self.phases.transition_to(InterfacePhase::Dispatching)?;

        let Some(reply) = reply else {
            warn!(agent = %self.ctx.id(), collaborator = %agent, attempts, "No reply from collaborator");
            report.unresponsive.push(agent.clone());
            return Ok(None);
        };
        if let Some(message) = error_reply(&reply.payload) {
            report.failures.push(format!("{}: {}", agent, message));
            return Ok(None);
        }
        match Rep::from_payload(&reply.payload) {
            Ok(rep) => {
                report.sections.push(ReportSection {
                    agent: agent.clone(),
                    summary: rep.summary(),
                });
                Ok(Some(rep))
            }
            Err(e) => {
                report
                    .failures
                    .push(format!("{}: unexpected reply: {}", agent, e));
                Ok(None)
            }
        }
    }

    async fn finish(&mut self, thread: Option<&ThreadId>, report: &FinalReport) -> Result<()> {
        self.phases.transition_to(InterfacePhase::Reporting)?;
        if let Some(thread) = thread {
            self.ctx.post(thread, &[], report.to_result()?).await?;
            self.ctx.client().close_thread(thread).await?;
        }
        info!(
            agent = %self.ctx.id(),
            clean = report.is_clean(),
            unresponsive = report.unresponsive.len(),
            failures = report.failures.len(),
            "Instruction finished"
        );
        self.phases.transition_to(InterfacePhase::Idle)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentInfo, Liveness};
    use crate::tools::TestCaseResult;

    #[test]
    fn test_pick_collaborators_prefers_default_id() {
        let mut gone = AgentInfo::new("runner-0", AgentRole::TestRunner);
        gone.liveness = Liveness::Disconnected;
        let agents = vec![
            AgentInfo::new("reviewer-b", AgentRole::DiffReviewer),
            AgentInfo::for_role(AgentRole::DiffReviewer),
            gone,
        ];
        let (found, missing) =
            pick_collaborators(&agents, &[AgentRole::DiffReviewer, AgentRole::TestRunner]);
        assert_eq!(
            found.get(&AgentRole::DiffReviewer),
            Some(&AgentRole::DiffReviewer.default_id())
        );
        assert_eq!(missing, vec![AgentRole::TestRunner.default_id()]);
    }

    #[test]
    fn test_record_tests_splits_by_status() {
        let tests = TestReport {
            results: vec![
                TestCaseResult {
                    id: "test_f1".into(),
                    status: TestStatus::Passed,
                    note: None,
                },
                TestCaseResult {
                    id: "test_f2".into(),
                    status: TestStatus::Failed,
                    note: Some("test runner crashed before reporting (exit 134)".into()),
                },
                TestCaseResult {
                    id: "test_f3".into(),
                    status: TestStatus::Skipped,
                    note: None,
                },
            ],
            ..TestReport::default()
        };
        let mut report = FinalReport::new("t");
        record_tests(&mut report, &tests);
        assert_eq!(
            report.failures,
            vec!["test_f2: test runner crashed before reporting (exit 134)"]
        );
        assert_eq!(report.skipped, vec!["test_f3"]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_record_tests_output_and_notes() {
        let tests = TestReport {
            notes: vec!["could not check out o/r#7: remote unreachable".into()],
            ..TestReport::default()
        };
        let mut report = FinalReport::new("t");
        record_tests(&mut report, &tests);
        assert_eq!(report.failures, tests.notes);

        let tests = TestReport {
            results: vec![TestCaseResult {
                id: "test_f1".into(),
                status: TestStatus::Passed,
                note: None,
            }],
            output: "1 passed in 0.01s".into(),
            checkout: Some("pr-7@abc123".into()),
            ..TestReport::default()
        };
        let mut report = FinalReport::new("t");
        record_tests(&mut report, &tests);
        assert!(report.is_clean());
        assert_eq!(
            report.details,
            vec![
                "ran in checkout pr-7@abc123",
                "passed: test_f1",
                "output:\n1 passed in 0.01s"
            ]
        );
    }

    #[test]
    fn test_instruction_serde() {
        let instruction: Instruction =
            serde_json::from_str(r#"{"instruction":"pr_tests","repo":"o/r","pr":7}"#).unwrap();
        assert_eq!(
            instruction,
            Instruction::PrTests {
                repo: "o/r".into(),
                pr: 7
            }
        );
        assert_eq!(instruction.roles().len(), 2);
    }
}
