//! Diff reviewer: turns a PR or a file pair into changed functions

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentRole};
use crate::broker::{Message, Payload};
use crate::tools::adapters::{CompareParams, PrChangesParams};
use crate::tools::diff::{changed_functions, test_name_for};
use crate::tools::{names, ChangeSet};
use crate::workflow::context::AgentContext;
use crate::workflow::requests::{DiffReport, DiffRequest, FileDiff, TypedPayload};
use crate::workflow::runner::RoleHandler;
use crate::workflow::state::{StateMachine, Workflow};
use crate::Result;

/// Phases of the diff reviewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DiffReviewPhase {
    #[default]
    Idle,
    AwaitingRequest,
    Diffing,
    Reporting,
}

impl DiffReviewPhase {
    pub fn description(&self) -> &'static str {
        match self {
            DiffReviewPhase::Idle => "Idle",
            DiffReviewPhase::AwaitingRequest => "Waiting for a diff request",
            DiffReviewPhase::Diffing => "Fetching and parsing the diff",
            DiffReviewPhase::Reporting => "Reporting changed functions",
        }
    }
}

impl std::fmt::Display for DiffReviewPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Summarize a change set into per-file changed functions
pub fn summarize_changes(changes: &ChangeSet) -> DiffReport {
    let mut all = BTreeSet::new();
    let files = changes
        .files
        .iter()
        .map(|file| {
            let functions = changed_functions(&file.hunks);
            all.extend(functions.iter().cloned());
            FileDiff {
                path: file.path.clone(),
                status: file.status.clone(),
                functions: functions.into_iter().collect(),
            }
        })
        .collect();

    let changed_functions: Vec<String> = all.into_iter().collect();
    let suggested_tests = changed_functions
        .iter()
        .map(|f| test_name_for(f))
        .collect();
    DiffReport {
        repo: changes.repo.clone(),
        pr: changes.pr,
        branch: changes.branch.clone(),
        files,
        changed_functions,
        suggested_tests,
    }
}

/// The diff reviewer role
#[derive(Debug)]
pub struct DiffReviewer {
    phases: StateMachine<DiffReviewPhase>,
}

impl DiffReviewer {
    pub fn new(agent: AgentId) -> Self {
        use DiffReviewPhase::*;
        Self {
            phases: StateMachine::new(Idle)
                .for_agent(agent)
                .add_cycle(&[Idle, AwaitingRequest, Diffing, Reporting]),
        }
    }

    pub fn phase(&self) -> DiffReviewPhase {
        *self.phases.current_phase()
    }
}

#[async_trait]
impl RoleHandler for DiffReviewer {
    fn role(&self) -> AgentRole {
        AgentRole::DiffReviewer
    }

    fn on_waiting(&mut self) -> Result<()> {
        if self.phase() == DiffReviewPhase::Idle {
            self.phases.transition_to(DiffReviewPhase::AwaitingRequest)?;
        }
        Ok(())
    }

    fn on_failed(&mut self) {
        self.phases.reset();
    }

    async fn handle(&mut self, ctx: &mut AgentContext, request: &Message) -> Result<Payload> {
        let request = DiffRequest::from_payload(&request.payload)?;
        self.phases.transition_to(DiffReviewPhase::Diffing)?;

        let changes: ChangeSet = match &request {
            DiffRequest::PullRequest { repo, pr } => {
                let params = PrChangesParams {
                    repo: repo.clone(),
                    pr: *pr,
                };
                ctx.call(names::GET_PR_CHANGES, &params).await??
            }
            DiffRequest::Files { old, new } => {
                let params = CompareParams {
                    old: old.clone(),
                    new: new.clone(),
                };
                ctx.call(names::COMPARE_FILES, &params).await??
            }
        };

        self.phases.transition_to(DiffReviewPhase::Reporting)?;
        let report = summarize_changes(&changes);
        let payload = report.to_result()?;
        self.phases.transition_to(DiffReviewPhase::Idle)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::diff::parse_hunks;
    use crate::tools::FileChange;

    #[test]
    fn test_summarize_changes() {
        let patch = "@@ -1,2 +1,2 @@\n def f1(x):\n-    return x\n+    return x + 1\n@@ -8,2 +8,2 @@ def f2(y):\n-    y = 1\n+    y = 2\n";
        let changes = ChangeSet {
            repo: Some("o/r".into()),
            pr: Some(3),
            branch: Some("feature".into()),
            files: vec![FileChange {
                path: "calc.py".into(),
                status: "modified".into(),
                hunks: parse_hunks(patch),
            }],
        };

        let report = summarize_changes(&changes);
        assert_eq!(report.files[0].functions, vec!["f1", "f2"]);
        assert_eq!(report.changed_functions, vec!["f1", "f2"]);
        assert_eq!(report.suggested_tests, vec!["test_f1", "test_f2"]);
        assert_eq!(report.branch.as_deref(), Some("feature"));
    }

    #[test]
    fn test_phase_cycle() {
        let mut reviewer = DiffReviewer::new("codediff_review_agent".into());
        reviewer.on_waiting().unwrap();
        assert_eq!(reviewer.phase(), DiffReviewPhase::AwaitingRequest);
        // a second wait keeps the phase
        reviewer.on_waiting().unwrap();
        assert_eq!(reviewer.phase(), DiffReviewPhase::AwaitingRequest);
        reviewer.on_failed();
        assert_eq!(reviewer.phase(), DiffReviewPhase::Idle);
    }
}
