//! Role workflows
//!
//! Responder roles implement [`RoleHandler`](super::RoleHandler) and run
//! under an [`AgentRunner`](super::AgentRunner). The interface drives
//! instructions itself.

mod advisor;
mod diff_review;
mod doc_check;
mod interface;
mod repo_summary;
mod test_runner;

pub use advisor::{advise, is_test_file, AdvisorPhase, TestAdvisor};
pub use diff_review::{summarize_changes, DiffReviewPhase, DiffReviewer};
pub use doc_check::{find_mentions, DocCheckPhase, DocChecker};
pub use interface::{Instruction, InterfaceAgent, InterfacePhase};
pub use repo_summary::{prioritize, RepoSummarizer, SummaryPhase};
pub use test_runner::{select_tests, TestRunner, TestRunnerPhase};
