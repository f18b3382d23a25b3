//! Doc checker: finds documentation that describes changed code

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::{AgentId, AgentRole};
use crate::broker::{Message, Payload};
use crate::tools::adapters::{LocateDocsParams, ReadFileParams};
use crate::tools::names;
use crate::workflow::context::AgentContext;
use crate::workflow::requests::{DocCheckRequest, DocFinding, DocReport, TypedPayload};
use crate::workflow::runner::RoleHandler;
use crate::workflow::state::{StateMachine, Workflow};
use crate::Result;

/// Phases of the doc checker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DocCheckPhase {
    #[default]
    Idle,
    AwaitingDiff,
    LocatingDocs,
    ComparingContent,
    Reporting,
}

impl DocCheckPhase {
    pub fn description(&self) -> &'static str {
        match self {
            DocCheckPhase::Idle => "Idle",
            DocCheckPhase::AwaitingDiff => "Waiting for changed files",
            DocCheckPhase::LocatingDocs => "Locating candidate documentation",
            DocCheckPhase::ComparingContent => "Comparing documentation with the changes",
            DocCheckPhase::Reporting => "Reporting documentation findings",
        }
    }
}

impl std::fmt::Display for DocCheckPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Whether `word` occurs in `text` as a whole identifier
fn mentions_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    text.match_indices(word).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + word.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

/// Changed files and functions a document mentions
pub fn find_mentions(content: &str, paths: &[String], functions: &[String]) -> Vec<String> {
    let mut mentions = Vec::new();
    for path in paths {
        let file_name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path.as_str());
        if content.contains(path.as_str()) || mentions_word(content, file_name) {
            mentions.push(path.clone());
        }
    }
    for function in functions {
        if mentions_word(content, function) {
            mentions.push(function.clone());
        }
    }
    mentions
}

/// The doc checker role
#[derive(Debug)]
pub struct DocChecker {
    phases: StateMachine<DocCheckPhase>,
}

impl DocChecker {
    pub fn new(agent: AgentId) -> Self {
        use DocCheckPhase::*;
        Self {
            phases: StateMachine::new(Idle).for_agent(agent).add_cycle(&[
                Idle,
                AwaitingDiff,
                LocatingDocs,
                ComparingContent,
                Reporting,
            ]),
        }
    }

    pub fn phase(&self) -> DocCheckPhase {
        *self.phases.current_phase()
    }
}

#[async_trait]
impl RoleHandler for DocChecker {
    fn role(&self) -> AgentRole {
        AgentRole::DocChecker
    }

    fn on_waiting(&mut self) -> Result<()> {
        if self.phase() == DocCheckPhase::Idle {
            self.phases.transition_to(DocCheckPhase::AwaitingDiff)?;
        }
        Ok(())
    }

    fn on_failed(&mut self) {
        self.phases.reset();
    }

    async fn handle(&mut self, ctx: &mut AgentContext, request: &Message) -> Result<Payload> {
        let request = DocCheckRequest::from_payload(&request.payload)?;
        self.phases.transition_to(DocCheckPhase::LocatingDocs)?;

        let params = LocateDocsParams {
            repo: request.repo.clone(),
            branch: request.branch.clone(),
            paths: request.paths.clone(),
        };
        let docs: Vec<String> = ctx.call(names::LOCATE_DOCS, &params).await??;
        debug!(agent = %ctx.id(), candidates = docs.len(), "Located documentation");

        self.phases.transition_to(DocCheckPhase::ComparingContent)?;
        let mut report = DocReport::default();
        for doc in docs {
            let params = ReadFileParams {
                repo: request.repo.clone(),
                branch: request.branch.clone(),
                path: doc.clone(),
            };
            let content: String = match ctx.call(names::READ_FILE, &params).await? {
                Ok(content) => content,
                Err(e) => {
                    report
                        .notes
                        .push(format!("could not read {}: {}", doc, e.message));
                    continue;
                }
            };
            let mentions = find_mentions(&content, &request.paths, &request.functions);
            if mentions.is_empty() {
                report.unaffected.push(doc);
            } else {
                report.findings.push(DocFinding {
                    path: doc,
                    mentions,
                });
            }
        }

        self.phases.transition_to(DocCheckPhase::Reporting)?;
        let payload = report.to_result()?;
        self.phases.transition_to(DocCheckPhase::Idle)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions_word_boundaries() {
        assert!(mentions_word("call `add(a, b)` first", "add"));
        assert!(!mentions_word("the address book", "add"));
        assert!(!mentions_word("padding", "add"));
        assert!(mentions_word("add", "add"));
    }

    #[test]
    fn test_find_mentions() {
        let content = "See calculator.py for `multiply`.\nThe README covers setup.";
        let mentions = find_mentions(
            content,
            &["src/calculator.py".to_string(), "src/io.py".to_string()],
            &["multiply".to_string(), "divide".to_string()],
        );
        assert_eq!(mentions, vec!["src/calculator.py", "multiply"]);
    }
}
