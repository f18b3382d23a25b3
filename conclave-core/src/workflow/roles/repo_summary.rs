//! Repo summarizer: reads a bounded set of files into head summary memory

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::{AgentId, AgentRole};
use crate::broker::{Message, Payload};
use crate::config::MemoryConfig;
use crate::memory::HeadSummaryMemory;
use crate::tools::adapters::{ListFilesParams, ReadFileParams};
use crate::tools::names;
use crate::workflow::context::AgentContext;
use crate::workflow::requests::{SummaryReport, SummaryRequest, TypedPayload};
use crate::workflow::runner::RoleHandler;
use crate::workflow::state::{StateMachine, Workflow};
use crate::Result;

const INSTRUCTIONS: &str = "Summarize the repository: its purpose, layout, \
entry points and build setup. Prefer facts read from files over guesses.";

/// Phases of the repo summarizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SummaryPhase {
    #[default]
    Idle,
    AwaitingRequest,
    Listing,
    Reading,
    Summarizing,
    Reporting,
}

impl SummaryPhase {
    pub fn description(&self) -> &'static str {
        match self {
            SummaryPhase::Idle => "Idle",
            SummaryPhase::AwaitingRequest => "Waiting for a summary request",
            SummaryPhase::Listing => "Listing repository files",
            SummaryPhase::Reading => "Reading selected files",
            SummaryPhase::Summarizing => "Summarizing observations",
            SummaryPhase::Reporting => "Reporting the summary",
        }
    }
}

impl std::fmt::Display for SummaryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

const MANIFESTS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "setup.py",
    "requirements.txt",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "Makefile",
    "Dockerfile",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "go", "js", "ts", "java", "kt", "c", "h", "cpp", "rb", "md", "toml", "yaml", "yml",
];

const SKIPPED_EXTENSIONS: &[&str] = &[
    "lock", "png", "jpg", "jpeg", "gif", "ico", "pdf", "zip", "gz", "tar", "so", "dll", "exe",
    "bin", "woff", "woff2", "svg",
];

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Reading priority of a path, lower first; `None` for files not worth reading
fn priority(path: &str) -> Option<u8> {
    let name = file_name(path);
    let depth = path.matches('/').count();
    let ext = extension(path).map(str::to_ascii_lowercase);
    if ext
        .as_deref()
        .is_some_and(|ext| SKIPPED_EXTENSIONS.contains(&ext))
    {
        return None;
    }
    if name.to_ascii_lowercase().starts_with("readme") {
        return Some(if depth == 0 { 0 } else { 3 });
    }
    if MANIFESTS.contains(&name) {
        return Some(if depth == 0 { 1 } else { 4 });
    }
    match ext.as_deref() {
        Some(ext) if SOURCE_EXTENSIONS.contains(&ext) => Some(if depth <= 1 { 2 } else { 5 }),
        _ => Some(6),
    }
}

/// Pick at most `max_files` paths, most informative first
pub fn prioritize(files: &[String], max_files: usize) -> Vec<String> {
    let mut ranked: Vec<(u8, &String)> = files
        .iter()
        .filter_map(|path| priority(path).map(|p| (p, path)))
        .collect();
    ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    ranked
        .into_iter()
        .take(max_files)
        .map(|(_, path)| path.clone())
        .collect()
}

/// The repo summarizer role
#[derive(Debug)]
pub struct RepoSummarizer {
    phases: StateMachine<SummaryPhase>,
    memory: HeadSummaryMemory,
}

impl RepoSummarizer {
    pub fn new(agent: AgentId, config: &MemoryConfig) -> Self {
        use SummaryPhase::*;
        Self {
            memory: HeadSummaryMemory::new(agent.clone(), config),
            phases: StateMachine::new(Idle)
                .for_agent(agent)
                .add_cycle(&[
                    Idle,
                    AwaitingRequest,
                    Listing,
                    Reading,
                    Summarizing,
                    Reporting,
                ])
                .add_transition(Listing, Reporting),
        }
    }

    pub fn phase(&self) -> SummaryPhase {
        *self.phases.current_phase()
    }

    pub fn memory(&self) -> &HeadSummaryMemory {
        &self.memory
    }

    fn finish(&mut self, report: SummaryReport) -> Result<Payload> {
        self.phases.transition_to(SummaryPhase::Reporting)?;
        let payload = report.to_result()?;
        self.phases.transition_to(SummaryPhase::Idle)?;
        Ok(payload)
    }
}

#[async_trait]
impl RoleHandler for RepoSummarizer {
    fn role(&self) -> AgentRole {
        AgentRole::RepoSummarizer
    }

    fn on_waiting(&mut self) -> Result<()> {
        if self.phase() == SummaryPhase::Idle {
            self.phases.transition_to(SummaryPhase::AwaitingRequest)?;
        }
        Ok(())
    }

    fn on_failed(&mut self) {
        self.phases.reset();
    }

    async fn handle(&mut self, ctx: &mut AgentContext, request: &Message) -> Result<Payload> {
        let request = SummaryRequest::from_payload(&request.payload)?;
        self.phases.transition_to(SummaryPhase::Listing)?;
        self.memory.reset();
        self.memory.reinforce(INSTRUCTIONS);

        let mut report = SummaryReport {
            repo: request.repo.clone(),
            branch: request.branch.clone(),
            ..SummaryReport::default()
        };
        let params = ListFilesParams {
            repo: request.repo.clone(),
            branch: request.branch.clone(),
        };
        let files: Vec<String> = match ctx.call(names::LIST_FILES, &params).await? {
            Ok(files) => files,
            Err(e) => {
                report.summary = format!("could not list files: {}", e.message);
                return self.finish(report);
            }
        };
        report.files_total = files.len();
        self.memory.record(
            "Layout",
            &format!("{} file(s) on {}", files.len(), request.branch),
        );

        self.phases.transition_to(SummaryPhase::Reading)?;
        let selected = prioritize(&files, ctx.config().workflow.max_files);
        info!(
            agent = %ctx.id(),
            total = files.len(),
            selected = selected.len(),
            "Reading repository files"
        );
        for path in selected {
            let params = ReadFileParams {
                repo: request.repo.clone(),
                branch: request.branch.clone(),
                path: path.clone(),
            };
            match ctx.call::<_, String>(names::READ_FILE, &params).await? {
                Ok(content) => {
                    self.memory.record(&path, &content);
                    report.files_read.push(path);
                }
                Err(e) => {
                    debug!(agent = %ctx.id(), path = %path, error = %e, "Unreadable file");
                    report.unreadable.push(path);
                }
            }
            if self.memory.needs_reinforcement() {
                self.memory.reinforce(INSTRUCTIONS);
            }
        }

        self.phases.transition_to(SummaryPhase::Summarizing)?;
        report.folded = self.memory.folded();
        report.summary = self.memory.render();
        debug!(
            agent = %ctx.id(),
            size = self.memory.size(),
            folded = report.folded,
            "Summary built"
        );
        self.finish(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prioritize_orders_readme_manifest_source() {
        let files = paths(&[
            "src/lib.rs",
            "Cargo.lock",
            "Cargo.toml",
            "assets/logo.png",
            "README.md",
            "src/deep/nested/mod.rs",
            "LICENSE",
        ]);
        let picked = prioritize(&files, 10);
        assert_eq!(
            picked,
            paths(&[
                "README.md",
                "Cargo.toml",
                "src/lib.rs",
                "src/deep/nested/mod.rs",
                "LICENSE",
            ])
        );
    }

    #[test]
    fn test_prioritize_respects_cap() {
        let files: Vec<String> = (0..100).map(|i| format!("src/f{:03}.py", i)).collect();
        assert_eq!(prioritize(&files, 40).len(), 40);
        assert!(prioritize(&files, 0).is_empty());
    }

    #[test]
    fn test_phase_cycle_and_memory_reset() {
        let config = MemoryConfig::default();
        let mut summarizer = RepoSummarizer::new("repo_understanding_agent".into(), &config);
        summarizer.on_waiting().unwrap();
        assert_eq!(summarizer.phase(), SummaryPhase::AwaitingRequest);
        summarizer.memory.record("a", "b");
        summarizer.on_failed();
        assert_eq!(summarizer.phase(), SummaryPhase::Idle);
        summarizer.memory.reset();
        assert_eq!(summarizer.memory().size(), 0);
    }
}
