//! Agent identity and role definitions
//!
//! Each role is a specialized participant of the coordination protocol:
//! - Interface: takes user instructions and aggregates final answers
//! - DiffReviewer: computes which functions a change touches
//! - TestRunner: selects and executes tests for a change set
//! - DocChecker: finds documentation that may be stale after a change
//! - RepoSummarizer: explores a repository file by file and summarizes it
//! - TestAdvisor: evaluates unit-test coverage of the files a PR touches

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tools::names;

/// Unique agent identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The role an agent plays in a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Interface,
    DiffReviewer,
    TestRunner,
    DocChecker,
    RepoSummarizer,
    TestAdvisor,
}

impl AgentRole {
    /// Get all roles
    pub fn all() -> &'static [AgentRole] {
        &[
            AgentRole::Interface,
            AgentRole::DiffReviewer,
            AgentRole::TestRunner,
            AgentRole::DocChecker,
            AgentRole::RepoSummarizer,
            AgentRole::TestAdvisor,
        ]
    }

    /// Short name for this role
    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::Interface => "interface",
            AgentRole::DiffReviewer => "diff_reviewer",
            AgentRole::TestRunner => "test_runner",
            AgentRole::DocChecker => "doc_checker",
            AgentRole::RepoSummarizer => "repo_summarizer",
            AgentRole::TestAdvisor => "test_advisor",
        }
    }

    /// Conventional agent id used when a deployment runs one agent per role
    pub fn default_id(&self) -> AgentId {
        let id = match self {
            AgentRole::Interface => "user_interaction_agent",
            AgentRole::DiffReviewer => "codediff_review_agent",
            AgentRole::TestRunner => "unit_test_runner_agent",
            AgentRole::DocChecker => "doc_checker_agent",
            AgentRole::RepoSummarizer => "repo_understanding_agent",
            AgentRole::TestAdvisor => "repo_unit_test_advisor_agent",
        };
        AgentId::from(id)
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            AgentRole::Interface => "Handles user instructions and coordinates tasks across agents",
            AgentRole::DiffReviewer => "Identifies which functions a change touches",
            AgentRole::TestRunner => "Runs the unit tests mapped to changed functions",
            AgentRole::DocChecker => "Finds documentation that may be stale after a change",
            AgentRole::RepoSummarizer => "Explores a repository and summarizes its structure",
            AgentRole::TestAdvisor => "Evaluates whether tests cover the files a PR changes",
        }
    }

    /// Tools this role may invoke by default
    pub fn default_capabilities(&self) -> &'static [&'static str] {
        match self {
            AgentRole::Interface => &[],
            AgentRole::DiffReviewer => &[names::GET_PR_CHANGES, names::COMPARE_FILES],
            AgentRole::TestRunner => &[names::CHECKOUT_PR, names::LIST_TESTS, names::RUN_TESTS],
            AgentRole::DocChecker => &[names::LOCATE_DOCS, names::READ_FILE],
            AgentRole::RepoSummarizer => &[names::LIST_FILES, names::READ_FILE],
            AgentRole::TestAdvisor => &[names::LIST_FILES, names::READ_FILE],
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "interface" | "user" => Ok(AgentRole::Interface),
            "diff_reviewer" | "diff" | "codediff" => Ok(AgentRole::DiffReviewer),
            "test_runner" | "tests" => Ok(AgentRole::TestRunner),
            "doc_checker" | "docs" => Ok(AgentRole::DocChecker),
            "repo_summarizer" | "summarizer" => Ok(AgentRole::RepoSummarizer),
            "test_advisor" | "advisor" => Ok(AgentRole::TestAdvisor),
            _ => Err(format!("Unknown agent role: {}", s)),
        }
    }
}

/// Liveness of a registered agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Liveness {
    /// Registered but not yet subscribed for deliveries
    #[default]
    Registered,
    /// Subscribed and receiving deliveries
    Active,
    /// Gone; can no longer post or be mentioned
    Disconnected,
}

/// A registered agent as seen by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: AgentId,
    pub role: AgentRole,
    pub description: String,
    /// Tool names this agent may invoke
    pub capabilities: BTreeSet<String>,
    pub liveness: Liveness,
}

impl AgentInfo {
    /// Create an agent with the default description and capabilities of its role
    pub fn new(id: impl Into<AgentId>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            role,
            description: role.description().to_string(),
            capabilities: role
                .default_capabilities()
                .iter()
                .map(|t| t.to_string())
                .collect(),
            liveness: Liveness::Registered,
        }
    }

    /// Agent for a role using its conventional id
    pub fn for_role(role: AgentRole) -> Self {
        Self::new(role.default_id(), role)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Replace the capability set
    pub fn with_capabilities<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this agent may invoke the named tool
    pub fn can_invoke(&self, tool: &str) -> bool {
        self.capabilities.contains(tool)
    }

    /// Whether the agent can still post and be mentioned
    pub fn is_live(&self) -> bool {
        self.liveness != Liveness::Disconnected
    }
}
