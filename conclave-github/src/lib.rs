//! Conclave GitHub - GitHub-backed tools for Conclave agents
//!
//! Implements the source-control and file-store collaborators of
//! `conclave-core` on top of the GitHub REST API.

mod client;
mod error;
mod files;
mod pulls;

pub use client::{parse_github_url, GitHubClient};
pub use error::{Error, Result};
pub use files::GitHubFileStore;
pub use pulls::GitHubSourceControl;
