//! GitHub API client using octocrab

use crate::{Error, Result};
use conclave_core::secrets::Secrets;
use octocrab::Octocrab;
use tracing::{debug, info};

/// Authenticated GitHub API client shared by the GitHub tools
#[derive(Clone)]
pub struct GitHubClient {
    client: Octocrab,
}

impl GitHubClient {
    /// Create a client authenticated with the configured token
    ///
    /// Token is loaded from (in priority order):
    /// 1. GITHUB_TOKEN or GITHUB_ACCESS_TOKEN environment variable
    /// 2. ~/.config/conclave/secrets.toml
    pub fn new() -> Result<Self> {
        let secrets = Secrets::load().map_err(|e| Error::Auth(e.to_string()))?;

        let token = secrets.github_token().ok_or_else(|| {
            Error::Auth(
                "GitHub token not found. Set GITHUB_TOKEN environment variable \
                 or add token to ~/.config/conclave/secrets.toml"
                    .to_string(),
            )
        })?;

        let client = Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|e| Error::Auth(format!("Failed to create GitHub client: {}", e)))?;

        info!("Created GitHub client");
        Ok(Self { client })
    }

    /// Wrap an already configured octocrab instance
    pub fn with_octocrab(client: Octocrab) -> Self {
        Self { client }
    }

    /// Get the underlying octocrab client
    pub fn client(&self) -> &Octocrab {
        &self.client
    }

    /// Test the connection by fetching repository info
    pub async fn test_connection(&self, repo: &str) -> Result<()> {
        let (owner, name) = parse_github_url(repo)?;
        debug!(owner = %owner, repo = %name, "Testing GitHub connection");

        self.client
            .repos(&owner, &name)
            .get()
            .await
            .map_err(|e| Error::from_octocrab(e, &format!("repository {}/{}", owner, name)))?;

        info!(owner = %owner, repo = %name, "GitHub connection successful");
        Ok(())
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient").finish_non_exhaustive()
    }
}

/// Parse a repository reference into owner and repo
///
/// Accepts `owner/repo`, `github.com/owner/repo`, HTTPS URLs and
/// `git@github.com:owner/repo.git`. Extra path segments such as
/// `/pull/7` are ignored.
pub fn parse_github_url(reference: &str) -> Result<(String, String)> {
    let reference = reference.trim();
    let path = if reference.starts_with("https://") || reference.starts_with("http://") {
        let url = url::Url::parse(reference).map_err(|e| Error::Parse(e.to_string()))?;
        url.path().trim_start_matches('/').to_string()
    } else if let Some(rest) = reference.strip_prefix("git@") {
        rest.split_once(':')
            .map(|(_, path)| path.to_string())
            .ok_or_else(|| Error::Parse(format!("Invalid SSH URL: {}", reference)))?
    } else {
        reference
            .strip_prefix("github.com/")
            .unwrap_or(reference)
            .to_string()
    };

    let mut parts = path.split('/').filter(|p| !p.is_empty());
    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) => Ok((
            owner.to_string(),
            repo.trim_end_matches(".git").to_string(),
        )),
        _ => Err(Error::Parse(format!(
            "Invalid repository reference: {}. Expected owner/repo",
            reference
        ))),
    }
}
