//! Secrets for tool backends
//!
//! Credentials live in `~/.config/conclave/secrets.toml`, separate from the
//! main configuration, and the file must be private to its owner (0600 on
//! Unix). Environment variables take precedence over the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Environment variables checked for a GitHub token, in order
const GITHUB_TOKEN_VARS: &[&str] = &["GITHUB_TOKEN", "GITHUB_ACCESS_TOKEN"];

/// Secrets structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Secrets {
    pub github: GitHubSecrets,
}

/// GitHub credentials
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GitHubSecrets {
    /// Personal access token
    pub token: Option<String>,
}

impl Secrets {
    /// Load secrets from the default location, or empty secrets if absent
    pub fn load() -> Result<Self> {
        match Self::default_secrets_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load secrets from a specific file, rejecting group/world readable files
    pub fn load_from_file(path: &Path) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mode = std::fs::metadata(path).map_err(Error::Io)?.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(Error::Config(format!(
                    "Secrets file {} has insecure permissions {:o}. Please run: chmod 600 {}",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }
        }

        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        let mut secrets: Secrets = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse secrets: {}", e)))?;

        if let Some(token) = secrets.github.token.as_mut() {
            *token = token.trim().to_string();
        }

        Ok(secrets)
    }

    /// `~/.config/conclave/secrets.toml` on Unix
    pub fn default_secrets_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("conclave").join("secrets.toml"))
    }

    /// GitHub token, preferring the environment over the secrets file
    pub fn github_token(&self) -> Option<String> {
        self.github_token_with(|key| std::env::var(key).ok())
    }

    fn github_token_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        for var in GITHUB_TOKEN_VARS {
            if let Some(token) = lookup(var).map(|t| t.trim().to_string()) {
                if !token.is_empty() {
                    debug!(var, "Using GitHub token from environment");
                    return Some(token);
                }
            }
        }

        self.github.token.clone().filter(|t| !t.is_empty())
    }
}
