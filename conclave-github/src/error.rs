//! Error types for GitHub operations

use conclave_core::tools::{ToolError, ToolErrorKind};
use thiserror::Error;

/// Result type for GitHub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during GitHub operations
#[derive(Error, Debug)]
pub enum Error {
    /// GitHub API error
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),

    /// Authentication error
    #[error("GitHub authentication error: {0}")]
    Auth(String),

    /// Pull request not found
    #[error("Pull request {0} not found")]
    PrNotFound(String),

    /// File, branch or repository not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded
    #[error("GitHub rate limit exceeded: {0}")]
    RateLimited(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify an octocrab error, naming `what` was requested
    pub(crate) fn from_octocrab(err: octocrab::Error, what: &str) -> Self {
        let message = match &err {
            octocrab::Error::GitHub { source, .. } => Some(source.message.clone()),
            _ => None,
        };
        let Some(message) = message else {
            return Error::Api(err);
        };
        let lower = message.to_ascii_lowercase();
        if lower.contains("not found") {
            Error::NotFound(what.to_string())
        } else if lower.contains("bad credentials") {
            Error::Auth("Invalid GitHub token".to_string())
        } else if lower.contains("rate limit") {
            Error::RateLimited(message)
        } else {
            Error::Api(err)
        }
    }
}

impl From<Error> for ToolError {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::NotFound(_) | Error::PrNotFound(_) => ToolErrorKind::NotFound,
            Error::Auth(_) | Error::RateLimited(_) | Error::Api(_) => ToolErrorKind::Unavailable,
            Error::Parse(_) => ToolErrorKind::InvalidParams,
            Error::Other(_) => ToolErrorKind::Execution,
        };
        ToolError::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_kinds() {
        let err: ToolError = Error::PrNotFound("o/r#3".into()).into();
        assert_eq!(err.kind, ToolErrorKind::NotFound);
        assert_eq!(err.message, "Pull request o/r#3 not found");

        let err: ToolError = Error::RateLimited("API rate limit exceeded".into()).into();
        assert!(err.is_retryable());

        let err: ToolError = Error::Auth("Invalid GitHub token".into()).into();
        assert_eq!(err.kind, ToolErrorKind::Unavailable);

        let err: ToolError = Error::Parse("bad repo".into()).into();
        assert_eq!(err.kind, ToolErrorKind::InvalidParams);
    }
}
