//! Error taxonomy
//!
//! Per-node failures (a completion that never succeeds, a reply that does not
//! parse) are absorbed inside the summarizer and never show up here. What is
//! left are the failures that abort a whole build.

use thiserror::Error;

/// Failure of one call to the completion capability
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("{0} not set")]
    MissingApiKey(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("no content in model response")]
    EmptyResponse,
    #[error("{0}")]
    Other(String),
}

/// Failure of the item source (fetch client)
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("item source unavailable: {0}")]
    Unavailable(String),
    #[error("item source rejected credentials")]
    Unauthorized,
    #[error("malformed item payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cache payload could not be (de)serialized: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("cache lock poisoned")]
    Poisoned,
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write settings: {0}")]
    Io(#[from] std::io::Error),
}

/// Whole-build failure, reported to the requester after the cache entry is cleared
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] SourceError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("build failed: {0}")]
    Build(String),
}

impl PipelineError {
    /// Message safe to show to the end user
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::Fetch(_) => "Service unavailable, please try again later.",
            PipelineError::Cache(_) | PipelineError::Build(_) => {
                "Something went wrong while building your topics. Please retry."
            }
        }
    }

    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, PipelineError::Fetch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_by_class() {
        let fetch = PipelineError::from(SourceError::Unauthorized);
        assert!(fetch.is_fetch_failure());
        assert!(fetch.user_message().contains("unavailable"));

        let build = PipelineError::Build("boom".to_string());
        assert!(!build.is_fetch_failure());
        assert!(build.user_message().contains("retry"));
    }

    #[test]
    fn test_completion_error_display() {
        let err = CompletionError::Api { status: 429, body: "slow down".to_string() };
        assert_eq!(err.to_string(), "API error 429: slow down");
        assert_eq!(CompletionError::MissingApiKey("OPENAI_API_KEY").to_string(), "OPENAI_API_KEY not set");
    }
}
