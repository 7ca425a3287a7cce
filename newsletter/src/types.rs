use std::path::PathBuf;

// Use the interfaces crate for the content model
pub use interfaces::content::{Content, ForumContent, Poll, Webpage};
pub use interfaces::defs::{Comment, ContentError, Post, PostFilter, PostList, MAX_TOP_COMMENTS};

use crate::config::ConfigError;
use crate::llm_adapter::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum NewsletterError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Failed to adapt submission {submission}: {reason}")]
    Adapter { submission: String, reason: String },

    #[error("Failed to access {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Stage {stage} aborted after a fatal error")]
    Aborted { stage: &'static str },

    #[error("Invalid newsletter name {0:?}: it must be a plain file name")]
    InvalidName(String),

    #[error("General error: {0}")]
    General(String),
}

impl NewsletterError {
    /// Errors that must stop a whole pipeline run rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NewsletterError::Llm(LlmError::Authentication(_)))
    }

    pub fn adapter(submission: impl Into<String>, reason: impl Into<String>) -> Self {
        NewsletterError::Adapter {
            submission: submission.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NewsletterError>;
