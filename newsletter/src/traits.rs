use crate::sources::reddit_model::RawSubmission;
use crate::types::{Content, Result};
use async_trait::async_trait;

/// Trait for pulling raw submissions from a forum
#[async_trait]
pub trait SubmissionSource: Send + Sync {
    /// Human-readable name for this source
    fn source_name(&self) -> String;

    /// Fetch the currently "hot" submissions of `community`, at most `limit`,
    /// each with its top-level comment listing.
    ///
    /// An empty result is not an error.
    async fn hot(&self, community: &str, limit: usize) -> Result<Vec<RawSubmission>>;
}

/// Trait for turning a linked URL into article content
#[async_trait]
pub trait WebpageExtractor: Send + Sync {
    /// Returns a [`Content::Webpage`] for `url`.
    async fn extract(&self, url: &str) -> Result<Content>;
}
