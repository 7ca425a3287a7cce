use crate::digest::News;
use crate::llm_adapter::{GenerationOptions, LlmClient, LlmError};
use crate::parser::{extract_relevance, extract_summary};
use crate::pipeline::WorkerPool;
use crate::types::{NewsletterError, Post, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(15);
pub const UNAVAILABLE_BACKOFF: Duration = Duration::from_secs(3);

/// One pass of the pipeline: how a post becomes a prompt, and how the model
/// output becomes a result.
pub trait ProcessingStage: Send + Sync {
    type Output: Send + 'static;

    /// Get the name of this processing stage
    fn stage_name(&self) -> &'static str;

    fn format_prompt(&self, post: &Post) -> Result<String>;

    /// `None` means the output was malformed.
    fn extract(&self, post: &Post, output: &str) -> Option<Self::Output>;

    fn generation_options(&self) -> Option<&GenerationOptions> {
        None
    }
}

/// Stage 1: decide whether a post matches the reader's interests.
pub struct FilterStage {
    user_interests: String,
}

impl FilterStage {
    pub fn new(user_interests: impl Into<String>) -> Self {
        Self {
            user_interests: user_interests.into(),
        }
    }
}

impl ProcessingStage for FilterStage {
    type Output = bool;

    fn stage_name(&self) -> &'static str {
        "filter"
    }

    fn format_prompt(&self, post: &Post) -> Result<String> {
        let post = serde_json::to_string_pretty(post)?;
        Ok(filter_prompt(&post, &self.user_interests))
    }

    fn extract(&self, _post: &Post, output: &str) -> Option<bool> {
        extract_relevance(output)
    }
}

/// Stage 2: turn a post and its discussion into one [`News`] entry.
#[derive(Default)]
pub struct SummarizationStage;

impl SummarizationStage {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessingStage for SummarizationStage {
    type Output = News;

    fn stage_name(&self) -> &'static str {
        "summarize"
    }

    fn format_prompt(&self, post: &Post) -> Result<String> {
        let post = serde_json::to_string_pretty(post)?;
        Ok(summarize_prompt(&post))
    }

    fn extract(&self, post: &Post, output: &str) -> Option<News> {
        let (title, description) = extract_summary(output)?;
        Some(News {
            title,
            description,
            sources: vec![post.permalink.clone().unwrap_or_else(|| post.label())],
        })
    }
}

fn filter_prompt(post: &str, user_interests: &str) -> String {
    format!(
        r#"
Below is a JSON data holding simplified information about a social media post. The top level field refer to the information for the post, such as votes specify how many upvotes. The comments sections hold a list of objects containing information about each comment as well as replies to comments, if any.

Post:

{post}

Your task is to detect whether the content of the post matches any of user interests. If so, reply with "Relevant". Else reply with "Not relevant".

User interests:

```
{user_interests}
```

Wrap your final response (i.e. "Relevant" or "Not relevant") with <answer></answer> tag.
"#
    )
}

fn summarize_prompt(post: &str) -> String {
    format!(
        r#"
Summarize the following social media post contents and the overall responses accurately into a paragraph. Ensure that the summary captures the main points and tone of both the original post and the replies.

Do not mention anything about the votes or specific users in the summary.
The summary needs both a title and a body.

Wrap title in <title></title>.
Wrap body in <body></body>.

Post:

{post}

Summary:

"#
    )
}

/// Attempt budget and back-off intervals shared by both stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt, whatever caused them.
    pub num_retries: u32,
    pub rate_limit_backoff: Duration,
    pub unavailable_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            num_retries: 1,
            rate_limit_backoff: RATE_LIMIT_BACKOFF,
            unavailable_backoff: UNAVAILABLE_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(num_retries: u32) -> Self {
        Self {
            num_retries,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.num_retries.saturating_add(1)
    }
}

/// What a single generate-and-extract attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome<T> {
    Extracted(T),
    Malformed,
    RateLimited,
    Unavailable,
}

/// Per-item progress through a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemState<T> {
    Pending,
    Attempting {
        model_index: usize,
        attempt: u32,
    },
    Retrying {
        model_index: usize,
        attempts_made: u32,
        wait: Duration,
    },
    Accepted(T),
    Failed {
        attempts: u32,
        model_index: usize,
    },
}

impl<T> ItemState<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Accepted(_) | ItemState::Failed { .. })
    }

    pub fn into_accepted(self) -> Option<T> {
        match self {
            ItemState::Accepted(value) => Some(value),
            _ => None,
        }
    }
}

/// Next state after attempt number `attempts_made` against `model_index`.
///
/// The model index only moves forward and stops at the last candidate. Once
/// the budget is spent the item fails straight away, without waiting.
pub fn transition<T>(
    model_index: usize,
    attempts_made: u32,
    outcome: AttemptOutcome<T>,
    model_count: usize,
    policy: &RetryPolicy,
) -> ItemState<T> {
    let last_index = model_count.saturating_sub(1);
    let (next_index, wait) = match outcome {
        AttemptOutcome::Extracted(value) => return ItemState::Accepted(value),
        AttemptOutcome::Malformed => (model_index, Duration::ZERO),
        AttemptOutcome::RateLimited => (model_index, policy.rate_limit_backoff),
        AttemptOutcome::Unavailable => ((model_index + 1).min(last_index), policy.unavailable_backoff),
    };

    if attempts_made >= policy.max_attempts() {
        return ItemState::Failed {
            attempts: attempts_made,
            model_index: next_index,
        };
    }

    ItemState::Retrying {
        model_index: next_index,
        attempts_made,
        wait,
    }
}

/// Drive one post through `stage` until it is accepted or fails.
///
/// Returns a terminal [`ItemState`]. Authentication failures and errors the
/// retry protocol does not model are returned as `Err`. A cancelled token
/// stops the item before its next model call, and an authentication failure
/// cancels it for every other item sharing the token.
///
/// A slot of `pool` is held only while the model is being called, never
/// during a back-off.
pub async fn run_item<S>(
    llm: &dyn LlmClient,
    stage: &S,
    post: &Post,
    models: &[String],
    policy: &RetryPolicy,
    pool: &WorkerPool,
    cancel: &CancellationToken,
) -> Result<ItemState<S::Output>>
where
    S: ProcessingStage + ?Sized,
{
    if models.is_empty() {
        return Err(NewsletterError::General(format!(
            "no models configured for the {} stage",
            stage.stage_name()
        )));
    }

    let stage_name = stage.stage_name();
    let item = post.label();
    let prompt = stage.format_prompt(post)?;
    let mut state = ItemState::Pending;

    loop {
        state = match state {
            ItemState::Pending => ItemState::Attempting {
                model_index: 0,
                attempt: 1,
            },
            ItemState::Attempting {
                model_index,
                attempt,
            } => {
                let _permit = tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(NewsletterError::Aborted { stage: stage_name });
                    }
                    permit = pool.acquire() => permit?,
                };
                if cancel.is_cancelled() {
                    return Err(NewsletterError::Aborted { stage: stage_name });
                }

                let model = &models[model_index];
                let outcome = match llm
                    .generate(&prompt, model, stage.generation_options())
                    .await
                {
                    Ok(output) => {
                        debug!(stage = stage_name, item = %item, model = %model, "Model output: {}", output);
                        match stage.extract(post, &output) {
                            Some(value) => AttemptOutcome::Extracted(value),
                            None => {
                                info!(stage = stage_name, item = %item, model = %model, attempt, "Malformed model output");
                                AttemptOutcome::Malformed
                            }
                        }
                    }
                    Err(LlmError::RateLimit(reason)) => {
                        info!(stage = stage_name, item = %item, model = %model, attempt, "Rate limited: {}", reason);
                        AttemptOutcome::RateLimited
                    }
                    Err(LlmError::ServiceUnavailable(reason)) => {
                        info!(stage = stage_name, item = %item, model = %model, attempt, "Model unavailable: {}", reason);
                        AttemptOutcome::Unavailable
                    }
                    Err(e) => {
                        let error = NewsletterError::from(e);
                        if error.is_fatal() {
                            // siblings waiting for this slot must see the cancellation
                            cancel.cancel();
                        }
                        return Err(error);
                    }
                };

                transition(model_index, attempt, outcome, models.len(), policy)
            }
            ItemState::Retrying {
                model_index,
                attempts_made,
                wait,
            } => {
                if !wait.is_zero() {
                    debug!(stage = stage_name, item = %item, "Backing off for {:?}", wait);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(NewsletterError::Aborted { stage: stage_name });
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                ItemState::Attempting {
                    model_index,
                    attempt: attempts_made + 1,
                }
            }
            terminal @ (ItemState::Accepted(_) | ItemState::Failed { .. }) => {
                if let ItemState::Failed { attempts, .. } = &terminal {
                    warn!(stage = stage_name, item = %item, attempts, "No usable result, giving up");
                }
                return Ok(terminal);
            }
        };
    }
}
