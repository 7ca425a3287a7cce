use crate::config::PipelineSettings;
use crate::digest::{check_newsletter_name, default_newsletter_name, News, Newsletter};
use crate::llm_adapter::LlmClient;
use crate::processing::{run_item, FilterStage, ItemState, ProcessingStage, RetryPolicy, SummarizationStage};
use crate::types::{NewsletterError, Post, PostList, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bounded admission for model calls, shared by every stage of one run.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    width: usize,
}

impl WorkerPool {
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            permits: Arc::new(Semaphore::new(width)),
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Wait for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| NewsletterError::General("worker pool is closed".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&PipelineSettings> for PipelineConfig {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            workers: settings.workers,
            retry: RetryPolicy::with_retries(settings.num_retries),
        }
    }
}

/// Runs the filter and summarization stages over a [`PostList`].
pub struct Summarizer {
    llm: Arc<dyn LlmClient>,
    config: PipelineConfig,
    newsletter_folder: PathBuf,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LlmClient>, config: PipelineConfig, newsletter_folder: impl Into<PathBuf>) -> Self {
        Self {
            llm,
            config,
            newsletter_folder: newsletter_folder.into(),
        }
    }

    /// Relevance verdict for a single post, `None` when no verdict was reached.
    ///
    /// Without an interest profile, or with a blank one, every post is relevant
    /// and no model is called.
    pub async fn filter_post(
        &self,
        post: &Post,
        models: &[String],
        user_interests: Option<&str>,
    ) -> Result<Option<bool>> {
        let Some(interests) = user_interests.filter(|interests| !interests.trim().is_empty()) else {
            return Ok(Some(true));
        };
        let stage = FilterStage::new(interests);
        let state = run_item(
            self.llm.as_ref(),
            &stage,
            post,
            models,
            &self.config.retry,
            &WorkerPool::new(self.config.workers),
            &CancellationToken::new(),
        )
        .await?;
        Ok(state.into_accepted())
    }

    pub async fn summarize_post(&self, post: &Post, models: &[String]) -> Result<Option<News>> {
        let state = run_item(
            self.llm.as_ref(),
            &SummarizationStage::new(),
            post,
            models,
            &self.config.retry,
            &WorkerPool::new(self.config.workers),
            &CancellationToken::new(),
        )
        .await?;
        Ok(state.into_accepted())
    }

    /// Filter then summarize every post, collecting the results into a
    /// [`Newsletter`] in input order. The newsletter is not saved.
    ///
    /// # Errors
    ///
    /// Fails when a model list is empty, the name is not a plain file name, or
    /// a model rejects the credentials.
    /// Per-item failures only drop that item.
    pub async fn summarize_post_list(
        &self,
        post_list: &PostList,
        filter_models: &[String],
        summary_models: &[String],
        user_interests: Option<&str>,
        newsletter_name: Option<String>,
    ) -> Result<Newsletter> {
        if filter_models.is_empty() || summary_models.is_empty() {
            return Err(NewsletterError::General(
                "both filter and summary model lists must name at least one model".to_string(),
            ));
        }

        let name = newsletter_name.unwrap_or_else(default_newsletter_name);
        check_newsletter_name(&name)?;
        let pool = WorkerPool::new(self.config.workers);
        let cancel = CancellationToken::new();

        info!(
            "Building newsletter '{}' from {} posts of {} ({} workers)",
            name,
            post_list.len(),
            post_list.source,
            pool.width()
        );

        let relevant: Vec<Post> = match user_interests.filter(|interests| !interests.trim().is_empty()) {
            Some(interests) => {
                let stage = Arc::new(FilterStage::new(interests));
                self.run_stage(&pool, stage, post_list.posts.clone(), filter_models, &cancel)
                    .await?
                    .into_iter()
                    .filter_map(|(post, relevant)| relevant.then_some(post))
                    .collect()
            }
            None => {
                info!("No interest profile, accepting all {} posts", post_list.len());
                post_list.posts.clone()
            }
        };
        info!("{} of {} posts are relevant", relevant.len(), post_list.len());

        let news: Vec<News> = self
            .run_stage(&pool, Arc::new(SummarizationStage::new()), relevant, summary_models, &cancel)
            .await?
            .into_iter()
            .map(|(_, news)| news)
            .collect();
        info!("Summarized {} news for '{}'", news.len(), name);

        Ok(Newsletter::new(news, name, &self.newsletter_folder))
    }

    /// Fan each post out to its own task and collect accepted results keyed
    /// by input position.
    async fn run_stage<S>(
        &self,
        pool: &WorkerPool,
        stage: Arc<S>,
        posts: Vec<Post>,
        models: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<(Post, S::Output)>>
    where
        S: ProcessingStage + 'static,
    {
        let stage_name = stage.stage_name();
        let models: Arc<[String]> = models.into();
        let mut tasks = JoinSet::new();

        for (index, post) in posts.into_iter().enumerate() {
            let llm = Arc::clone(&self.llm);
            let stage = Arc::clone(&stage);
            let models = Arc::clone(&models);
            let policy = self.config.retry.clone();
            let cancel = cancel.clone();
            let pool = pool.clone();

            tasks.spawn(async move {
                let result =
                    run_item(llm.as_ref(), stage.as_ref(), &post, &models, &policy, &pool, &cancel).await;
                if matches!(&result, Err(e) if e.is_fatal()) {
                    cancel.cancel();
                }
                (index, post, result)
            });
        }

        let mut accepted = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, post, Ok(ItemState::Accepted(value)))) => {
                    debug!(stage = stage_name, item = %post.label(), "Accepted");
                    accepted.insert(index, (post, value));
                }
                Ok((_, post, Ok(_))) => {
                    info!(stage = stage_name, item = %post.label(), "Excluded after exhausting retries");
                }
                Ok((_, post, Err(e))) if e.is_fatal() => {
                    error!(stage = stage_name, item = %post.label(), "Fatal error, aborting run: {}", e);
                    tasks.abort_all();
                    return Err(e);
                }
                Ok((_, post, Err(NewsletterError::Aborted { .. }))) => {
                    debug!(stage = stage_name, item = %post.label(), "Skipped after abort");
                }
                Ok((_, post, Err(e))) => {
                    error!(stage = stage_name, item = %post.label(), "Excluded: {}", e);
                }
                Err(e) => {
                    warn!(stage = stage_name, "Task failed: {}", e);
                }
            }
        }

        Ok(accepted.into_values().collect())
    }
}
