use crate::digest::Newsletter;
use crate::pipeline::Summarizer;
use crate::sources::{RedditScraper, REDDIT_SOURCE};
use crate::state::Storage;
use crate::types::{NewsletterError, PostList, Result};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// End-to-end run: scrape preferred communities, summarize, persist.
pub struct NewsletterGenerator {
    /// `None` when no Reddit credentials are configured; only saved snapshots
    /// can be summarized then.
    scraper: Option<RedditScraper>,
    summarizer: Summarizer,
    storage: Storage,
    scrape_limit: usize,
}

impl NewsletterGenerator {
    pub fn new(scraper: Option<RedditScraper>, summarizer: Summarizer, storage: Storage, scrape_limit: usize) -> Self {
        Self {
            scraper,
            summarizer,
            storage,
            scrape_limit,
        }
    }

    /// Scrape every preferred community and save one raw snapshot per community.
    ///
    /// A snapshot that cannot be written fails the whole scrape.
    pub async fn scrape(&self) -> Result<BTreeMap<String, PostList>> {
        let Some(scraper) = &self.scraper else {
            return Err(NewsletterError::Source(
                "Reddit credentials are not configured".to_string(),
            ));
        };
        let preferences = self.storage.reddit_preferences()?;
        if preferences.is_empty() {
            warn!(
                "No communities configured in {}",
                self.storage.settings().reddit_preferences_file().display()
            );
            return Ok(BTreeMap::new());
        }

        let scraped = scraper
            .scrape_with_preferences(&preferences, self.scrape_limit)
            .await;

        for (community, post_list) in &scraped {
            self.storage.save_post_list(community, post_list).map_err(|e| {
                error!("Failed to save snapshot for r/{}: {}", community, e);
                e
            })?;
        }

        Ok(scraped)
    }

    /// Build a newsletter from already scraped lists and save it.
    pub async fn summarize(
        &self,
        lists: impl IntoIterator<Item = PostList>,
        newsletter_name: Option<String>,
        filter_models: &[String],
        summary_models: &[String],
    ) -> Result<Newsletter> {
        let merged = PostList::from_lists(REDDIT_SOURCE, lists);
        let interests = self.storage.user_interests()?;

        let newsletter = self
            .summarizer
            .summarize_post_list(
                &merged,
                filter_models,
                summary_models,
                interests.as_deref(),
                newsletter_name,
            )
            .await?;

        newsletter.save()?;
        Ok(newsletter)
    }

    /// Scrape, summarize and persist one newsletter.
    pub async fn generate(
        &self,
        newsletter_name: Option<String>,
        filter_models: &[String],
        summary_models: &[String],
    ) -> Result<Newsletter> {
        let scraped = self.scrape().await?;
        let total: usize = scraped.values().map(PostList::len).sum();
        info!("Scraped {} posts from {} communities", total, scraped.len());

        self.summarize(scraped.into_values(), newsletter_name, filter_models, summary_models)
            .await
    }

    /// Build a newsletter from the raw snapshots already on disk.
    pub async fn summarize_saved(
        &self,
        newsletter_name: Option<String>,
        filter_models: &[String],
        summary_models: &[String],
    ) -> Result<Newsletter> {
        let mut lists = Vec::new();
        for source in self.storage.list_raw_snapshots()? {
            lists.push(self.storage.load_post_list(&source)?);
        }
        info!("Loaded {} raw snapshots", lists.len());

        self.summarize(lists, newsletter_name, filter_models, summary_models)
            .await
    }
}
