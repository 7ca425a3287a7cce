use crate::sources::reddit_model::{CommentThing, MediaMetadata, RawComment, RawSubmission};
use crate::traits::{SubmissionSource, WebpageExtractor};
use crate::types::{
    Comment, Content, ForumContent, NewsletterError, Poll, Post, PostFilter, PostList, Result,
    MAX_TOP_COMMENTS,
};
use chrono::DateTime;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

pub const REDDIT_SOURCE: &str = "reddit";
const REDDIT_BASE_URL: &str = "https://www.reddit.com";

/// Which community to scrape and which posts to keep from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub subreddit_name: String,
    #[serde(default)]
    pub post_filter: PostFilter,
}

/// Turns raw Reddit submissions into [`Post`]s.
pub struct RedditAdapter {
    extractor: Arc<dyn WebpageExtractor>,
    workers: usize,
}

impl RedditAdapter {
    pub fn new(extractor: Arc<dyn WebpageExtractor>, workers: usize) -> Self {
        Self {
            extractor,
            workers: workers.max(1),
        }
    }

    /// Convert one submission, extracting its primary content and top comments.
    pub async fn adapt(&self, submission: RawSubmission) -> Result<Post> {
        let content = self.parse_submission_content(&submission).await?;
        let comments = top_comments(&submission.comments);

        Ok(Post {
            title: Some(submission.title.clone()),
            content: Some(content),
            upvotes: Some(submission.ups),
            downvotes: derive_downvotes(submission.ups, submission.upvote_ratio),
            author: submission.author_name().map(str::to_string),
            created_utc: Some(submission.created_utc as i64),
            permalink: absolute_permalink(&submission.permalink),
            comments,
        })
    }

    /// Adapt every submission concurrently, then keep the posts `filter` accepts.
    ///
    /// Completion order is not preserved. Submissions that fail to adapt are
    /// logged and dropped.
    pub async fn adapt_batch(&self, submissions: Vec<RawSubmission>, filter: &PostFilter) -> PostList {
        let total = submissions.len();

        let adapted: Vec<Post> = stream::iter(submissions)
            .map(|submission| async move {
                let id = submission.id.clone();
                (id, self.adapt(submission).await)
            })
            .buffer_unordered(self.workers)
            .filter_map(|(id, result)| async move {
                match result {
                    Ok(post) => Some(post),
                    Err(e) => {
                        error!(submission = %id, "Dropping submission: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        let posts: Vec<Post> = adapted.into_iter().filter(|post| filter.accept(post)).collect();

        info!("Adapted {} submissions, {} accepted by filter", total, posts.len());
        PostList::new(REDDIT_SOURCE, posts)
    }

    async fn parse_submission_content(&self, submission: &RawSubmission) -> Result<ForumContent> {
        let mut content = ForumContent::new();

        if let Some(poll) = &submission.poll_data {
            let result: BTreeMap<String, u64> = poll
                .options
                .iter()
                .map(|option| (option.text.clone(), option.vote_count.unwrap_or(0)))
                .collect();
            content.add(Content::Poll(Poll {
                start_time: None,
                end_time: poll
                    .voting_end_timestamp
                    .and_then(DateTime::from_timestamp_millis),
                description: None,
                total_votes: poll.total_vote_count,
                result,
            }));
        }

        if submission.is_self {
            content.add(Content::text(submission.selftext.clone()));
            return Ok(content);
        }

        match classify_link(&submission.url) {
            LinkKind::Video => {
                let media = submission
                    .crosspost_origin()
                    .and_then(|parent| parent.media.as_ref())
                    .or(submission.media.as_ref());
                let url = media.and_then(video_fallback_url).ok_or_else(|| {
                    NewsletterError::adapter(&submission.id, "video submission has no playable media")
                })?;
                content.add(Content::video(url));
            }
            LinkKind::Images => {
                let images = match (&submission.media_metadata, submission.crosspost_origin()) {
                    (Some(metadata), _) => gallery_urls(metadata, submission.gallery_data.as_ref()),
                    (None, Some(parent)) if parent.media_metadata.is_some() => {
                        debug!(submission = %submission.id, "Reading images from crosspost parent");
                        parent
                            .media_metadata
                            .as_ref()
                            .map(|metadata| gallery_urls(metadata, parent.gallery_data.as_ref()))
                            .unwrap_or_default()
                    }
                    _ => vec![submission.url.clone()],
                };
                for url in images {
                    content.add(Content::image(url));
                }
            }
            LinkKind::Webpage => match self.extractor.extract(&submission.url).await {
                Ok(article) => content.add(article),
                Err(e) => {
                    warn!(
                        submission = %submission.id,
                        url = %submission.url,
                        "Failed to extract linked webpage: {}", e
                    );
                }
            },
        }

        Ok(content)
    }
}

/// Scrapes communities through a [`SubmissionSource`] and adapts the results.
pub struct RedditScraper {
    source: Arc<dyn SubmissionSource>,
    adapter: RedditAdapter,
}

impl RedditScraper {
    pub fn new(source: Arc<dyn SubmissionSource>, adapter: RedditAdapter) -> Self {
        Self { source, adapter }
    }

    pub async fn scrape(&self, community: &str, filter: &PostFilter, limit: usize) -> Result<PostList> {
        info!("Scraping r/{} (limit {}) from {}", community, limit, self.source.source_name());
        let submissions = self.source.hot(community, limit).await?;

        if submissions.is_empty() {
            warn!("No submissions returned for r/{}", community);
            return Ok(PostList::empty(REDDIT_SOURCE));
        }

        Ok(self.adapter.adapt_batch(submissions, filter).await)
    }

    /// Scrape each preferred community; a community that fails is logged and skipped.
    pub async fn scrape_with_preferences(
        &self,
        preferences: &[Preference],
        limit: usize,
    ) -> BTreeMap<String, PostList> {
        let mut results = BTreeMap::new();
        for preference in preferences {
            match self
                .scrape(&preference.subreddit_name, &preference.post_filter, limit)
                .await
            {
                Ok(post_list) => {
                    results.insert(preference.subreddit_name.clone(), post_list);
                }
                Err(e) => {
                    error!("Failed to scrape r/{}: {}", preference.subreddit_name, e);
                }
            }
        }
        results
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Video,
    Images,
    Webpage,
}

/// Decide what a link submission points at from its URL alone.
pub fn classify_link(link: &str) -> LinkKind {
    let Ok(parsed) = Url::parse(link) else {
        return LinkKind::Webpage;
    };
    match parsed.host_str() {
        Some("v.redd.it") => LinkKind::Video,
        Some("i.redd.it") => LinkKind::Images,
        _ if parsed.path().contains("gallery") => LinkKind::Images,
        _ => LinkKind::Webpage,
    }
}

/// Comments with an author, highest score first, at most [`MAX_TOP_COMMENTS`].
pub fn top_comments(things: &[CommentThing]) -> Vec<Comment> {
    let mut candidates: Vec<&RawComment> = things
        .iter()
        .filter_map(|thing| match thing {
            CommentThing::Comment(comment) if comment.author_name().is_some() => Some(comment),
            _ => None,
        })
        .collect();
    candidates.sort_by(|a, b| b.score.cmp(&a.score));

    candidates
        .into_iter()
        .take(MAX_TOP_COMMENTS)
        .map(|comment| Comment {
            author: comment.author_name().map(str::to_string),
            content: Some(ForumContent::from(vec![Content::text(comment.body.clone())])),
            upvotes: Some(comment.ups),
            downvotes: None,
            created_utc: Some(comment.created_utc as i64),
            permalink: comment.permalink.as_deref().and_then(absolute_permalink),
            replies: None,
        })
        .collect()
}

/// Reddit only reports the ratio, so downvotes are an approximation.
pub fn derive_downvotes(upvotes: i64, upvote_ratio: f64) -> Option<i64> {
    if upvote_ratio > 0.0 && upvote_ratio.is_finite() {
        Some((upvotes as f64 * (1.0 / upvote_ratio - 1.0)) as i64)
    } else {
        None
    }
}

fn absolute_permalink(permalink: &str) -> Option<String> {
    if permalink.is_empty() {
        None
    } else if permalink.starts_with("http") {
        Some(permalink.to_string())
    } else {
        Some(format!("{}{}", REDDIT_BASE_URL, permalink))
    }
}

fn video_fallback_url(media: &Value) -> Option<String> {
    media
        .get("reddit_video")?
        .get("fallback_url")?
        .as_str()
        .map(str::to_string)
}

/// Image URLs of a gallery, in gallery order when it is known.
fn gallery_urls(
    metadata: &HashMap<String, MediaMetadata>,
    gallery: Option<&crate::sources::reddit_model::GalleryData>,
) -> Vec<String> {
    let url_of = |id: &str| {
        metadata
            .get(id)
            .and_then(|entry| entry.s.as_ref())
            .and_then(|source| source.best_url())
            .map(str::to_string)
    };

    match gallery {
        Some(gallery) if !gallery.items.is_empty() => gallery
            .items
            .iter()
            .filter_map(|item| url_of(&item.media_id))
            .collect(),
        _ => {
            let mut ids: Vec<&String> = metadata.keys().collect();
            ids.sort();
            ids.into_iter().filter_map(|id| url_of(id)).collect()
        }
    }
}
