use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::ForumContent;

/// Upper bound on the comments kept per post.
pub const MAX_TOP_COMMENTS: usize = 10;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContentError {
    #[error("upvote ratio is undefined when a post has no votes")]
    UndefinedUpvoteRatio,

    #[error("post is missing {0} count")]
    MissingVotes(&'static str),

    #[error("post has a negative {0} count")]
    NegativeVotes(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub content: Option<ForumContent>,
    #[serde(default)]
    pub upvotes: Option<i64>,
    #[serde(default)]
    pub downvotes: Option<i64>,
    /// Epoch seconds.
    #[serde(default)]
    pub created_utc: Option<i64>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub replies: Option<Vec<Comment>>,
}

/// A normalized discussion thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<ForumContent>,
    #[serde(default)]
    pub upvotes: Option<i64>,
    #[serde(default)]
    pub downvotes: Option<i64>,
    #[serde(default)]
    pub author: Option<String>,
    /// Epoch seconds.
    #[serde(default)]
    pub created_utc: Option<i64>,
    #[serde(default)]
    pub permalink: Option<String>,
    /// Highest scored comments first, at most [`MAX_TOP_COMMENTS`].
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Post {
    /// `upvotes / (upvotes + downvotes)`.
    ///
    /// Fails instead of producing NaN when the post has no votes at all, and
    /// rejects negative counts so the ratio stays within `[0, 1]`.
    pub fn upvote_ratio(&self) -> Result<f64, ContentError> {
        let upvotes = self.upvotes.ok_or(ContentError::MissingVotes("upvote"))?;
        let downvotes = self.downvotes.ok_or(ContentError::MissingVotes("downvote"))?;
        if upvotes < 0 {
            return Err(ContentError::NegativeVotes("upvote"));
        }
        if downvotes < 0 {
            return Err(ContentError::NegativeVotes("downvote"));
        }
        let total = upvotes + downvotes;
        if total == 0 {
            return Err(ContentError::UndefinedUpvoteRatio);
        }
        Ok(upvotes as f64 / total as f64)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_utc
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }

    /// Short label used in log lines.
    pub fn label(&self) -> String {
        match (&self.title, &self.permalink) {
            (Some(title), _) => title.clone(),
            (None, Some(permalink)) => permalink.clone(),
            (None, None) => "<untitled post>".to_string(),
        }
    }
}

/// Acceptance thresholds applied to scraped posts.
///
/// Absent thresholds impose no constraint. A present threshold rejects a post
/// whose corresponding field is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostFilter {
    #[serde(default, alias = "upvotes")]
    pub minimum_upvotes: Option<i64>,
    #[serde(default, alias = "upvote_ratio")]
    pub minimum_upvote_ratio: Option<f64>,
    #[serde(default, alias = "recency")]
    pub maximum_age_days: Option<i64>,
}

impl PostFilter {
    pub fn accept(&self, post: &Post) -> bool {
        self.accept_at(post, Utc::now())
    }

    pub fn accept_at(&self, post: &Post, now: DateTime<Utc>) -> bool {
        if let Some(minimum) = self.minimum_upvotes {
            match post.upvotes {
                Some(upvotes) if upvotes >= minimum => {}
                _ => return false,
            }
        }

        if let Some(maximum_days) = self.maximum_age_days {
            match post.created_at() {
                Some(created) if (now - created).num_days() <= maximum_days => {}
                _ => return false,
            }
        }

        if let Some(minimum) = self.minimum_upvote_ratio {
            match post.upvote_ratio() {
                Ok(ratio) if ratio >= minimum => {}
                _ => return false,
            }
        }

        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostList {
    pub source: String,
    #[serde(default)]
    pub posts: Vec<Post>,
}

impl PostList {
    pub fn new(source: impl Into<String>, posts: Vec<Post>) -> Self {
        Self {
            source: source.into(),
            posts,
        }
    }

    pub fn empty(source: impl Into<String>) -> Self {
        Self::new(source, Vec::new())
    }

    /// Concatenates the posts of `lists` in list order, keeping each list's
    /// internal order.
    pub fn from_lists<I>(source: impl Into<String>, lists: I) -> Self
    where
        I: IntoIterator<Item = PostList>,
    {
        let posts = lists.into_iter().flat_map(|list| list.posts).collect();
        Self::new(source, posts)
    }

    /// A new list holding only the accepted posts; `self` is left untouched.
    pub fn filtered(&self, filter: &PostFilter) -> Self {
        let posts = self
            .posts
            .iter()
            .filter(|post| filter.accept(post))
            .cloned()
            .collect();
        Self::new(self.source.clone(), posts)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}
