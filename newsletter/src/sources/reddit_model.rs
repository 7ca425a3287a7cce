//! Serde models of the Reddit JSON API (`raw_json=1` responses).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// `{"kind": "Listing", "data": {"children": [...]}}`
#[derive(Debug, Clone, Deserialize)]
pub struct Listing<T> {
    pub data: ListingData<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingData<T> {
    #[serde(default = "Vec::new")]
    pub children: Vec<T>,
    #[serde(default)]
    pub after: Option<String>,
}

/// Listing child carrying a submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionThing {
    pub data: RawSubmission,
}

/// A child of a comment listing: either a comment or a "load more" marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum CommentThing {
    #[serde(rename = "t1")]
    Comment(RawComment),
    #[serde(rename = "more")]
    More(Value),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawComment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub ups: i64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub permalink: Option<String>,
}

impl RawComment {
    /// The author's name, or `None` for deleted or removed accounts.
    pub fn author_name(&self) -> Option<&str> {
        self.author
            .as_deref()
            .filter(|name| !name.is_empty() && *name != "[deleted]" && *name != "[removed]")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSubmission {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub ups: i64,
    #[serde(default)]
    pub upvote_ratio: f64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub media: Option<Value>,
    #[serde(default)]
    pub media_metadata: Option<HashMap<String, MediaMetadata>>,
    #[serde(default)]
    pub gallery_data: Option<GalleryData>,
    #[serde(default)]
    pub crosspost_parent: Option<String>,
    #[serde(default)]
    pub crosspost_parent_list: Option<Vec<CrosspostParent>>,
    #[serde(default)]
    pub poll_data: Option<PollData>,
    /// Filled from the submission's comment page, not the hot listing.
    #[serde(default)]
    pub comments: Vec<CommentThing>,
}

impl RawSubmission {
    pub fn author_name(&self) -> Option<&str> {
        self.author
            .as_deref()
            .filter(|name| !name.is_empty() && *name != "[deleted]")
    }

    /// The first crosspost parent, when this submission is a crosspost.
    pub fn crosspost_origin(&self) -> Option<&CrosspostParent> {
        self.crosspost_parent
            .as_ref()
            .and(self.crosspost_parent_list.as_ref())
            .and_then(|parents| parents.first())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrosspostParent {
    #[serde(default)]
    pub media: Option<Value>,
    #[serde(default)]
    pub media_metadata: Option<HashMap<String, MediaMetadata>>,
    #[serde(default)]
    pub gallery_data: Option<GalleryData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    #[serde(default)]
    pub status: Option<String>,
    /// Source rendition; `u` is the image URL (`gif`/`mp4` for animations).
    #[serde(default)]
    pub s: Option<MediaSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaSource {
    #[serde(default)]
    pub u: Option<String>,
    #[serde(default)]
    pub gif: Option<String>,
    #[serde(default)]
    pub mp4: Option<String>,
}

impl MediaSource {
    pub fn best_url(&self) -> Option<&str> {
        self.u
            .as_deref()
            .or(self.gif.as_deref())
            .or(self.mp4.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GalleryData {
    #[serde(default)]
    pub items: Vec<GalleryItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GalleryItem {
    pub media_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollData {
    #[serde(default)]
    pub options: Vec<PollOption>,
    #[serde(default)]
    pub total_vote_count: u64,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub voting_end_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    /// Absent while the poll hides counts or when nobody chose the option.
    #[serde(default)]
    pub vote_count: Option<u64>,
}
