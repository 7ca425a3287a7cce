use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One piece of forum content.
///
/// Every variant serializes with a `type` discriminator; payloads carrying an
/// unknown discriminator are rejected on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
    Image { url: String },
    Video { url: String },
    Poll(Poll),
    Webpage(Webpage),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Content::Image { url: url.into() }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Content::Video { url: url.into() }
    }

    /// The discriminator written to the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Content::Text { .. } => "text",
            Content::Image { .. } => "image",
            Content::Video { .. } => "video",
            Content::Poll(_) => "poll",
            Content::Webpage(_) => "webpage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: Option<String>,
    pub total_votes: u64,
    /// Choice text mapped to the number of votes it received.
    pub result: BTreeMap<String, u64>,
}

/// An article extracted from a linked webpage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Webpage {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub authors: Option<Vec<String>>,
}

/// Ordered content of a post or comment. Insertion order is display order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForumContent {
    #[serde(default)]
    pub contents: Vec<Content>,
}

impl ForumContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, content: Content) {
        self.contents.push(content);
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Content> {
        self.contents.iter()
    }
}

impl From<Vec<Content>> for ForumContent {
    fn from(contents: Vec<Content>) -> Self {
        Self { contents }
    }
}
