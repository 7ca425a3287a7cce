pub mod content;
pub mod defs;

pub use content::{Content, ForumContent, Poll, Webpage};
pub use defs::{Comment, ContentError, MAX_TOP_COMMENTS, Post, PostFilter, PostList};
