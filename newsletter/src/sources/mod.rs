pub mod reddit;
pub mod reddit_model;
pub mod webpage;

pub use reddit::{Preference, RedditAdapter, RedditScraper, REDDIT_SOURCE};
pub use reddit_model::RawSubmission;
pub use webpage::HttpWebpageExtractor;
