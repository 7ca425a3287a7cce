pub mod types;
pub mod config;
pub mod llm_adapter;
pub mod providers;
pub mod parser;
pub mod digest;
pub mod traits;
pub mod sources;
pub mod fetcher;
pub mod processing;
pub mod pipeline;
pub mod state;
pub mod aggregator;

pub use types::*;
pub use config::{ConfigError, Settings};
pub use digest::{News, Newsletter};
pub use fetcher::{FetchConfig, RedditClient};
pub use llm_adapter::{GenerationOptions, LlmClient, LlmError, ScriptedLlmClient};
pub use providers::{ChatCompletionClient, LlmPlatform};
pub use pipeline::{PipelineConfig, Summarizer, WorkerPool};
pub use processing::RetryPolicy;
pub use state::Storage;
pub use aggregator::NewsletterGenerator;
