use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use newsletter::config::Settings;
use newsletter::fetcher::{FetchConfig, RedditClient};
use newsletter::pipeline::{PipelineConfig, Summarizer};
use newsletter::providers::{ChatCompletionClient, LlmPlatform};
use newsletter::sources::{HttpWebpageExtractor, RedditAdapter, RedditScraper};
use newsletter::state::Storage;
use newsletter::{Newsletter, NewsletterGenerator};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "newsletter")]
#[command(about = "Scrape Reddit and summarize what matters into a newsletter")]
#[command(version)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape, filter, summarize and save a newsletter
    Generate(ModelArgs),

    /// Scrape the preferred communities and save raw snapshots only
    Scrape,

    /// Build a newsletter from the saved raw snapshots
    Summarize(ModelArgs),

    /// List saved newsletters, newest first
    List,

    /// Print a saved newsletter
    Show {
        /// Newsletter name (file name without .json)
        name: String,
    },

    /// Show generation platforms, their models and whether a key is configured
    Models,
}

#[derive(Args)]
struct ModelArgs {
    /// Newsletter name; defaults to the current local time
    #[arg(short, long)]
    name: Option<String>,

    /// Generation platform
    #[arg(long, value_enum, default_value_t = LlmPlatform::TogetherAi)]
    platform: LlmPlatform,

    /// Models for the relevance filter, most preferred first
    #[arg(long = "filter-model")]
    filter_models: Vec<String>,

    /// Models for summarization, most preferred first
    #[arg(long = "summary-model")]
    summary_models: Vec<String>,
}

impl ModelArgs {
    fn resolved_models(&self) -> (Vec<String>, Vec<String>) {
        let defaults = self.platform.model_ids();
        let pick = |chosen: &Vec<String>| {
            if chosen.is_empty() {
                defaults.clone()
            } else {
                chosen.clone()
            }
        };
        (pick(&self.filter_models), pick(&self.summary_models))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::from_env().context("failed to load settings")?;
    settings.validate()?;
    settings.init_storage()?;

    match cli.command {
        Commands::Generate(args) => {
            let (filter_models, summary_models) = args.resolved_models();
            require_api_key(&settings, args.platform)?;
            let generator = build_generator(&settings, args.platform)?;
            let newsletter = generator
                .generate(args.name, &filter_models, &summary_models)
                .await?;
            print_newsletter(&newsletter);
        }
        Commands::Scrape => {
            let generator = build_generator(&settings, LlmPlatform::TogetherAi)?;
            let scraped = generator.scrape().await?;
            for (community, post_list) in &scraped {
                println!("r/{}: {} posts", community, post_list.len());
            }
        }
        Commands::Summarize(args) => {
            let (filter_models, summary_models) = args.resolved_models();
            require_api_key(&settings, args.platform)?;
            let generator = build_generator(&settings, args.platform)?;
            let newsletter = generator
                .summarize_saved(args.name, &filter_models, &summary_models)
                .await?;
            print_newsletter(&newsletter);
        }
        Commands::List => {
            let storage = Storage::new(settings.storage.clone());
            for path in storage.list_newsletters()? {
                if let Some(stem) = path.file_stem() {
                    println!("{}", stem.to_string_lossy());
                }
            }
        }
        Commands::Show { name } => {
            let storage = Storage::new(settings.storage.clone());
            let newsletter = storage
                .load_newsletter(&name)
                .with_context(|| format!("failed to open newsletter '{}'", name))?;
            print_newsletter(&newsletter);
        }
        Commands::Models => {
            for (platform, configured) in settings.supported_platforms() {
                let status = if configured { "configured" } else { "no API key" };
                println!("{} ({})", platform, status);
                for (id, alias) in platform.models() {
                    println!("  {:<20} {}", alias, id);
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "newsletter=debug" } else { "newsletter=info" };
    let filter = match std::env::var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::new(default_level),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn require_api_key(settings: &Settings, platform: LlmPlatform) -> Result<()> {
    if settings.api_key(platform).is_none() {
        bail!("no API key configured for {}", platform);
    }
    Ok(())
}

fn build_generator(settings: &Settings, platform: LlmPlatform) -> Result<NewsletterGenerator> {
    let api_key = settings.api_key(platform).unwrap_or_default();
    let llm = ChatCompletionClient::new(platform, api_key)?;
    info!("Using {} for generation", llm.platform());

    let scraper = match settings.reddit.clone() {
        Some(credentials) => {
            let reddit = RedditClient::new(credentials, FetchConfig::default())?;
            let extractor = HttpWebpageExtractor::new(Duration::from_secs(30))?;
            let adapter = RedditAdapter::new(Arc::new(extractor), settings.pipeline.adapter_workers);
            Some(RedditScraper::new(Arc::new(reddit), adapter))
        }
        None => {
            warn!("Reddit credentials are not configured (REDDIT__* variables)");
            None
        }
    };

    let summarizer = Summarizer::new(
        Arc::new(llm),
        PipelineConfig::from(&settings.pipeline),
        settings.storage.newsletter_folder.clone(),
    );

    Ok(NewsletterGenerator::new(
        scraper,
        summarizer,
        Storage::new(settings.storage.clone()),
        settings.pipeline.scrape_limit,
    ))
}

fn print_newsletter(newsletter: &Newsletter) {
    println!(
        "{} ({} news, created {})",
        newsletter.name,
        newsletter.len(),
        newsletter.created_at.to_rfc3339()
    );
    println!("saved at {}", newsletter.storage_path.display());
    for news in &newsletter.news {
        println!();
        println!("## {}", news.title);
        println!("{}", news.description);
        for source in &news.sources {
            println!("  - {}", source);
        }
    }
}
