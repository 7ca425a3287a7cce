use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::providers::LlmPlatform;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to prepare storage at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Credentials for a Reddit "script" application.
#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("user_agent", &self.user_agent)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub raw_data_folder: PathBuf,
    pub newsletter_folder: PathBuf,
    pub preferences_folder: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            raw_data_folder: PathBuf::from("./data/raw/"),
            newsletter_folder: PathBuf::from("./data/newsletter/"),
            preferences_folder: PathBuf::from("./data/preferences/"),
        }
    }
}

impl StorageSettings {
    /// Root every folder under `root`, keeping the default layout.
    pub fn under(root: &Path) -> Self {
        Self {
            raw_data_folder: root.join("raw"),
            newsletter_folder: root.join("newsletter"),
            preferences_folder: root.join("preferences"),
        }
    }

    pub fn interest_file(&self) -> PathBuf {
        self.preferences_folder.join("interest.txt")
    }

    pub fn reddit_preferences_file(&self) -> PathBuf {
        self.preferences_folder.join("reddit.json")
    }
}

/// Concurrency and retry knobs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workers: usize,
    pub num_retries: u32,
    pub adapter_workers: usize,
    pub scrape_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            num_retries: 1,
            adapter_workers: 8,
            scrape_limit: 25,
        }
    }
}

/// Application settings loaded from the environment (and `.env`).
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub together_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub fireworks_api_key: Option<String>,
    pub reddit: Option<RedditCredentials>,
    pub storage: StorageSettings,
    pub pipeline: PipelineSettings,
}

impl Settings {
    /// Load settings from environment variables, reading `.env` first if present.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but unparsable, or if Reddit
    /// credentials are only partially configured.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let defaults = StorageSettings::default();
        let pipeline_defaults = PipelineSettings::default();

        Ok(Self {
            together_api_key: optional_env("TOGETHER_API_KEY"),
            openai_api_key: optional_env("OPENAI_API_KEY"),
            fireworks_api_key: optional_env("FIREWORKS_API_KEY"),
            reddit: reddit_credentials()?,
            storage: StorageSettings {
                raw_data_folder: optional_env("STORAGE__RAW_DATA_FOLDER")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.raw_data_folder),
                newsletter_folder: optional_env("STORAGE__NEWSLETTER_FOLDER")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.newsletter_folder),
                preferences_folder: optional_env("STORAGE__PREFERENCES_FOLDER")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.preferences_folder),
            },
            pipeline: PipelineSettings {
                workers: parse_env_usize("PIPELINE__WORKERS", pipeline_defaults.workers)?,
                num_retries: parse_env_u32("PIPELINE__NUM_RETRIES", pipeline_defaults.num_retries)?,
                adapter_workers: parse_env_usize(
                    "PIPELINE__ADAPTER_WORKERS",
                    pipeline_defaults.adapter_workers,
                )?,
                scrape_limit: parse_env_usize("PIPELINE__SCRAPE_LIMIT", pipeline_defaults.scrape_limit)?,
            },
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if a pool width or the scrape limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("PIPELINE__WORKERS", self.pipeline.workers),
            ("PIPELINE__ADAPTER_WORKERS", self.pipeline.adapter_workers),
            ("PIPELINE__SCRAPE_LIMIT", self.pipeline.scrape_limit),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Create the storage folders and the empty preference files.
    pub fn init_storage(&self) -> Result<(), ConfigError> {
        for folder in [
            &self.storage.raw_data_folder,
            &self.storage.newsletter_folder,
            &self.storage.preferences_folder,
        ] {
            fs::create_dir_all(folder).map_err(|source| ConfigError::Storage {
                path: folder.clone(),
                source,
            })?;
        }

        for file in [
            self.storage.interest_file(),
            self.storage.reddit_preferences_file(),
        ] {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file)
                .map_err(|source| ConfigError::Storage { path: file.clone(), source })?;
        }
        Ok(())
    }

    pub fn api_key(&self, platform: LlmPlatform) -> Option<&str> {
        match platform {
            LlmPlatform::TogetherAi => self.together_api_key.as_deref(),
            LlmPlatform::FireworksAi => self.fireworks_api_key.as_deref(),
            LlmPlatform::OpenAi => self.openai_api_key.as_deref(),
        }
    }

    /// Every platform paired with whether credentials for it are configured.
    pub fn supported_platforms(&self) -> Vec<(LlmPlatform, bool)> {
        LlmPlatform::ALL
            .iter()
            .map(|platform| (*platform, self.api_key(*platform).is_some()))
            .collect()
    }
}

fn reddit_credentials() -> Result<Option<RedditCredentials>, ConfigError> {
    const NAMES: [&str; 5] = [
        "REDDIT__PERSONAL_USE_SCRIPT",
        "REDDIT__CLIENT_SECRET",
        "REDDIT__USER_AGENT",
        "REDDIT__USERNAME",
        "REDDIT__PASSWORD",
    ];

    if NAMES.iter().all(|name| optional_env(name).is_none()) {
        return Ok(None);
    }

    Ok(Some(RedditCredentials {
        client_id: required_env(NAMES[0])?,
        client_secret: required_env(NAMES[1])?,
        user_agent: required_env(NAMES[2])?,
        username: required_env(NAMES[3])?,
        password: required_env(NAMES[4])?,
    }))
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    optional_env(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match optional_env(name) {
        Some(value) => value.trim().parse().map_err(|source| ConfigError::ParseInt {
            name: name.to_string(),
            source,
        }),
        None => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match optional_env(name) {
        Some(value) => value.trim().parse().map_err(|source| ConfigError::ParseInt {
            name: name.to_string(),
            source,
        }),
        None => Ok(default),
    }
}
