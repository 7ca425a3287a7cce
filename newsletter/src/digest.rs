use crate::types::{NewsletterError, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One summarized item of a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct News {
    pub title: String,
    pub description: String,
    /// One identifier per contributing post.
    pub sources: Vec<String>,
}

/// A named, timestamped digest persisted as a single JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Newsletter {
    pub news: Vec<News>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "path")]
    pub storage_path: PathBuf,
}

impl Newsletter {
    /// Build a newsletter stored at `<newsletter_folder>/<name>.json`.
    pub fn new(news: Vec<News>, name: impl Into<String>, newsletter_folder: &Path) -> Self {
        let name = name.into();
        let storage_path = newsletter_path(newsletter_folder, &name);
        Self {
            news,
            name,
            created_at: Utc::now(),
            storage_path,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| NewsletterError::Persistence {
            path: path.to_path_buf(),
            source,
        })?;
        let newsletter = serde_json::from_str(&raw).map_err(|source| NewsletterError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded newsletter from {}", path.display());
        Ok(newsletter)
    }

    pub fn save(&self) -> Result<()> {
        let path = &self.storage_path;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| NewsletterError::Persistence {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| NewsletterError::Persistence {
            path: path.clone(),
            source,
        })?;

        info!(
            "Saved newsletter '{}' with {} news to {}",
            self.name,
            self.news.len(),
            path.display()
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.news.len()
    }

    pub fn is_empty(&self) -> bool {
        self.news.is_empty()
    }
}

/// Reject names that would place the file outside the newsletter folder.
pub fn check_newsletter_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed.contains("..")
        || trimmed.contains(['/', '\\'])
        || Path::new(trimmed).is_absolute()
    {
        return Err(NewsletterError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub fn newsletter_path(newsletter_folder: &Path, name: &str) -> PathBuf {
    newsletter_folder.join(format!("{}.json", name))
}

/// Name used when the caller supplies none: local time, second precision.
pub fn default_newsletter_name() -> String {
    Local::now().format("%Y-%m-%d-%H-%M-%S").to_string()
}
