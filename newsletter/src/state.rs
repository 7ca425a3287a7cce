use crate::config::StorageSettings;
use crate::digest::{check_newsletter_name, newsletter_path, Newsletter};
use crate::sources::Preference;
use crate::types::{NewsletterError, PostList, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// File-backed store for raw scrapes, preferences and newsletters.
#[derive(Debug, Clone)]
pub struct Storage {
    settings: StorageSettings,
}

impl Storage {
    pub fn new(settings: StorageSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    pub fn raw_snapshot_path(&self, source: &str) -> PathBuf {
        self.settings.raw_data_folder.join(format!("{}.json", source))
    }

    /// Save a scrape snapshot as `<raw>/<source>.json`, replacing any earlier one.
    pub fn save_post_list(&self, source: &str, post_list: &PostList) -> Result<PathBuf> {
        let path = self.raw_snapshot_path(source);
        write_json(&path, post_list)?;
        info!("Saved {} posts to {}", post_list.len(), path.display());
        Ok(path)
    }

    pub fn load_post_list(&self, source: &str) -> Result<PostList> {
        read_json(&self.raw_snapshot_path(source))
    }

    /// Names of the saved raw snapshots, sorted.
    pub fn list_raw_snapshots(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = json_files(&self.settings.raw_data_folder)?
            .into_iter()
            .filter_map(|(path, _)| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }

    /// The reader's interest profile, `None` when the file is missing or blank.
    pub fn user_interests(&self) -> Result<Option<String>> {
        let path = self.settings.interest_file();
        match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => Ok(Some(text.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No interest profile at {}", path.display());
                Ok(None)
            }
            Err(source) => Err(NewsletterError::Persistence { path, source }),
        }
    }

    pub fn save_user_interests(&self, interests: &str) -> Result<()> {
        let path = self.settings.interest_file();
        ensure_parent(&path)?;
        fs::write(&path, interests).map_err(|source| NewsletterError::Persistence { path, source })
    }

    /// Communities to scrape. A missing or empty file means none.
    pub fn reddit_preferences(&self) -> Result<Vec<Preference>> {
        let path = self.settings.reddit_preferences_file();
        match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
            Ok(text) => serde_json::from_str(&text).map_err(|source| NewsletterError::Parse { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(NewsletterError::Persistence { path, source }),
        }
    }

    pub fn save_reddit_preferences(&self, preferences: &[Preference]) -> Result<()> {
        write_json(&self.settings.reddit_preferences_file(), &preferences)
    }

    pub fn newsletter_path(&self, name: &str) -> PathBuf {
        newsletter_path(&self.settings.newsletter_folder, name)
    }

    pub fn load_newsletter(&self, name: &str) -> Result<Newsletter> {
        check_newsletter_name(name)?;
        Newsletter::from_path(&self.newsletter_path(name))
    }

    /// Stored newsletters, most recently written first.
    pub fn list_newsletters(&self) -> Result<Vec<PathBuf>> {
        let mut files = json_files(&self.settings.newsletter_folder)?;
        files.sort_by(|(a_path, a_time), (b_path, b_time)| {
            b_time.cmp(a_time).then_with(|| b_path.cmp(a_path))
        });
        Ok(files.into_iter().map(|(path, _)| path).collect())
    }
}

fn json_files(folder: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(NewsletterError::Persistence {
                path: folder.to_path_buf(),
                source,
            })
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| NewsletterError::Persistence {
            path: folder.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((path, modified));
    }
    Ok(files)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| NewsletterError::Persistence {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|source| NewsletterError::Persistence {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|source| NewsletterError::Persistence {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| NewsletterError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
