use crate::errors::{Result, StackError};
use crate::storage::git::DEFAULT_MAX_ATTEMPTS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Ref the stack state is committed to
pub const DEFAULT_DATA_REF: &str = "refs/gitstack/data";

const MAX_STATUS_WORKERS: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub git: GitSettings,
    pub stack: StackSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Ref holding the committed key-value data
    pub data_ref: String,
    /// Compare-and-swap attempts before an update gives up
    pub max_update_attempts: usize,
}

/// Identity on data commits; falls back to git's `user.name`/`user.email`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackSettings {
    /// Threads used by `gst status`
    pub status_workers: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_ref: DEFAULT_DATA_REF.to_string(),
            max_update_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Default for StackSettings {
    fn default() -> Self {
        Self { status_workers: 4 }
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| StackError::config(format!("Invalid number for {key}: {value}")))
}

fn optional(value: &str) -> Option<String> {
    Some(value.to_string()).filter(|v| !v.is_empty())
}

impl Settings {
    /// Every settable key, in display order
    pub const KEYS: [&'static str; 5] = [
        "storage.data_ref",
        "storage.max_update_attempts",
        "git.author_name",
        "git.author_email",
        "stack.status_workers",
    ];

    /// Load settings from a file; defaults if it does not exist
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| StackError::config(format!("Failed to read config file: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| StackError::config(format!("Failed to parse config file: {e}")))
    }

    /// Save settings to a file, replacing it atomically
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StackError::config(format!("Failed to create config directory: {e}"))
            })?;
        }
        crate::utils::atomic_file::write_json(path, self)
    }

    /// Update a configuration value by key. An empty value clears optional
    /// settings.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "storage.data_ref" => self.storage.data_ref = value.to_string(),
            "storage.max_update_attempts" => {
                self.storage.max_update_attempts = parse_number(key, value)?
            }
            "git.author_name" => self.git.author_name = optional(value),
            "git.author_email" => self.git.author_email = optional(value),
            "stack.status_workers" => self.stack.status_workers = parse_number(key, value)?,
            _ => return Err(StackError::config(format!("Unknown config key: {key}"))),
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get_value(&self, key: &str) -> Result<String> {
        let value = match key {
            "storage.data_ref" => self.storage.data_ref.clone(),
            "storage.max_update_attempts" => self.storage.max_update_attempts.to_string(),
            "git.author_name" => self.git.author_name.clone().unwrap_or_default(),
            "git.author_email" => self.git.author_email.clone().unwrap_or_default(),
            "stack.status_workers" => self.stack.status_workers.to_string(),
            _ => return Err(StackError::config(format!("Unknown config key: {key}"))),
        };
        Ok(value)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let data_ref = &self.storage.data_ref;
        if !data_ref.starts_with("refs/") || !git2::Reference::is_valid_name(data_ref) {
            return Err(StackError::config(format!(
                "storage.data_ref must be a valid ref under refs/: {data_ref}"
            )));
        }

        if self.storage.max_update_attempts == 0 {
            return Err(StackError::config(
                "storage.max_update_attempts must be at least 1",
            ));
        }

        if !(1..=MAX_STATUS_WORKERS).contains(&self.stack.status_workers) {
            return Err(StackError::config(format!(
                "stack.status_workers must be between 1 and {MAX_STATUS_WORKERS}"
            )));
        }

        if let Some(email) = &self.git.author_email {
            if !email.contains('@') {
                return Err(StackError::config(format!(
                    "git.author_email is not an email address: {email}"
                )));
            }
        }

        Ok(())
    }
}
