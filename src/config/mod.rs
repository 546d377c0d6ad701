pub mod settings;

pub use settings::{GitSettings, Settings, StackSettings, StorageSettings, DEFAULT_DATA_REF};

use crate::errors::{Result, StackError};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

/// Get the user configuration directory (~/.gitstack/)
pub fn get_config_dir() -> Result<PathBuf> {
    let home_dir =
        dirs::home_dir().ok_or_else(|| StackError::config("Could not find home directory"))?;
    Ok(home_dir.join(".gitstack"))
}

/// Per-repository settings file, inside the git directory
pub fn repo_config_path(git_dir: &Path) -> PathBuf {
    git_dir.join("gitstack").join(CONFIG_FILE)
}

pub fn global_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

/// Settings for a repository: its own file if it has one, otherwise the
/// user's global file, otherwise defaults
pub fn load_settings(git_dir: Option<&Path>) -> Result<Settings> {
    let mut candidates = Vec::new();
    if let Some(git_dir) = git_dir {
        candidates.push(repo_config_path(git_dir));
    }
    if let Ok(global) = global_config_path() {
        candidates.push(global);
    }

    let settings = match candidates.iter().find(|path| path.exists()) {
        Some(path) => {
            tracing::debug!("Loading settings from {}", path.display());
            Settings::load_from_file(path)?
        }
        None => Settings::default(),
    };
    settings.validate()?;
    Ok(settings)
}
