use crate::cli::output::Output;
use crate::cli::ConfigAction;
use crate::config::{global_config_path, load_settings, repo_config_path, Settings};
use crate::errors::Result;
use crate::git::get_current_repository;
use std::path::PathBuf;

/// Handle configuration commands
pub fn run(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value, global } => {
            let path = if global {
                global_config_path()?
            } else {
                repo_config_path(get_current_repository()?.git_dir())
            };
            set_config_value(path, &key, &value)
        }
        ConfigAction::Get { key } => {
            let settings = current_settings()?;
            println!("{key} = {}", display(settings.get_value(&key)?));
            Ok(())
        }
        ConfigAction::List => {
            let settings = current_settings()?;
            Output::section("gitstack configuration");
            for key in Settings::KEYS {
                println!("  {key} = {}", display(settings.get_value(key)?));
            }
            Ok(())
        }
    }
}

/// Settings in effect here: the repository's when inside one
fn current_settings() -> Result<Settings> {
    match get_current_repository() {
        Ok(repo) => load_settings(Some(repo.git_dir())),
        Err(_) => load_settings(None),
    }
}

fn set_config_value(path: PathBuf, key: &str, value: &str) -> Result<()> {
    let mut settings = Settings::load_from_file(&path)?;
    settings.set_value(key, value)?;
    settings.validate()?;
    settings.save_to_file(&path)?;

    Output::success(format!("Configuration updated: {key} = {}", display(value.to_string())));
    Output::sub_item(format!("Saved to {}", path.display()));
    Ok(())
}

fn display(value: String) -> String {
    if value.is_empty() {
        "(not set)".to_string()
    } else {
        value
    }
}
