pub mod command;
pub mod rebase;
pub mod repository;
pub mod tree;

pub use command::GitCommand;
pub use rebase::{RebaseBackend, RebaseRequest, RebaseState};
pub use repository::GitRepository;

use crate::errors::{Result, StackError};
use std::path::{Path, PathBuf};

/// Find the root of the Git repository
pub fn find_repository_root(start_path: &Path) -> Result<PathBuf> {
    let repo = git2::Repository::discover(start_path)?;

    let workdir = repo
        .workdir()
        .ok_or_else(|| StackError::config("Repository has no working directory (bare repo?)"))?;

    Ok(workdir.to_path_buf())
}

/// Open the repository containing the current directory
pub fn get_current_repository() -> Result<GitRepository> {
    let current_dir = std::env::current_dir()?;
    let repo_root = find_repository_root(&current_dir)?;
    GitRepository::open(&repo_root)
}
