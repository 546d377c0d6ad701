use super::open_db;
use crate::cli::output::Output;
use crate::clock::SystemClock;
use crate::config::load_settings;
use crate::errors::{Result, StackError};
use crate::git::{get_current_repository, GitRepository};
use crate::state::{InitRequest, Store};
use std::sync::Arc;
use tracing::{debug, warn};

/// Initialize stack state for the current repository
pub fn run(trunk: Option<String>, remote: Option<String>, reset: bool) -> Result<()> {
    let repo = get_current_repository()?;
    debug!("Found Git repository at: {}", repo.path().display());

    let settings = load_settings(Some(repo.git_dir()))?;
    let db = open_db(&repo, &settings)?;

    let trunk = match trunk {
        Some(trunk) => trunk,
        None => guess_trunk(&repo)?,
    };
    if !repo.branch_exists(&trunk) {
        return Err(StackError::not_exist(format!("trunk branch {trunk}")));
    }

    if reset {
        warn!("Discarding existing stack state");
    } else if Store::open(db.clone(), Arc::new(SystemClock)).is_ok() {
        Output::info("Stack state already exists; updating trunk and remote");
    }

    let store = Store::init(
        db,
        Arc::new(SystemClock),
        InitRequest {
            trunk,
            remote,
            reset,
        },
    )?;

    Output::success(format!(
        "Initialized gitstack with trunk '{}'",
        store.trunk()
    ));
    if let Some(remote) = store.remote() {
        Output::sub_item(format!("Remote: {remote}"));
    }
    Output::next_steps(&["gst track <branch>", "gst log"]);
    Ok(())
}

/// main or master if either exists, otherwise the current branch
fn guess_trunk(repo: &GitRepository) -> Result<String> {
    for candidate in ["main", "master"] {
        if repo.branch_exists(candidate) {
            return Ok(candidate.to_string());
        }
    }
    repo.current_branch()
}
