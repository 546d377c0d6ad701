pub mod config;
pub mod init;
pub mod rebase;
pub mod restack;
pub mod stack;
pub mod status;

use crate::autostash::{AutostashOptions, Handler, RescueRequest, Rescuer};
use crate::clock::SystemClock;
use crate::config::{load_settings, Settings};
use crate::errors::Result;
use crate::git::{get_current_repository, GitRepository};
use crate::stack::Service;
use crate::state::Store;
use crate::storage::{Author, Db, GitBackend};
use std::sync::Arc;
use tracing::debug;

pub type StackService = Service<GitRepository, Store>;

/// Everything a command needs for the repository it runs in
pub struct Context {
    pub service: StackService,
    pub settings: Settings,
}

/// Key-value store on the repository's data ref
pub fn open_db(repo: &GitRepository, settings: &Settings) -> Result<Db> {
    let (name, email) = repo.identity(
        settings.git.author_name.as_deref(),
        settings.git.author_email.as_deref(),
    );
    let backend = GitBackend::new(
        GitRepository::open(repo.path())?,
        &settings.storage.data_ref,
        Author { name, email },
        Arc::new(SystemClock),
    )
    .with_max_attempts(settings.storage.max_update_attempts);
    Ok(Db::new(Arc::new(backend)))
}

/// Open the current repository and its initialized stack state
pub fn open_context() -> Result<Context> {
    let repo = get_current_repository()?;
    let settings = load_settings(Some(repo.git_dir()))?;
    let db = open_db(&repo, &settings)?;
    let store = Store::open(db, Arc::new(SystemClock))?;
    debug!("Opened stack state with trunk '{}'", store.trunk());

    Ok(Context {
        service: Service::new(repo, store),
        settings,
    })
}

impl Context {
    /// `branch`, or the checked out branch
    pub fn resolve_branch(&self, branch: Option<String>) -> Result<String> {
        match branch {
            Some(branch) => Ok(branch),
            None => self.service.repo().current_branch(),
        }
    }

    /// Run a branch-rewriting operation with uncommitted changes stashed.
    ///
    /// Afterwards the original branch is checked out again and the changes
    /// are restored. If a rebase stops, `command` is recorded to finish the
    /// operation after `gst rebase continue`.
    pub fn with_autostash<T>(
        &self,
        command: Vec<String>,
        op: impl FnOnce(&StackService) -> Result<T>,
    ) -> Result<T> {
        let svc = &self.service;
        let handler = Handler::new(svc.repo(), svc);
        let guard = handler.begin(AutostashOptions {
            message: format!("gst {}", command.join(" ")),
            ..Default::default()
        })?;
        let original = guard.branch().to_string();

        let result = op(svc)
            .and_then(|value| {
                if svc.repo().current_branch().ok().as_deref() != Some(original.as_str()) {
                    svc.repo().checkout_branch(&original)?;
                }
                Ok(value)
            })
            .map_err(|err| {
                svc.rebase_rescue(RescueRequest {
                    err,
                    command,
                    branch: None,
                    message: None,
                })
                .err
            });

        guard.finish(result)
    }
}
