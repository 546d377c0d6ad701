//! Stashing uncommitted changes around operations that need a clean tree.

use crate::errors::{Result, StackError};
use crate::git::GitRepository;
use git2::{Oid, ResetType};
use tracing::{debug, info, warn};

/// Stash list message used when stashed changes could not be reapplied
pub const FAILED_APPLY_MESSAGE: &str = "gitstack: autostash failed to apply";

/// Stash list message for changes left behind by an unfinished operation
pub const INTERRUPTED_MESSAGE: &str = "gitstack: autostash interrupted";

/// Worktree operations autostash needs
pub trait GitWorktree {
    fn current_branch(&self) -> Result<String>;

    /// Record uncommitted changes as a stash commit; `NoChanges` if clean
    fn stash_create(&self, message: &str) -> Result<Oid>;

    fn stash_apply(&self, stash: &str) -> Result<()>;

    /// Add a stash commit to the stash list
    fn stash_store(&self, stash: Oid, message: &str) -> Result<()>;

    fn reset(&self, rev: &str, kind: ResetType) -> Result<()>;

    fn checkout_files(&self, pathspecs: &[&str]) -> Result<()>;
}

impl GitWorktree for GitRepository {
    fn current_branch(&self) -> Result<String> {
        GitRepository::current_branch(self)
    }

    fn stash_create(&self, message: &str) -> Result<Oid> {
        GitRepository::stash_create(self, message)
    }

    fn stash_apply(&self, stash: &str) -> Result<()> {
        GitRepository::stash_apply(self, stash)
    }

    fn stash_store(&self, stash: Oid, message: &str) -> Result<()> {
        GitRepository::stash_store(self, stash, message)
    }

    fn reset(&self, rev: &str, kind: ResetType) -> Result<()> {
        GitRepository::reset(self, rev, kind)
    }

    fn checkout_files(&self, pathspecs: &[&str]) -> Result<()> {
        GitRepository::checkout_files(self, pathspecs)
    }
}

/// What to record when an operation stops on an interrupted rebase
#[derive(Debug)]
pub struct RescueRequest {
    /// The error the operation failed with
    pub err: StackError,
    /// `gst` arguments that finish the operation once the rebase is resolved
    pub command: Vec<String>,
    /// Branch to check out before running `command`; defaults to the branch
    /// being rebased
    pub branch: Option<String>,
    pub message: Option<String>,
}

/// Result of [`Rescuer::rebase_rescue`]
#[derive(Debug)]
pub struct RescueOutcome {
    /// The error to surface
    pub err: StackError,
    /// Whether the command was saved to run after the rebase
    pub recorded: bool,
}

impl RescueOutcome {
    pub fn unrecorded(err: StackError) -> Self {
        Self {
            err,
            recorded: false,
        }
    }
}

/// Records continuations for interrupted rebases
pub trait Rescuer {
    /// Save `req.command` to run once the interrupted rebase is resolved.
    ///
    /// Errors other than an interrupted rebase come back unrecorded.
    fn rebase_rescue(&self, req: RescueRequest) -> RescueOutcome;
}

/// How to clean the worktree after stashing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResetMode {
    /// Reset index and worktree to HEAD
    #[default]
    Hard,
    /// Restore worktree files from the index, keeping staged changes
    Worktree,
    /// Leave the worktree alone
    None,
}

#[derive(Debug, Clone, Default)]
pub struct AutostashOptions {
    /// Stash message; a default naming the branch is used when empty
    pub message: String,
    /// Branch to return to when restoring; the current branch by default
    pub branch: Option<String>,
    pub reset_mode: ResetMode,
}

/// Stashes and restores uncommitted changes
pub struct Handler<'a, W, R> {
    worktree: &'a W,
    rescuer: &'a R,
}

impl<W, R> Clone for Handler<'_, W, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<W, R> Copy for Handler<'_, W, R> {}

impl<'a, W: GitWorktree, R: Rescuer> Handler<'a, W, R> {
    pub fn new(worktree: &'a W, rescuer: &'a R) -> Self {
        Self { worktree, rescuer }
    }

    /// Stash uncommitted changes and clean the worktree.
    ///
    /// With nothing to stash the returned guard does nothing.
    pub fn begin(&self, opts: AutostashOptions) -> Result<AutostashGuard<'a, W, R>> {
        let branch = match opts.branch {
            Some(branch) => branch,
            None => self.worktree.current_branch()?,
        };
        let message = if opts.message.is_empty() {
            format!("gitstack autostash on {branch}")
        } else {
            opts.message
        };

        let stash = match self.worktree.stash_create(&message) {
            Ok(stash) => stash,
            Err(StackError::NoChanges) => {
                debug!("Nothing to autostash on '{}'", branch);
                return Ok(AutostashGuard {
                    handler: *self,
                    stash: None,
                    branch,
                    finished: false,
                });
            }
            Err(e) => return Err(e),
        };

        // From here on a failure drops the guard, which keeps the stash.
        let guard = AutostashGuard {
            handler: *self,
            stash: Some(stash),
            branch,
            finished: false,
        };

        match opts.reset_mode {
            ResetMode::Hard => self.worktree.reset("HEAD", ResetType::Hard)?,
            ResetMode::Worktree => self.worktree.checkout_files(&["."])?,
            ResetMode::None => {}
        }

        info!("Stashed uncommitted changes as {}", stash);
        Ok(guard)
    }

    /// Reapply a stash created by [`Handler::begin`].
    ///
    /// If it does not apply, the stash is added to the stash list so the
    /// changes stay reachable.
    pub fn restore(&self, stash: Oid) -> Result<()> {
        let apply_err = match self.worktree.stash_apply(&stash.to_string()) {
            Ok(()) => {
                info!("Restored stashed changes {}", stash);
                return Ok(());
            }
            Err(e) => e,
        };

        match self.worktree.stash_store(stash, FAILED_APPLY_MESSAGE) {
            Ok(()) => Err(StackError::AutostashFailed(format!(
                "stashed changes did not apply cleanly ({apply_err}); \
                 they are saved in the stash list: resolve with 'git stash pop' \
                 or discard with 'git stash drop'"
            ))),
            Err(store_err) => {
                warn!("Could not save stash {} to the stash list: {}", stash, store_err);
                warn!("Recover the changes with: git stash apply {}", stash);
                Err(StackError::AutostashFailed(format!(
                    "stashed changes did not apply cleanly ({apply_err}); \
                     recover them with 'git stash apply {stash}'"
                )))
            }
        }
    }

    /// Keep a stash that cannot be reapplied now in the stash list
    fn save(&self, stash: Oid, branch: &str) {
        match self.worktree.stash_store(stash, INTERRUPTED_MESSAGE) {
            Ok(()) => warn!(
                "Uncommitted changes from '{}' were saved to the stash list",
                branch
            ),
            Err(e) => warn!("Could not save stash {}: {}", stash, e),
        }
        warn!("Restore them later with: git stash apply {}", stash);
    }
}

/// Stashed changes waiting to be restored.
///
/// Pass the outcome of the operation to [`AutostashGuard::finish`]. A guard
/// dropped without finishing saves its stash to the stash list.
#[must_use = "call finish() to restore the stashed changes"]
pub struct AutostashGuard<'a, W: GitWorktree, R: Rescuer> {
    handler: Handler<'a, W, R>,
    stash: Option<Oid>,
    branch: String,
    finished: bool,
}

impl<W: GitWorktree, R: Rescuer> AutostashGuard<'_, W, R> {
    /// The stash commit, if there was anything to stash
    pub fn stash(&self) -> Option<Oid> {
        self.stash
    }

    /// Branch the stash belongs to
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Restore the stash after the guarded operation.
    ///
    /// An interrupted rebase leaves the stash alone and records a
    /// continuation that restores it once the rebase is resolved. If that
    /// cannot be recorded, the stash goes to the stash list instead. Any
    /// other failure restores the stash and returns the original error.
    pub fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        self.finished = true;
        let Some(stash) = self.stash else {
            return result;
        };

        match result {
            Ok(value) => {
                self.handler.restore(stash)?;
                Ok(value)
            }
            Err(err @ StackError::RebaseInterrupted { .. }) => {
                let rescue = self.handler.rescuer.rebase_rescue(RescueRequest {
                    err,
                    command: vec![
                        "internal".to_string(),
                        "autostash-pop".to_string(),
                        stash.to_string(),
                    ],
                    branch: Some(self.branch.clone()),
                    message: Some(format!("interrupted: restore stashed changes {stash}")),
                });
                if !rescue.recorded {
                    self.handler.save(stash, &self.branch);
                }
                Err(rescue.err)
            }
            // The rebase is still in progress; applying now would mix the
            // changes into it.
            Err(err @ StackError::RescueFailed { .. }) => {
                self.handler.save(stash, &self.branch);
                Err(err)
            }
            Err(err) => {
                if let Err(restore_err) = self.handler.restore(stash) {
                    warn!("{}", restore_err);
                }
                Err(err)
            }
        }
    }
}

impl<W: GitWorktree, R: Rescuer> Drop for AutostashGuard<'_, W, R> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(stash) = self.stash else {
            return;
        };

        // Only reached on a panic or an early return before finish().
        self.handler.save(stash, &self.branch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RebaseInterruptKind;
    use parking_lot::Mutex;

    fn stash_oid() -> Oid {
        Oid::from_str("5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a").unwrap()
    }

    #[derive(Default)]
    struct FakeWorktree {
        clean: bool,
        apply_fails: bool,
        store_fails: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeWorktree {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().push(call);
        }
    }

    impl GitWorktree for FakeWorktree {
        fn current_branch(&self) -> Result<String> {
            Ok("feature".to_string())
        }

        fn stash_create(&self, message: &str) -> Result<Oid> {
            self.record(format!("create {message}"));
            if self.clean {
                Err(StackError::NoChanges)
            } else {
                Ok(stash_oid())
            }
        }

        fn stash_apply(&self, stash: &str) -> Result<()> {
            self.record(format!("apply {stash}"));
            if self.apply_fails {
                Err(StackError::rebase("conflict"))
            } else {
                Ok(())
            }
        }

        fn stash_store(&self, stash: Oid, message: &str) -> Result<()> {
            self.record(format!("store {stash} {message}"));
            if self.store_fails {
                Err(StackError::rebase("store failed"))
            } else {
                Ok(())
            }
        }

        fn reset(&self, rev: &str, kind: ResetType) -> Result<()> {
            let kind = match kind {
                ResetType::Hard => "hard",
                ResetType::Mixed => "mixed",
                ResetType::Soft => "soft",
            };
            self.record(format!("reset {rev} {kind}"));
            Ok(())
        }

        fn checkout_files(&self, pathspecs: &[&str]) -> Result<()> {
            self.record(format!("checkout {}", pathspecs.join(" ")));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRescuer {
        /// Fail to record, as a store that keeps losing its writes would
        fails: bool,
        requests: Mutex<Vec<(Vec<String>, Option<String>, Option<String>)>>,
    }

    impl Rescuer for FakeRescuer {
        fn rebase_rescue(&self, req: RescueRequest) -> RescueOutcome {
            self.requests
                .lock()
                .push((req.command, req.branch, req.message));
            if self.fails {
                return RescueOutcome::unrecorded(StackError::RescueFailed {
                    branch: "feature".into(),
                    command: "internal autostash-pop".into(),
                    source: Box::new(req.err),
                });
            }
            RescueOutcome {
                err: req.err,
                recorded: true,
            }
        }
    }

    fn stored(worktree: &FakeWorktree) -> bool {
        worktree
            .calls()
            .contains(&format!("store {} {}", stash_oid(), INTERRUPTED_MESSAGE))
    }

    fn interrupted() -> StackError {
        StackError::RebaseInterrupted {
            branch: "feature".into(),
            kind: RebaseInterruptKind::Conflict,
        }
    }

    #[test]
    fn test_clean_tree_is_noop() {
        let worktree = FakeWorktree {
            clean: true,
            ..Default::default()
        };
        let rescuer = FakeRescuer::default();
        let guard = Handler::new(&worktree, &rescuer)
            .begin(AutostashOptions::default())
            .unwrap();
        assert!(guard.stash().is_none());

        assert_eq!(guard.finish(Ok(3)).unwrap(), 3);
        assert_eq!(worktree.calls(), vec!["create gitstack autostash on feature"]);
    }

    #[test]
    fn test_success_restores() {
        let worktree = FakeWorktree::default();
        let rescuer = FakeRescuer::default();
        let guard = Handler::new(&worktree, &rescuer)
            .begin(AutostashOptions {
                message: "before restack".into(),
                ..Default::default()
            })
            .unwrap();

        guard.finish(Ok(())).unwrap();
        assert_eq!(
            worktree.calls(),
            vec![
                "create before restack".to_string(),
                "reset HEAD hard".to_string(),
                format!("apply {}", stash_oid()),
            ]
        );
        assert!(rescuer.requests.lock().is_empty());
    }

    #[test]
    fn test_worktree_reset_mode() {
        let worktree = FakeWorktree::default();
        let rescuer = FakeRescuer::default();
        let guard = Handler::new(&worktree, &rescuer)
            .begin(AutostashOptions {
                reset_mode: ResetMode::Worktree,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(worktree.calls()[1], "checkout .");
        guard.finish(Ok(())).unwrap();
    }

    #[test]
    fn test_interrupted_rebase_records_continuation() {
        let worktree = FakeWorktree::default();
        let rescuer = FakeRescuer::default();
        let guard = Handler::new(&worktree, &rescuer)
            .begin(AutostashOptions::default())
            .unwrap();

        let err = guard.finish::<()>(Err(interrupted())).unwrap_err();
        assert!(err.is_conflict());

        // Nothing was reapplied.
        assert!(!worktree.calls().iter().any(|c| c.starts_with("apply")));

        let requests = rescuer.requests.lock();
        let (command, branch, message) = &requests[0];
        assert_eq!(
            command,
            &vec![
                "internal".to_string(),
                "autostash-pop".to_string(),
                stash_oid().to_string()
            ]
        );
        assert_eq!(branch.as_deref(), Some("feature"));
        assert_eq!(
            message.as_deref(),
            Some(format!("interrupted: restore stashed changes {}", stash_oid()).as_str())
        );
        assert!(!stored(&worktree));
    }

    #[test]
    fn test_unrecorded_rescue_keeps_stash_in_list() {
        let worktree = FakeWorktree::default();
        let rescuer = FakeRescuer {
            fails: true,
            ..Default::default()
        };
        let guard = Handler::new(&worktree, &rescuer)
            .begin(AutostashOptions::default())
            .unwrap();

        let err = guard.finish::<()>(Err(interrupted())).unwrap_err();
        assert!(matches!(err, StackError::RescueFailed { .. }));
        assert!(stored(&worktree));
        assert!(!worktree.calls().iter().any(|c| c.starts_with("apply")));
    }

    #[test]
    fn test_failed_rescue_of_operation_is_not_applied() {
        let worktree = FakeWorktree::default();
        let rescuer = FakeRescuer::default();
        let guard = Handler::new(&worktree, &rescuer)
            .begin(AutostashOptions::default())
            .unwrap();

        let err = guard
            .finish::<()>(Err(StackError::RescueFailed {
                branch: "feature".into(),
                command: "restack feature".into(),
                source: Box::new(StackError::NoChanges),
            }))
            .unwrap_err();
        assert!(matches!(err, StackError::RescueFailed { .. }));
        assert!(stored(&worktree));
        assert!(!worktree.calls().iter().any(|c| c.starts_with("apply")));
        assert!(rescuer.requests.lock().is_empty());
    }

    #[test]
    fn test_other_failure_restores_and_keeps_error() {
        let worktree = FakeWorktree::default();
        let rescuer = FakeRescuer::default();
        let guard = Handler::new(&worktree, &rescuer)
            .begin(AutostashOptions::default())
            .unwrap();

        let err = guard
            .finish::<()>(Err(StackError::NotTracked("feature".into())))
            .unwrap_err();
        assert!(matches!(err, StackError::NotTracked(_)));
        assert!(worktree.calls().iter().any(|c| c.starts_with("apply")));
    }

    #[test]
    fn test_failed_apply_is_stored() {
        let worktree = FakeWorktree {
            apply_fails: true,
            ..Default::default()
        };
        let rescuer = FakeRescuer::default();
        let handler = Handler::new(&worktree, &rescuer);

        let err = handler.restore(stash_oid()).unwrap_err();
        match err {
            StackError::AutostashFailed(msg) => {
                assert!(msg.contains("git stash pop"));
                assert!(msg.contains("git stash drop"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            worktree.calls().last().unwrap(),
            &format!("store {} {}", stash_oid(), FAILED_APPLY_MESSAGE)
        );
    }

    #[test]
    fn test_failed_store_names_the_stash() {
        let worktree = FakeWorktree {
            apply_fails: true,
            store_fails: true,
            ..Default::default()
        };
        let rescuer = FakeRescuer::default();

        let err = Handler::new(&worktree, &rescuer)
            .restore(stash_oid())
            .unwrap_err();
        assert!(err
            .to_string()
            .contains(&format!("git stash apply {}", stash_oid())));
    }

    #[test]
    fn test_dropped_guard_stores_stash() {
        let worktree = FakeWorktree::default();
        let rescuer = FakeRescuer::default();
        {
            let _guard = Handler::new(&worktree, &rescuer)
                .begin(AutostashOptions::default())
                .unwrap();
        }
        assert!(stored(&worktree));
    }
}
