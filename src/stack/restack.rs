use super::{BranchStore, Service, StackRepository};
use crate::errors::{Result, StackError};
use crate::git::RebaseRequest;
use crate::state::{BranchRecord, BranchUpdate, UpsertRequest};
use git2::Oid;
use std::fmt;
use tracing::{debug, info, warn};

/// Result of [`Service::restack`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestackOutcome {
    /// The branch already contained its base's head; nothing was rebased
    AlreadyRestacked,
    /// The branch was rebased onto its base
    Restacked { base: String },
}

/// Result of [`Service::verify_restacked`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Restacked,
    /// `base` has moved to `base_hash` since the branch was last restacked
    NeedsRestack { base: String, base_hash: Oid },
}

/// Restack state of one branch, for reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RestackStatus {
    #[default]
    Unknown,
    AlreadyRestacked,
    NeedsRestack,
    Restacked,
    Error(String),
}

impl fmt::Display for RestackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestackStatus::Unknown => write!(f, "unknown"),
            RestackStatus::AlreadyRestacked => write!(f, "up to date"),
            RestackStatus::NeedsRestack => write!(f, "needs restack"),
            RestackStatus::Restacked => write!(f, "restacked"),
            RestackStatus::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

impl From<&RestackOutcome> for RestackStatus {
    fn from(outcome: &RestackOutcome) -> Self {
        match outcome {
            RestackOutcome::AlreadyRestacked => RestackStatus::AlreadyRestacked,
            RestackOutcome::Restacked { .. } => RestackStatus::Restacked,
        }
    }
}

/// Where a branch stands relative to its base
struct BaseState {
    head: Oid,
    base_head: Oid,
    merge_base: Oid,
}

impl BaseState {
    fn inspect<R: StackRepository>(repo: &R, name: &str, record: &BranchRecord) -> Result<Self> {
        let head = repo.branch_head(name)?;
        let base_head = repo.branch_head(&record.base).map_err(|e| {
            if e.is_not_found() {
                StackError::BaseMissing {
                    branch: name.to_string(),
                    base: record.base.clone(),
                }
            } else {
                e
            }
        })?;
        let merge_base = repo.merge_base(head, base_head)?;
        Ok(Self {
            head,
            base_head,
            merge_base,
        })
    }

    fn is_restacked(&self) -> bool {
        self.merge_base == self.base_head
    }
}

/// Restack status of `name` without changing anything
pub fn restack_status<R: StackRepository, S: BranchStore>(
    repo: &R,
    store: &S,
    name: &str,
) -> RestackStatus {
    let state = store
        .lookup_branch(name)
        .and_then(|record| BaseState::inspect(repo, name, &record));
    match state {
        Ok(state) if state.is_restacked() => RestackStatus::AlreadyRestacked,
        Ok(_) => RestackStatus::NeedsRestack,
        Err(e) => RestackStatus::Error(e.to_string()),
    }
}

impl<R: StackRepository, S: BranchStore> Service<R, S> {
    /// Rebase `name` onto the current head of its base, if it is not there
    /// already.
    ///
    /// An interrupted rebase is returned as is; the record is only updated
    /// once the rebase finished.
    pub fn restack(&self, name: &str) -> Result<RestackOutcome> {
        let record = self.store().lookup_branch(name)?;
        let state = BaseState::inspect(self.repo(), name, &record)?;

        if state.is_restacked() {
            if record.base_hash != Some(state.base_head) {
                self.refresh_base_hash(name, state.base_head);
            }
            debug!("'{}' is already restacked on '{}'", name, record.base);
            return Ok(RestackOutcome::AlreadyRestacked);
        }

        // The fork point survives amends and rebases of the base branch,
        // so commits that were rewritten there are not replayed again.
        let upstream = match self.repo().fork_point(&record.base, name) {
            Ok(fork_point) => fork_point,
            Err(e) => {
                debug!("No fork point for '{}' from '{}': {}", name, record.base, e);
                record.base_hash.unwrap_or(state.merge_base)
            }
        };
        debug!(
            "Restacking '{}' ({}) from {} onto {}",
            name, state.head, upstream, state.base_head
        );

        self.repo().rebase(&RebaseRequest {
            branch: name.to_string(),
            upstream: Some(upstream.to_string()),
            onto: Some(state.base_head.to_string()),
            autostash: true,
            quiet: true,
        })?;

        self.store().update_branches(BranchUpdate {
            upserts: vec![UpsertRequest {
                base_hash: Some(state.base_head),
                ..UpsertRequest::new(name)
            }],
            deletes: Vec::new(),
            message: format!("{name}: restacked on {}", record.base),
        })?;
        info!("Restacked '{}' on '{}'", name, record.base);

        Ok(RestackOutcome::Restacked { base: record.base })
    }

    /// Check whether `name` contains the head of its base.
    ///
    /// Corrects a stale stored base hash on the way, if the branch was
    /// restacked by other means.
    pub fn verify_restacked(&self, name: &str) -> Result<Verification> {
        let record = self.store().lookup_branch(name)?;
        let state = BaseState::inspect(self.repo(), name, &record)?;

        if !state.is_restacked() {
            return Ok(Verification::NeedsRestack {
                base: record.base,
                base_hash: state.base_head,
            });
        }

        if record.base_hash != Some(state.base_head) {
            self.refresh_base_hash(name, state.base_head);
        }
        Ok(Verification::Restacked)
    }

    /// Restack `name` and everything above it, bases first. Stops at the
    /// first failure.
    pub fn restack_upstack(&self, name: &str) -> Result<Vec<(String, RestackOutcome)>> {
        let upstack = self.list_upstack(name)?;
        let mut outcomes = Vec::with_capacity(upstack.len());
        for branch in upstack {
            if branch == self.trunk() {
                continue;
            }
            let outcome = self.restack(&branch)?;
            outcomes.push((branch, outcome));
        }
        Ok(outcomes)
    }

    fn refresh_base_hash(&self, name: &str, base_hash: Oid) {
        let result = self.store().update_branches(BranchUpdate {
            upserts: vec![UpsertRequest {
                base_hash: Some(base_hash),
                ..UpsertRequest::new(name)
            }],
            deletes: Vec::new(),
            message: format!("{name}: branch was restacked externally"),
        });
        if let Err(e) = result {
            warn!("Could not update base hash of '{}': {}", name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::fakes::{oid, FakeRepo};
    use crate::state::test_support::mem_store;
    use crate::state::Store;

    // main: 1 -> 5; feature forked at 1 with head 2.
    fn setup(stored_base_hash: Oid) -> Service<FakeRepo, Store> {
        setup_with(stored_base_hash, |_| {})
    }

    fn setup_with(
        stored_base_hash: Oid,
        configure: impl FnOnce(&mut FakeRepo),
    ) -> Service<FakeRepo, Store> {
        let mut repo = FakeRepo::with_heads(&[("main", oid(5)), ("feature", oid(2))])
            .merge_base_of(oid(5), oid(2), oid(1));
        configure(&mut repo);
        let store = mem_store();
        store
            .update_branches(BranchUpdate {
                upserts: vec![UpsertRequest {
                    base: Some("main".into()),
                    base_hash: Some(stored_base_hash),
                    ..UpsertRequest::new("feature")
                }],
                deletes: vec![],
                message: "track feature".into(),
            })
            .unwrap();
        Service::new(repo, store)
    }

    #[test]
    fn test_restack_uses_fork_point() {
        let svc = setup_with(oid(9), |repo| {
            repo.fork_points
                .insert(("main".into(), "feature".into()), oid(1));
        });

        let outcome = svc.restack("feature").unwrap();
        assert_eq!(
            outcome,
            RestackOutcome::Restacked {
                base: "main".into()
            }
        );

        let rebases = svc.repo().rebases.lock();
        assert_eq!(rebases.len(), 1);
        assert_eq!(rebases[0].upstream, Some(oid(1).to_string()));
        assert_eq!(rebases[0].onto, Some(oid(5).to_string()));
        assert!(rebases[0].autostash);

        assert_eq!(
            svc.store().lookup_branch("feature").unwrap().base_hash,
            Some(oid(5))
        );
    }

    #[test]
    fn test_restack_falls_back_to_stored_hash() {
        let svc = setup(oid(7));
        svc.restack("feature").unwrap();
        assert_eq!(
            svc.repo().rebases.lock()[0].upstream,
            Some(oid(7).to_string())
        );
    }

    #[test]
    fn test_already_restacked_refreshes_hash() {
        let repo = FakeRepo::with_heads(&[("main", oid(5)), ("feature", oid(6))])
            .merge_base_of(oid(5), oid(6), oid(5));
        let store = mem_store();
        store
            .update_branches(BranchUpdate {
                upserts: vec![UpsertRequest {
                    base: Some("main".into()),
                    base_hash: Some(oid(1)),
                    ..UpsertRequest::new("feature")
                }],
                deletes: vec![],
                message: "track feature".into(),
            })
            .unwrap();
        let svc = Service::new(repo, store);

        assert_eq!(svc.verify_restacked("feature").unwrap(), Verification::Restacked);
        assert_eq!(
            svc.store().lookup_branch("feature").unwrap().base_hash,
            Some(oid(5))
        );
        assert_eq!(
            svc.restack("feature").unwrap(),
            RestackOutcome::AlreadyRestacked
        );
        assert!(svc.repo().rebases.lock().is_empty());
    }

    #[test]
    fn test_verify_reports_needed_restack() {
        let svc = setup(oid(1));
        assert_eq!(
            svc.verify_restacked("feature").unwrap(),
            Verification::NeedsRestack {
                base: "main".into(),
                base_hash: oid(5),
            }
        );
        assert_eq!(
            restack_status(svc.repo(), svc.store(), "feature"),
            RestackStatus::NeedsRestack
        );
        // Verification never rebases or rewrites a stale record.
        assert!(svc.repo().rebases.lock().is_empty());
        assert_eq!(
            svc.store().lookup_branch("feature").unwrap().base_hash,
            Some(oid(1))
        );
    }

    #[test]
    fn test_missing_base() {
        let svc = setup(oid(1));
        svc.repo().heads.lock().remove("main");
        assert!(matches!(
            svc.restack("feature"),
            Err(StackError::BaseMissing { .. })
        ));
        assert!(matches!(
            restack_status(svc.repo(), svc.store(), "feature"),
            RestackStatus::Error(_)
        ));
    }

    #[test]
    fn test_conflict_leaves_record_alone() {
        let svc = setup_with(oid(1), |repo| repo.conflicts.push("feature".into()));

        assert!(svc.restack("feature").unwrap_err().is_conflict());
        assert_eq!(
            svc.store().lookup_branch("feature").unwrap().base_hash,
            Some(oid(1))
        );
    }
}
