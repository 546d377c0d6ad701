//! Stack graph engine
//!
//! Branches form a forest rooted at trunk: every tracked branch records the
//! branch it is based on. This module walks that forest and keeps branches
//! rebased onto their bases:
//! - `graph`: the forest, rebuilt from the branch store for every command
//! - `service`: tracking, untracking and moving branches
//! - `restack`: restacking and restack verification
//! - `status`: read-only restack status for many branches at once
//! - `rescue`: recording how to resume after an interrupted rebase

pub mod graph;
pub mod rescue;
pub mod restack;
pub mod service;
pub mod status;

pub use graph::BranchGraph;
pub use restack::{RestackOutcome, RestackStatus, Verification};
pub use service::{BranchInfo, Service};
pub use status::restack_statuses;

use crate::errors::Result;
use crate::git::{GitRepository, RebaseRequest};
use crate::state::{BranchRecord, BranchUpdate, ContinuationRequest, Store};
use git2::Oid;

/// Git queries and operations the engine relies on
pub trait StackRepository {
    /// Head of a local branch; `NotExist` if there is no such branch
    fn branch_head(&self, name: &str) -> Result<Oid>;

    /// Commit any revision resolves to; `NotExist` if it does not resolve
    fn peel_to_commit(&self, rev: &str) -> Result<Oid>;

    fn merge_base(&self, a: Oid, b: Oid) -> Result<Oid>;

    /// Where `branch` forked from `base`, consulting the reflog of `base`
    fn fork_point(&self, base: &str, branch: &str) -> Result<Oid>;

    fn rebase(&self, req: &RebaseRequest) -> Result<()>;
}

impl StackRepository for GitRepository {
    fn branch_head(&self, name: &str) -> Result<Oid> {
        GitRepository::branch_head(self, name)
    }

    fn peel_to_commit(&self, rev: &str) -> Result<Oid> {
        GitRepository::peel_to_commit(self, rev)
    }

    fn merge_base(&self, a: Oid, b: Oid) -> Result<Oid> {
        GitRepository::merge_base(self, a, b)
    }

    fn fork_point(&self, base: &str, branch: &str) -> Result<Oid> {
        GitRepository::fork_point(self, base, branch)
    }

    fn rebase(&self, req: &RebaseRequest) -> Result<()> {
        GitRepository::rebase(self, req)
    }
}

/// Branch records as the engine sees them
pub trait BranchStore {
    fn trunk(&self) -> &str;

    /// Record of a tracked branch, or `NotTracked`
    fn lookup_branch(&self, name: &str) -> Result<BranchRecord>;

    /// Tracked branch names, sorted
    fn list_branches(&self) -> Result<Vec<String>>;

    fn update_branches(&self, req: BranchUpdate) -> Result<()>;

    fn append_continuation(&self, req: ContinuationRequest) -> Result<()>;
}

impl BranchStore for Store {
    fn trunk(&self) -> &str {
        Store::trunk(self)
    }

    fn lookup_branch(&self, name: &str) -> Result<BranchRecord> {
        Store::lookup_branch(self, name)
    }

    fn list_branches(&self) -> Result<Vec<String>> {
        Store::list_branches(self)
    }

    fn update_branches(&self, req: BranchUpdate) -> Result<()> {
        Store::update_branches(self, req)
    }

    fn append_continuation(&self, req: ContinuationRequest) -> Result<()> {
        Store::append_continuation(self, req)
    }
}
