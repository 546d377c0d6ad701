use super::{BranchGraph, BranchStore, StackRepository};
use crate::errors::{Result, StackError};
use crate::git::RebaseRequest;
use crate::state::{BranchRecord, BranchUpdate, UpsertRequest};
use git2::Oid;
use tracing::{info, warn};

/// A tracked branch together with where it points in git
#[derive(Debug, Clone, PartialEq)]
pub struct BranchInfo {
    pub name: String,
    pub record: BranchRecord,
    pub head: Oid,
}

/// Stack operations over a repository and its branch records
pub struct Service<R, S> {
    repo: R,
    store: S,
}

impl<R: StackRepository, S: BranchStore> Service<R, S> {
    pub fn new(repo: R, store: S) -> Self {
        Self { repo, store }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn trunk(&self) -> &str {
        self.store.trunk()
    }

    /// Record and head of a tracked branch
    pub fn lookup_branch(&self, name: &str) -> Result<BranchInfo> {
        let record = self.store.lookup_branch(name)?;
        let head = self.repo.branch_head(name)?;
        Ok(BranchInfo {
            name: name.to_string(),
            record,
            head,
        })
    }

    pub fn load_graph(&self) -> Result<BranchGraph> {
        let mut edges = Vec::new();
        for name in self.store.list_branches()? {
            let record = self.store.lookup_branch(&name)?;
            edges.push((name, record.base));
        }
        Ok(BranchGraph::new(self.store.trunk(), edges))
    }

    /// Every tracked branch that still exists in git
    pub fn load_branches(&self) -> Result<Vec<BranchInfo>> {
        let mut branches = Vec::new();
        for name in self.store.list_branches()? {
            match self.lookup_branch(&name) {
                Ok(info) => branches.push(info),
                Err(e) if e.is_not_found() => {
                    warn!("Skipping tracked branch '{}': {}", name, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(branches)
    }

    pub fn list_upstack(&self, name: &str) -> Result<Vec<String>> {
        self.load_graph()?.list_upstack(name)
    }

    pub fn find_top(&self, name: &str) -> Result<Vec<String>> {
        self.load_graph()?.find_top(name)
    }

    pub fn find_bottom(&self, name: &str) -> Result<String> {
        if name == self.trunk() {
            return Err(StackError::Trunk(name.to_string()));
        }
        self.load_graph()?.find_bottom(name)
    }

    /// Start tracking `name` on top of `base`
    pub fn track_branch(&self, name: &str, base: &str) -> Result<BranchRecord> {
        let head = self.repo.branch_head(name)?;
        let base_head = self.repo.branch_head(base)?;
        let base_hash = self.repo.merge_base(head, base_head)?;

        self.store.update_branches(BranchUpdate {
            upserts: vec![UpsertRequest {
                base: Some(base.to_string()),
                base_hash: Some(base_hash),
                ..UpsertRequest::new(name)
            }],
            deletes: Vec::new(),
            message: format!("track {name} on {base}"),
        })?;
        info!("Tracking '{}' on '{}'", name, base);

        self.store.lookup_branch(name)
    }

    /// Stop tracking `name`. Branches stacked on it move down to its base.
    pub fn forget_branch(&self, name: &str) -> Result<Vec<String>> {
        let record = self.store.lookup_branch(name)?;
        let children = self.load_graph()?.list_above(name);

        let upserts = children
            .iter()
            .map(|child| UpsertRequest {
                base: Some(record.base.clone()),
                ..UpsertRequest::new(child.clone())
            })
            .collect();
        self.store.update_branches(BranchUpdate {
            upserts,
            deletes: vec![name.to_string()],
            message: format!("untrack {name}"),
        })?;

        info!("Stopped tracking '{}'", name);
        Ok(children)
    }

    /// Move `name` onto `onto`: replay the commits it has on top of its
    /// current base, then record `onto` as its base
    pub fn branch_onto(&self, name: &str, onto: &str) -> Result<()> {
        let record = self.store.lookup_branch(name)?;
        if onto == name {
            return Err(StackError::Cycle {
                path: vec![name.to_string(), name.to_string()],
            });
        }
        if onto != self.trunk() {
            self.store.lookup_branch(onto).map_err(|e| match e {
                StackError::NotTracked(base) => StackError::BaseNotTracked(base),
                e => e,
            })?;

            let downstack = self.load_graph()?.list_downstack(onto)?;
            if let Some(i) = downstack.iter().position(|b| b == name) {
                let mut path = vec![name.to_string()];
                path.extend(downstack[..=i].iter().cloned());
                return Err(StackError::Cycle { path });
            }
        }

        let upstream = match self.repo.branch_head(&record.base) {
            Ok(head) => head,
            Err(e) if e.is_not_found() => record.base_hash.ok_or_else(|| StackError::BaseMissing {
                branch: name.to_string(),
                base: record.base.clone(),
            })?,
            Err(e) => return Err(e),
        };
        // Trunk resolves as a revision; it need not be a local branch.
        let onto_head = if onto == self.trunk() {
            self.repo.peel_to_commit(onto)?
        } else {
            self.repo.branch_head(onto)?
        };

        self.repo.rebase(&RebaseRequest {
            branch: name.to_string(),
            upstream: Some(upstream.to_string()),
            onto: Some(onto_head.to_string()),
            autostash: true,
            quiet: true,
        })?;

        self.store.update_branches(BranchUpdate {
            upserts: vec![UpsertRequest {
                base: Some(onto.to_string()),
                base_hash: Some(onto_head),
                ..UpsertRequest::new(name)
            }],
            deletes: Vec::new(),
            message: format!("{name}: moved onto {onto}"),
        })?;
        info!("Moved '{}' onto '{}'", name, onto);
        Ok(())
    }
}
