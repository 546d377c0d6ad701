use super::Store;
use crate::errors::{Result, StackError};
use crate::storage::{Db, UpdateRequest};
use git2::Oid;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

const BRANCHES_DIR: &str = "branches";

fn branch_key(name: &str) -> String {
    format!("{BRANCHES_DIR}/{name}")
}

/// Stored state of one tracked branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRecord {
    /// Branch this one is stacked on: trunk or another tracked branch
    pub base: String,

    /// Head of `base` when this branch was last restacked
    #[serde(default, with = "hash_string")]
    pub base_hash: Option<Oid>,

    /// Remote branch this one pushes to; empty if none
    #[serde(default)]
    pub upstream_branch: String,

    /// Forge metadata for the branch's change request
    #[serde(default)]
    pub change: Option<serde_json::Value>,
}

impl BranchRecord {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            base_hash: None,
            upstream_branch: String::new(),
            change: None,
        }
    }
}

/// Hashes are stored as hex strings, empty when unknown
mod hash_string {
    use git2::Oid;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        hash: &Option<Oid>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match hash {
            Some(oid) => serializer.serialize_str(&oid.to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Oid>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        if s.is_empty() {
            return Ok(None);
        }
        Oid::from_str(&s).map(Some).map_err(de::Error::custom)
    }
}

/// Changes to one branch record. Unset fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct UpsertRequest {
    pub name: String,

    /// Required when the branch is not tracked yet
    pub base: Option<String>,

    pub base_hash: Option<Oid>,

    /// `Some("")` clears the upstream branch
    pub upstream_branch: Option<String>,

    /// `Some(Value::Null)` clears the change metadata
    pub change: Option<serde_json::Value>,
}

impl UpsertRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Records whose base is `old_trunk`, rewritten to sit on `new_trunk`
pub(super) fn rebased_on_new_trunk(
    db: &Db,
    old_trunk: &str,
    new_trunk: &str,
) -> Result<Vec<(String, BranchRecord)>> {
    let mut moved = Vec::new();
    for name in db.keys(BRANCHES_DIR)? {
        let mut record: BranchRecord = db.get(&branch_key(&name))?;
        if record.base == old_trunk {
            record.base = new_trunk.to_string();
            moved.push((branch_key(&name), record));
        }
    }
    Ok(moved)
}

/// Whether `name` has a branch record in `db`
pub(super) fn has_record(db: &Db, name: &str) -> Result<bool> {
    match db.get::<BranchRecord>(&branch_key(name)) {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// A batch of branch changes committed as a single transaction
#[derive(Debug, Clone, Default)]
pub struct BranchUpdate {
    pub upserts: Vec<UpsertRequest>,
    pub deletes: Vec<String>,
    pub message: String,
}

impl Store {
    /// Record of a tracked branch, or `NotTracked`
    pub fn lookup_branch(&self, name: &str) -> Result<BranchRecord> {
        self.db().get(&branch_key(name)).map_err(|e| {
            if e.is_not_found() {
                StackError::NotTracked(name.to_string())
            } else {
                e
            }
        })
    }

    /// Names of all tracked branches, sorted. Trunk is never among them.
    pub fn list_branches(&self) -> Result<Vec<String>> {
        let mut branches = self.db().keys(BRANCHES_DIR)?;
        branches.sort();
        Ok(branches)
    }

    pub fn begin_branch_tx(&self) -> BranchTx<'_> {
        BranchTx {
            store: self,
            states: HashMap::new(),
            sets: BTreeSet::new(),
            dels: BTreeSet::new(),
        }
    }

    /// Apply upserts, then deletes, as one commit
    pub fn update_branches(&self, req: BranchUpdate) -> Result<()> {
        let mut tx = self.begin_branch_tx();
        for upsert in req.upserts {
            tx.upsert(upsert)?;
        }
        for name in &req.deletes {
            tx.delete(name)?;
        }
        tx.commit(&req.message)
    }
}

/// Validating batch of branch changes.
///
/// Reads see the transaction's own pending writes.
pub struct BranchTx<'a> {
    store: &'a Store,
    states: HashMap<String, BranchRecord>,
    sets: BTreeSet<String>,
    dels: BTreeSet<String>,
}

impl BranchTx<'_> {
    pub fn upsert(&mut self, req: UpsertRequest) -> Result<()> {
        if req.name.is_empty() {
            return Err(StackError::validation("branch name is required"));
        }
        if req.name == self.store.trunk() {
            return Err(StackError::Trunk(req.name));
        }

        let mut state = match self.state(&req.name)? {
            Some(state) => state,
            None => match &req.base {
                Some(base) if !base.is_empty() => BranchRecord::new(base.clone()),
                _ => {
                    return Err(StackError::validation(format!(
                        "new branch {} must have a base",
                        req.name
                    )))
                }
            },
        };

        if let Some(base) = req.base.as_deref().filter(|b| !b.is_empty()) {
            if base == req.name {
                return Err(StackError::Cycle {
                    path: vec![req.name.clone(), req.name.clone()],
                });
            }
            if base != self.store.trunk() {
                if self.state(base)?.is_none() {
                    return Err(StackError::BaseNotTracked(base.to_string()));
                }
                if let Some(path) = self.path_to(base, &req.name)? {
                    return Err(StackError::Cycle { path });
                }
            }
            state.base = base.to_string();
        }

        if let Some(hash) = req.base_hash {
            state.base_hash = Some(hash);
        }

        if let Some(upstream) = req.upstream_branch {
            state.upstream_branch = upstream;
        }

        match req.change {
            Some(serde_json::Value::Null) => state.change = None,
            Some(change) => state.change = Some(change),
            None => {}
        }

        self.dels.remove(&req.name);
        self.sets.insert(req.name.clone());
        self.states.insert(req.name, state);
        Ok(())
    }

    /// Untrack a branch. Fails while other branches are based on it.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(StackError::validation("branch name is required"));
        }
        if name == self.store.trunk() {
            return Err(StackError::Trunk(name.to_string()));
        }
        if self.state(name)?.is_none() {
            return Err(StackError::NotTracked(name.to_string()));
        }

        let aboves = self.aboves(name)?;
        if !aboves.is_empty() {
            return Err(StackError::validation(format!(
                "branch {} is needed by {}",
                name,
                aboves.join(", ")
            )));
        }

        self.sets.remove(name);
        self.states.remove(name);
        self.dels.insert(name.to_string());
        Ok(())
    }

    /// Write every pending change in one store update
    pub fn commit(mut self, message: &str) -> Result<()> {
        if self.sets.is_empty() && self.dels.is_empty() {
            debug!("branch transaction has no changes");
            return Ok(());
        }

        let mut req = UpdateRequest::new(self.store.message_or_default(message, "update branches"));
        for name in &self.sets {
            let state = self
                .states
                .remove(name)
                .ok_or_else(|| StackError::validation(format!("no pending state for {name}")))?;
            req = req.set(branch_key(name), &state)?;
        }
        for name in &self.dels {
            req = req.delete(branch_key(name));
        }

        self.store.db().update(req)
    }

    fn state(&mut self, name: &str) -> Result<Option<BranchRecord>> {
        if self.dels.contains(name) {
            return Ok(None);
        }
        if let Some(state) = self.states.get(name) {
            return Ok(Some(state.clone()));
        }

        match self.store.lookup_branch(name) {
            Ok(state) => {
                self.states.insert(name.to_string(), state.clone());
                Ok(Some(state))
            }
            Err(StackError::NotTracked(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn branches(&self) -> Result<BTreeSet<String>> {
        let mut names: BTreeSet<String> = self.store.list_branches()?.into_iter().collect();
        names.extend(self.sets.iter().cloned());
        names.retain(|n| !self.dels.contains(n));
        Ok(names)
    }

    fn aboves(&mut self, name: &str) -> Result<Vec<String>> {
        let mut aboves = Vec::new();
        for branch in self.branches()? {
            if let Some(state) = self.state(&branch)? {
                if state.base == name {
                    aboves.push(branch);
                }
            }
        }
        Ok(aboves)
    }

    /// If following bases down from `from` reaches `to`, the edge `to -> from`
    /// would close a loop; returns that loop.
    fn path_to(&mut self, from: &str, to: &str) -> Result<Option<Vec<String>>> {
        let mut seen = HashSet::new();
        let mut path = vec![to.to_string()];
        let mut cur = from.to_string();

        while cur != to {
            if cur == self.store.trunk() {
                return Ok(None);
            }
            if !seen.insert(cur.clone()) {
                // The stored graph already loops without passing through `to`.
                path.push(cur);
                return Err(StackError::Cycle { path });
            }
            path.push(cur.clone());

            match self.state(&cur)? {
                Some(state) => cur = state.base,
                None => return Ok(None),
            }
        }

        path.push(to.to_string());
        Ok(Some(path))
    }
}
