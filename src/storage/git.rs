use super::{encode_value, Backend, UpdateRequest};
use crate::clock::Clock;
use crate::errors::{Result, StackError};
use chrono::{DateTime, Utc};
use git2::Oid;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of compare-and-swap attempts per transaction
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Identity recorded on data commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub message: String,
    pub author: Author,
    pub time: DateTime<Utc>,
}

/// Ref update guarded by the value the ref is expected to hold
#[derive(Debug, Clone)]
pub struct SetRefRequest {
    pub name: String,
    pub new: Oid,
    /// `None` means the ref must not exist yet
    pub old: Option<Oid>,
    pub message: String,
}

/// The git object and ref operations the storage backend needs
pub trait ObjectStore: Send {
    /// Commit a ref points at, if the ref exists
    fn read_ref(&self, name: &str) -> Result<Option<Oid>>;

    /// Tree of a commit
    fn commit_tree(&self, commit: Oid) -> Result<Oid>;

    /// Contents of the blob at `path` inside `tree`
    fn read_blob(&self, tree: Oid, path: &str) -> Result<Option<Vec<u8>>>;

    /// Blob paths below `dir` inside `tree`, relative to `dir`
    fn list_blobs(&self, tree: Oid, dir: &str) -> Result<Vec<String>>;

    fn write_blob(&self, data: &[u8]) -> Result<Oid>;

    /// Write a tree derived from `base` (or an empty tree) with `deletes`
    /// removed and then `writes` added. Emptied subtrees are dropped.
    fn update_tree(
        &self,
        base: Option<Oid>,
        writes: &[(String, Oid)],
        deletes: &[String],
    ) -> Result<Oid>;

    fn empty_tree(&self) -> Result<Oid>;

    fn create_commit(&self, req: &CommitRequest) -> Result<Oid>;

    /// Compare-and-swap the ref. Returns false if it no longer held `old`.
    fn set_ref(&self, req: &SetRefRequest) -> Result<bool>;
}

/// Key-value backend storing every key as a path in a git tree, committed
/// to a dedicated ref.
///
/// Updates are optimistic: the new commit is swapped in only if the ref
/// still points at the commit the update was built on. Otherwise the same
/// logical update is rebuilt on the new state, up to `max_attempts` times.
pub struct GitBackend<S> {
    store: Mutex<S>,
    ref_name: String,
    author: Author,
    clock: Arc<dyn Clock>,
    max_attempts: usize,
}

impl<S: ObjectStore> GitBackend<S> {
    pub fn new(
        store: S,
        ref_name: impl Into<String>,
        author: Author,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            ref_name: ref_name.into(),
            author,
            clock,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Bound on compare-and-swap attempts per update (at least one)
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    /// Commit the data ref currently points at
    pub fn head(&self) -> Result<Option<Oid>> {
        self.store.lock().read_ref(&self.ref_name)
    }

    fn current_tree(&self, store: &S) -> Result<Option<Oid>> {
        match store.read_ref(&self.ref_name)? {
            Some(commit) => Ok(Some(store.commit_tree(commit)?)),
            None => Ok(None),
        }
    }

    fn apply(
        &self,
        writes: &[(String, Oid)],
        deletes: &[String],
        clear: bool,
        message: &str,
    ) -> Result<()> {
        let store = self.store.lock();

        for attempt in 1..=self.max_attempts {
            let prev_commit = store.read_ref(&self.ref_name)?;
            let prev_tree = match prev_commit {
                Some(commit) => store.commit_tree(commit)?,
                None => store.empty_tree()?,
            };

            let new_tree = if clear {
                store.empty_tree()?
            } else {
                store.update_tree(prev_commit.map(|_| prev_tree), writes, deletes)?
            };

            if new_tree == prev_tree {
                debug!("{}: no changes; skipping commit", self.ref_name);
                return Ok(());
            }

            let commit = store.create_commit(&CommitRequest {
                tree: new_tree,
                parents: prev_commit.into_iter().collect(),
                message: message.to_string(),
                author: self.author.clone(),
                time: self.clock.now(),
            })?;

            let swapped = store.set_ref(&SetRefRequest {
                name: self.ref_name.clone(),
                new: commit,
                old: prev_commit,
                message: message.to_string(),
            })?;
            if swapped {
                debug!("{}: committed {} ({})", self.ref_name, commit, message);
                return Ok(());
            }

            warn!(
                "could not update {} (attempt {}/{}): retrying",
                self.ref_name, attempt, self.max_attempts
            );
        }

        Err(StackError::ConcurrentModification {
            ref_name: self.ref_name.clone(),
            attempts: self.max_attempts,
        })
    }
}

impl<S: ObjectStore> Backend for GitBackend<S> {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let store = self.store.lock();
        let tree = self
            .current_tree(&store)?
            .ok_or_else(|| StackError::not_exist(key))?;
        store
            .read_blob(tree, key)?
            .ok_or_else(|| StackError::not_exist(key))
    }

    fn update(&self, req: UpdateRequest) -> Result<()> {
        req.validate()?;

        // Blobs are content-addressed, so they survive retries unchanged.
        let mut writes = Vec::with_capacity(req.sets.len());
        {
            let store = self.store.lock();
            for set in &req.sets {
                let blob = store.write_blob(&encode_value(&set.value)?)?;
                writes.push((set.key.clone(), blob));
            }
        }

        self.apply(&writes, &req.deletes, false, &req.message)
    }

    fn clear(&self, message: &str) -> Result<()> {
        self.apply(&[], &[], true, message)
    }

    fn keys(&self, dir: &str) -> Result<Vec<String>> {
        let store = self.store.lock();
        match self.current_tree(&store)? {
            Some(tree) => store.list_blobs(tree, dir.trim_end_matches('/')),
            None => Ok(Vec::new()),
        }
    }
}
