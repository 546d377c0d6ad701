//! Typed stack state on top of the key-value store.
//!
//! Layout:
//!
//! - `repo`: trunk and remote names, written by `init`
//! - `version`: layout version of everything else
//! - `branches/<name>`: one record per tracked branch
//! - `rebase-continue`: commands to resume after an interrupted rebase

pub mod branch;
pub mod continuation;

pub use branch::{BranchRecord, BranchTx, BranchUpdate, UpsertRequest};
pub use continuation::{Continuation, ContinuationRequest};

use crate::clock::Clock;
use crate::errors::{Result, StackError};
use crate::storage::{Db, UpdateRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const REPO_KEY: &str = "repo";
const VERSION_KEY: &str = "version";

/// Layout version written by this build
pub const LAYOUT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepoInfo {
    trunk: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    remote: String,
}

/// Arguments to [`Store::init`]
#[derive(Debug, Clone, Default)]
pub struct InitRequest {
    pub trunk: String,
    pub remote: Option<String>,
    /// Discard all existing state first
    pub reset: bool,
}

/// Stack state for one repository
pub struct Store {
    db: Db,
    trunk: String,
    remote: Option<String>,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Initialize (or re-initialize) the store.
    ///
    /// Re-initializing keeps tracked branches. The new trunk must not be one
    /// of them, and branches based on the old trunk move to the new one.
    pub fn init(db: Db, clock: Arc<dyn Clock>, req: InitRequest) -> Result<Self> {
        if req.trunk.is_empty() {
            return Err(StackError::validation("trunk branch name is required"));
        }

        let mut update = UpdateRequest::new(format!("initialize store with trunk {}", req.trunk));
        if req.reset {
            db.clear("reset store")?;
        } else if let Some(previous) = Self::repo_info(&db)? {
            if branch::has_record(&db, &req.trunk)? {
                return Err(StackError::validation(format!(
                    "trunk branch {} is tracked; untrack it first or use --reset to clear",
                    req.trunk
                )));
            }
            if previous.trunk != req.trunk {
                for (key, record) in
                    branch::rebased_on_new_trunk(&db, &previous.trunk, &req.trunk)?
                {
                    info!("Moving {} from '{}' to '{}'", key, previous.trunk, req.trunk);
                    update = update.set(key, &record)?;
                }
            }
        }

        let info = RepoInfo {
            trunk: req.trunk.clone(),
            remote: req.remote.clone().unwrap_or_default(),
        };
        db.update(
            update
                .set(REPO_KEY, &info)?
                .set(VERSION_KEY, &LAYOUT_VERSION)?,
        )?;
        info!("Initialized stack state with trunk '{}'", req.trunk);

        Ok(Self {
            db,
            trunk: req.trunk,
            remote: req.remote.filter(|r| !r.is_empty()),
            clock,
        })
    }

    fn repo_info(db: &Db) -> Result<Option<RepoInfo>> {
        match db.get(REPO_KEY) {
            Ok(info) => Ok(Some(info)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Open a store created by [`Store::init`]
    pub fn open(db: Db, clock: Arc<dyn Clock>) -> Result<Self> {
        let info = Self::repo_info(&db)?.ok_or(StackError::NotInitialized)?;

        let version: u32 = db.get(VERSION_KEY).or_else(|e| {
            if e.is_not_found() {
                Ok(LAYOUT_VERSION)
            } else {
                Err(e)
            }
        })?;
        if version != LAYOUT_VERSION {
            return Err(StackError::config(format!(
                "stack state has layout version {version}, this build understands {LAYOUT_VERSION}"
            )));
        }

        Ok(Self {
            db,
            trunk: info.trunk,
            remote: Some(info.remote).filter(|r| !r.is_empty()),
            clock,
        })
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    /// `message`, or a timestamped default when it is blank
    pub(crate) fn message_or_default(&self, message: &str, action: &str) -> String {
        if message.trim().is_empty() {
            format!("{action} at {}", self.clock.now().to_rfc3339())
        } else {
            message.to_string()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::storage::MemBackend;

    #[test]
    fn test_open_uninitialized() {
        let db = Db::new(Arc::new(MemBackend::new()));
        assert!(matches!(
            Store::open(db, clock()),
            Err(StackError::NotInitialized)
        ));
    }

    #[test]
    fn test_init_then_open() {
        let backend = Arc::new(MemBackend::new());
        let db = Db::new(backend.clone());
        Store::init(
            db.clone(),
            clock(),
            InitRequest {
                trunk: "main".into(),
                remote: Some("origin".into()),
                reset: false,
            },
        )
        .unwrap();

        let store = Store::open(db, clock()).unwrap();
        assert_eq!(store.trunk(), "main");
        assert_eq!(store.remote(), Some("origin"));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let store = mem_store();
        store
            .db()
            .set(VERSION_KEY, &(LAYOUT_VERSION + 1), "bump")
            .unwrap();

        let err = Store::open(store.db().clone(), clock()).err().unwrap();
        assert!(matches!(err, StackError::Config(_)));
    }

    #[test]
    fn test_reset_discards_state() {
        let store = mem_store();
        store
            .db()
            .set("branches/feature", &serde_json::json!({"base": "main"}), "seed")
            .unwrap();

        let store = Store::init(
            store.db().clone(),
            clock(),
            InitRequest {
                trunk: "develop".into(),
                remote: None,
                reset: true,
            },
        )
        .unwrap();
        assert_eq!(store.trunk(), "develop");
        assert!(store.db().keys("branches").unwrap().is_empty());
    }

    fn track(store: &Store, name: &str, base: &str) {
        store
            .update_branches(BranchUpdate {
                upserts: vec![UpsertRequest {
                    base: Some(base.into()),
                    ..UpsertRequest::new(name)
                }],
                deletes: vec![],
                message: format!("track {name}"),
            })
            .unwrap();
    }

    fn reinit(store: &Store, trunk: &str) -> Result<Store> {
        Store::init(
            store.db().clone(),
            clock(),
            InitRequest {
                trunk: trunk.into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_reinit_rejects_tracked_trunk() {
        let store = mem_store();
        track(&store, "develop", "main");
        track(&store, "feat", "main");

        let err = reinit(&store, "develop").err().unwrap();
        assert!(matches!(&err, StackError::Validation(msg) if msg.contains("--reset")));

        let reopened = Store::open(store.db().clone(), clock()).unwrap();
        assert_eq!(reopened.trunk(), "main");
        assert_eq!(reopened.lookup_branch("develop").unwrap().base, "main");
    }

    #[test]
    fn test_reinit_moves_branches_to_new_trunk() {
        let store = mem_store();
        track(&store, "feat", "main");
        track(&store, "child", "feat");

        let store = reinit(&store, "develop").unwrap();
        assert_eq!(store.trunk(), "develop");
        assert_eq!(store.lookup_branch("feat").unwrap().base, "develop");
        assert_eq!(store.lookup_branch("child").unwrap().base, "feat");
        assert!(store.lookup_branch("main").unwrap_err().is_not_found());
    }

    #[test]
    fn test_reinit_same_trunk_keeps_branches() {
        let store = mem_store();
        track(&store, "feat", "main");

        let store = reinit(&store, "main").unwrap();
        assert_eq!(store.list_branches().unwrap(), vec!["feat"]);
        assert_eq!(store.lookup_branch("feat").unwrap().base, "main");
    }

    #[test]
    fn test_default_message_uses_clock() {
        let store = mem_store();
        assert_eq!(
            store.message_or_default("", "update branches"),
            "update branches at 2024-05-01T12:00:00+00:00"
        );
        assert_eq!(store.message_or_default("custom", "ignored"), "custom");
    }
}
