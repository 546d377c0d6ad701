//! Key-value storage for stack state.
//!
//! Keys are '/'-separated paths; values are JSON documents. The durable
//! backend is [`GitBackend`], which keeps the whole key space as a git tree
//! committed to a dedicated ref. [`MemBackend`] holds the same data in memory.

pub mod git;
pub mod memory;

pub use git::{Author, CommitRequest, GitBackend, ObjectStore, SetRefRequest};
pub use memory::MemBackend;

use crate::errors::{Result, StackError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// One key to write in a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct SetRequest {
    pub key: String,
    pub value: serde_json::Value,
}

/// A set of writes and deletes applied atomically, as one commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRequest {
    pub sets: Vec<SetRequest>,
    pub deletes: Vec<String>,
    pub message: String,
}

impl UpdateRequest {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn set<T: Serialize>(mut self, key: impl Into<String>, value: &T) -> Result<Self> {
        self.sets.push(SetRequest {
            key: key.into(),
            value: serde_json::to_value(value)?,
        });
        Ok(self)
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.deletes.push(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.deletes.is_empty()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.sets
            .iter()
            .map(|s| s.key.as_str())
            .chain(self.deletes.iter().map(String::as_str))
            .try_for_each(validate_key)
    }
}

/// Storage for raw JSON values
pub trait Backend: Send + Sync {
    /// Encoded value at `key`, or `NotExist`
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Apply all sets and deletes atomically
    fn update(&self, req: UpdateRequest) -> Result<()>;

    /// Remove every key atomically
    fn clear(&self, message: &str) -> Result<()>;

    /// Keys below `dir`, recursively, with `dir/` stripped, sorted
    fn keys(&self, dir: &str) -> Result<Vec<String>>;
}

/// Keys split on '/' into non-empty components other than `.` and `..`
pub fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != ".." && !part.contains('\0'));
    if valid {
        Ok(())
    } else {
        Err(StackError::InvalidKey(key.to_string()))
    }
}

/// Stored form of a value: indented JSON with a trailing newline
pub(crate) fn encode_value(value: &serde_json::Value) -> Result<Vec<u8>> {
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');
    Ok(data)
}

/// Typed access to a backend
#[derive(Clone)]
pub struct Db {
    backend: Arc<dyn Backend>,
}

impl Db {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let data = self.backend.get(key)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T, message: &str) -> Result<()> {
        self.update(UpdateRequest::new(message).set(key, value)?)
    }

    pub fn delete(&self, key: &str, message: &str) -> Result<()> {
        self.update(UpdateRequest::new(message).delete(key))
    }

    pub fn update(&self, req: UpdateRequest) -> Result<()> {
        self.backend.update(req)
    }

    pub fn clear(&self, message: &str) -> Result<()> {
        self.backend.clear(message)
    }

    pub fn keys(&self, dir: &str) -> Result<Vec<String>> {
        self.backend.keys(dir)
    }
}
