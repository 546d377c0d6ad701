use super::{encode_value, Backend, UpdateRequest};
use crate::errors::{Result, StackError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-memory backend with the same contract as the git backend
#[derive(Debug, Default)]
pub struct MemBackend {
    items: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl Backend for MemBackend {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.items
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StackError::not_exist(key))
    }

    fn update(&self, req: UpdateRequest) -> Result<()> {
        req.validate()?;

        let mut encoded = Vec::with_capacity(req.sets.len());
        for set in &req.sets {
            encoded.push((set.key.clone(), encode_value(&set.value)?));
        }

        let mut items = self.items.write();
        for key in &req.deletes {
            let prefix = format!("{key}/");
            items.retain(|k, _| k != key && !k.starts_with(&prefix));
        }
        items.extend(encoded);
        Ok(())
    }

    fn clear(&self, _message: &str) -> Result<()> {
        self.items.write().clear();
        Ok(())
    }

    fn keys(&self, dir: &str) -> Result<Vec<String>> {
        let dir = dir.trim_end_matches('/');
        let items = self.items.read();
        if dir.is_empty() {
            return Ok(items.keys().cloned().collect());
        }

        let prefix = format!("{dir}/");
        Ok(items
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(str::to_string)
            .collect())
    }
}
