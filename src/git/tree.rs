use crate::errors::{Result, StackError};
use crate::git::GitRepository;
use crate::storage::{CommitRequest, ObjectStore, SetRefRequest};
use git2::{
    ErrorCode, FileMode, ObjectType, Oid, Repository, Signature, Time, Tree, TreeWalkMode,
    TreeWalkResult,
};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Pending edits below one tree, keyed by entry name
#[derive(Default)]
struct TreeEdit {
    /// `Some(Some(oid))` writes a blob here, `Some(None)` deletes the entry
    blob: Option<Option<Oid>>,
    children: BTreeMap<String, TreeEdit>,
}

impl TreeEdit {
    fn entry(&mut self, path: &str) -> &mut TreeEdit {
        path.split('/').fold(self, |node, part| {
            node.children.entry(part.to_string()).or_default()
        })
    }
}

/// Rewrite `base` with `edit` applied. `None` when the result is empty.
fn write_tree(
    repo: &Repository,
    base: Option<&Tree<'_>>,
    edit: &TreeEdit,
) -> Result<Option<Oid>> {
    let mut builder = repo.treebuilder(base)?;

    for (name, child) in &edit.children {
        let existing = builder.get(name)?.map(|e| (e.id(), e.kind()));

        if child.children.is_empty() {
            match child.blob {
                Some(Some(blob)) => {
                    builder.insert(name, blob, FileMode::Blob.into())?;
                }
                Some(None) if existing.is_some() => builder.remove(name)?,
                _ => {}
            }
            continue;
        }

        if matches!(child.blob, Some(Some(_))) {
            return Err(StackError::InvalidKey(format!(
                "{name} is written both as a value and as a directory"
            )));
        }

        // A delete of `name` together with writes below it starts from scratch.
        let sub_base = match (child.blob, existing) {
            (None, Some((id, Some(ObjectType::Tree)))) => Some(repo.find_tree(id)?),
            _ => None,
        };
        let existing_is_tree = matches!(existing, Some((_, Some(ObjectType::Tree))));
        match write_tree(repo, sub_base.as_ref(), child)? {
            Some(tree) => {
                builder.insert(name, tree, FileMode::Tree.into())?;
            }
            // Only deletes below a value: they name nothing that exists.
            None if child.blob.is_none() && !existing_is_tree => {}
            None if existing.is_some() => builder.remove(name)?,
            None => {}
        }
    }

    if builder.is_empty() {
        return Ok(None);
    }
    Ok(Some(builder.write()?))
}

impl ObjectStore for GitRepository {
    fn read_ref(&self, name: &str) -> Result<Option<Oid>> {
        match self.raw().refname_to_id(name) {
            Ok(oid) => Ok(Some(oid)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn commit_tree(&self, commit: Oid) -> Result<Oid> {
        Ok(self.raw().find_commit(commit)?.tree_id())
    }

    fn read_blob(&self, tree: Oid, path: &str) -> Result<Option<Vec<u8>>> {
        let tree = self.raw().find_tree(tree)?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if entry.kind() != Some(ObjectType::Blob) {
            return Ok(None);
        }
        Ok(Some(self.raw().find_blob(entry.id())?.content().to_vec()))
    }

    fn list_blobs(&self, tree: Oid, dir: &str) -> Result<Vec<String>> {
        let repo = self.raw();
        let root = repo.find_tree(tree)?;
        let tree = if dir.is_empty() {
            root
        } else {
            match root.get_path(Path::new(dir)) {
                Ok(entry) if entry.kind() == Some(ObjectType::Tree) => {
                    repo.find_tree(entry.id())?
                }
                Ok(_) => return Ok(Vec::new()),
                Err(e) if e.code() == ErrorCode::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            }
        };

        let mut paths = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |parent, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                paths.push(format!(
                    "{}{}",
                    parent,
                    String::from_utf8_lossy(entry.name_bytes())
                ));
            }
            TreeWalkResult::Ok
        })?;
        paths.sort();
        Ok(paths)
    }

    fn write_blob(&self, data: &[u8]) -> Result<Oid> {
        Ok(self.raw().blob(data)?)
    }

    fn update_tree(
        &self,
        base: Option<Oid>,
        writes: &[(String, Oid)],
        deletes: &[String],
    ) -> Result<Oid> {
        let mut edit = TreeEdit::default();
        for key in deletes {
            edit.entry(key).blob = Some(None);
        }
        for (key, blob) in writes {
            let node = edit.entry(key);
            node.blob = Some(Some(*blob));
            // A write replaces whatever was deleted below it in this request.
            node.children.clear();
        }

        let repo = self.raw();
        let base = base.map(|oid| repo.find_tree(oid)).transpose()?;
        match write_tree(repo, base.as_ref(), &edit)? {
            Some(tree) => Ok(tree),
            None => self.empty_tree(),
        }
    }

    fn empty_tree(&self) -> Result<Oid> {
        Ok(self.raw().treebuilder(None)?.write()?)
    }

    fn create_commit(&self, req: &CommitRequest) -> Result<Oid> {
        let repo = self.raw();
        let time = Time::new(req.time.timestamp(), 0);
        let signature = Signature::new(&req.author.name, &req.author.email, &time)?;
        let tree = repo.find_tree(req.tree)?;
        let parents = req
            .parents
            .iter()
            .map(|oid| repo.find_commit(*oid))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let parent_refs: Vec<_> = parents.iter().collect();

        let oid = repo.commit(
            None,
            &signature,
            &signature,
            &req.message,
            &tree,
            &parent_refs,
        )?;
        Ok(oid)
    }

    fn set_ref(&self, req: &SetRefRequest) -> Result<bool> {
        let repo = self.raw();
        let result = match req.old {
            Some(old) => repo.reference_matching(&req.name, req.new, true, old, &req.message),
            None => repo.reference(&req.name, req.new, false, &req.message),
        };

        match result {
            Ok(_) => Ok(true),
            Err(e)
                if matches!(
                    e.code(),
                    ErrorCode::Modified
                        | ErrorCode::Exists
                        | ErrorCode::NotFound
                        | ErrorCode::Locked
                ) =>
            {
                debug!("{}: compare-and-swap lost: {}", req.name, e);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
