use crate::errors::{Result, StackError};
use crate::git::GitCommand;
use git2::{BranchType, ErrorCode, Oid, Repository, ResetType};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Wrapper around git2::Repository with the operations stacks need.
///
/// Object, ref and graph queries go through libgit2; porcelain that libgit2
/// lacks (rebase, stash, fork-point) shells out to `git` in the same worktree.
pub struct GitRepository {
    repo: Repository,
    path: PathBuf,
    git_dir: PathBuf,
}

impl GitRepository {
    /// Open a Git repository at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)
            .map_err(|e| StackError::config(format!("Not a git repository: {e}")))?;

        let workdir = repo
            .workdir()
            .ok_or_else(|| StackError::config("Repository has no working directory"))?
            .to_path_buf();
        let git_dir = repo.path().to_path_buf();

        Ok(Self {
            repo,
            path: workdir,
            git_dir,
        })
    }

    /// Working directory of the repository
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `.git` directory (per worktree)
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub(crate) fn raw(&self) -> &Repository {
        &self.repo
    }

    pub(crate) fn git(&self) -> GitCommand {
        GitCommand::new(&self.path)
    }

    /// Name of the branch HEAD points at.
    ///
    /// Works on an unborn branch too. Fails with `DetachedHead` otherwise.
    pub fn current_branch(&self) -> Result<String> {
        let head = self.repo.find_reference("HEAD")?;
        match head.symbolic_target() {
            Some(target) => Ok(target
                .strip_prefix("refs/heads/")
                .unwrap_or(target)
                .to_string()),
            None => Err(StackError::DetachedHead),
        }
    }

    /// Resolve a revision to the commit it names
    pub fn peel_to_commit(&self, rev: &str) -> Result<Oid> {
        let object = self.repo.revparse_single(rev).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                StackError::not_exist(rev)
            } else {
                StackError::Git(e)
            }
        })?;
        Ok(object.peel_to_commit()?.id())
    }

    /// Head commit of a local branch
    pub fn branch_head(&self, name: &str) -> Result<Oid> {
        match self.repo.find_branch(name, BranchType::Local) {
            Ok(branch) => Ok(branch.get().peel_to_commit()?.id()),
            Err(e) if e.code() == ErrorCode::NotFound => {
                Err(StackError::not_exist(format!("branch {name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn merge_base(&self, a: Oid, b: Oid) -> Result<Oid> {
        Ok(self.repo.merge_base(a, b)?)
    }

    /// `git merge-base --fork-point <base> <branch>`.
    ///
    /// Consults the reflog of `base`, so it finds where `branch` forked even
    /// if `base` has since been amended or rebased.
    pub fn fork_point(&self, base: &str, branch: &str) -> Result<Oid> {
        let output = self
            .git()
            .args(["merge-base", "--fork-point", base, branch])
            .output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let hash = stdout.trim();
        if !output.status.success() || hash.is_empty() {
            return Err(StackError::not_exist(format!(
                "fork point of {branch} from {base}"
            )));
        }
        Ok(Oid::from_str(hash)?)
    }

    /// Check if a branch exists
    pub fn branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    /// List all local branches
    pub fn list_branches(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for branch in self.repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Switch to a branch
    pub fn checkout_branch(&self, name: &str) -> Result<()> {
        let branch = self.repo.find_branch(name, BranchType::Local).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                StackError::not_exist(format!("branch {name}"))
            } else {
                StackError::Git(e)
            }
        })?;

        let tree = branch.get().peel_to_tree()?;
        self.repo.checkout_tree(tree.as_object(), None)?;
        self.repo.set_head(&format!("refs/heads/{name}"))?;

        debug!("Switched to branch '{}'", name);
        Ok(())
    }

    /// Author identity: explicit overrides, then `user.name`/`user.email`,
    /// then a fixed fallback
    pub fn identity(&self, name: Option<&str>, email: Option<&str>) -> (String, String) {
        let config = self.repo.config().ok();
        let lookup = |key: &str| config.as_ref().and_then(|c| c.get_string(key).ok());

        let name = name
            .map(str::to_string)
            .or_else(|| lookup("user.name"))
            .unwrap_or_else(|| "gitstack".to_string());
        let email = email
            .map(str::to_string)
            .or_else(|| lookup("user.email"))
            .unwrap_or_else(|| "gitstack@localhost".to_string());
        (name, email)
    }

    /// `git stash create`: record uncommitted changes as a dangling stash
    /// commit without touching the stash list or the worktree.
    ///
    /// Fails with `NoChanges` if the tree is clean.
    pub fn stash_create(&self, message: &str) -> Result<Oid> {
        let mut cmd = self.git().args(["stash", "create"]);
        if !message.is_empty() {
            cmd = cmd.arg(message);
        }
        let out = cmd.read()?;
        if out.is_empty() {
            return Err(StackError::NoChanges);
        }
        Ok(Oid::from_str(&out)?)
    }

    /// `git stash store`: add a stash commit to the stash list
    pub fn stash_store(&self, stash: Oid, message: &str) -> Result<()> {
        let mut cmd = self.git().args(["stash", "store"]);
        if !message.is_empty() {
            cmd = cmd.args(["-m", message]);
        }
        cmd.arg(stash.to_string()).run()
    }

    /// `git stash apply <stash>`
    pub fn stash_apply(&self, stash: &str) -> Result<()> {
        self.git().args(["stash", "apply", "--quiet", stash]).run()
    }

    pub fn reset(&self, rev: &str, kind: ResetType) -> Result<()> {
        let object = self.repo.revparse_single(rev)?;
        self.repo.reset(&object, kind, None)?;
        debug!("Reset to {}", rev);
        Ok(())
    }

    /// `git checkout -- <pathspecs>`: restore worktree files from the index
    pub fn checkout_files(&self, pathspecs: &[&str]) -> Result<()> {
        self.git()
            .args(["checkout", "--"])
            .args(pathspecs)
            .run()
    }

    /// Whether the worktree or index differ from HEAD (untracked files ignored)
    pub fn is_dirty(&self) -> Result<bool> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(repo_path: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo_path)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn create_test_repo() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let repo_path = temp_dir.path().to_path_buf();

        git(&repo_path, &["init", "-b", "main"]);
        git(&repo_path, &["config", "user.name", "Test"]);
        git(&repo_path, &["config", "user.email", "test@test.com"]);

        std::fs::write(repo_path.join("README.md"), "# Test").unwrap();
        git(&repo_path, &["add", "."]);
        git(&repo_path, &["commit", "-m", "Initial commit"]);

        (temp_dir, repo_path)
    }

    fn create_commit(repo_path: &Path, message: &str, filename: &str) {
        std::fs::write(repo_path.join(filename), format!("Content for {filename}\n")).unwrap();
        git(repo_path, &["add", filename]);
        git(repo_path, &["commit", "-m", message]);
    }

    #[test]
    fn test_current_branch_and_detached_head() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();
        assert_eq!(repo.current_branch().unwrap(), "main");

        git(&repo_path, &["checkout", "--detach"]);
        assert!(matches!(
            repo.current_branch(),
            Err(StackError::DetachedHead)
        ));
    }

    #[test]
    fn test_peel_to_commit_missing_rev() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();

        let err = repo.peel_to_commit("no-such-branch").unwrap_err();
        assert!(err.is_not_found());
        assert!(repo.branch_head("no-such-branch").unwrap_err().is_not_found());
    }

    #[test]
    fn test_merge_base() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();
        let root = repo.branch_head("main").unwrap();

        git(&repo_path, &["checkout", "-b", "feature"]);
        create_commit(&repo_path, "Feature commit", "feature.rs");
        git(&repo_path, &["checkout", "main"]);
        create_commit(&repo_path, "Main commit", "main.rs");

        let feature = repo.branch_head("feature").unwrap();
        let main = repo.branch_head("main").unwrap();

        assert_eq!(repo.merge_base(feature, main).unwrap(), root);
        assert_eq!(repo.merge_base(root, main).unwrap(), root);
    }

    #[test]
    fn test_fork_point_survives_amend() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();

        create_commit(&repo_path, "A", "a.txt");
        let a = repo.branch_head("main").unwrap();

        git(&repo_path, &["checkout", "-b", "feature"]);
        create_commit(&repo_path, "B", "b.txt");

        git(&repo_path, &["checkout", "main"]);
        std::fs::write(repo_path.join("a.txt"), "amended\n").unwrap();
        git(&repo_path, &["commit", "-a", "--amend", "-m", "A'"]);

        assert_eq!(repo.fork_point("main", "feature").unwrap(), a);
    }

    #[test]
    fn test_stash_create_store_apply() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();

        assert!(matches!(
            repo.stash_create("nothing"),
            Err(StackError::NoChanges)
        ));

        std::fs::write(repo_path.join("README.md"), "# Changed").unwrap();
        let stash = repo.stash_create("work in progress").unwrap();
        repo.reset("HEAD", ResetType::Hard).unwrap();
        assert!(!repo.is_dirty().unwrap());

        repo.stash_store(stash, "saved").unwrap();
        assert!(git(&repo_path, &["stash", "list"]).contains("saved"));

        repo.stash_apply(&stash.to_string()).unwrap();
        let content = std::fs::read_to_string(repo_path.join("README.md")).unwrap();
        assert_eq!(content, "# Changed");
    }

    #[test]
    fn test_checkout_files_keeps_index() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();

        std::fs::write(repo_path.join("staged.txt"), "staged\n").unwrap();
        git(&repo_path, &["add", "staged.txt"]);
        std::fs::write(repo_path.join("README.md"), "# Unstaged").unwrap();

        repo.checkout_files(&["."]).unwrap();

        assert_eq!(
            std::fs::read_to_string(repo_path.join("README.md")).unwrap(),
            "# Test"
        );
        assert!(git(&repo_path, &["diff", "--cached", "--name-only"]).contains("staged.txt"));
    }

    #[test]
    fn test_branch_operations() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();
        git(&repo_path, &["branch", "topic"]);
        assert!(repo.branch_exists("topic"));
        assert_eq!(
            repo.branch_head("topic").unwrap(),
            repo.peel_to_commit("main").unwrap()
        );
        assert_eq!(repo.list_branches().unwrap(), vec!["main", "topic"]);

        repo.checkout_branch("topic").unwrap();
        assert_eq!(repo.current_branch().unwrap(), "topic");
    }

    #[test]
    fn test_identity_prefers_overrides() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();

        assert_eq!(
            repo.identity(None, None),
            ("Test".to_string(), "test@test.com".to_string())
        );
        assert_eq!(
            repo.identity(Some("Bot"), None),
            ("Bot".to_string(), "test@test.com".to_string())
        );
    }
}
