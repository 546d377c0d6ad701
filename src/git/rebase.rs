use crate::errors::{RebaseInterruptKind, Result, StackError};
use crate::git::GitRepository;
use std::fs;
use std::io::ErrorKind;
use tracing::debug;

/// Arguments for `git rebase`
#[derive(Debug, Clone, Default)]
pub struct RebaseRequest {
    /// Branch to rebase; checked out by git before rebasing
    pub branch: String,
    /// Commits after this one are replayed
    pub upstream: Option<String>,
    /// New base for the replayed commits
    pub onto: Option<String>,
    pub autostash: bool,
    pub quiet: bool,
}

/// Which rebase machinery left state behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseBackend {
    Merge,
    Apply,
}

impl RebaseBackend {
    fn state_dir(self) -> &'static str {
        match self {
            RebaseBackend::Merge => "rebase-merge",
            RebaseBackend::Apply => "rebase-apply",
        }
    }
}

/// An in-progress rebase found in the git directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebaseState {
    pub branch: String,
    pub backend: RebaseBackend,
}

impl GitRepository {
    /// Run `git rebase`.
    ///
    /// A rebase that stops partway is reported as `RebaseInterrupted`:
    /// `Conflict` when git exits with an error, `Deliberate` when it exits
    /// cleanly but leaves state behind (an `edit` or `break` stop).
    pub fn rebase(&self, req: &RebaseRequest) -> Result<()> {
        let mut cmd = self.git().arg("rebase");
        if let Some(onto) = &req.onto {
            cmd = cmd.args(["--onto", onto]);
        }
        if req.autostash {
            cmd = cmd.arg("--autostash");
        }
        if req.quiet {
            cmd = cmd.arg("--quiet");
        }
        if let Some(upstream) = &req.upstream {
            cmd = cmd.arg(upstream);
        }
        if !req.branch.is_empty() {
            cmd = cmd.arg(&req.branch);
        }

        let output = cmd.output()?;
        self.interpret_rebase_exit(
            output.status.success(),
            String::from_utf8_lossy(&output.stderr).trim(),
        )
    }

    /// `git rebase --continue`, without opening an editor
    pub fn rebase_continue(&self) -> Result<()> {
        let output = self
            .git()
            .args(["rebase", "--continue"])
            .env("GIT_EDITOR", "true")
            .output()?;
        self.interpret_rebase_exit(
            output.status.success(),
            String::from_utf8_lossy(&output.stderr).trim(),
        )
    }

    pub fn rebase_abort(&self) -> Result<()> {
        self.git().args(["rebase", "--abort"]).run()
    }

    /// The rebase currently in progress, if any
    pub fn rebase_state(&self) -> Result<Option<RebaseState>> {
        for backend in [RebaseBackend::Apply, RebaseBackend::Merge] {
            let head_name = self.git_dir().join(backend.state_dir()).join("head-name");
            let head = match fs::read_to_string(&head_name) {
                Ok(head) => head,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let head = head.trim();
            return Ok(Some(RebaseState {
                branch: head.strip_prefix("refs/heads/").unwrap_or(head).to_string(),
                backend,
            }));
        }
        Ok(None)
    }

    fn interpret_rebase_exit(&self, success: bool, stderr: &str) -> Result<()> {
        let state = self.rebase_state()?;
        match (success, state) {
            (true, None) => Ok(()),
            (true, Some(state)) => Err(StackError::RebaseInterrupted {
                branch: state.branch,
                kind: RebaseInterruptKind::Deliberate,
            }),
            (false, Some(state)) => {
                debug!("rebase stopped: {}", stderr);
                Err(StackError::RebaseInterrupted {
                    branch: state.branch,
                    kind: RebaseInterruptKind::Conflict,
                })
            }
            (false, None) => Err(StackError::rebase(stderr.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(repo_path: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(repo_path)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {args:?} failed");
    }

    fn setup() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path();
        git(path, &["init", "-b", "main"]);
        git(path, &["config", "user.name", "Test"]);
        git(path, &["config", "user.email", "test@test.com"]);
        std::fs::write(path.join("file.txt"), "base\n").unwrap();
        git(path, &["add", "."]);
        git(path, &["commit", "-m", "base"]);
        temp_dir
    }

    #[test]
    fn test_rebase_conflict_is_interrupted() {
        let temp_dir = setup();
        let path = temp_dir.path();

        git(path, &["checkout", "-b", "feature"]);
        std::fs::write(path.join("file.txt"), "feature\n").unwrap();
        git(path, &["commit", "-am", "feature change"]);
        git(path, &["checkout", "main"]);
        std::fs::write(path.join("file.txt"), "main\n").unwrap();
        git(path, &["commit", "-am", "main change"]);

        let repo = GitRepository::open(path).unwrap();
        let err = repo
            .rebase(&RebaseRequest {
                branch: "feature".into(),
                upstream: Some("main".into()),
                quiet: true,
                ..Default::default()
            })
            .unwrap_err();

        match err {
            StackError::RebaseInterrupted { branch, kind } => {
                assert_eq!(branch, "feature");
                assert_eq!(kind, RebaseInterruptKind::Conflict);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(repo.rebase_state().unwrap().is_some());

        repo.rebase_abort().unwrap();
        assert!(repo.rebase_state().unwrap().is_none());
    }

    #[test]
    fn test_rebase_bad_upstream_is_plain_error() {
        let temp_dir = setup();
        let repo = GitRepository::open(temp_dir.path()).unwrap();

        let err = repo
            .rebase(&RebaseRequest {
                branch: "main".into(),
                upstream: Some("does-not-exist".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, StackError::Rebase(_)));
    }
}
