#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use gitstack::clock::{Clock, FixedClock};
use gitstack::git::GitRepository;
use gitstack::stack::Service;
use gitstack::state::{InitRequest, Store};
use gitstack::storage::{Author, Db, GitBackend};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

pub const DATA_REF: &str = "refs/gitstack/data";

/// Run git in `dir`, panicking with its stderr on failure. Returns stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    if !output.status.success() {
        panic!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Repository on `main` with one commit
pub fn create_test_repo() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path();

    git(path, &["init", "-b", "main"]);
    git(path, &["config", "user.name", "Test User"]);
    git(path, &["config", "user.email", "test@example.com"]);
    git(path, &["config", "core.autocrlf", "false"]);

    std::fs::write(path.join("README.md"), "# Test Repository\n").unwrap();
    git(path, &["add", "."]);
    git(path, &["commit", "-m", "Initial commit"]);

    temp_dir
}

/// Write `file` and commit it on the current branch. Returns the new head.
pub fn commit_file(dir: &Path, file: &str, content: &str, message: &str) -> String {
    std::fs::write(dir.join(file), content).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-m", message]);
    head(dir, "HEAD")
}

pub fn head(dir: &Path, rev: &str) -> String {
    git(dir, &["rev-parse", rev])
}

pub fn checkout_new(dir: &Path, branch: &str) {
    git(dir, &["checkout", "-b", branch]);
}

pub fn checkout(dir: &Path, branch: &str) {
    git(dir, &["checkout", branch]);
}

/// Subjects of the commits in `range`, oldest first
pub fn subjects(dir: &Path, range: &str) -> Vec<String> {
    let log = git(dir, &["log", "--reverse", "--format=%s", range]);
    log.lines().map(str::to_string).collect()
}

pub fn clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()))
}

pub fn author() -> Author {
    Author {
        name: "Test User".into(),
        email: "test@example.com".into(),
    }
}

pub fn backend(dir: &Path) -> GitBackend<GitRepository> {
    GitBackend::new(GitRepository::open(dir).unwrap(), DATA_REF, author(), clock())
}

pub fn db(dir: &Path) -> Db {
    Db::new(Arc::new(backend(dir)))
}

/// Stack service over an initialized store with trunk `main`
pub fn service(dir: &Path) -> Service<GitRepository, Store> {
    let store = Store::init(
        db(dir),
        clock(),
        InitRequest {
            trunk: "main".into(),
            ..Default::default()
        },
    )
    .unwrap();
    Service::new(GitRepository::open(dir).unwrap(), store)
}
