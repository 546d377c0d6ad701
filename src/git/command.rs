use crate::errors::{Result, StackError};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

/// Builder for invocations of the `git` executable.
///
/// Used for porcelain operations that libgit2 does not provide
/// (rebase, stash create/store/apply, fork-point).
#[derive(Debug, Clone)]
pub struct GitCommand {
    workdir: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl GitCommand {
    pub fn new(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(mut self, key: K, value: V) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Human-readable form of the command line, for logs and errors
    pub fn describe(&self) -> String {
        let args: Vec<_> = self.args.iter().map(|a| a.to_string_lossy()).collect();
        format!("git {}", args.join(" "))
    }

    /// Run the command and hand back its raw output, whatever the exit status
    pub fn output(&self) -> Result<Output> {
        debug!("Running {}", self.describe());
        let output = Command::new("git")
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .current_dir(&self.workdir)
            .output()?;
        Ok(output)
    }

    /// Run the command, failing on a non-zero exit status
    pub fn run(&self) -> Result<()> {
        self.checked_output().map(|_| ())
    }

    /// Run the command and return its trimmed stdout
    pub fn read(&self) -> Result<String> {
        let output = self.checked_output()?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn checked_output(&self) -> Result<Output> {
        let output = self.output()?;
        if !output.status.success() {
            return Err(StackError::Command {
                command: self.describe(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}
