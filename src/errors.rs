use std::fmt;

/// How a rebase stopped before finishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseInterruptKind {
    /// A commit could not be applied cleanly
    Conflict,
    /// The todo list stopped on an `edit` or `break` instruction
    Deliberate,
}

impl fmt::Display for RebaseInterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebaseInterruptKind::Conflict => write!(f, "conflict"),
            RebaseInterruptKind::Deliberate => write!(f, "deliberate stop"),
        }
    }
}

/// gitstack error types
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    /// Git-related errors
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A `git` subprocess exited unsuccessfully
    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// A key or object that does not exist
    #[error("does not exist: {0}")]
    NotExist(String),

    /// The branch has no record in the store
    #[error("branch {0} is not tracked")]
    NotTracked(String),

    /// The store has not been initialized in this repository
    #[error("repository is not initialized; run 'gst init' first")]
    NotInitialized,

    /// Operation not permitted on the trunk branch
    #[error("trunk branch {0} is not allowed here")]
    Trunk(String),

    /// A base branch that is neither trunk nor tracked
    #[error("base branch {0} is not tracked")]
    BaseNotTracked(String),

    /// A tracked branch whose base branch is gone from git
    #[error("base branch {base} of {branch} does not exist")]
    BaseMissing { branch: String, base: String },

    /// The branch graph loops back on itself
    #[error("cycle detected in branch graph: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// The data ref moved under us on every attempt
    #[error("concurrent modification of {ref_name}: gave up after {attempts} attempts")]
    ConcurrentModification { ref_name: String, attempts: usize },

    /// Keys must split into non-empty path components
    #[error("invalid key {0:?}")]
    InvalidKey(String),

    /// HEAD does not point at a branch
    #[error("HEAD is detached")]
    DetachedHead,

    /// Nothing to stash in the working tree
    #[error("no changes to stash")]
    NoChanges,

    /// A rebase stopped and needs the user
    #[error("rebase of {branch} interrupted ({kind})")]
    RebaseInterrupted {
        branch: String,
        kind: RebaseInterruptKind,
    },

    /// A rebase stopped and the command to resume it could not be saved
    #[error("rebase of {branch} interrupted; could not record 'gst {command}' to run afterwards: {source}")]
    RescueFailed {
        branch: String,
        command: String,
        #[source]
        source: Box<StackError>,
    },

    /// Rebase operation errors
    #[error("Rebase error: {0}")]
    Rebase(String),

    /// Stashed changes could not be restored automatically
    #[error("autostash error: {0}")]
    AutostashFailed(String),
}

impl StackError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        StackError::Config(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        StackError::Validation(msg.into())
    }

    pub fn not_exist<S: Into<String>>(what: S) -> Self {
        StackError::NotExist(what.into())
    }

    pub fn rebase<S: Into<String>>(msg: S) -> Self {
        StackError::Rebase(msg.into())
    }

    /// True for errors that only say something is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, StackError::NotExist(_) | StackError::NotTracked(_))
    }

    /// True for errors that need the user to resolve a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StackError::RebaseInterrupted {
                kind: RebaseInterruptKind::Conflict,
                ..
            }
        )
    }

    /// True if restarting the whole operation may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, StackError::ConcurrentModification { .. })
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
