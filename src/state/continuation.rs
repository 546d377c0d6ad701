use super::Store;
use crate::errors::{Result, StackError};
use crate::storage::UpdateRequest;
use serde::{Deserialize, Serialize};
use tracing::debug;

const CONTINUE_KEY: &str = "rebase-continue";

/// A command to run once an interrupted rebase finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    /// Arguments to `gst`, without the program name
    pub command: Vec<String>,

    /// Branch checked out when the command was recorded
    pub branch: String,
}

#[derive(Debug, Clone, Default)]
pub struct ContinuationRequest {
    pub branch: String,
    pub command: Vec<String>,
    pub message: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContinuationQueue {
    #[serde(default)]
    continuations: Vec<Continuation>,
}

impl Store {
    fn load_continuations(&self) -> Result<Vec<Continuation>> {
        match self.db().get::<ContinuationQueue>(CONTINUE_KEY) {
            Ok(queue) => Ok(queue.continuations),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Queue a command after those already recorded
    pub fn append_continuation(&self, req: ContinuationRequest) -> Result<()> {
        if req.branch.is_empty() {
            return Err(StackError::validation("continuation branch is required"));
        }
        if req.command.is_empty() {
            return Err(StackError::validation("continuation command is required"));
        }

        let mut continuations = self.load_continuations()?;
        continuations.push(Continuation {
            command: req.command,
            branch: req.branch,
        });

        let message = self.message_or_default(
            req.message.as_deref().unwrap_or_default(),
            "append rebase continuation",
        );
        self.db().update(
            UpdateRequest::new(message).set(CONTINUE_KEY, &ContinuationQueue { continuations })?,
        )
    }

    /// Remove and return every queued continuation, oldest first
    pub fn take_continuations(&self, message: &str) -> Result<Vec<Continuation>> {
        let continuations = self.load_continuations()?;
        if continuations.is_empty() {
            debug!("no rebase continuations queued");
            return Ok(continuations);
        }

        let message = self.message_or_default(message, "take rebase continuations");
        self.db()
            .update(UpdateRequest::new(message).delete(CONTINUE_KEY))?;
        Ok(continuations)
    }

    /// Queued continuations, oldest first, without removing them
    pub fn list_continuations(&self) -> Result<Vec<Continuation>> {
        self.load_continuations()
    }
}
