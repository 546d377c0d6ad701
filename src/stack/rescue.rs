use super::{BranchStore, Service, StackRepository};
use crate::autostash::{RescueOutcome, RescueRequest, Rescuer};
use crate::errors::StackError;
use crate::state::ContinuationRequest;
use tracing::warn;

impl<R: StackRepository, S: BranchStore> Rescuer for Service<R, S> {
    /// Record `req.command` to run after the user resolves the rebase.
    ///
    /// If the continuation cannot be saved the interruption is reported as
    /// `RescueFailed`, naming the command to run by hand.
    fn rebase_rescue(&self, req: RescueRequest) -> RescueOutcome {
        let interrupted = match &req.err {
            StackError::RebaseInterrupted { branch, .. } => branch.clone(),
            _ => return RescueOutcome::unrecorded(req.err),
        };

        let branch = req.branch.unwrap_or_else(|| interrupted.clone());
        let message = req
            .message
            .unwrap_or_else(|| format!("interrupted: branch {interrupted}"));

        warn!("Rebase of '{}' stopped: {}", interrupted, req.err);
        match self.store().append_continuation(ContinuationRequest {
            branch,
            command: req.command.clone(),
            message: Some(message),
        }) {
            Ok(()) => RescueOutcome {
                err: req.err,
                recorded: true,
            },
            Err(e) => {
                let command = req.command.join(" ");
                warn!("Could not record 'gst {}' to run after the rebase: {}", command, e);
                RescueOutcome::unrecorded(StackError::RescueFailed {
                    branch: interrupted,
                    command,
                    source: Box::new(e),
                })
            }
        }
    }
}
