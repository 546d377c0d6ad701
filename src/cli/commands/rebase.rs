use super::{open_context, Context};
use crate::autostash::Handler;
use crate::cli::output::Output;
use crate::cli::{execute, parse_command};
use crate::errors::{Result, StackError};
use crate::state::{Continuation, ContinuationRequest};
use git2::Oid;
use std::collections::VecDeque;
use tracing::{debug, warn};

fn is_autostash_pop(continuation: &Continuation) -> bool {
    continuation.command.len() == 3
        && continuation.command[0] == "internal"
        && continuation.command[1] == "autostash-pop"
}

/// `git rebase --continue`, then run the commands the interrupted
/// operation left behind
pub fn continue_rebase() -> Result<()> {
    let ctx = open_context()?;
    let repo = ctx.service.repo();

    if repo.rebase_state()?.is_some() {
        repo.rebase_continue()?;
        Output::success("Rebase finished");
    } else {
        debug!("No rebase in progress");
    }

    let pending: VecDeque<Continuation> = ctx
        .service
        .store()
        .take_continuations("resume interrupted operations")?
        .into();
    run_continuations(&ctx, pending)
}

fn run_continuations(ctx: &Context, mut pending: VecDeque<Continuation>) -> Result<()> {
    while let Some(continuation) = pending.pop_front() {
        debug!(
            "Resuming '{}' on '{}'",
            continuation.command.join(" "),
            continuation.branch
        );

        let result = ctx
            .service
            .repo()
            .checkout_branch(&continuation.branch)
            .and_then(|_| parse_command(&continuation.command))
            .and_then(execute);

        if let Err(err) = result {
            Output::error(format!(
                "'gst {}' did not finish on '{}'",
                continuation.command.join(" "),
                continuation.branch
            ));
            // Whatever the failed command recorded for itself stays first.
            for rest in pending {
                let request = ContinuationRequest {
                    branch: rest.branch,
                    command: rest.command,
                    message: None,
                };
                if let Err(e) = ctx.service.store().append_continuation(request) {
                    warn!("Could not keep a pending operation: {}", e);
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

/// Abort the rebase and restore any changes stashed before it started.
/// Other pending operations are dropped.
pub fn abort_rebase() -> Result<()> {
    let ctx = open_context()?;
    let repo = ctx.service.repo();

    if repo.rebase_state()?.is_some() {
        repo.rebase_abort()?;
        Output::success("Rebase aborted");
    } else {
        Output::info("No rebase in progress");
    }

    let (restores, dropped): (Vec<_>, Vec<_>) = ctx
        .service
        .store()
        .take_continuations("abort interrupted operations")?
        .into_iter()
        .partition(is_autostash_pop);

    for continuation in &dropped {
        Output::sub_item(format!(
            "Skipping 'gst {}'",
            continuation.command.join(" ")
        ));
    }

    run_continuations(&ctx, restores.into())
}

/// Reapply a stash recorded by an interrupted operation
pub fn autostash_pop(hash: &str) -> Result<()> {
    let ctx = open_context()?;
    let stash = Oid::from_str(hash)
        .map_err(|_| StackError::validation(format!("not a stash hash: {hash}")))?;

    Handler::new(ctx.service.repo(), &ctx.service).restore(stash)?;
    Output::success("Restored stashed changes");
    Ok(())
}
