use super::open_context;
use crate::cli::output::Output;
use crate::errors::Result;
use crate::stack::RestackOutcome;

/// Restack a branch, or with `upstack` the branch and everything above it
pub fn run(branch: Option<String>, upstack: bool) -> Result<()> {
    let ctx = open_context()?;
    let branch = ctx.resolve_branch(branch)?;

    let mut resume = vec!["restack".to_string()];
    if upstack {
        resume.push("--upstack".to_string());
    }
    resume.push(branch.clone());

    let outcomes = ctx.with_autostash(resume, |svc| {
        if upstack {
            svc.restack_upstack(&branch)
        } else {
            Ok(vec![(branch.clone(), svc.restack(&branch)?)])
        }
    })?;

    for (name, outcome) in outcomes {
        match outcome {
            RestackOutcome::AlreadyRestacked => {
                Output::info(format!("'{name}' does not need to be restacked"))
            }
            RestackOutcome::Restacked { base } => {
                Output::success(format!("Restacked '{name}' on '{base}'"))
            }
        }
    }
    Ok(())
}
