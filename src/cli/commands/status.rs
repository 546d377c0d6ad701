use super::open_context;
use crate::cli::output::Output;
use crate::errors::Result;
use crate::git::GitRepository;
use crate::stack::{restack_statuses, RestackStatus};
use console::style;

/// Show the restack status of tracked branches
pub fn run(branch: Option<String>) -> Result<()> {
    let ctx = open_context()?;
    let trunk = ctx.service.trunk().to_string();

    let branches: Vec<String> = match branch {
        Some(branch) => ctx
            .service
            .load_graph()?
            .list_stack(&branch)?
            .into_iter()
            .filter(|name| *name != trunk)
            .collect(),
        None => ctx
            .service
            .load_branches()?
            .into_iter()
            .map(|info| info.name)
            .collect(),
    };
    if branches.is_empty() {
        Output::info("No tracked branches");
        Output::tip("Track one with 'gst track <branch>'");
        return Ok(());
    }

    let workdir = ctx.service.repo().path().to_path_buf();
    let statuses = restack_statuses(
        || GitRepository::open(&workdir),
        ctx.service.store(),
        &branches,
        ctx.settings.stack.status_workers,
    );

    Output::section(format!("Branches on {trunk}"));
    let mut behind = 0;
    for (name, status) in &statuses {
        let label = match status {
            RestackStatus::AlreadyRestacked | RestackStatus::Restacked => {
                style(status.to_string()).green()
            }
            RestackStatus::NeedsRestack => {
                behind += 1;
                style(status.to_string()).yellow()
            }
            RestackStatus::Error(_) | RestackStatus::Unknown => style(status.to_string()).red(),
        };
        println!("  {name}: {label}");
    }

    if behind > 0 {
        println!();
        Output::tip("Run 'gst restack --upstack <branch>' to bring branches up to date");
    }
    Ok(())
}
