use super::open_context;
use crate::cli::output::Output;
use crate::errors::Result;
use console::style;

pub fn track(branch: Option<String>, base: Option<String>) -> Result<()> {
    let ctx = open_context()?;
    let branch = ctx.resolve_branch(branch)?;
    let base = base.unwrap_or_else(|| ctx.service.trunk().to_string());

    let record = ctx.service.track_branch(&branch, &base)?;
    Output::success(format!("Tracking '{}' on '{}'", branch, record.base));
    if let Some(hash) = record.base_hash {
        Output::sub_item(format!("Base commit: {}", style(hash).dim()));
    }
    Ok(())
}

pub fn untrack(branch: Option<String>) -> Result<()> {
    let ctx = open_context()?;
    let branch = ctx.resolve_branch(branch)?;
    let base = ctx.service.store().lookup_branch(&branch)?.base;

    let moved = ctx.service.forget_branch(&branch)?;
    Output::success(format!("Stopped tracking '{branch}'"));
    for child in moved {
        Output::sub_item(format!("'{child}' is now based on '{base}'"));
    }
    Ok(())
}

pub fn onto(branch: &str, base: &str) -> Result<()> {
    let ctx = open_context()?;
    // Once the rebase is resolved only the new base is left to record.
    let resume = vec![
        "track".to_string(),
        branch.to_string(),
        "--base".to_string(),
        base.to_string(),
    ];

    ctx.with_autostash(resume, |svc| svc.branch_onto(branch, base))?;
    Output::success(format!("Moved '{branch}' onto '{base}'"));
    Output::tip(format!("Run 'gst restack --upstack {branch}' to move the branches above it"));
    Ok(())
}

pub fn upstack(branch: Option<String>) -> Result<()> {
    let ctx = open_context()?;
    let branch = ctx.resolve_branch(branch)?;
    for name in ctx.service.list_upstack(&branch)? {
        println!("{name}");
    }
    Ok(())
}

pub fn top(branch: Option<String>) -> Result<()> {
    let ctx = open_context()?;
    let branch = ctx.resolve_branch(branch)?;
    let tops = ctx.service.find_top(&branch)?;
    if tops.len() > 1 {
        Output::info(format!("'{branch}' has {} stacks above it", tops.len()));
    }
    for name in tops {
        println!("{name}");
    }
    Ok(())
}

pub fn bottom(branch: Option<String>) -> Result<()> {
    let ctx = open_context()?;
    let branch = ctx.resolve_branch(branch)?;
    println!("{}", ctx.service.find_bottom(&branch)?);
    Ok(())
}

/// Print every tracked branch as a tree below trunk
pub fn log() -> Result<()> {
    let ctx = open_context()?;
    let graph = ctx.service.load_graph()?;
    let current = ctx.service.repo().current_branch().ok();

    for line in graph.render_tree(graph.trunk())?.lines() {
        let name = line.trim_start();
        let indent = &line[..line.len() - name.len()];
        Output::branch_line(indent, name, current.as_deref() == Some(name));
    }
    Ok(())
}
