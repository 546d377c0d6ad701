pub mod commands;
pub mod output;

use crate::errors::{Result, StackError};
use crate::utils::async_ops::run_blocking;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "gst")]
#[command(about = "gitstack - stacked branches for git")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Initialize stack state in this repository
    Init {
        /// Trunk branch (defaults to main or master)
        #[arg(long)]
        trunk: Option<String>,

        /// Remote that branches are pushed to
        #[arg(long)]
        remote: Option<String>,

        /// Discard all existing stack state
        #[arg(long)]
        reset: bool,
    },

    /// Start tracking a branch
    Track {
        /// Branch to track (defaults to the current branch)
        branch: Option<String>,

        /// Branch it is stacked on (defaults to trunk)
        #[arg(long)]
        base: Option<String>,
    },

    /// Stop tracking a branch; branches above it move to its base
    Untrack {
        /// Branch to untrack (defaults to the current branch)
        branch: Option<String>,
    },

    /// Move a branch onto a different base
    Onto {
        /// Branch to move
        branch: String,

        /// New base branch
        base: String,
    },

    /// Rebase a branch onto its base
    Restack {
        /// Branch to restack (defaults to the current branch)
        branch: Option<String>,

        /// Also restack every branch above it
        #[arg(long)]
        upstack: bool,
    },

    /// Show which branches need restacking
    Status {
        /// Limit to the stack containing this branch
        branch: Option<String>,
    },

    /// List a branch and everything stacked on it
    Upstack {
        branch: Option<String>,
    },

    /// Show the topmost branches above a branch
    Top {
        branch: Option<String>,
    },

    /// Show the branch at the bottom of a stack
    Bottom {
        branch: Option<String>,
    },

    /// Show all tracked branches as a tree
    Log,

    /// Resume or abandon an interrupted rebase
    Rebase {
        #[command(subcommand)]
        action: RebaseAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Commands recorded to run after an interrupted rebase
    #[command(hide = true)]
    Internal {
        #[command(subcommand)]
        action: InternalAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum RebaseAction {
    /// Continue the rebase, then finish the interrupted command
    Continue,

    /// Abort the rebase and restore stashed changes
    Abort,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., stack.status_workers)
        key: String,
        /// Configuration value
        value: String,
        /// Write the user-wide file instead of the repository's
        #[arg(long)]
        global: bool,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// List all configuration values
    List,
}

#[derive(Subcommand, Debug, Clone)]
pub enum InternalAction {
    /// Reapply stashed changes
    AutostashPop { hash: String },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        self.setup_logging();

        let command = self.command;
        run_blocking(move || execute(command)).await
    }

    fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .without_time();

        if self.no_color {
            subscriber.with_ansi(false).init();
        } else {
            subscriber.init();
        }
    }
}

/// Run one command to completion on the current thread
pub fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Init {
            trunk,
            remote,
            reset,
        } => commands::init::run(trunk, remote, reset),
        Commands::Track { branch, base } => commands::stack::track(branch, base),
        Commands::Untrack { branch } => commands::stack::untrack(branch),
        Commands::Onto { branch, base } => commands::stack::onto(&branch, &base),
        Commands::Restack { branch, upstack } => commands::restack::run(branch, upstack),
        Commands::Status { branch } => commands::status::run(branch),
        Commands::Upstack { branch } => commands::stack::upstack(branch),
        Commands::Top { branch } => commands::stack::top(branch),
        Commands::Bottom { branch } => commands::stack::bottom(branch),
        Commands::Log => commands::stack::log(),
        Commands::Rebase { action } => match action {
            RebaseAction::Continue => commands::rebase::continue_rebase(),
            RebaseAction::Abort => commands::rebase::abort_rebase(),
        },
        Commands::Config { action } => commands::config::run(action),
        Commands::Internal { action } => match action {
            InternalAction::AutostashPop { hash } => commands::rebase::autostash_pop(&hash),
        },
    }
}

/// Parse recorded `gst` arguments back into a command
pub fn parse_command(args: &[String]) -> Result<Commands> {
    let cli = Cli::try_parse_from(std::iter::once("gst").chain(args.iter().map(String::as_str)))
        .map_err(|e| {
            StackError::validation(format!("cannot run '{}': {}", args.join(" "), e))
        })?;
    Ok(cli.command)
}
