use clap::Parser;
use gitstack::cli::output::Output;
use gitstack::cli::Cli;
use gitstack::StackError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.run().await.map_err(|err| {
        if let StackError::RebaseInterrupted { branch, .. } = &err {
            Output::warning(format!("Rebase of '{branch}' stopped"));
            Output::next_steps(&[
                "Resolve the conflicts and stage the files",
                "Run 'gst rebase continue' to finish",
                "Or run 'gst rebase abort' to go back",
            ]);
        } else if let StackError::RescueFailed { branch, command, .. } = &err {
            let finish = format!("Then run 'gst {command}' to finish");
            Output::warning(format!("Rebase of '{branch}' stopped"));
            Output::next_steps(&[
                "Resolve the conflicts and run 'git rebase --continue'",
                &finish,
                "Stashed changes, if any, are in 'git stash list'",
            ]);
        } else if err.is_retriable() {
            Output::tip("Another process changed the stack state; run the command again");
        }
        anyhow::Error::new(err)
    })
}
