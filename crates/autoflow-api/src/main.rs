//! Autoflow CLI entry point.
//!
//! Binary name: `autoflow`
//!
//! Parses CLI arguments, installs tracing, loads configuration, then
//! dispatches to the matching command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use autoflow_observe::tracing_setup::{init_tracing, shutdown_tracing};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,autoflow=debug",
        _ => "trace",
    };
    if let Err(e) = init_tracing(filter, cli.otel) {
        eprintln!("warning: failed to initialize tracing: {e}");
    }

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "autoflow", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    let outcome = match cli.command {
        Commands::Run {
            file,
            vars,
            target,
            workflows,
        } => {
            cli::workflow::run_workflow(
                &state,
                &file,
                &vars,
                target,
                workflows.as_deref(),
                cli.json,
                cli.quiet,
            )
            .await
        }

        Commands::Validate { file } => cli::workflow::validate_workflow(&file, cli.json),

        Commands::List { dir } => cli::workflow::list_workflows(&state, dir, cli.json),

        Commands::Completions { .. } => unreachable!("handled above"),
    };

    shutdown_tracing();
    outcome
}
