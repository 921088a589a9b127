//! Waypoint CLI entry point.
//!
//! Binary name: `waypoint`
//!
//! Parses arguments, initializes tracing and the engine, then dispatches to
//! the command handler.

mod cli;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;
use waypoint_observe::tracing_setup::{directives_for_verbosity, init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let directives = directives_for_verbosity(cli.verbose, cli.quiet);
    init_tracing(directives, cli.otel).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Validation needs no database.
    if let Commands::Validate { file } = &cli.command {
        return cli::validate::validate(file, cli.data_dir.as_deref(), cli.json).await;
    }

    let state = AppState::init(cli.data_dir.as_deref()).await?;

    match cli.command {
        Commands::Validate { .. } => unreachable!("handled above"),

        Commands::Run {
            file,
            input,
            context,
            budget,
            labels,
        } => {
            let args = cli::run::RunArgs {
                input,
                context,
                budget,
                labels,
            };
            cli::run::run(&state, &file, args, cli.json, cli.quiet).await?;
        }

        Commands::Resume { execution_id, file } => {
            cli::run::resume(&state, &execution_id, &file, cli.json, cli.quiet).await?;
        }

        Commands::Recover { dir } => {
            let dir = dir.unwrap_or_else(|| state.data_dir.join("workflows"));
            cli::run::recover(&state, &dir, cli.json).await?;
        }

        Commands::Checkpoints { action } => {
            cli::checkpoints::handle_checkpoint_command(action, &state, cli.json).await?;
        }
    }

    Ok(())
}
