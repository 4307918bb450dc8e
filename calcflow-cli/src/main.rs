use anyhow::{Context, Result};
use calcflow_config::{CalcflowConfig, ConfigLoader};
use calcflow_execution::{serve_stdio, LoopbackWorksheet};
use calcflow_logging::{init_logging, init_sidecar_logging};
use clap::Parser;
use std::path::Path;
use tracing::{debug, info};

mod cli;
mod commands;

use cli::{Cli, Commands, ConfigCommands};
use commands::{BatchArgs, CommandContext};

/// Load configuration from file or the environment
fn load_config(config_path: Option<&Path>) -> Result<CalcflowConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            loader
                .from_file(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))
        }
        None => {
            debug!("No configuration file specified. Loading from environment or defaults.");
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Sidecar mode: stdout carries job results, so logs must stay on stderr
    if cli.sidecar {
        init_sidecar_logging(cli.log_level.as_deref())?;
        let config = load_config(cli.config.as_deref())?;
        return serve_stdio(LoopbackWorksheet::new(), config.sidecar).await;
    }

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging, cli.log_level.as_deref())?;
    debug!("Calcflow CLI starting");

    let ctx = CommandContext {
        config,
        config_path: cli.config.clone(),
        log_level: cli.log_level.clone(),
    };

    match cli.command {
        Some(Commands::Job { command, payload }) => {
            commands::handle_job(&ctx, &command, payload.as_deref()).await
        }
        Some(Commands::Metadata { file }) => commands::handle_metadata(&ctx, &file).await,
        Some(Commands::Batch {
            rows,
            output_dir,
            file,
            batch_id,
            no_pdf,
            mcdx,
        }) => {
            let args = BatchArgs {
                rows,
                output_dir,
                file,
                batch_id,
                export_pdf: !no_pdf,
                export_mcdx: mcdx,
            };
            commands::handle_batch(&ctx, args).await
        }
        Some(Commands::Workflow {
            definition,
            workflow_id,
        }) => commands::handle_workflow(&ctx, &definition, workflow_id).await,
        Some(Commands::Config { config_cmd }) => match config_cmd {
            ConfigCommands::Validate { config_file } => {
                commands::handle_config_validate(&config_file)
            }
            ConfigCommands::Generate { output, force } => {
                commands::handle_config_generate(&output, force)
            }
            ConfigCommands::Show { format } => commands::handle_config_show(&ctx.config, &format),
        },
        None => {
            // If no subcommand is provided, print help
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            Ok(())
        }
    }
}
