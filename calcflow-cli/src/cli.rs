//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Run as the worksheet sidecar (internal use)
    #[arg(long, hide = true)]
    pub sidecar: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a single job to a fresh engine and print its result
    Job {
        /// Command name, e.g. ping, connect, load_file, calculate_job
        #[arg(value_name = "COMMAND")]
        command: String,

        /// JSON object payload (example: --payload='{"path":"beam.mcdx"}')
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
    },

    /// List the declared inputs and outputs of a worksheet
    Metadata {
        /// Worksheet to inspect
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
    },

    /// Run a parameter sweep over a worksheet
    Batch {
        /// JSON array of rows, one object of alias/value pairs per row
        #[arg(long, value_name = "PATH")]
        rows: PathBuf,

        /// Directory receiving the exported files
        #[arg(long, value_name = "PATH")]
        output_dir: PathBuf,

        /// Worksheet used by rows without their own `path`
        #[arg(long, value_name = "PATH")]
        file: Option<String>,

        /// Batch identifier (generated when omitted)
        #[arg(long, value_name = "ID")]
        batch_id: Option<String>,

        /// Skip the PDF export of each row
        #[arg(long)]
        no_pdf: bool,

        /// Also save each row as a worksheet copy
        #[arg(long)]
        mcdx: bool,
    },

    /// Run a chained workflow definition
    Workflow {
        /// Workflow definition file (YAML or JSON)
        #[arg(long, value_name = "PATH")]
        definition: PathBuf,

        /// Workflow identifier (generated when omitted)
        #[arg(long, value_name = "ID")]
        workflow_id: Option<String>,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Write a sample configuration with every default spelled out
    Generate {
        /// Output file path
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration in use
    Show {
        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sidecar_flag_with_global_config() {
        let cli = Cli::try_parse_from(["calcflow", "--sidecar", "--config", "calcflow.yaml"]).unwrap();
        assert!(cli.sidecar);
        assert_eq!(cli.config, Some(PathBuf::from("calcflow.yaml")));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_batch_arguments() {
        let cli = Cli::try_parse_from([
            "calcflow",
            "batch",
            "--rows",
            "rows.json",
            "--output-dir",
            "out",
            "--file",
            "beam.mcdx",
            "--no-pdf",
            "--mcdx",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Some(Commands::Batch {
                file,
                batch_id,
                no_pdf,
                mcdx,
                ..
            }) => {
                assert_eq!(file.as_deref(), Some("beam.mcdx"));
                assert!(batch_id.is_none());
                assert!(no_pdf);
                assert!(mcdx);
            }
            _ => panic!("expected batch command"),
        }
    }
}
