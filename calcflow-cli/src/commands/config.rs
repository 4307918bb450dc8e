//! `calcflow config`

use anyhow::{anyhow, Context, Result};
use calcflow_config::{CalcflowConfig, ConfigLoader};
use std::fs;
use std::path::Path;
use tracing::{error, info};

/// Load and validate a configuration file
pub fn handle_config_validate(config_file: &Path) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    match ConfigLoader::new().from_file(config_file) {
        Ok(_config) => {
            println!("Configuration file is valid: {}", config_file.display());
            Ok(())
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            Err(anyhow!(e).context(format!("Invalid configuration file {}", config_file.display())))
        }
    }
}

/// Write the sample configuration, refusing to clobber without `--force`
pub fn handle_config_generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }

    fs::write(output, CalcflowConfig::generate_sample())
        .context("Failed to write configuration file")?;

    println!("Configuration generated at: {}", output.display());
    println!(
        "Validate with: calcflow config validate --config-file {}",
        output.display()
    );
    Ok(())
}

/// Print the effective configuration
pub fn handle_config_show(config: &CalcflowConfig, format: &str) -> Result<()> {
    let rendered = match format.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::to_string(config).context("Failed to serialize to YAML")?,
        "json" => serde_json::to_string_pretty(config).context("Failed to serialize to JSON")?,
        _ => {
            return Err(anyhow!(
                "Unknown output format: {}. Valid formats: yaml, json",
                format
            ))
        }
    };
    println!("{}", rendered);
    Ok(())
}
