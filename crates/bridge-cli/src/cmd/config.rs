use crate::output::print_json;
use bridge_core::config::{has_errors, WarnLevel};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the config for common mistakes
    Validate,

    /// Print the config with defaults filled in
    Show,
}

pub fn run(path: Option<&Path>, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Validate => validate(path, json),
        ConfigSubcommand::Show => show(path, json),
    }
}

fn validate(path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(path)?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if has_errors(&warnings) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

fn show(path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(path)?;
    if json {
        print_json(&config)
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
        Ok(())
    }
}
