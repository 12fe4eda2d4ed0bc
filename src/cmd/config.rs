//! Configuration view and validation commands: `mend config`.

use anyhow::Result;
use std::path::Path;

use super::super::ConfigCommands;
use mend::config::{CONFIG_DIR, CONFIG_FILE, CliOverrides, MendConfig, MendToml, resolve_target};

pub fn cmd_config(target: &Path, command: Option<ConfigCommands>, verbose: bool) -> Result<u8> {
    let _log_guard = mend::logging::init(verbose, None);

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = MendConfig::resolve(target, CliOverrides::default())?;

            println!();
            println!("Mend Configuration");
            println!("==================");
            println!();
            match &config.config_file {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("No mend.toml found; using defaults."),
            }
            println!();
            println!("Effective values (with env overrides):");
            println!("[pipeline]");
            println!("  max_iterations = {}", config.max_iterations());
            println!("  encoding = \"{}\"", config.encoding());
            println!("[timeouts]");
            println!("  detect_secs = {}", config.toml.timeouts.detect_secs);
            println!("  correct_secs = {}", config.toml.timeouts.correct_secs);
            println!("  verify_secs = {}", config.toml.timeouts.verify_secs);
            println!("[artifacts]");
            println!("  include = {:?}", config.toml.artifacts.include);
            println!("  exclude = {:?}", config.toml.artifacts.exclude);
            println!("[stages]");
            println!("  detector  = {}", config.detector_spec().display());
            println!("  corrector = {}", config.corrector_spec().display());
            println!("  verifier  = {}", config.verifier_spec().display());
            println!("[telemetry]");
            println!("  enabled = {}", config.toml.telemetry.enabled);
            println!("  dir = {}", config.telemetry_dir().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            let config = MendConfig::resolve(target, CliOverrides::default())?;
            let warnings = config.validate();

            println!();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            let root = resolve_target(target)?;
            let mend_dir = root.join(CONFIG_DIR);
            let config_path = mend_dir.join(CONFIG_FILE);
            if config_path.exists() {
                println!("mend.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(0);
            }

            std::fs::create_dir_all(&mend_dir)?;
            MendToml::default().save(&config_path)?;

            println!("Created mend.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [pipeline] max_iterations, encoding");
            println!("  - [artifacts] include/exclude globs");
            println!("  - [detector], [corrector], [verifier] command and args");
            println!();
        }
    }

    Ok(0)
}
