// CLI module - command-line argument parsing for the service binary
//
// Flags override the listen port and backlog. The config subcommand manages
// the config file:
// - config --show: Display effective configuration
// - config --path: Show config file path
// - config --reset: Regenerate config file with defaults
// - config --update: Rewrite config with the current structure, keeping values

use crate::config::{validate_backlog, Config, VERSION};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;

/// Evaluation service - query IDs, autofill and search telemetry ingestion
#[derive(Parser, Debug)]
#[command(name = "evaluation")]
#[command(version = VERSION)]
#[command(about = "Search evaluation telemetry service", long_about = None)]
pub struct Cli {
    /// Port to listen on (overrides bind_addr's port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Listen backlog size, at least 1
    #[arg(short, long, allow_negative_numbers = true)]
    pub backlog: Option<i64>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Update config with new defaults (preserves user values)
        #[arg(long)]
        update: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

impl Cli {
    /// Apply flag overrides on top of env/file/default configuration
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(port) = self.port {
            config.bind_addr.set_port(port);
        }
        if let Some(backlog) = self.backlog {
            config.backlog = validate_backlog(backlog)?;
        }
        Ok(())
    }
}

/// Handle CLI subcommands. Returns true if a command was handled (exit after).
pub fn handle_cli(cli: &Cli) -> bool {
    match cli.command {
        Some(Commands::Config {
            show,
            reset,
            update,
            path,
        }) => {
            if path {
                handle_config_path();
            } else if show {
                handle_config_show();
            } else if reset {
                handle_config_reset();
            } else if update {
                handle_config_update();
            } else {
                // No flag provided, show help
                println!("Usage: evaluation config [--show|--reset|--update|--path]");
                println!();
                println!("Options:");
                println!("  --show    Display effective configuration");
                println!("  --reset   Reset config file to defaults");
                println!("  --update  Update config with new defaults (preserves user values)");
                println!("  --path    Show config file path");
            }
            true
        }
        None => false, // No subcommand, run the service
    }
}

fn config_path_or_exit() -> std::path::PathBuf {
    match Config::config_path() {
        Some(path) => path,
        None => {
            eprintln!("Error: Could not determine config path");
            std::process::exit(1);
        }
    }
}

fn effective_config_or_exit() -> Config {
    match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn handle_config_path() {
    println!("{}", config_path_or_exit().display());
}

fn handle_config_show() {
    let config = effective_config_or_exit();

    println!("# Effective configuration (env > file > defaults)");
    println!();
    print!("{}", config.to_toml());

    // Show source info
    println!();
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
}

fn handle_config_reset() {
    let path = config_path_or_exit();

    // Confirm if file exists
    if path.exists() {
        eprint!(
            "Config file exists at {}. Overwrite? [y/N] ",
            path.display()
        );
        let _ = std::io::stderr().flush();

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_err()
            || !input.trim().eq_ignore_ascii_case("y")
        {
            println!("Aborted.");
            return;
        }
    }

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("Error creating directory: {}", e);
            std::process::exit(1);
        }
    }

    // Write the default config (using Config's single source of truth)
    if let Err(e) = std::fs::write(&path, Config::default().to_toml()) {
        eprintln!("Error writing config: {}", e);
        std::process::exit(1);
    }

    println!("Config reset to defaults: {}", path.display());
}

fn handle_config_update() {
    let path = config_path_or_exit();

    if !path.exists() {
        // No existing config, just create default
        Config::ensure_config_exists();
        println!("Created new config file: {}", path.display());
        return;
    }

    // Read existing config and generate updated TOML preserving user values
    let updated = match std::fs::read_to_string(&path)
        .map_err(anyhow::Error::from)
        .and_then(|contents| Config::refresh_file_toml(&contents))
    {
        Ok(updated) => updated,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let backup_path = path.with_extension("toml.bak");
    if let Err(e) = std::fs::copy(&path, &backup_path) {
        eprintln!("Warning: Could not create backup: {}", e);
    } else {
        println!("Backup created: {}", backup_path.display());
    }

    if let Err(e) = std::fs::write(&path, updated) {
        eprintln!("Error writing config: {}", e);
        std::process::exit(1);
    }

    println!("Config updated with latest structure: {}", path.display());
    println!("Your values have been preserved.");
}
