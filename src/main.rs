mod config;
mod environment;
mod error;
mod executor;
mod lifecycle;
mod logging;
mod registry;
mod rpc;
mod service;
mod storage;
mod store_manager;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde::Serialize;
use std::io::{self, Read};
use tracing::{info, warn};

use config::Config;
use lifecycle::LifecycleHook;
use service::CommandService;
use storage::{CommandDefinition, InputValueSet};

#[derive(Parser)]
#[command(name = "exekawaii")]
#[command(about = "Store shell commands with named inputs and run them in a clean environment")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all stored commands
    List,
    /// Show one command (prints null when unknown)
    Get { id: String },
    /// Create or update a command from a JSON object
    Save {
        /// Command JSON; read from stdin when omitted
        json: Option<String>,
    },
    /// Delete a command and its saved input values
    Delete { id: String },
    /// Show saved input values for every command
    Inputs,
    /// Replace the saved input values of a command
    SaveInputs {
        id: String,
        /// Values JSON object; read from stdin when omitted
        json: Option<String>,
    },
    /// Run a stored command
    Exec {
        id: String,
        /// Environment override, repeatable
        #[arg(long = "env", short = 'e', value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Environment overrides as a JSON object (booleans become 1/0)
        #[arg(long = "env-json", value_name = "JSON")]
        env_json: Option<String>,
        /// Start from the command's saved input values
        #[arg(long = "saved-inputs")]
        saved_inputs: bool,
    },
    /// Print the commands directory
    Dir,
    /// Run a host lifecycle hook
    Hook {
        #[arg(value_enum)]
        hook: LifecycleHook,
    },
    /// Answer JSONL requests on stdin until EOF
    Serve,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::new()?;
    logging::init_logging(&config.logging);

    let config_path = Config::config_path();
    match Config::write_default(&config_path) {
        Ok(true) => info!(path = %config_path.display(), "wrote default config"),
        Ok(false) => {}
        Err(e) => {
            let message = format!("{:#}", e);
            warn!(path = %config_path.display(), error = %message, "could not write default config");
        }
    }
    let service = CommandService::from_config(&config);

    match cli.command {
        Commands::List => print_json(&service.get_commands())?,
        Commands::Get { id } => print_json(&service.get_command(&id))?,
        Commands::Save { json } => {
            let raw = json_arg(json)?;
            let definition: CommandDefinition =
                serde_json::from_str(&raw).context("command must be a JSON object")?;
            print_json(&service.save_command(definition))?;
        }
        Commands::Delete { id } => print_json(&service.delete_command(&id))?,
        Commands::Inputs => print_json(&service.get_all_input_values())?,
        Commands::SaveInputs { id, json } => {
            let raw = json_arg(json)?;
            let values: InputValueSet =
                serde_json::from_str(&raw).context("input values must be a JSON object")?;
            print_json(&service.save_input_values(&id, &values))?;
        }
        Commands::Exec {
            id,
            env,
            env_json,
            saved_inputs,
        } => {
            let mut overrides = if saved_inputs {
                service.saved_input_values(&id).unwrap_or_default()
            } else {
                InputValueSet::new()
            };
            if let Some(raw) = env_json {
                let values: InputValueSet =
                    serde_json::from_str(&raw).context("--env-json must be a JSON object")?;
                overrides = overrides.merged_with(&values);
            }
            overrides = overrides.merged_with(&parse_env_pairs(&env)?);

            let overrides = Some(&overrides).filter(|o| !o.is_empty());
            print_json(&service.execute_command(&id, overrides))?;
        }
        Commands::Dir => println!("{}", service.get_commands_dir_path()),
        Commands::Hook { hook } => lifecycle::handle(&service, hook),
        Commands::Serve => {
            let stdin = io::stdin();
            rpc::serve(&service, stdin.lock(), io::stdout().lock())?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn json_arg(arg: Option<String>) -> Result<String> {
    match arg {
        Some(raw) => Ok(raw),
        None => {
            let mut raw = String::new();
            io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read JSON from stdin")?;
            if raw.trim().is_empty() {
                bail!("expected JSON on stdin");
            }
            Ok(raw)
        }
    }
}

fn parse_env_pairs(pairs: &[String]) -> Result<InputValueSet> {
    let mut values = InputValueSet::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("--env expects KEY=VALUE, got '{}'", pair))?;
        if key.is_empty() {
            bail!("--env expects KEY=VALUE, got '{}'", pair);
        }
        values.insert(key, value);
    }
    Ok(values)
}
