//! layerfeat CLI
//!
//! Command-line entry point for per-layer embedding extraction.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{debug, info};

use layerfeat::cli::{commands, Cli, Commands};
use layerfeat::ExtractError;

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    if let Err(err) = run(cli) {
        eprintln!("Error: {:#}", err);
        if let Some(extract_err) = err.downcast_ref::<ExtractError>() {
            eprintln!("Code: {}", extract_err.error_code());
            for suggestion in extract_err.recovery_suggestions() {
                eprintln!("  - {}", suggestion);
            }
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    debug!("layerfeat v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("layerfeat v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Extract(args) => {
            info!("layerfeat v{}", env!("CARGO_PKG_VERSION"));
            commands::extract(&args).context("extraction failed")?;
        }
        Commands::Metadata { file, list, sorted } => {
            commands::show_metadata(&file, list, sorted)
                .with_context(|| format!("cannot summarise {}", file.display()))?;
        }
        Commands::Inspect { npy } => {
            commands::inspect(&npy).with_context(|| format!("cannot inspect {}", npy.display()))?;
        }
        Commands::Models => commands::list_models()?,
        Commands::Device { model, device } => commands::show_device(model.as_deref(), device)?,
    }
    Ok(())
}
