//! XML Guard - Main Entry Point

mod api;
mod cli;
mod constants;
mod logic;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use api::{commands, AppPaths};
use cli::{Cli, Commands};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to format output")?;
    println!("{}", json);
    Ok(())
}

fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring unreadable .env: {}", e);
        }
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let paths = AppPaths::new(cli.data_dir.clone().unwrap_or_else(constants::get_data_dir));

    match cli.command {
        Commands::Run(args) => {
            log::info!(
                "Starting {} v{} (data dir: {})",
                constants::APP_NAME,
                constants::APP_VERSION,
                paths.data_dir.display()
            );
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;
            runtime.block_on(commands::run(&paths, &args))
        }
        Commands::Seal(args) => print_json(&commands::seal(&paths, &args)?),
        Commands::Open(args) => print_json(&commands::open(&paths, &args)?),
        Commands::Fingerprint => print_json(&commands::fingerprint(&paths)?),
        Commands::Inspect { file } => print_json(&commands::inspect(&file)?),
        Commands::Templates {
            templates,
            strict_templates,
        } => {
            let dir = templates.unwrap_or_else(|| paths.templates.clone());
            print_json(&commands::list_templates(&dir, strict_templates)?)
        }
        Commands::Audit(args) => print_json(&commands::audit(&paths, &args)?),
    }
}
