mod cli;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use luma_core::identity::IdentityStore;
use serde::Serialize;

use cli::{load_config, run_demo, DemoOptions};

#[derive(Parser)]
#[command(name = "luma")]
#[command(about = "Realtime photo gallery core")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    /// Path to JSON config file (dataDir, pageSize, unsplashAccessKey, ...)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the local identity, creating it on first use
    Identity,

    /// Print the effective configuration
    Config,

    /// Run several sessions against an in-memory hosted database and print the result
    Demo {
        /// Number of concurrent sessions
        #[arg(long, short = 's', default_value_t = 2)]
        sessions: usize,
        /// Infinite-scroll pages to load after the seed
        #[arg(long, short = 'p', default_value_t = 1)]
        pages: usize,
        /// Use placeholder photos instead of Unsplash
        #[arg(long)]
        offline: bool,
        /// Seconds to wait for each sync step
        #[arg(long, default_value_t = 20)]
        timeout: u64,
    },
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Identity => {
            std::fs::create_dir_all(&config.data_dir)?;
            let store = IdentityStore::load_or_create(&config.data_dir)?;
            print_json(store.identity(), cli.pretty)
        }
        Commands::Config => print_json(&config, cli.pretty),
        Commands::Demo {
            sessions,
            pages,
            offline,
            timeout,
        } => {
            let options = DemoOptions {
                sessions,
                pages,
                offline,
                timeout: Duration::from_secs(timeout),
            };
            let report = run_demo(&config, &options)?;
            print_json(&report, cli.pretty)
        }
    }
}

fn main() {
    luma_core::tracing_setup::init_tracing();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
