use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::Result;
use clap::Parser;
use nihscraper::{
    config::{Parameters, DEFAULT_PARAMETERS_FILE},
    error::exit_code_for,
    reconcile::{connectivity_stats, load_exports},
};
use tracing_subscriber::{fmt, EnvFilter};

/// Report dangling references between the exported key-column files.
#[derive(Parser)]
#[command(name = "connectivity_stats")]
struct Cli {
    #[arg(long, default_value = DEFAULT_PARAMETERS_FILE)]
    parameters: PathBuf,
}

fn main() -> ExitCode {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let params = Parameters::load(&cli.parameters)?;
    // exports live in the working directory
    let exports = load_exports(&params, Path::new(""))?;
    let stats = connectivity_stats(&exports, &params.reconciliation)?;
    println!("{}", stats);
    Ok(())
}
