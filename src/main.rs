use std::{path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::Parser;
use nihscraper::{
    config::{Parameters, DEFAULT_PARAMETERS_FILE},
    entity::{DataBunch, EntityKind},
    error::{exit_code_for, Error},
    fetch,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Download the NIH ExPORTER catalogues, consolidate them into cached
/// datasets and export each entity's key columns.
#[derive(Parser)]
#[command(name = "nihscraper", version)]
struct Cli {
    /// Parameters file.
    #[arg(long, default_value = DEFAULT_PARAMETERS_FILE)]
    parameters: PathBuf,

    /// Keep key tuples that contain a null in the exports.
    #[arg(long)]
    keep_nulls: bool,

    /// Entities to run (`projects`, `link_tables`, ...). All configured ones by default.
    entities: Vec<String>,
}

fn main() -> ExitCode {
    // ─── init logging ────────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let params = Parameters::load(&cli.parameters)?;

    let selected: Vec<EntityKind> = if cli.entities.is_empty() {
        params.entities().iter().map(|e| e.kind).collect()
    } else {
        let mut kinds = cli
            .entities
            .iter()
            .map(|name| {
                EntityKind::from_key(name)
                    .ok_or_else(|| Error::config(format!("unknown entity `{}`", name)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        kinds.sort();
        kinds.dedup();
        kinds
    };

    let client = fetch::client()?;

    // one entity at a time; each dataset is dropped before the next is built
    for kind in selected {
        let config = params.require(kind)?;
        info!(entity = %config.name, "starting");
        let mut bunch = DataBunch::new(config, &client);
        bunch.export_key_columns(&config.key_columns_file(), !cli.keep_nulls)?;
    }

    info!("all done");
    Ok(())
}
