use clap::{Parser, Subcommand};
use serde::Serialize;
use solidb_cube::storage::{decode_row, CubeStore};
use solidb_cube::{Aggregation, EngineConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "solidb-cube")]
#[command(about = "Inspect cuboid tables of a cube store", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory path (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List cuboid tables
    Tables,

    /// Dump raw rows of one cuboid table as JSON
    Scan {
        /// Cuboid name
        #[arg(long)]
        table: String,

        /// Inclusive start key, hex encoded
        #[arg(long, default_value = "")]
        start: String,

        /// Exclusive stop key, hex encoded
        #[arg(long)]
        stop: Option<String>,

        /// Maximum rows to print
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[derive(Serialize)]
struct RowDump {
    key: String,
    measures: Vec<(String, Aggregation)>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let store = CubeStore::open(&config.data_dir)?;

    match args.command {
        Command::Tables => {
            for table in store.list_tables()? {
                println!("{}", table);
            }
        }
        Command::Scan {
            table,
            start,
            stop,
            limit,
        } => {
            let start = hex::decode(&start)?;
            let stop = stop.map(hex::decode).transpose()?;
            let rows = store.scan_raw(&table, &start, stop.as_deref(), limit)?;
            tracing::info!("Read {} row(s) from {}", rows.len(), table);

            let dump = rows
                .into_iter()
                .map(|(key, value)| {
                    Ok(RowDump {
                        key: hex::encode(key),
                        measures: decode_row(&value)?,
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
    }

    Ok(())
}
