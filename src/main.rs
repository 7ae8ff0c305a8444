use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use widecol_loader::{
    ChunkLedger, ChunkPlanner, CsvSource, DatasetSpec, ImportConfig, ImportDriver, JsonlStore,
    SchemaRegistry,
};

#[derive(Parser)]
#[command(name = "widecol-loader")]
#[command(about = "Import flat CSV datasets into a wide-column store")]
struct Args {
    /// Directory holding the source CSV files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON dataset registry (defaults to the built-in MovieLens registry)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered datasets
    List,

    /// Show the chunk ranges a dataset would be imported in
    Plan {
        dataset: String,

        /// Override the dataset's chunk count
        #[arg(long)]
        chunks: Option<usize>,
    },

    /// Import datasets into the output store
    Import {
        datasets: Vec<String>,

        /// Import every registered dataset
        #[arg(long)]
        all: bool,

        #[arg(long)]
        chunks: Option<usize>,

        #[arg(long)]
        workers: Option<usize>,

        /// Discard chunk ledgers and import from scratch
        #[arg(long)]
        fresh: bool,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        state_dir: Option<PathBuf>,

        #[arg(long)]
        max_skip_ratio: Option<f64>,
    },
}

fn with_chunks(spec: &DatasetSpec, chunks: Option<usize>) -> DatasetSpec {
    match chunks {
        Some(n) => spec.clone().large(n),
        None => spec.clone(),
    }
}

fn print_datasets(registry: &SchemaRegistry) {
    println!(
        "{:<16}{:<16}{:<8}{:<22}{:<8}columns",
        "dataset", "table", "family", "row key", "chunks"
    );
    for spec in registry.iter() {
        let chunks = if spec.is_large {
            spec.chunk_count.to_string()
        } else {
            "-".to_string()
        };
        println!(
            "{:<16}{:<16}{:<8}{:<22}{:<8}{}",
            spec.name,
            spec.table_name,
            spec.column_family,
            spec.row_key.to_string(),
            chunks,
            spec.output_columns.join(", ")
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = ImportConfig::from_env().context("Failed to read configuration")?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(path) = args.registry {
        config.registry = Some(path);
    }

    let loaded;
    let registry: &SchemaRegistry = match &config.registry {
        Some(path) => {
            loaded = SchemaRegistry::from_json_file(path)
                .with_context(|| format!("Failed to load registry {}", path.display()))?;
            &loaded
        }
        None => SchemaRegistry::movielens(),
    };

    match args.command {
        Command::List => print_datasets(registry),

        Command::Plan { dataset, chunks } => {
            let spec = with_chunks(registry.lookup(&dataset)?, chunks);
            let path = config.data_dir.join(&spec.source_file);
            let source = CsvSource::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let plan = ChunkPlanner::plan_dataset(&spec, &source)?;
            plan.validate()?;

            println!("{} ({}): {} chunk(s)", spec.name, path.display(), plan.len());
            for range in &plan.ranges {
                println!("  {}", range);
            }
        }

        Command::Import {
            datasets,
            all,
            chunks,
            workers,
            fresh,
            output_dir,
            state_dir,
            max_skip_ratio,
        } => {
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            if let Some(dir) = state_dir {
                config.state_dir = dir;
            }
            if let Some(n) = workers {
                config.workers = n;
            }
            if max_skip_ratio.is_some() {
                config.max_skip_ratio = max_skip_ratio;
            }
            config.validate()?;

            let names: Vec<String> = if all {
                registry.names().into_iter().map(str::to_string).collect()
            } else {
                datasets
            };
            if names.is_empty() {
                bail!("No datasets given; name one or more datasets or pass --all");
            }

            // Unknown names fail the run before anything is imported
            let specs = names
                .iter()
                .map(|name| registry.lookup(name).map(|spec| with_chunks(spec, chunks)))
                .collect::<widecol_loader::Result<Vec<_>>>()?;

            if fresh {
                for spec in &specs {
                    ChunkLedger::discard(&config.state_dir, &spec.name)?;
                }
                info!("Discarded chunk ledgers in {}", config.state_dir.display());
            }

            let sinks = Arc::new(JsonlStore::new(config.output_dir.clone()));
            let driver = ImportDriver::new(sinks, config.import_options());

            let cancel = driver.cancel_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received; finishing running chunks");
                    cancel.cancel();
                }
            });

            let summary = driver.import_datasets(&specs, &config.data_dir).await;
            println!("{}", summary);

            if summary.has_failures() {
                bail!(
                    "{} chunk(s) and {} dataset(s) failed",
                    summary.failed_chunks(),
                    summary.failed_datasets()
                );
            }
            if summary.cancelled {
                bail!("Import cancelled before all chunks ran");
            }
        }
    }

    Ok(())
}
