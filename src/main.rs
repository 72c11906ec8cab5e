use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use forestnorm::{
    batch::{run_batch, BatchManifest},
    carbon::write_carbon_json,
    process::{self, DecodeOptions},
    schema::{SchemaLayout, SchemaVersion, WideSchema},
    trees::write_trees_json,
};
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Normalize forest simulator output into optimizer inputs"
)]
struct Cli {
    #[command(flatten)]
    schema: SchemaArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct SchemaArgs {
    /// Built-in wide-table layout.
    #[arg(long, global = true, default_value = "v230")]
    schema: SchemaVersion,
    /// Layout file; overrides --schema.
    #[arg(long, global = true)]
    schema_file: Option<PathBuf>,
}

impl SchemaArgs {
    fn load(&self) -> Result<WideSchema> {
        let schema = match &self.schema_file {
            Some(path) => WideSchema::from_layout(SchemaLayout::from_yaml_file(path)?)
                .with_context(|| format!("layout file {}", path.display()))?,
            None => WideSchema::builtin(self.schema)?,
        };
        Ok(schema)
    }
}

#[derive(Args)]
struct DecodeArgs {
    /// Real-estate directory holding data.xda.
    #[arg(long)]
    dir: PathBuf,
    #[arg(long)]
    holding: i64,
    /// Rows whose activity sum is within this of zero are dropped.
    #[arg(long, default_value_t = 0.0, value_parser = parse_tolerance)]
    tolerance: f64,
    /// Also write alternatives.parquet.
    #[arg(long)]
    parquet: bool,
}

impl DecodeArgs {
    fn options(&self) -> DecodeOptions {
        DecodeOptions {
            tolerance: self.tolerance,
            parquet: self.parquet,
        }
    }
}

fn parse_tolerance(value: &str) -> std::result::Result<f64, String> {
    let tolerance: f64 = value.parse().map_err(|e| format!("{}", e))?;
    DecodeOptions::new(tolerance, false)
        .map(|options| options.tolerance)
        .map_err(|e| e.to_string())
}

/// Stages that work on a single real-estate directory.
#[derive(Subcommand)]
enum Stage {
    /// data.xda → alternatives.csv + alternatives_key.csv
    Decode(DecodeArgs),
    /// trees.txt → trees.json
    Trees {
        #[arg(long)]
        dir: PathBuf,
    },
    /// alternatives + key + trees.json → carbon.json
    Carbon {
        #[arg(long)]
        dir: PathBuf,
    },
    /// decode, trees and carbon for one directory
    Run(DecodeArgs),
}

#[derive(Subcommand)]
enum Command {
    #[command(flatten)]
    Stage(Stage),
    /// every directory of a manifest, combined into its output directory
    Batch {
        #[arg(long)]
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();
    let start = Instant::now();

    match cli.command {
        Command::Batch { manifest } => {
            let parsed = BatchManifest::from_yaml_file(&manifest)?;
            let base = manifest
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            let report = run_batch(&parsed, &base)
                .await
                .with_context(|| format!("batch {}", manifest.display()))?;
            info!(
                directories = report.directories.len(),
                stands = report.combined.carbon_stands,
                "batch done"
            );
        }
        Command::Stage(stage) => {
            let schema = cli.schema.load()?;
            // stage work is blocking; keep it off the runtime threads
            tokio::task::spawn_blocking(move || run_stage(stage, &schema)).await??;
        }
    }

    info!(elapsed = ?start.elapsed(), "all done");
    Ok(())
}

fn run_stage(stage: Stage, schema: &WideSchema) -> Result<()> {
    match stage {
        Stage::Decode(args) => {
            let summary = process::decode(&args.dir, args.holding, schema, args.options())
                .with_context(|| format!("decode {}", args.dir.display()))?;
            info!(?summary, "decode done");
        }
        Stage::Trees { dir } => {
            let events =
                write_trees_json(&dir).with_context(|| format!("trees {}", dir.display()))?;
            info!(stands = events.len(), "trees done");
        }
        Stage::Carbon { dir } => {
            let series = write_carbon_json(&dir, schema)
                .with_context(|| format!("carbon {}", dir.display()))?;
            info!(stands = series.len(), "carbon done");
        }
        Stage::Run(args) => {
            let summary = process::run_directory(&args.dir, args.holding, schema, args.options())
                .with_context(|| format!("run {}", args.dir.display()))?;
            info!(?summary, "run done");
        }
    }
    Ok(())
}
