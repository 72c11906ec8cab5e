use anyhow::{Context, Result};
use clap::Parser;
use forestnorm::schema::{SchemaLayout, SchemaVersion, WideSchema};
use std::{fs, path::PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

/// Print a built-in wide-table layout as YAML, as a starting point for --schema-file.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "v230")]
    schema: SchemaVersion,
    /// Write here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let layout = SchemaLayout::builtin(args.schema);
    // validate before exporting
    WideSchema::from_layout(layout.clone())?;
    let yaml = layout.to_yaml()?;

    match args.out {
        Some(path) => {
            fs::write(&path, yaml).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), schema = %args.schema, "wrote layout");
        }
        None => print!("{}", yaml),
    }
    Ok(())
}
