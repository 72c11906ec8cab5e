// src/process/mod.rs
pub mod decode;
pub mod table_io;
pub mod wide_table;

use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::carbon;
use crate::error::Result;
use crate::files::{
    ALTERNATIVES_FILE, ALTERNATIVES_KEY_FILE, ALTERNATIVES_PARQUET_FILE, WIDE_TABLE_FILE,
};
use crate::schema::WideSchema;
use crate::trees;

pub use decode::{decode_table, DecodeOptions, DecodedHolding, KeyRow};
pub use wide_table::{load_wide_table, WideRow, WideTable};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DecodeSummary {
    pub stands: usize,
    pub schedules: usize,
    /// Raw rows dropped as inert.
    pub pruned: usize,
}

/// Everything one directory run produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DirectorySummary {
    pub decode: DecodeSummary,
    pub tree_stands: usize,
    pub carbon_stands: usize,
}

/// Load `<dir>/data.xda`, decode it and write `alternatives.csv` and
/// `alternatives_key.csv` (plus `alternatives.parquet` when asked).
#[tracing::instrument(level = "info", skip(dir, schema, options), fields(dir = %dir.display(), version = schema.version()))]
pub fn decode(
    dir: &Path,
    holding: i64,
    schema: &WideSchema,
    options: DecodeOptions,
) -> Result<DecodeSummary> {
    let table = load_wide_table(&dir.join(WIDE_TABLE_FILE), schema)?;
    let decoded = decode_table(&table, holding, schema, options)?;

    let alternatives = decoded.alternatives_batch(schema)?;
    table_io::write_csv(&alternatives, &dir.join(ALTERNATIVES_FILE))?;
    table_io::write_csv(&decoded.key_batch()?, &dir.join(ALTERNATIVES_KEY_FILE))?;

    if options.parquet {
        let path = dir.join(ALTERNATIVES_PARQUET_FILE);
        let bytes = table_io::write_parquet(&alternatives, &path)?;
        info!(path = %path.display(), bytes, "wrote parquet copy");
    }

    let summary = DecodeSummary {
        stands: decoded.stands.len(),
        schedules: decoded.schedule_count(),
        pruned: decoded.pruned,
    };
    info!(
        stands = summary.stands,
        schedules = summary.schedules,
        pruned = summary.pruned,
        "wrote alternatives"
    );
    Ok(summary)
}

/// Decode and tree parsing run side by side; carbon needs both.
#[tracing::instrument(level = "info", skip(dir, schema, options), fields(dir = %dir.display()))]
pub fn run_directory(
    dir: &Path,
    holding: i64,
    schema: &WideSchema,
    options: DecodeOptions,
) -> Result<DirectorySummary> {
    let (decoded, events) = rayon::join(
        || decode(dir, holding, schema, options),
        || trees::write_trees_json(dir),
    );
    let decode = decoded?;
    let events = events?;

    let series = carbon::write_carbon_json(dir, schema)?;
    Ok(DirectorySummary {
        decode,
        tree_stands: events.len(),
        carbon_stands: series.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::files::{CARBON_JSON_FILE, TREES_JSON_FILE, TREE_LOG_FILE};
    use crate::process::wide_table::tests::raw_line;
    use crate::schema::SchemaVersion;
    use std::fs;

    fn write_inputs(dir: &Path, schema: &WideSchema) -> anyhow::Result<()> {
        let span = schema.activity_span();
        let rows = [
            raw_line(schema, 11, 1.0, |_| 0.0),
            raw_line(schema, 11, 1.0, |c| if span.contains(&c) { 2.0 } else { 0.0 }),
            raw_line(schema, 12, 2.0, |_| 0.0),
        ];
        fs::write(dir.join(WIDE_TABLE_FILE), rows.join("\n") + "\n")?;
        fs::write(
            dir.join(TREE_LOG_FILE),
            "11 0 0\n11 1 0 0 0 20\n\n11 1 0\n11 1 0 0 0 25\n\n\n",
        )?;
        Ok(())
    }

    #[test]
    fn decode_writes_both_tables() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let schema = WideSchema::builtin(SchemaVersion::V230)?;
        write_inputs(dir.path(), &schema)?;

        let options = DecodeOptions {
            parquet: true,
            ..Default::default()
        };
        let summary = decode(dir.path(), 5, &schema, options)?;
        assert_eq!(
            summary,
            DecodeSummary {
                stands: 2,
                schedules: 3,
                pruned: 0
            }
        );

        let key = fs::read_to_string(dir.path().join(ALTERNATIVES_KEY_FILE))?;
        let lines: Vec<&str> = key.lines().collect();
        assert_eq!(lines[0], "holding,unit,schedule,treatment");
        assert_eq!(lines[1], "5,11,0,donothing");
        assert!(lines[2].starts_with("5,11,1,first_5 + "), "{}", lines[2]);
        assert_eq!(lines[3], "5,12,0,donothing");
        assert!(dir.path().join(ALTERNATIVES_PARQUET_FILE).exists());
        Ok(())
    }

    #[test]
    fn run_directory_writes_every_artifact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let schema = WideSchema::builtin(SchemaVersion::V230)?;
        write_inputs(dir.path(), &schema)?;

        let summary = run_directory(dir.path(), 5, &schema, DecodeOptions::default())?;
        assert_eq!(summary.tree_stands, 1);
        assert_eq!(summary.carbon_stands, 2);
        for name in [ALTERNATIVES_FILE, ALTERNATIVES_KEY_FILE, TREES_JSON_FILE, CARBON_JSON_FILE] {
            assert!(dir.path().join(name).exists(), "{name}");
        }
        assert!(!dir.path().join(ALTERNATIVES_PARQUET_FILE).exists());
        Ok(())
    }

    #[test]
    fn missing_wide_table_stops_the_run() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let schema = WideSchema::builtin(SchemaVersion::V230)?;
        fs::write(dir.path().join(TREE_LOG_FILE), "1 0 0\n")?;
        let err = run_directory(dir.path(), 1, &schema, DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }), "{err}");
        assert!(!dir.path().join(CARBON_JSON_FILE).exists());
        Ok(())
    }
}
