// src/batch/manifest.rs
use glob::glob;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::error::{require_input, PipelineError, Result};
use crate::process::DecodeOptions;
use crate::schema::{SchemaLayout, SchemaVersion, WideSchema};

fn default_concurrency() -> usize {
    2
}

/// One holding spread over several real-estate directories.
///
/// ```yaml
/// holding: 7
/// schema: v230
/// directories:
///   - estates/owner7/*
/// output: combined/owner7
/// concurrency: 4
/// ```
///
/// Relative paths and patterns are taken from the manifest's own directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub holding: i64,
    pub schema: SchemaVersion,
    /// Overrides `schema` with a layout file.
    #[serde(default)]
    pub schema_file: Option<PathBuf>,
    pub directories: Vec<String>,
    pub output: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub tolerance: f64,
    #[serde(default)]
    pub parquet: bool,
}

impl BatchManifest {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        require_input(path)?;
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        serde_yaml::from_str(&text).map_err(|e| {
            let location = e
                .location()
                .map(|l| format!("line {} column {}", l.line(), l.column()))
                .unwrap_or_else(|| "document".to_string());
            PipelineError::format(path, location, e)
        })
    }

    pub fn wide_schema(&self, base: &Path) -> Result<WideSchema> {
        match &self.schema_file {
            Some(file) => WideSchema::from_layout(SchemaLayout::from_yaml_file(&base.join(file))?),
            None => WideSchema::builtin(self.schema),
        }
    }

    pub fn decode_options(&self) -> Result<DecodeOptions> {
        DecodeOptions::new(self.tolerance, self.parquet)
    }

    pub fn output_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.output)
    }

    /// Expand every pattern, keeping directories only. Patterns are expanded in manifest
    /// order, matches alphabetically; a directory matched twice is kept once. The output
    /// directory of an earlier run is never an estate.
    pub fn resolve_directories(&self, base: &Path) -> Result<Vec<PathBuf>> {
        let output = fs::canonicalize(self.output_dir(base)).ok();
        let mut dirs: Vec<PathBuf> = Vec::new();
        for pattern in &self.directories {
            let full = base.join(pattern);
            let full = full.to_string_lossy();
            let entries = glob(&full).map_err(|e| {
                PipelineError::format(Path::new(pattern), format!("column {}", e.pos + 1), e.msg)
            })?;

            let mut matched = 0usize;
            for entry in entries {
                let path = entry.map_err(|e| {
                    let unreadable = e.path().to_path_buf();
                    PipelineError::io(&unreadable, std::io::Error::from(e))
                })?;
                if !path.is_dir() {
                    continue;
                }
                if output.is_some() && fs::canonicalize(&path).ok() == output {
                    debug!(path = %path.display(), "skipping batch output directory");
                    continue;
                }
                matched += 1;
                if !dirs.contains(&path) {
                    dirs.push(path);
                }
            }
            debug!(pattern = %pattern, matched, "expanded directory pattern");
            if matched == 0 {
                return Err(PipelineError::MissingInput {
                    path: PathBuf::from(full.into_owned()),
                });
            }
        }
        Ok(dirs)
    }
}
