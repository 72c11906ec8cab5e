// src/batch/report.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::error::{PipelineError, Result};
use crate::process::DirectorySummary;

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryReport {
    pub directory: PathBuf,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: DirectorySummary,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CombinedCounts {
    pub alternatives_rows: usize,
    pub key_rows: usize,
    pub carbon_stands: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub holding: i64,
    pub schema: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub directories: Vec<DirectoryReport>,
    pub combined: CombinedCounts,
}

impl BatchReport {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, self).map_err(|e| PipelineError::output(path, e))?;
        out.flush().map_err(|e| PipelineError::io(path, e))
    }
}
