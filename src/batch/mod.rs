//! Several real-estate directories of one holding, processed concurrently and combined.

pub mod combine;
pub mod manifest;
pub mod report;

use chrono::Utc;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::error::{PipelineError, Result};
use crate::files::{
    ALTERNATIVES_FILE, ALTERNATIVES_KEY_FILE, BATCH_REPORT_FILE, CARBON_JSON_FILE, FILTER_FILE,
};
use crate::process::run_directory;

pub use manifest::BatchManifest;
pub use report::{BatchReport, CombinedCounts, DirectoryReport};

/// Run every directory of `manifest` on the blocking pool, at most `concurrency` at a
/// time, then combine their outputs. `base` anchors the manifest's relative paths.
///
/// Every directory runs to completion before the first failure is returned; nothing is
/// combined unless all of them succeeded.
#[tracing::instrument(level = "info", skip(manifest, base), fields(holding = manifest.holding, base = %base.display()))]
pub async fn run_batch(manifest: &BatchManifest, base: &Path) -> Result<BatchReport> {
    let started = Utc::now();
    let options = manifest.decode_options()?;
    let schema = Arc::new(manifest.wide_schema(base)?);
    let dirs = manifest.resolve_directories(base)?;
    let output = manifest.output_dir(base);
    fs::create_dir_all(&output).map_err(|e| PipelineError::io(&output, e))?;
    info!(directories = dirs.len(), output = %output.display(), "starting batch");

    let holding = manifest.holding;
    let sem = Arc::new(Semaphore::new(manifest.concurrency.max(1)));
    let mut handles = Vec::with_capacity(dirs.len());

    for dir in dirs {
        let permit = sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::output(&dir, e))?;
        let schema = Arc::clone(&schema);
        let task_dir = dir.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let started = Utc::now();
            let summary = run_directory(&task_dir, holding, &schema, options)?;
            Ok::<_, PipelineError>(DirectoryReport {
                directory: task_dir,
                started,
                finished: Utc::now(),
                summary,
            })
        });
        handles.push((dir, handle));
    }

    let mut reports = Vec::with_capacity(handles.len());
    let mut first_error: Option<PipelineError> = None;
    for (dir, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(PipelineError::output(&dir, format!("worker failed: {}", e))),
        };
        match outcome {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(dir = %dir.display(), "directory failed: {}", e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let combined = combine_outputs(&reports, &output)?;
    let report = BatchReport {
        holding,
        schema: schema.version().to_string(),
        started,
        finished: Utc::now(),
        directories: reports,
        combined,
    };
    report.write_json(&output.join(BATCH_REPORT_FILE))?;
    info!(
        alternatives = report.combined.alternatives_rows,
        stands = report.combined.carbon_stands,
        "batch finished"
    );
    Ok(report)
}

fn combine_outputs(reports: &[DirectoryReport], output: &Path) -> Result<CombinedCounts> {
    let inputs = |name: &str| -> Vec<PathBuf> {
        reports.iter().map(|r| r.directory.join(name)).collect()
    };
    let alternatives_rows =
        combine::concat_csv(&inputs(ALTERNATIVES_FILE), &output.join(ALTERNATIVES_FILE))?;

    let key_path = output.join(ALTERNATIVES_KEY_FILE);
    let key_rows = combine::concat_csv(&inputs(ALTERNATIVES_KEY_FILE), &key_path)?;
    let filter_path = output.join(FILTER_FILE);
    fs::copy(&key_path, &filter_path).map_err(|e| PipelineError::io(&filter_path, e))?;

    let carbon_stands =
        combine::merge_carbon(&inputs(CARBON_JSON_FILE), &output.join(CARBON_JSON_FILE))?.len();

    Ok(CombinedCounts {
        alternatives_rows,
        key_rows,
        carbon_stands,
    })
}
