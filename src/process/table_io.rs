// src/process/table_io.rs
use arrow::{
    array::{Array, Int64Array, StringArray},
    compute::concat_batches,
    csv::{ReaderBuilder, WriterBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use parquet::{
    arrow::ArrowWriter,
    basic::{BrotliLevel, Compression},
    file::properties::WriterProperties,
};
use std::{
    fs::{self, File},
    io::{BufRead, BufWriter, Cursor, Write},
    path::Path,
    sync::Arc,
};

use crate::error::{require_input, PipelineError, Result};
use crate::process::decode::{key_schema, KeyRow};

const BATCH_ROWS: usize = 8192;

/// Comma-separated with a header row.
pub fn write_csv(batch: &RecordBatch, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = WriterBuilder::new()
        .with_header(true)
        .build(BufWriter::new(file));
    writer
        .write(batch)
        .map_err(|e| PipelineError::output(path, e))?;
    writer
        .into_inner()
        .flush()
        .map_err(|e| PipelineError::io(path, e))
}

/// Returns the size of the written file.
pub fn write_parquet(batch: &RecordBatch, path: &Path) -> Result<u64> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;

    let level = BrotliLevel::try_new(5).map_err(|e| PipelineError::output(path, e))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::BROTLI(level))
        .build();

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .map_err(|e| PipelineError::output(path, e))?;
    writer
        .write(batch)
        .map_err(|e| PipelineError::output(path, e))?;
    writer.close().map_err(|e| PipelineError::output(path, e))?;

    let metadata = fs::metadata(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(metadata.len())
}

/// Read a headed CSV. Columns in `int_columns` become Int64, those in `text_columns`
/// nullable Utf8, everything else non-nullable Float64.
pub fn read_csv(path: &Path, int_columns: &[&str], text_columns: &[&str]) -> Result<RecordBatch> {
    require_input(path)?;
    let data = fs::read(path).map_err(|e| PipelineError::io(path, e))?;

    let mut header = String::new();
    Cursor::new(&data)
        .read_line(&mut header)
        .map_err(|e| PipelineError::io(path, e))?;
    let names: Vec<&str> = header.trim_end_matches(['\r', '\n']).split(',').collect();
    if names.iter().all(|n| n.is_empty()) {
        return Err(PipelineError::format(path, "line 1", "missing header row"));
    }

    let fields: Vec<Field> = names
        .iter()
        .map(|name| {
            if int_columns.contains(name) {
                Field::new(*name, DataType::Int64, false)
            } else if text_columns.contains(name) {
                Field::new(*name, DataType::Utf8, true)
            } else {
                Field::new(*name, DataType::Float64, false)
            }
        })
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .with_batch_size(BATCH_ROWS)
        .build(Cursor::new(data))
        .map_err(|e| PipelineError::format(path, "reader setup", e))?;

    let mut batches = Vec::new();
    for (i, batch) in reader.enumerate() {
        let batch = batch.map_err(|e| {
            PipelineError::format(path, format!("batch starting at row {}", i * BATCH_ROWS + 1), e)
        })?;
        batches.push(batch);
    }
    concat_batches(&schema, &batches).map_err(|e| PipelineError::format(path, "concat", e))
}

pub fn int64_column<'a>(batch: &'a RecordBatch, name: &str, path: &Path) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| {
            PipelineError::DataIntegrity(format!(
                "`{}` has no integer column `{}`",
                path.display(),
                name
            ))
        })
}

pub fn read_key_table(path: &Path) -> Result<Vec<KeyRow>> {
    let batch = read_csv(path, &["holding", "unit", "schedule"], &["treatment"])?;
    let expected = key_schema();
    for field in expected.fields() {
        if batch.schema().index_of(field.name()).is_err() {
            return Err(PipelineError::DataIntegrity(format!(
                "`{}` lacks column `{}`",
                path.display(),
                field.name()
            )));
        }
    }

    let holding = int64_column(&batch, "holding", path)?;
    let unit = int64_column(&batch, "unit", path)?;
    let schedule = int64_column(&batch, "schedule", path)?;
    let treatment = batch
        .column_by_name("treatment")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| {
            PipelineError::DataIntegrity(format!("`{}` has no text column `treatment`", path.display()))
        })?;

    (0..batch.num_rows())
        .map(|r| {
            let sched = u32::try_from(schedule.value(r)).map_err(|_| {
                PipelineError::format(path, format!("row {}", r + 2), "schedule is negative")
            })?;
            Ok(KeyRow {
                holding: holding.value(r),
                unit: unit.value(r),
                schedule: sched,
                treatment: if treatment.is_null(r) {
                    String::new()
                } else {
                    treatment.value(r).to_string()
                },
            })
        })
        .collect()
}
