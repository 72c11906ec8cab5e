// src/process/wide_table.rs
use arrow::{
    array::{Array, Float64Array, Int64Array},
    csv::ReaderBuilder,
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::{
    fs::File,
    io::{BufReader, Read},
    ops::Range,
    path::Path,
    sync::Arc,
};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::schema::WideSchema;

const BATCH_ROWS: usize = 4096;

/// One raw simulator row after typing and area scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub stand: i64,
    /// Every column by position; position 0 repeats the stand id as a float.
    pub values: Vec<f64>,
}

impl WideRow {
    pub fn value(&self, col: usize) -> f64 {
        self.values[col]
    }

    /// Left-to-right sum over `span`, the same accumulation order the simulator tables
    /// were always checked with.
    pub fn span_sum(&self, span: Range<usize>) -> f64 {
        self.values[span].iter().fold(0.0, |acc, v| acc + v)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WideTable {
    pub rows: Vec<WideRow>,
}

impl WideTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Arrow schema the raw table is parsed against: identifier as Int64, the rest Float64,
/// none nullable so an empty cell fails the read.
pub fn raw_arrow_schema(schema: &WideSchema) -> Schema {
    let fields: Vec<Field> = schema
        .names()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let ty = if i == 0 {
                DataType::Int64
            } else {
                DataType::Float64
            };
            Field::new(name, ty, false)
        })
        .collect();
    Schema::new(fields)
}

#[tracing::instrument(level = "info", skip(schema), fields(path = %path.display(), version = schema.version()))]
pub fn load_wide_table(path: &Path, schema: &WideSchema) -> Result<WideTable> {
    crate::error::require_input(path)?;
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let table = read_wide_table(BufReader::new(file), path, schema)?;
    info!(rows = table.len(), "loaded wide table");
    Ok(table)
}

/// Parse tab-separated, headerless rows from `reader`. `path` only labels errors.
pub fn read_wide_table<R: Read>(reader: R, path: &Path, schema: &WideSchema) -> Result<WideTable> {
    let reader = ReaderBuilder::new(Arc::new(raw_arrow_schema(schema)))
        .with_header(false)
        .with_delimiter(b'\t')
        .with_batch_size(BATCH_ROWS)
        .build(reader)
        .map_err(|e| PipelineError::format(path, "reader setup", e))?;

    let mut table = WideTable::default();
    for (batch_index, batch) in reader.enumerate() {
        let first_row = batch_index * BATCH_ROWS + 1;
        let batch = batch.map_err(|e| {
            PipelineError::format(path, format!("batch starting at row {}", first_row), e)
        })?;
        append_scaled_rows(&batch, first_row, schema, path, &mut table.rows)?;
        debug!(batch_index, rows = batch.num_rows(), "parsed batch");
    }
    Ok(table)
}

/// `first_row` is the 1-based file line of the batch's first row.
fn append_scaled_rows(
    batch: &RecordBatch,
    first_row: usize,
    schema: &WideSchema,
    path: &Path,
    rows: &mut Vec<WideRow>,
) -> Result<()> {
    let ids = batch
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| PipelineError::format(path, "column 0", "identifier is not Int64"))?;

    let mut metrics: Vec<&Float64Array> = Vec::with_capacity(schema.width() - 1);
    for col in 1..schema.width() {
        let arr = batch
            .column(col)
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| {
                PipelineError::format(
                    path,
                    format!("column {} (`{}`)", col, schema.name(col)),
                    "column is not Float64",
                )
            })?;
        metrics.push(arr);
    }

    let scaled_from = schema.area_scaled_from();
    for r in 0..batch.num_rows() {
        let stand = ids.value(r);
        let area = metrics[0].value(r);
        let mut values = Vec::with_capacity(schema.width());
        values.push(stand as f64);
        for (i, arr) in metrics.iter().enumerate() {
            let col = i + 1;
            let v = arr.value(r);
            if !v.is_finite() {
                return Err(PipelineError::format(
                    path,
                    format!("line {} column {} (`{}`)", first_row + r, col + 1, schema.name(col)),
                    format!("non-finite value `{}`", v),
                ));
            }
            values.push(if col >= scaled_from { v * area } else { v });
        }
        rows.push(WideRow { stand, values });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::SchemaVersion;
    use std::io::Cursor;

    /// A raw tab-separated line: `f(col)` for every metric column.
    pub(crate) fn raw_line(
        schema: &WideSchema,
        stand: i64,
        area: f64,
        f: impl Fn(usize) -> f64,
    ) -> String {
        let mut fields = vec![stand.to_string(), area.to_string()];
        fields.extend((2..schema.width()).map(|c| f(c).to_string()));
        fields.join("\t")
    }

    #[test]
    fn area_scales_metric_columns() -> anyhow::Result<()> {
        let schema = WideSchema::builtin(SchemaVersion::V230)?;
        let stock_col = schema.names().iter().position(|n| n == "stock_1_0").unwrap();
        let line = raw_line(&schema, 17, 2.0, |c| if c == stock_col { 50.0 } else { 1.0 });

        let table = read_wide_table(Cursor::new(line), Path::new("data.xda"), &schema)?;
        assert_eq!(table.len(), 1);
        let row = &table.rows[0];
        assert_eq!(row.stand, 17);
        assert_eq!(row.value(1), 2.0);
        assert_eq!(row.value(stock_col), 100.0);
        assert_eq!(row.value(2), 2.0);
        Ok(())
    }

    #[test]
    fn legacy_layout_leaves_npv_unscaled() -> anyhow::Result<()> {
        let schema = WideSchema::builtin(SchemaVersion::V184)?;
        let line = raw_line(&schema, 3, 4.0, |_| 1.5);
        let table = read_wide_table(Cursor::new(line), Path::new("data.xda"), &schema)?;
        let row = &table.rows[0];
        assert_eq!(row.value(6), 1.5);
        assert_eq!(row.value(7), 6.0);
        Ok(())
    }

    #[test]
    fn non_numeric_cell_is_format_error() -> anyhow::Result<()> {
        let schema = WideSchema::builtin(SchemaVersion::V230)?;
        let line = raw_line(&schema, 1, 1.0, |_| 0.0).replacen("\t0\t", "\tabc\t", 1);
        let err = read_wide_table(Cursor::new(line), Path::new("data.xda"), &schema).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }), "{err}");
        Ok(())
    }

    #[test]
    fn short_row_is_format_error() -> anyhow::Result<()> {
        let schema = WideSchema::builtin(SchemaVersion::V230)?;
        let mut line = raw_line(&schema, 1, 1.0, |_| 0.0);
        let cut = line.rfind('\t').unwrap();
        line.truncate(cut);
        let err = read_wide_table(Cursor::new(line), Path::new("data.xda"), &schema).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }), "{err}");
        Ok(())
    }

    #[test]
    fn surplus_column_is_format_error() -> anyhow::Result<()> {
        let schema = WideSchema::builtin(SchemaVersion::V230)?;
        let line = raw_line(&schema, 1, 1.0, |_| 0.0) + "\t0";
        let err = read_wide_table(Cursor::new(line), Path::new("data.xda"), &schema).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }), "{err}");
        Ok(())
    }

    #[test]
    fn empty_cell_is_format_error() -> anyhow::Result<()> {
        let schema = WideSchema::builtin(SchemaVersion::V230)?;
        let line = raw_line(&schema, 1, 1.0, |_| 0.0).replacen("\t0\t", "\t\t", 1);
        let err = read_wide_table(Cursor::new(line), Path::new("data.xda"), &schema).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }), "{err}");
        Ok(())
    }

    #[test]
    fn nan_cell_reports_line_and_column() -> anyhow::Result<()> {
        let schema = WideSchema::builtin(SchemaVersion::V230)?;
        let lines = [
            raw_line(&schema, 1, 1.0, |_| 0.0),
            raw_line(&schema, 1, 1.0, |c| if c == 5 { f64::NAN } else { 0.0 }),
        ]
        .join("\n");
        let err = read_wide_table(Cursor::new(lines), Path::new("data.xda"), &schema).unwrap_err();
        match err {
            PipelineError::Format { location, .. } => assert!(location.starts_with("line 2 column 6"), "{location}"),
            other => panic!("unexpected {other}"),
        }
        Ok(())
    }

    #[test]
    fn fractional_identifier_is_format_error() -> anyhow::Result<()> {
        let schema = WideSchema::builtin(SchemaVersion::V230)?;
        let line = raw_line(&schema, 1, 1.0, |_| 0.0).replacen('1', "1.5", 1);
        assert!(read_wide_table(Cursor::new(line), Path::new("data.xda"), &schema).is_err());
        Ok(())
    }

    #[test]
    fn missing_file_is_reported() -> anyhow::Result<()> {
        let schema = WideSchema::builtin(SchemaVersion::V230)?;
        let dir = tempfile::tempdir()?;
        let err = load_wide_table(&dir.path().join("data.xda"), &schema).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
        Ok(())
    }
}
