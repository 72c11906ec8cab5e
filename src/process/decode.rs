// src/process/decode.rs
use arrow::{
    array::{ArrayRef, Float64Array, Int64Array, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::process::wide_table::{WideRow, WideTable};
use crate::schema::WideSchema;

/// Treatment label of schedule 0.
pub const DO_NOTHING: &str = "donothing";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeOptions {
    /// A non-baseline row is inert when `|activity sum| <= tolerance`. Zero means exact
    /// equality with 0.
    pub tolerance: f64,
    /// Also write `alternatives.parquet`.
    pub parquet: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            parquet: false,
        }
    }
}

impl DecodeOptions {
    /// Fails with `Config` on a negative or NaN tolerance.
    pub fn new(tolerance: f64, parquet: bool) -> Result<Self> {
        let options = Self { tolerance, parquet };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(PipelineError::Config(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    pub fn is_inert(&self, activity_sum: f64) -> bool {
        activity_sum.abs() <= self.tolerance
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub number: u32,
    pub treatment: String,
    pub row: WideRow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StandSchedules {
    pub unit: i64,
    pub schedules: Vec<Schedule>,
}

/// One row of `alternatives_key.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRow {
    pub holding: i64,
    pub unit: i64,
    pub schedule: u32,
    pub treatment: String,
}

#[derive(Debug, Clone)]
pub struct DecodedHolding {
    pub holding: i64,
    pub stands: Vec<StandSchedules>,
    /// Raw rows dropped as inert.
    pub pruned: usize,
}

pub fn decode_table(
    table: &WideTable,
    holding: i64,
    schema: &WideSchema,
    options: DecodeOptions,
) -> Result<DecodedHolding> {
    options.validate()?;
    let mut stands = Vec::new();
    let mut pruned = 0;

    for (unit, rows) in group_by_stand(&table.rows) {
        let (stand, dropped) = decode_stand(unit, &rows, schema, options)?;
        debug!(
            unit,
            schedules = stand.schedules.len(),
            dropped,
            "decoded stand"
        );
        pruned += dropped;
        stands.push(stand);
    }

    Ok(DecodedHolding {
        holding,
        stands,
        pruned,
    })
}

/// Rows per stand id, stands in first-seen order, rows in file order.
fn group_by_stand(rows: &[WideRow]) -> Vec<(i64, Vec<&WideRow>)> {
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut groups: Vec<(i64, Vec<&WideRow>)> = Vec::new();
    for row in rows {
        let slot = *index.entry(row.stand).or_insert_with(|| {
            groups.push((row.stand, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row);
    }
    groups
}

fn decode_stand(
    unit: i64,
    rows: &[&WideRow],
    schema: &WideSchema,
    options: DecodeOptions,
) -> Result<(StandSchedules, usize)> {
    let (baseline, rest) = rows.split_first().ok_or_else(|| {
        PipelineError::DataIntegrity(format!("stand {} has no rows after grouping", unit))
    })?;

    let mut schedules = vec![Schedule {
        number: 0,
        treatment: DO_NOTHING.to_string(),
        row: (*baseline).clone(),
    }];

    let mut dropped = 0;
    for row in rest {
        if options.is_inert(row.span_sum(schema.activity_span())) {
            dropped += 1;
            continue;
        }
        let number = schedules.len() as u32;
        let treatment = treatment_key(row, schema);
        if treatment.is_empty() {
            warn!(
                unit,
                schedule = number,
                "activity span is non-zero but no single activity is positive; treatment left empty"
            );
        }
        schedules.push(Schedule {
            number,
            treatment,
            row: (*row).clone(),
        });
    }

    Ok((StandSchedules { unit, schedules }, dropped))
}

/// `"first_5 + clearcut_20"`: every strictly positive activity column, in column order.
pub fn treatment_key(row: &WideRow, schema: &WideSchema) -> String {
    schema
        .activity_columns()
        .filter(|(col, _)| row.value(*col) > 0.0)
        .map(|(_, label)| label)
        .collect::<Vec<_>>()
        .join(" + ")
}

impl DecodedHolding {
    pub fn schedule_count(&self) -> usize {
        self.stands.iter().map(|s| s.schedules.len()).sum()
    }

    fn schedules(&self) -> impl Iterator<Item = (i64, &Schedule)> + '_ {
        self.stands
            .iter()
            .flat_map(|s| s.schedules.iter().map(move |sch| (s.unit, sch)))
    }

    pub fn key_rows(&self) -> Vec<KeyRow> {
        self.schedules()
            .map(|(unit, sch)| KeyRow {
                holding: self.holding,
                unit,
                schedule: sch.number,
                treatment: sch.treatment.clone(),
            })
            .collect()
    }

    /// `holding, unit, schedule` followed by the schema's projected metric columns.
    pub fn alternatives_batch(&self, schema: &WideSchema) -> Result<RecordBatch> {
        let projected: Vec<usize> = schema.projected_columns().collect();
        let n = self.schedule_count();

        let mut fields = vec![
            Field::new("holding", DataType::Int64, false),
            Field::new("unit", DataType::Int64, false),
            Field::new("schedule", DataType::Int64, false),
        ];
        fields.extend(
            projected
                .iter()
                .map(|&col| Field::new(schema.name(col), DataType::Float64, false)),
        );

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
        columns.push(Arc::new(Int64Array::from(vec![self.holding; n])));
        columns.push(Arc::new(Int64Array::from_iter_values(
            self.schedules().map(|(unit, _)| unit),
        )));
        columns.push(Arc::new(Int64Array::from_iter_values(
            self.schedules().map(|(_, sch)| sch.number as i64),
        )));
        for &col in &projected {
            columns.push(Arc::new(Float64Array::from_iter_values(
                self.schedules().map(|(_, sch)| sch.row.value(col)),
            )));
        }

        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .map_err(|e| PipelineError::DataIntegrity(format!("building alternatives table: {}", e)))
    }

    pub fn key_batch(&self) -> Result<RecordBatch> {
        key_rows_batch(&self.key_rows())
    }
}

pub fn key_schema() -> Schema {
    Schema::new(vec![
        Field::new("holding", DataType::Int64, false),
        Field::new("unit", DataType::Int64, false),
        Field::new("schedule", DataType::Int64, false),
        // an empty treatment is written as an empty cell and read back as null
        Field::new("treatment", DataType::Utf8, true),
    ])
}

pub fn key_rows_batch(rows: &[KeyRow]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.holding))),
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.unit))),
        Arc::new(Int64Array::from_iter_values(
            rows.iter().map(|r| r.schedule as i64),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.treatment.as_str()),
        )),
    ];
    RecordBatch::try_new(Arc::new(key_schema()), columns)
        .map_err(|e| PipelineError::DataIntegrity(format!("building key table: {}", e)))
}
