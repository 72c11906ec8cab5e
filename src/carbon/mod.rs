//! CO2 per stand, schedule and event year, from the alternatives table and tree events.

pub mod model;

use arrow::{
    array::{Array, Float64Array, Int64Array},
    record_batch::RecordBatch,
};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};
use tracing::{debug, info};

use crate::error::{require_input, PipelineError, Result};
use crate::files::{ALTERNATIVES_FILE, ALTERNATIVES_KEY_FILE, CARBON_JSON_FILE, TREES_JSON_FILE};
use crate::keyed::{format_stand_key, parse_stand_key, stand_bits, OrderedEntries};
use crate::process::decode::KeyRow;
use crate::process::table_io::{read_csv, read_key_table};
use crate::schema::WideSchema;
use crate::trees::TreeEvents;

pub use model::stand_co2;

/// One stand: event year → CO2 per schedule, in schedule order.
#[derive(Debug, Clone, PartialEq)]
pub struct CarbonRecord {
    pub stand: f64,
    pub years: BTreeMap<u32, Vec<f64>>,
}

/// Carbon records in stand order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarbonSeries {
    records: Vec<CarbonRecord>,
    index: HashMap<u64, usize>,
}

impl CarbonSeries {
    /// A stand already present is replaced and keeps its position.
    pub fn insert(&mut self, record: CarbonRecord) {
        match self.index.get(&stand_bits(record.stand)) {
            Some(&slot) => self.records[slot] = record,
            None => {
                self.index
                    .insert(stand_bits(record.stand), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn merge(&mut self, other: CarbonSeries) {
        for record in other.records {
            self.insert(record);
        }
    }

    pub fn record(&self, stand: f64) -> Option<&CarbonRecord> {
        self.index
            .get(&stand_bits(stand))
            .map(|&slot| &self.records[slot])
    }

    pub fn records(&self) -> &[CarbonRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        require_input(path)?;
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let OrderedEntries(entries): OrderedEntries<BTreeMap<u32, Vec<f64>>> =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                PipelineError::format(path, format!("line {} column {}", e.line(), e.column()), e)
            })?;

        let mut series = CarbonSeries::default();
        for (key, years) in entries {
            let stand = parse_stand_key(&key).ok_or_else(|| {
                PipelineError::format(path, format!("stand key `{}`", key), "not a number")
            })?;
            series.insert(CarbonRecord { stand, years });
        }
        Ok(series)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer(&mut out, self).map_err(|e| PipelineError::output(path, e))?;
        out.flush().map_err(|e| PipelineError::io(path, e))
    }
}

impl Serialize for CarbonSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(&format_stand_key(record.stand), &record.years)?;
        }
        map.end()
    }
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| {
            PipelineError::DataIntegrity(format!("alternatives table has no integer column `{}`", name))
        })
}

/// `stocks[y][k - 1]` is the `stock_<k>_<year>` column of the y-th event year.
fn stock_columns<'a>(
    batch: &'a RecordBatch,
    schema: &WideSchema,
) -> Result<Vec<Vec<&'a Float64Array>>> {
    schema
        .event_years()
        .iter()
        .map(|&year| {
            (1..=schema.species())
                .map(|species| {
                    let name = schema
                        .species_stock_column(species, year)
                        .map(|col| schema.name(col))
                        .ok_or_else(|| {
                            PipelineError::Schema(format!(
                                "layout `{}` has no stock column for species {} at year {}",
                                schema.version(),
                                species,
                                year
                            ))
                        })?;
                    batch
                        .column_by_name(name)
                        .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
                        .ok_or_else(|| {
                            PipelineError::DataIntegrity(format!(
                                "alternatives table has no stock column `{}`",
                                name
                            ))
                        })
                })
                .collect()
        })
        .collect()
}

/// Key rows per unit, units in first-seen order.
fn group_keys(keys: &[KeyRow]) -> Vec<(i64, Vec<&KeyRow>)> {
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut groups: Vec<(i64, Vec<&KeyRow>)> = Vec::new();
    for key in keys {
        let slot = *index.entry(key.unit).or_insert_with(|| {
            groups.push((key.unit, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(key);
    }
    groups
}

/// Carbon series of one holding.
///
/// Stands and schedules follow `keys`. Every schedule gets one value per event year of
/// `schema`; a schedule the tree log never mentions is all zeros, a species or year it
/// does not mention has age 0.
pub fn aggregate(
    alternatives: &RecordBatch,
    keys: &[KeyRow],
    trees: &TreeEvents,
    schema: &WideSchema,
) -> Result<CarbonSeries> {
    let units = int_column(alternatives, "unit")?;
    let schedules = int_column(alternatives, "schedule")?;
    let stocks = stock_columns(alternatives, schema)?;

    let rows: HashMap<(i64, i64), usize> = (0..alternatives.num_rows())
        .map(|r| ((units.value(r), schedules.value(r)), r))
        .collect();

    let mut series = CarbonSeries::default();
    let mut without_trees = 0usize;

    for (unit, stand_keys) in group_keys(keys) {
        let stand = unit as f64;
        let mut years: BTreeMap<u32, Vec<f64>> = schema
            .event_years()
            .iter()
            .map(|&y| (y, Vec::with_capacity(stand_keys.len())))
            .collect();

        for key in stand_keys {
            let row = *rows.get(&(unit, key.schedule as i64)).ok_or_else(|| {
                PipelineError::DataIntegrity(format!(
                    "schedule {} of stand {} has no alternatives row",
                    key.schedule, unit
                ))
            })?;
            let events = trees.schedule(stand, key.schedule);
            if events.is_none() {
                without_trees += 1;
            }

            for (&year, year_stocks) in schema.event_years().iter().zip(&stocks) {
                let co2 = match events {
                    None => 0.0,
                    Some(events) => {
                        let volumes: Vec<f64> = year_stocks.iter().map(|a| a.value(row)).collect();
                        let ages = events.year(year);
                        stand_co2(&volumes, |species| {
                            ages.and_then(|a| a.age(species)).unwrap_or(0.0)
                        })
                    }
                };
                if let Some(values) = years.get_mut(&year) {
                    values.push(co2);
                }
            }
        }

        debug!(unit, schedules = years.values().next().map_or(0, Vec::len), "aggregated stand");
        series.insert(CarbonRecord { stand, years });
    }

    if without_trees > 0 {
        debug!(without_trees, "schedules without tree events were set to zero");
    }
    Ok(series)
}

/// Read both CSVs and `trees.json` from `dir`, write `carbon.json`.
#[tracing::instrument(level = "info", skip(dir, schema), fields(dir = %dir.display(), version = schema.version()))]
pub fn write_carbon_json(dir: &Path, schema: &WideSchema) -> Result<CarbonSeries> {
    let alternatives_path = dir.join(ALTERNATIVES_FILE);
    let key_path = dir.join(ALTERNATIVES_KEY_FILE);
    let trees_path = dir.join(TREES_JSON_FILE);
    for path in [&alternatives_path, &key_path, &trees_path] {
        require_input(path)?;
    }

    let keys = read_key_table(&key_path)?;
    let alternatives = read_csv(&alternatives_path, &["holding", "unit", "schedule"], &[])?;
    let trees = TreeEvents::read_json(&trees_path)?;

    let series = aggregate(&alternatives, &keys, &trees, schema)?;

    let out_path = dir.join(CARBON_JSON_FILE);
    series.write_json(&out_path)?;
    info!(stands = series.len(), path = %out_path.display(), "wrote carbon series");
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaVersion;
    use crate::trees::{ScheduleEvents, SpeciesAges, StandEvents};
    use arrow::{
        array::ArrayRef,
        datatypes::{DataType, Field, Schema},
    };
    use std::sync::Arc;

    const TO_CO2: f64 = 0.5 * (44.0 / 12.0);

    fn schema() -> WideSchema {
        WideSchema::builtin(SchemaVersion::V230).unwrap()
    }

    fn key(unit: i64, schedule: u32) -> KeyRow {
        KeyRow {
            holding: 1,
            unit,
            schedule,
            treatment: String::new(),
        }
    }

    /// `unit, schedule` and every stock column; `stock(unit, schedule, species, year)`.
    fn alternatives(
        schema: &WideSchema,
        rows: &[(i64, u32)],
        skip: Option<&str>,
        stock: impl Fn(i64, u32, u32, u32) -> f64,
    ) -> RecordBatch {
        let mut fields = vec![
            Field::new("unit", DataType::Int64, false),
            Field::new("schedule", DataType::Int64, false),
        ];
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.0))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1 as i64))),
        ];
        for &year in schema.event_years() {
            for species in 1..=schema.species() {
                let name = format!("stock_{}_{}", species, year);
                if Some(name.as_str()) == skip {
                    continue;
                }
                fields.push(Field::new(&name, DataType::Float64, false));
                columns.push(Arc::new(Float64Array::from_iter_values(
                    rows.iter().map(|&(u, s)| stock(u, s, species, year)),
                )));
            }
        }
        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap()
    }

    fn trees_with(stand: f64, schedule: u32, years: &[(u32, &[(u32, f64)])]) -> TreeEvents {
        let mut events = ScheduleEvents::default();
        for (year, ages) in years {
            events
                .years
                .insert(*year, SpeciesAges(ages.iter().copied().collect()));
        }
        let mut trees = TreeEvents::default();
        trees.insert(StandEvents {
            stand,
            schedules: BTreeMap::from([(schedule, events)]),
        });
        trees
    }

    #[test]
    fn pine_only_stand() -> anyhow::Result<()> {
        let schema = schema();
        let alt = alternatives(&schema, &[(1, 0)], None, |_, _, k, _| if k == 1 { 10.0 } else { 0.0 });
        let trees = trees_with(1.0, 0, &[(0, &[(1, 0.0)])]);

        let series = aggregate(&alt, &[key(1, 0)], &trees, &schema)?;
        let record = series.record(1.0).unwrap();
        let expected = 10.0 * (0.7018 + 0.0058) * TO_CO2;
        assert_eq!(record.years.keys().copied().collect::<Vec<_>>(), [0, 5, 10, 20, 25]);
        for values in record.years.values() {
            assert_eq!(values.len(), 1);
            assert!((values[0] - expected).abs() < 1e-6, "{} vs {}", values[0], expected);
        }
        Ok(())
    }

    #[test]
    fn ages_come_from_the_matching_year() -> anyhow::Result<()> {
        let schema = schema();
        let alt = alternatives(&schema, &[(4, 0)], None, |_, _, k, _| if k == 2 { 100.0 } else { 0.0 });
        let trees = trees_with(4.0, 0, &[(0, &[(2, 0.0)]), (10, &[(2, 100.0)])]);

        let series = aggregate(&alt, &[key(4, 0)], &trees, &schema)?;
        let record = series.record(4.0).unwrap();
        let young = 100.0 * (0.7406 + 0.1494) * TO_CO2;
        let old = 100.0 * (0.7406 + 0.1494 * (-1.0f64).exp()) * TO_CO2;
        assert!((record.years[&0][0] - young).abs() < 1e-9);
        assert!((record.years[&10][0] - old).abs() < 1e-9);
        // year 5 is not in the log, so age 0
        assert!((record.years[&5][0] - young).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn stand_missing_from_tree_log_is_all_zero() -> anyhow::Result<()> {
        let schema = schema();
        let rows = [(8, 0), (8, 1)];
        let alt = alternatives(&schema, &rows, None, |_, _, _, _| 50.0);
        let series = aggregate(&alt, &[key(8, 0), key(8, 1)], &TreeEvents::default(), &schema)?;

        let record = series.record(8.0).unwrap();
        assert_eq!(record.years.len(), 5);
        for values in record.years.values() {
            assert_eq!(values, &vec![0.0, 0.0]);
        }
        Ok(())
    }

    #[test]
    fn sequences_follow_key_order() -> anyhow::Result<()> {
        let schema = schema();
        let rows = [(2, 1), (2, 0), (9, 0)];
        let alt = alternatives(&schema, &rows, None, |_, s, k, _| {
            if k == 1 {
                (s + 1) as f64
            } else {
                0.0
            }
        });
        let mut trees = trees_with(2.0, 0, &[]);
        trees.insert(StandEvents {
            stand: 2.0,
            schedules: BTreeMap::from([(0, ScheduleEvents::default()), (1, ScheduleEvents::default())]),
        });

        let keys = [key(9, 0), key(2, 0), key(2, 1)];
        let series = aggregate(&alt, &keys, &trees, &schema)?;
        let stands: Vec<f64> = series.records().iter().map(|r| r.stand).collect();
        assert_eq!(stands, [9.0, 2.0]);
        let pine = (0.7018 + 0.0058) * TO_CO2;
        let values = &series.record(2.0).unwrap().years[&0];
        assert!((values[0] - pine).abs() < 1e-9);
        assert!((values[1] - 2.0 * pine).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn missing_stock_column_is_integrity_error() {
        let schema = schema();
        let alt = alternatives(&schema, &[(1, 0)], Some("stock_38_25"), |_, _, _, _| 1.0);
        let err = aggregate(&alt, &[key(1, 0)], &TreeEvents::default(), &schema).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)), "{err}");
        assert!(err.to_string().contains("stock_38_25"));
    }

    #[test]
    fn key_without_alternatives_row_is_integrity_error() {
        let schema = schema();
        let alt = alternatives(&schema, &[(1, 0)], None, |_, _, _, _| 1.0);
        let err = aggregate(&alt, &[key(1, 0), key(1, 1)], &TreeEvents::default(), &schema)
            .unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)), "{err}");
    }

    #[test]
    fn legacy_layout_has_four_event_years() -> anyhow::Result<()> {
        let schema = WideSchema::builtin(SchemaVersion::V184)?;
        let alt = alternatives(&schema, &[(3, 0)], None, |_, _, _, _| 1.0);
        let series = aggregate(&alt, &[key(3, 0)], &TreeEvents::default(), &schema)?;
        let years: Vec<u32> = series.record(3.0).unwrap().years.keys().copied().collect();
        assert_eq!(years, [0, 5, 10, 20]);
        Ok(())
    }

    #[test]
    fn json_keys_and_merge() -> anyhow::Result<()> {
        let record = |stand: f64, v: f64| CarbonRecord {
            stand,
            years: BTreeMap::from([(0, vec![v]), (5, vec![v, 0.0])]),
        };
        let mut series = CarbonSeries::default();
        series.insert(record(12.0, 1.5));
        series.insert(record(3.0, 2.0));

        let json = serde_json::to_string(&series)?;
        assert_eq!(json, r#"{"12.0":{"0":[1.5],"5":[1.5,0.0]},"3.0":{"0":[2.0],"5":[2.0,0.0]}}"#);

        let mut other = CarbonSeries::default();
        other.insert(record(12.0, 7.0));
        other.insert(record(40.0, 1.0));
        series.merge(other);
        let stands: Vec<f64> = series.records().iter().map(|r| r.stand).collect();
        assert_eq!(stands, [12.0, 3.0, 40.0]);
        assert_eq!(series.record(12.0).unwrap().years[&0], vec![7.0]);

        let dir = tempfile::tempdir()?;
        let path = dir.path().join(CARBON_JSON_FILE);
        series.write_json(&path)?;
        assert_eq!(CarbonSeries::read_json(&path)?, series);
        Ok(())
    }

    #[test]
    fn missing_inputs_are_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let err = write_carbon_json(dir.path(), &schema()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
        Ok(())
    }
}
