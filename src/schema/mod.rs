//! Positional column contract of the simulator's wide table.
//!
//! The wide table has no header: a column means what its position says it means.
//! `WideSchema` is that mapping made explicit and validated, and every stage that
//! touches wide-table columns takes one as a parameter.

pub mod layout;
pub mod metric;

use std::{
    collections::{HashMap, HashSet},
    ops::Range,
};

use crate::error::{PipelineError, Result};

pub use layout::{SchemaLayout, SchemaVersion, CUTTING_METHODS, SPECIES_COUNT};
pub use metric::Metric;

#[derive(Debug, Clone)]
pub struct WideSchema {
    version: String,
    names: Vec<String>,
    area_scaled_from: usize,
    activity_span: Range<usize>,
    /// Treatment label per activity column, same order as `activity_span`.
    activity_labels: Vec<String>,
    projection: Vec<Range<usize>>,
    event_years: Vec<u32>,
    species: u32,
    /// `(species, year)` → column of its stock volume.
    species_stock: HashMap<(u32, u32), usize>,
}

impl WideSchema {
    pub fn builtin(version: SchemaVersion) -> Result<Self> {
        Self::from_layout(SchemaLayout::builtin(version).clone())
    }

    /// Validate a layout. Every inconsistency is a `SchemaError`: the table is a
    /// versioned contract and a mismatch means the wrong version is in use.
    pub fn from_layout(layout: SchemaLayout) -> Result<Self> {
        let SchemaLayout {
            version,
            width,
            area_scaled_from,
            activity_span,
            projection,
            event_years,
            species,
            names,
        } = layout;

        if names.len() != width {
            return Err(PipelineError::Schema(format!(
                "layout `{}` declares {} columns but its name table has {} entries",
                version,
                width,
                names.len()
            )));
        }
        if width < 3 {
            return Err(PipelineError::Schema(format!(
                "layout `{}` needs identifier, area and at least one metric column",
                version
            )));
        }

        let mut seen = HashSet::with_capacity(width);
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(PipelineError::Schema(format!(
                    "layout `{}` names column `{}` twice",
                    version, name
                )));
            }
        }

        if !(2..=width).contains(&area_scaled_from) {
            return Err(PipelineError::Schema(format!(
                "layout `{}`: area scaling must start within 2..={}, got {}",
                version, width, area_scaled_from
            )));
        }

        let activity_span = metric_range(&version, "activity span", activity_span, width)?;
        let projection = projection
            .into_iter()
            .map(|r| metric_range(&version, "projection", r, width))
            .collect::<Result<Vec<_>>>()?;

        let metrics: Vec<Metric> = names.iter().map(|n| Metric::parse(n)).collect();
        if metrics[0] != Metric::Identifier || metrics[1] != Metric::Area {
            return Err(PipelineError::Schema(format!(
                "layout `{}` must start with `identifier` and `area`, found `{}` and `{}`",
                version, names[0], names[1]
            )));
        }
        let activity_labels = activity_span
            .clone()
            .map(|col| {
                metrics[col].treatment_label().ok_or_else(|| {
                    PipelineError::Schema(format!(
                        "layout `{}`: activity column {} (`{}`) is not a per-method harvest value",
                        version, col, names[col]
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if species < 2 {
            return Err(PipelineError::Schema(format!(
                "layout `{}` must report at least pine and spruce, got {} species",
                version, species
            )));
        }
        if event_years.is_empty() {
            return Err(PipelineError::Schema(format!(
                "layout `{}` lists no event years",
                version
            )));
        }

        let species_stock: HashMap<(u32, u32), usize> = metrics
            .iter()
            .enumerate()
            .filter_map(|(col, m)| match m {
                Metric::SpeciesStock { species, year } => Some(((*species, *year), col)),
                _ => None,
            })
            .collect();
        for &year in &event_years {
            for k in 1..=species {
                let projected = species_stock
                    .get(&(k, year))
                    .is_some_and(|col| projection.iter().any(|r| r.contains(col)));
                if !projected {
                    return Err(PipelineError::Schema(format!(
                        "layout `{}` does not project the stock of species {} at year {}",
                        version, k, year
                    )));
                }
            }
        }

        Ok(Self {
            version,
            names,
            area_scaled_from,
            activity_span,
            activity_labels,
            projection,
            event_years,
            species,
            species_stock,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn width(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, col: usize) -> &str {
        &self.names[col]
    }

    pub fn area_scaled_from(&self) -> usize {
        self.area_scaled_from
    }

    pub fn activity_span(&self) -> Range<usize> {
        self.activity_span.clone()
    }

    /// `(column, label)` for every activity column.
    pub fn activity_columns(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.activity_span
            .clone()
            .zip(self.activity_labels.iter().map(String::as_str))
    }

    /// Column positions copied into the alternatives table, in output order.
    pub fn projected_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.projection.iter().flat_map(|r| r.clone())
    }

    pub fn event_years(&self) -> &[u32] {
        &self.event_years
    }

    pub fn species(&self) -> u32 {
        self.species
    }

    /// Column holding the stock volume of `species` at `year`.
    pub fn species_stock_column(&self, species: u32, year: u32) -> Option<usize> {
        self.species_stock.get(&(species, year)).copied()
    }

    pub fn to_layout(&self) -> SchemaLayout {
        SchemaLayout {
            version: self.version.clone(),
            width: self.width(),
            area_scaled_from: self.area_scaled_from,
            activity_span: [self.activity_span.start, self.activity_span.end],
            projection: self.projection.iter().map(|r| [r.start, r.end]).collect(),
            event_years: self.event_years.clone(),
            species: self.species,
            names: self.names.clone(),
        }
    }
}

fn metric_range(version: &str, what: &str, r: [usize; 2], width: usize) -> Result<Range<usize>> {
    let [start, end] = r;
    if start < 2 || start > end || end > width {
        return Err(PipelineError::Schema(format!(
            "layout `{}`: {} [{}, {}) is outside the metric columns 2..{}",
            version, what, start, end, width
        )));
    }
    Ok(start..end)
}
