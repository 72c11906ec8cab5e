// src/schema/layout.rs

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, str::FromStr};

use crate::error::{PipelineError, Result};

/// Cutting methods, in the order the simulator writes them for each harvest year.
pub const CUTTING_METHODS: [&str; 5] = ["first", "below", "above", "even", "clearcut"];

/// Number of tree species the simulator reports stock volumes for.
pub const SPECIES_COUNT: u32 = 38;

/// Built-in wide-table versions. A run always names one; files are never sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    /// Current layout: 230 columns, checkpoints 0/5/10/20/25.
    V230,
    /// Legacy layout: 184 columns, checkpoints 0/5/10/20.
    V184,
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaVersion::V230 => write!(f, "v230"),
            SchemaVersion::V184 => write!(f, "v184"),
        }
    }
}

impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "v230" | "230" => Ok(SchemaVersion::V230),
            "v184" | "184" => Ok(SchemaVersion::V184),
            other => Err(format!("unknown schema version `{}` (expected v230 or v184)", other)),
        }
    }
}

/// Serializable description of a wide-table layout. Ranges are half-open `[start, end)`
/// column positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaLayout {
    pub version: String,
    pub width: usize,
    /// First column multiplied by the area column.
    pub area_scaled_from: usize,
    /// Harvest-activity columns summed for pruning and read for treatment keys.
    pub activity_span: [usize; 2],
    /// Metric columns copied into the alternatives table, in order.
    pub projection: Vec<[usize; 2]>,
    pub event_years: Vec<u32>,
    pub species: u32,
    pub names: Vec<String>,
}

static V230_LAYOUT: Lazy<SchemaLayout> = Lazy::new(|| SchemaLayout {
    version: SchemaVersion::V230.to_string(),
    width: 230,
    area_scaled_from: 2,
    activity_span: [20, 40],
    projection: vec![[2, 12], [16, 20], [40, 230]],
    event_years: vec![0, 5, 10, 20, 25],
    species: SPECIES_COUNT,
    names: name_table(&[0, 5, 10, 20, 25], SPECIES_COUNT),
});

// The legacy simulator output left NPVs unscaled, so scaling starts at the stock block.
static V184_LAYOUT: Lazy<SchemaLayout> = Lazy::new(|| SchemaLayout {
    version: SchemaVersion::V184.to_string(),
    width: 184,
    area_scaled_from: 7,
    activity_span: [17, 32],
    projection: vec![[2, 11], [14, 17], [32, 184]],
    event_years: vec![0, 5, 10, 20],
    species: SPECIES_COUNT,
    names: name_table(&[0, 5, 10, 20], SPECIES_COUNT),
});

impl SchemaLayout {
    pub fn builtin(version: SchemaVersion) -> &'static SchemaLayout {
        match version {
            SchemaVersion::V230 => &V230_LAYOUT,
            SchemaVersion::V184 => &V184_LAYOUT,
        }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        crate::error::require_input(path)?;
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        serde_yaml::from_str(&text).map_err(|e| {
            let location = e
                .location()
                .map(|l| format!("line {} column {}", l.line(), l.column()))
                .unwrap_or_else(|| "document".to_string());
            PipelineError::format(path, location, e)
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| PipelineError::Schema(e.to_string()))
    }
}

/// Column names in simulator order. `stock_years` are the checkpoints; harvests happen
/// at every checkpoint but the first.
fn name_table(stock_years: &[u32], species: u32) -> Vec<String> {
    let harvest_years = &stock_years[1..];
    let mut names = vec!["identifier".to_string(), "area".to_string()];
    names.extend((1..=5).map(|rate| format!("npv_{}_percent", rate)));
    names.extend(stock_years.iter().map(|y| format!("stock_{}", y)));
    names.extend(harvest_years.iter().map(|y| format!("harvest_{}", y)));
    names.extend(harvest_years.iter().map(|y| format!("harvest_value_{}", y)));
    for year in harvest_years {
        for method in CUTTING_METHODS {
            names.push(format!("harvest_value_{}_{}", method, year));
        }
    }
    for k in 1..=species {
        for year in stock_years {
            names.push(format!("stock_{}_{}", k, year));
        }
    }
    names
}
