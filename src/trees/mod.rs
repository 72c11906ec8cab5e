//! Tree cohort events: stand → schedule → year → species → cohort age.

pub mod parser;

use serde::{
    ser::{SerializeMap, Serializer},
    Deserialize, Serialize,
};
use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
};
use tracing::info;

use crate::error::{require_input, PipelineError, Result};
use crate::files::{TREES_JSON_FILE, TREE_LOG_FILE};
use crate::keyed::{format_stand_key, parse_stand_key, stand_bits, OrderedEntries};

pub use parser::TreeLogParser;

/// Cohort age per species index; last write wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeciesAges(pub BTreeMap<u32, f64>);

impl SpeciesAges {
    pub fn age(&self, species: u32) -> Option<f64> {
        self.0.get(&species).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleEvents {
    pub years: BTreeMap<u32, SpeciesAges>,
}

impl ScheduleEvents {
    pub fn year(&self, year: u32) -> Option<&SpeciesAges> {
        self.years.get(&year)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StandEvents {
    pub stand: f64,
    pub schedules: BTreeMap<u32, ScheduleEvents>,
}

/// All stands of one tree log, in the order they were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeEvents {
    stands: Vec<StandEvents>,
    index: HashMap<u64, usize>,
}

impl TreeEvents {
    /// Insert a stand; a stand id seen before is replaced in place.
    pub fn insert(&mut self, stand: StandEvents) {
        match self.index.get(&stand_bits(stand.stand)) {
            Some(&slot) => self.stands[slot] = stand,
            None => {
                self.index.insert(stand_bits(stand.stand), self.stands.len());
                self.stands.push(stand);
            }
        }
    }

    pub fn stand(&self, stand: f64) -> Option<&StandEvents> {
        self.index
            .get(&stand_bits(stand))
            .map(|&slot| &self.stands[slot])
    }

    pub fn schedule(&self, stand: f64, schedule: u32) -> Option<&ScheduleEvents> {
        self.stand(stand)?.schedules.get(&schedule)
    }

    pub fn stands(&self) -> &[StandEvents] {
        &self.stands
    }

    pub fn len(&self) -> usize {
        self.stands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stands.is_empty()
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        require_input(path)?;
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let OrderedEntries(entries): OrderedEntries<BTreeMap<u32, ScheduleEvents>> =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                PipelineError::format(path, format!("line {} column {}", e.line(), e.column()), e)
            })?;

        let mut events = TreeEvents::default();
        for (key, schedules) in entries {
            let stand = parse_stand_key(&key).ok_or_else(|| {
                PipelineError::format(path, format!("stand key `{}`", key), "not a number")
            })?;
            events.insert(StandEvents { stand, schedules });
        }
        Ok(events)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer(&mut out, self).map_err(|e| PipelineError::output(path, e))?;
        out.flush().map_err(|e| PipelineError::io(path, e))
    }
}

impl Serialize for TreeEvents {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.stands.len()))?;
        for stand in &self.stands {
            map.serialize_entry(&format_stand_key(stand.stand), &stand.schedules)?;
        }
        map.end()
    }
}

/// Parse `<dir>/trees.txt` and write `<dir>/trees.json`.
#[tracing::instrument(level = "info", skip(dir), fields(dir = %dir.display()))]
pub fn write_trees_json(dir: &Path) -> Result<TreeEvents> {
    let log_path = dir.join(TREE_LOG_FILE);
    require_input(&log_path)?;

    let text = fs::read_to_string(&log_path).map_err(|e| PipelineError::io(&log_path, e))?;
    let events = parser::parse_tree_log(&text, &log_path)?;

    let out_path = dir.join(TREES_JSON_FILE);
    events.write_json(&out_path)?;
    info!(stands = events.len(), path = %out_path.display(), "wrote tree events");
    Ok(events)
}
